mod telegram;

pub use telegram::TelegramTransport;

use std::time::Duration;

use async_trait::async_trait;

/// Attempts per message, rate-limit retries included.
pub const MAX_ATTEMPTS: u32 = 3;

/// Wait applied when a rate-limit response carries no usable `retry_after`.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Outcome of a single delivery attempt that reached the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportResponse {
    Delivered,
    RateLimited { retry_after: Option<Duration> },
    Rejected { status: u16, body: String },
}

/// Trait for outbound message transports.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn post_message(&self, text: &str) -> Result<TransportResponse, NotificationError>;

    fn name(&self) -> &str;

    /// Release any pooled connection held by the transport.
    async fn close(&self) {}
}

/// Errors from the notification system.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Configuration for the Telegram channel.
#[derive(Clone)]
pub struct NotificationConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub api_url: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for NotificationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationConfig")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("api_url", &self.api_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl NotificationConfig {
    /// Load from environment variables.
    pub fn from_env() -> Result<Self, NotificationError> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| NotificationError::Config("TELEGRAM_BOT_TOKEN not set".into()))?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| NotificationError::Config("TELEGRAM_CHAT_ID not set".into()))?;

        Ok(Self {
            bot_token,
            chat_id,
            api_url: std::env::var("TELEGRAM_API_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| telegram::TELEGRAM_API.to_string()),
            timeout: Duration::from_secs(
                std::env::var("TELEGRAM_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
        })
    }
}

/// Delivers pre-formatted messages to one fixed destination.
///
/// `send` never fails loudly: every error is logged and folded into `false`.
pub struct Notifier {
    transport: Box<dyn MessageTransport>,
}

impl Notifier {
    pub fn new(transport: Box<dyn MessageTransport>) -> Self {
        Self { transport }
    }

    /// Build a notifier backed by the Telegram Bot API.
    pub fn telegram(config: &NotificationConfig) -> Result<Self, NotificationError> {
        let transport = TelegramTransport::new(config)?;
        tracing::info!("Telegram notifications enabled (chat {})", config.chat_id);
        Ok(Self::new(Box::new(transport)))
    }

    /// Send a message, retrying on rate limits and transport errors.
    ///
    /// Rate limits wait the server-suggested delay; transport errors back off
    /// `2^attempt` seconds. Both consume the same budget of [`MAX_ATTEMPTS`].
    /// A rejected request is not retried.
    pub async fn send(&self, message: &str) -> bool {
        let name = self.transport.name();

        for attempt in 0..MAX_ATTEMPTS {
            let last_attempt = attempt + 1 == MAX_ATTEMPTS;

            match self.transport.post_message(message).await {
                Ok(TransportResponse::Delivered) => {
                    tracing::debug!("Sent notification via {}", name);
                    return true;
                }
                Ok(TransportResponse::RateLimited { retry_after }) => {
                    let wait = retry_after.unwrap_or(DEFAULT_RETRY_AFTER);
                    if last_attempt {
                        tracing::error!(
                            "{} rate limited on final attempt {}/{}, giving up",
                            name,
                            attempt + 1,
                            MAX_ATTEMPTS
                        );
                        break;
                    }
                    tracing::warn!(
                        "{} rate limited, retrying in {}s ({}/{})",
                        name,
                        wait.as_secs_f64(),
                        attempt + 1,
                        MAX_ATTEMPTS
                    );
                    tokio::time::sleep(wait).await;
                }
                Ok(TransportResponse::Rejected { status, body }) => {
                    tracing::error!("{} API error {}: {}", name, status, body);
                    return false;
                }
                Err(e) => {
                    tracing::error!(
                        "{} send error (attempt {}/{}): {}",
                        name,
                        attempt + 1,
                        MAX_ATTEMPTS,
                        e
                    );
                    if !last_attempt {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                    }
                }
            }
        }

        false
    }

    /// Release the underlying transport. Call once on shutdown.
    pub async fn close(self) {
        self.transport.close().await;
        tracing::debug!("Closed {} transport", self.transport.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Replays a scripted sequence of responses and counts calls.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<TransportResponse, NotificationError>>>,
        calls: Arc<Mutex<u32>>,
        closed: Arc<Mutex<bool>>,
    }

    impl ScriptedTransport {
        fn new(
            script: Vec<Result<TransportResponse, NotificationError>>,
        ) -> (Self, Arc<Mutex<u32>>, Arc<Mutex<bool>>) {
            let calls = Arc::new(Mutex::new(0));
            let closed = Arc::new(Mutex::new(false));
            (
                Self {
                    script: Mutex::new(script.into()),
                    calls: calls.clone(),
                    closed: closed.clone(),
                },
                calls,
                closed,
            )
        }
    }

    #[async_trait]
    impl MessageTransport for ScriptedTransport {
        async fn post_message(&self, _text: &str) -> Result<TransportResponse, NotificationError> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(TransportResponse::Delivered))
        }

        fn name(&self) -> &str {
            "scripted"
        }

        async fn close(&self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    fn timeout() -> Result<TransportResponse, NotificationError> {
        Err(NotificationError::Transport("operation timed out".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivered_first_try() {
        let (transport, calls, _) = ScriptedTransport::new(vec![Ok(TransportResponse::Delivered)]);
        let notifier = Notifier::new(Box::new(transport));

        let start = Instant::now();
        assert!(notifier.send("hello").await);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_twice_then_delivered() {
        let (transport, calls, _) = ScriptedTransport::new(vec![
            Ok(TransportResponse::RateLimited {
                retry_after: Some(Duration::from_secs(3)),
            }),
            Ok(TransportResponse::RateLimited {
                retry_after: Some(Duration::from_secs(7)),
            }),
            Ok(TransportResponse::Delivered),
        ]);
        let notifier = Notifier::new(Box::new(transport));

        let start = Instant::now();
        assert!(notifier.send("hello").await);
        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_without_hint_uses_default_wait() {
        let (transport, calls, _) = ScriptedTransport::new(vec![
            Ok(TransportResponse::RateLimited { retry_after: None }),
            Ok(TransportResponse::Delivered),
        ]);
        let notifier = Notifier::new(Box::new(transport));

        let start = Instant::now();
        assert!(notifier.send("hello").await);
        assert_eq!(*calls.lock().unwrap(), 2);
        assert_eq!(start.elapsed(), DEFAULT_RETRY_AFTER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_exhaust_budget_with_exponential_backoff() {
        let (transport, calls, _) = ScriptedTransport::new(vec![timeout(), timeout(), timeout()]);
        let notifier = Notifier::new(Box::new(transport));

        let start = Instant::now();
        assert!(!notifier.send("hello").await);
        assert_eq!(*calls.lock().unwrap(), 3);
        // 1s + 2s, no sleep after the final attempt
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_is_not_retried() {
        let (transport, calls, _) = ScriptedTransport::new(vec![Ok(TransportResponse::Rejected {
            status: 400,
            body: "Bad Request: can't parse entities".into(),
        })]);
        let notifier = Notifier::new(Box::new(transport));

        let start = Instant::now();
        assert!(!notifier.send("<b>broken").await);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_then_delivered() {
        let (transport, calls, _) =
            ScriptedTransport::new(vec![timeout(), Ok(TransportResponse::Delivered)]);
        let notifier = Notifier::new(Box::new(transport));

        let start = Instant::now();
        assert!(notifier.send("hello").await);
        assert_eq!(*calls.lock().unwrap(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_on_every_attempt_fails() {
        let limited = || {
            Ok(TransportResponse::RateLimited {
                retry_after: Some(Duration::from_secs(2)),
            })
        };
        let (transport, calls, _) = ScriptedTransport::new(vec![limited(), limited(), limited()]);
        let notifier = Notifier::new(Box::new(transport));

        let start = Instant::now();
        assert!(!notifier.send("hello").await);
        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_close_releases_transport() {
        let (transport, _, closed) = ScriptedTransport::new(vec![]);
        let notifier = Notifier::new(Box::new(transport));

        notifier.close().await;
        assert!(*closed.lock().unwrap());
    }

    #[test]
    fn test_config_debug_redacts_token() {
        let config = NotificationConfig {
            bot_token: "123456:SECRET".into(),
            chat_id: "-10042".into(),
            api_url: "https://api.telegram.org".into(),
            timeout: Duration::from_secs(10),
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("SECRET"));
        assert!(rendered.contains("-10042"));
    }
}
