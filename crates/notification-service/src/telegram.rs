use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::{MessageTransport, NotificationConfig, NotificationError, TransportResponse};

pub(crate) const TELEGRAM_API: &str = "https://api.telegram.org";

/// Telegram Bot API `sendMessage` transport.
pub struct TelegramTransport {
    client: Client,
    send_url: String,
    chat_id: String,
}

impl std::fmt::Debug for TelegramTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // send_url embeds the bot token
        f.debug_struct("TelegramTransport")
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

impl TelegramTransport {
    pub fn new(config: &NotificationConfig) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NotificationError::Config(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            send_url: format!(
                "{}/bot{}/sendMessage",
                config.api_url.trim_end_matches('/'),
                config.bot_token
            ),
            chat_id: config.chat_id.clone(),
        })
    }
}

/// Extract the suggested wait from a 429 body, falling back to a `Retry-After` header value.
fn parse_retry_after(body: &str, header: Option<&str>) -> Option<Duration> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.parameters)
        .and_then(|p| p.retry_after)
        .or_else(|| header.and_then(|h| h.trim().parse().ok()))
        .map(Duration::from_secs)
}

#[async_trait]
impl MessageTransport for TelegramTransport {
    async fn post_message(&self, text: &str) -> Result<TransportResponse, NotificationError> {
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        let resp = self
            .client
            .post(&self.send_url)
            .json(&payload)
            .send()
            .await
            // without_url keeps the token out of logs
            .map_err(|e| NotificationError::Transport(e.without_url().to_string()))?;

        let status = resp.status();
        if status == StatusCode::OK {
            return Ok(TransportResponse::Delivered);
        }

        let header = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = resp
            .text()
            .await
            .map_err(|e| NotificationError::Transport(e.without_url().to_string()))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(TransportResponse::RateLimited {
                retry_after: parse_retry_after(&body, header.as_deref()),
            });
        }

        Ok(TransportResponse::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn config() -> NotificationConfig {
        NotificationConfig {
            bot_token: "123456:ABC".into(),
            chat_id: "-100123".into(),
            api_url: "https://api.telegram.org/".into(),
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_retry_after_from_body() {
        let body = r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 14","parameters":{"retry_after":14}}"#;
        assert_eq!(parse_retry_after(body, None), Some(Duration::from_secs(14)));
    }

    #[test]
    fn test_retry_after_body_wins_over_header() {
        let body = r#"{"ok":false,"parameters":{"retry_after":3}}"#;
        assert_eq!(
            parse_retry_after(body, Some("30")),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_retry_after_header_fallback() {
        assert_eq!(
            parse_retry_after("<html>busy</html>", Some(" 8 ")),
            Some(Duration::from_secs(8))
        );
    }

    #[test]
    fn test_retry_after_missing() {
        assert_eq!(parse_retry_after(r#"{"ok":false}"#, None), None);
        assert_eq!(parse_retry_after("", None), None);
    }

    #[test]
    fn test_send_url_and_debug_hide_token() {
        let transport = TelegramTransport::new(&config()).unwrap();
        assert_eq!(
            transport.send_url,
            "https://api.telegram.org/bot123456:ABC/sendMessage"
        );
        assert!(!format!("{:?}", transport).contains("ABC"));
    }

    fn http_response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut response = format!("HTTP/1.1 {}\r\n", status);
        for (name, value) in headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }
        response.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        ));
        response
    }

    fn request_complete(buf: &[u8]) -> bool {
        let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let head = String::from_utf8_lossy(&buf[..header_end]);
        let content_length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        buf.len() >= header_end + 4 + content_length
    }

    /// Serve one canned HTTP response on a local port; yields the raw request.
    async fn serve_once(response: String) -> (NotificationConfig, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !request_complete(&buf) {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            tx.send(String::from_utf8_lossy(&buf).into_owned()).ok();
        });

        let config = NotificationConfig {
            api_url: format!("http://{}", addr),
            ..config()
        };
        (config, rx)
    }

    #[tokio::test]
    async fn test_post_ok_is_delivered() {
        let (config, request) =
            serve_once(http_response("200 OK", &[], r#"{"ok":true,"result":{}}"#)).await;
        let transport = TelegramTransport::new(&config).unwrap();

        let response = transport.post_message("<b>hi</b>").await.unwrap();
        assert_eq!(response, TransportResponse::Delivered);

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /bot123456:ABC/sendMessage"));
        assert!(request.contains(r#""chat_id":"-100123""#));
        assert!(request.contains(r#""parse_mode":"HTML""#));
        assert!(request.contains(r#""text":"<b>hi</b>""#));
    }

    #[tokio::test]
    async fn test_post_429_reads_retry_after_from_body() {
        let body = r#"{"ok":false,"error_code":429,"parameters":{"retry_after":7}}"#;
        let (config, _request) =
            serve_once(http_response("429 Too Many Requests", &[], body)).await;
        let transport = TelegramTransport::new(&config).unwrap();

        assert_eq!(
            transport.post_message("hi").await.unwrap(),
            TransportResponse::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
    }

    #[tokio::test]
    async fn test_post_429_falls_back_to_header() {
        let (config, _request) = serve_once(http_response(
            "429 Too Many Requests",
            &[("Retry-After", "3")],
            "slow down",
        ))
        .await;
        let transport = TelegramTransport::new(&config).unwrap();

        assert_eq!(
            transport.post_message("hi").await.unwrap(),
            TransportResponse::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            }
        );
    }

    #[tokio::test]
    async fn test_post_other_status_is_rejected_with_body() {
        let (config, _request) = serve_once(http_response("400 Bad Request", &[], "bad")).await;
        let transport = TelegramTransport::new(&config).unwrap();

        assert_eq!(
            transport.post_message("hi").await.unwrap(),
            TransportResponse::Rejected {
                status: 400,
                body: "bad".into()
            }
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = NotificationConfig {
            api_url: format!("http://{}", addr),
            ..config()
        };
        let transport = TelegramTransport::new(&config).unwrap();

        match transport.post_message("hi").await {
            Err(NotificationError::Transport(msg)) => assert!(!msg.contains("ABC")),
            other => panic!("expected transport error, got {:?}", other),
        }
    }
}
