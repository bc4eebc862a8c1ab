use crate::error::{Result, SessionError};
use std::time::Duration;
use tracing::debug;

/// Polls a dev server until it answers HTTP
///
/// Any response counts as ready, including 4xx and 5xx: the server is up even if the
/// root route errors.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    client: reqwest::Client,
    attempts: u32,
    interval: Duration,
}

impl ReadinessProbe {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        let request_timeout = interval.max(Duration::from_millis(500));
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            attempts: attempts.max(1),
            interval,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the attempt number that succeeded
    pub async fn wait_until_ready(&self, url: &str) -> Result<u32> {
        for attempt in 1..=self.attempts {
            match self.client.get(url).send().await {
                Ok(response) => {
                    debug!(
                        "{} answered {} on attempt {}",
                        url,
                        response.status(),
                        attempt
                    );
                    return Ok(attempt);
                }
                Err(e) => {
                    debug!("{} not ready (attempt {}): {}", url, attempt, e);
                }
            }

            if attempt < self.attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        Err(SessionError::NotReady {
            attempts: self.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_error_status_counts_as_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await;
        });

        let probe = ReadinessProbe::new(3, Duration::from_millis(50));
        let attempt = probe
            .wait_until_ready(&format!("http://{}/", addr))
            .await
            .unwrap();
        assert_eq!(attempt, 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = ReadinessProbe::new(2, Duration::from_millis(10));
        let err = probe
            .wait_until_ready(&format!("http://{}/", addr))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Dev server did not become ready after 2 attempts"
        );
    }
}
