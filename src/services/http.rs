// Shared HTTP plumbing: authenticated client, bounded retry, binary downloads

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE};
use reqwest::Client;
use std::future::Future;
use std::time::Duration;

use crate::models::ServerConnection;

/// Bounded retry with linearly increasing backoff (step, 2*step, ...)
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub step: Duration,
}

impl RetryPolicy {
    pub fn linear(attempts: u32, step: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            step,
        }
    }

    /// A single attempt, no retry
    pub fn once() -> Self {
        Self::linear(1, Duration::ZERO)
    }

    /// Delay before the next attempt after `failed` attempts have failed
    pub fn delay_after(&self, failed: u32) -> Duration {
        self.step.saturating_mul(failed)
    }

    /// Run `op` until it succeeds or the attempts are exhausted
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut failed = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    failed += 1;
                    if failed >= self.attempts {
                        return Err(e.context(format!("{} failed after {} attempt(s)", label, failed)));
                    }
                    let wait = self.delay_after(failed);
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        label,
                        failed,
                        self.attempts,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

/// Build a client that authenticates against the media server.
///
/// The API key header takes precedence over the session cookie; without either
/// the server answers image requests with its login page instead of bytes.
pub fn authenticated_client(
    conn: Option<&ServerConnection>,
    api_key: Option<&str>,
    timeout: Duration,
) -> Result<Client> {
    let mut headers = HeaderMap::new();

    let api_key = api_key
        .filter(|k| !k.trim().is_empty())
        .or_else(|| conn.and_then(|c| c.api_key.as_deref()))
        .filter(|k| !k.trim().is_empty());

    if let Some(key) = api_key {
        let mut value = HeaderValue::from_str(key.trim()).context("Invalid API key")?;
        value.set_sensitive(true);
        headers.insert("ApiKey", value);
    } else if let Some(cookie) = conn.and_then(|c| c.session_cookie.as_ref()) {
        if !cookie.name.is_empty() {
            let mut value = HeaderValue::from_str(&format!("{}={}", cookie.name, cookie.value))
                .context("Invalid session cookie")?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }
    }

    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Downloaded body plus the declared content type
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Fetch a URL as bytes, retrying per `policy`
pub async fn download(client: &Client, url: &str, policy: RetryPolicy) -> Result<Downloaded> {
    policy
        .run(&format!("Download {}", url), || async move {
            let response = client
                .get(url)
                .send()
                .await
                .with_context(|| format!("Failed to request {}", url))?;

            if !response.status().is_success() {
                anyhow::bail!("Image download failed with status: {}", response.status());
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string());

            // An HTML body here means the auth header/cookie was rejected
            if content_type
                .as_deref()
                .is_some_and(|ct| ct.starts_with("text/html"))
            {
                anyhow::bail!("Server returned an HTML page instead of image data for {}", url);
            }

            let bytes = response.bytes().await?.to_vec();
            Ok(Downloaded {
                bytes,
                content_type,
            })
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_linear_delays() {
        let policy = RetryPolicy::linear(3, Duration::from_secs(2));
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(RetryPolicy::linear(0, Duration::ZERO).attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_stops_after_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::linear(3, Duration::ZERO);

        let result = policy
            .run("flaky", || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 2 {
                    anyhow::bail!("transient");
                }
                Ok(n)
            })
            .await
            .unwrap();

        assert_eq!(result, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::linear(3, Duration::ZERO);

        let result: Result<()> = policy
            .run("always failing", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("down")
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_download_sends_api_key_over_cookie() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/image").header("ApiKey", "k123");
            then.status(200)
                .header("content-type", "image/png")
                .body("png-bytes");
        });

        let conn = ServerConnection::parse(&serde_json::json!({
            "Scheme": "http",
            "Host": "localhost",
            "Port": 9999,
            "ApiKey": "k123",
            "SessionCookie": {"Name": "session", "Value": "zzz"},
        }))
        .unwrap();
        let client = authenticated_client(Some(&conn), None, Duration::from_secs(5)).unwrap();

        let got = download(&client, &server.url("/image"), RetryPolicy::once())
            .await
            .unwrap();

        mock.assert();
        assert_eq!(got.bytes, b"png-bytes");
        assert_eq!(got.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_download_rejects_login_page() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/image");
            then.status(200)
                .header("content-type", "text/html; charset=utf-8")
                .body("<html>login</html>");
        });

        let client = authenticated_client(None, None, Duration::from_secs(5)).unwrap();
        let policy = RetryPolicy::linear(2, Duration::ZERO);
        let result = download(&client, &server.url("/image"), policy).await;

        assert!(result.is_err());
        mock.assert_calls(2);
    }
}
