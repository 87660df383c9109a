//! HTTP browsing sessions routed through the egress
//!
//! Each session is a brand-new `reqwest::Client` with its own cookie jar, so
//! nothing a previous attempt picked up (cookies, pooled connections, circuit
//! affinity) carries over to the next one.

use crate::config::SessionConfig;
use crate::crawler::fetcher::{AttemptError, PageResponse, Session, SessionProvider};
use async_trait::async_trait;
use reqwest::{Client, Proxy};
use std::time::Duration;
use tracing::trace;

/// Builds one HTTP client per fetch attempt
#[derive(Debug, Clone)]
pub struct HttpSessionProvider {
    user_agent: String,
    connect_timeout: Duration,
    challenge_settle: Duration,
}

impl HttpSessionProvider {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            challenge_settle: Duration::from_millis(config.challenge_settle_ms),
        }
    }
}

impl SessionProvider for HttpSessionProvider {
    type Session = HttpSession;

    fn acquire(&self, proxy: &str) -> Result<HttpSession, AttemptError> {
        let proxy = Proxy::all(proxy)
            .map_err(|e| AttemptError::Session(format!("invalid proxy '{}': {}", proxy, e)))?;

        let client = Client::builder()
            .user_agent(&self.user_agent)
            .proxy(proxy)
            .cookie_store(true)
            .connect_timeout(self.connect_timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| AttemptError::Session(e.to_string()))?;

        trace!("Session acquired");
        Ok(HttpSession {
            client,
            challenge_settle: self.challenge_settle,
        })
    }

    fn release(&self, session: HttpSession) {
        drop(session);
        trace!("Session released");
    }
}

/// One attempt's HTTP client
pub struct HttpSession {
    client: Client,
    challenge_settle: Duration,
}

#[async_trait]
impl Session for HttpSession {
    async fn navigate(&mut self, url: &str) -> Result<PageResponse, AttemptError> {
        let response = self.client.get(url).send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;

        Ok(PageResponse { status, body })
    }

    /// Waits for the challenge script's grace period, then asks again with
    /// whatever cookies the challenge response set
    async fn resolve_challenge(&mut self, url: &str) -> Result<PageResponse, AttemptError> {
        tokio::time::sleep(self.challenge_settle).await;
        self.navigate(url).await
    }
}

fn classify(err: reqwest::Error) -> AttemptError {
    if err.is_timeout() {
        AttemptError::Network("request timeout".to_string())
    } else if err.is_connect() {
        AttemptError::Network(format!("connection failed: {}", err))
    } else {
        AttemptError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::fetcher::{Fetcher, RetryingFetcher};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // The mock server acts as the forward proxy; the target host never resolves
    const TARGET: &str = "http://catalog.invalid/brands";

    fn provider() -> HttpSessionProvider {
        HttpSessionProvider::new(&SessionConfig {
            challenge_settle_ms: 0,
            ..SessionConfig::default()
        })
    }

    fn fetcher() -> RetryingFetcher<HttpSessionProvider> {
        RetryingFetcher::new(
            provider(),
            Duration::from_secs(10),
            SessionConfig::default().challenge_markers,
        )
    }

    #[tokio::test]
    async fn test_requests_go_through_proxy() {
        let proxy = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>brands</html>"))
            .expect(1)
            .mount(&proxy)
            .await;

        let body = fetcher().fetch(TARGET, &proxy.uri(), 3).await.unwrap();
        assert_eq!(body, "<html>brands</html>");
    }

    #[tokio::test]
    async fn test_server_errors_exhaust_attempts() {
        let proxy = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&proxy)
            .await;

        let failure = fetcher().fetch(TARGET, &proxy.uri(), 3).await.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.last_error, AttemptError::Status(500));
    }

    #[tokio::test]
    async fn test_challenge_is_resolved_within_session() {
        let proxy = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_string("<html><title>Just a moment...</title></html>"),
            )
            .up_to_n_times(1)
            .mount(&proxy)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>brands</html>"))
            .mount(&proxy)
            .await;

        let body = fetcher().fetch(TARGET, &proxy.uri(), 1).await.unwrap();
        assert_eq!(body, "<html>brands</html>");
    }

    #[test]
    fn test_invalid_proxy_is_a_session_error() {
        let result = provider().acquire("not a proxy url");
        assert!(matches!(result, Err(AttemptError::Session(_))));
    }

    #[test]
    fn test_socks_proxy_session_builds() {
        assert!(provider().acquire("socks5h://127.0.0.1:9050").is_ok());
    }
}
