//! Fetch client boundary
//!
//! This module defines how pages are fetched through the egress:
//! - `Fetcher`: the interface the stages consume
//! - `SessionProvider` / `Session`: a disposable browsing session per attempt
//! - `RetryingFetcher`: bounded retries, one fresh session per attempt, bot
//!   challenge detection, per-attempt timeout
//!
//! | Condition | Action |
//! |-----------|--------|
//! | 2xx without challenge markers | Content returned |
//! | Challenge markers present | One in-session resolution, then attempt fails |
//! | Non-2xx status | Attempt fails |
//! | Network error | Attempt fails |
//! | Attempt exceeds timeout | Attempt fails |
//!
//! Failed attempts are retried with a new session until `max_attempts` is
//! reached; partial content is never returned.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Why a single fetch attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("bot challenge not resolved")]
    Challenge,

    #[error("session error: {0}")]
    Session(String),
}

/// Every attempt for a URL failed
#[derive(Debug, Clone, Error)]
#[error("{url} failed after {attempts} attempt(s): {last_error}")]
pub struct FetchFailure {
    pub url: String,
    pub attempts: u32,
    pub last_error: AttemptError,
}

/// Raw response of one navigation
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
}

impl PageResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Page fetching as consumed by the stages
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches `url` through `proxy`, trying at most `max_attempts` times
    async fn fetch(&self, url: &str, proxy: &str, max_attempts: u32)
        -> Result<String, FetchFailure>;
}

/// One disposable browsing session
#[async_trait]
pub trait Session: Send {
    async fn navigate(&mut self, url: &str) -> Result<PageResponse, AttemptError>;

    /// Tries to get past a bot challenge served for `url`
    async fn resolve_challenge(&mut self, url: &str) -> Result<PageResponse, AttemptError> {
        let _ = url;
        Err(AttemptError::Challenge)
    }
}

/// Hands out sessions, one per fetch attempt
///
/// Every successful `acquire` is matched by exactly one `release`.
pub trait SessionProvider: Send + Sync {
    type Session: Session;

    fn acquire(&self, proxy: &str) -> Result<Self::Session, AttemptError>;

    fn release(&self, session: Self::Session);
}

/// Releases its session on every exit path of an attempt
struct SessionGuard<'a, P: SessionProvider> {
    provider: &'a P,
    session: Option<P::Session>,
}

impl<P: SessionProvider> Drop for SessionGuard<'_, P> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.provider.release(session);
        }
    }
}

/// Fetcher retrying each URL with a fresh session per attempt
pub struct RetryingFetcher<P: SessionProvider> {
    provider: P,
    attempt_timeout: Duration,
    challenge_markers: Vec<String>,
}

impl<P: SessionProvider> RetryingFetcher<P> {
    pub fn new(provider: P, attempt_timeout: Duration, challenge_markers: Vec<String>) -> Self {
        Self {
            provider,
            attempt_timeout,
            challenge_markers,
        }
    }

    fn is_challenge(&self, body: &str) -> bool {
        self.challenge_markers
            .iter()
            .any(|marker| body.contains(marker.as_str()))
    }

    async fn attempt(&self, url: &str, proxy: &str) -> Result<String, AttemptError> {
        let mut guard = SessionGuard {
            provider: &self.provider,
            session: Some(self.provider.acquire(proxy)?),
        };

        let navigation = async {
            let Some(session) = guard.session.as_mut() else {
                return Err(AttemptError::Session("session already released".to_string()));
            };

            let mut page = session.navigate(url).await?;
            if self.is_challenge(&page.body) {
                debug!(url, "Bot challenge detected, resolving");
                page = session.resolve_challenge(url).await?;
                if self.is_challenge(&page.body) {
                    return Err(AttemptError::Challenge);
                }
            }

            if !page.is_success() {
                return Err(AttemptError::Status(page.status));
            }

            Ok(page.body)
        };

        match tokio::time::timeout(self.attempt_timeout, navigation).await {
            Ok(result) => result,
            Err(_) => Err(AttemptError::Timeout(self.attempt_timeout)),
        }
    }
}

#[async_trait]
impl<P: SessionProvider> Fetcher for RetryingFetcher<P> {
    async fn fetch(
        &self,
        url: &str,
        proxy: &str,
        max_attempts: u32,
    ) -> Result<String, FetchFailure> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(url, proxy).await {
                Ok(body) => {
                    trace!(url, attempt, bytes = body.len(), "Fetched page");
                    return Ok(body);
                }
                Err(err) if attempt >= max_attempts => {
                    warn!(url, attempts = attempt, error = %err, "Giving up on page");
                    return Err(FetchFailure {
                        url: url.to_string(),
                        attempts: attempt,
                        last_error: err,
                    });
                }
                Err(err) => {
                    debug!(url, attempt, max_attempts, error = %err, "Fetch attempt failed");
                    attempt += 1;
                }
            }
        }
    }
}
