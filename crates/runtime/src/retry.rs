//! Bounded, immediate retry of fallible async operations.

use std::fmt::Display;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{Backend, ModelError, ModelRequest, ModelResponse};

/// Errors that can tell whether trying again might help.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for ModelError {
    fn is_transient(&self) -> bool {
        ModelError::is_transient(self)
    }
}

/// Which failures are retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Every failure is retried.
    #[default]
    Always,
    /// Only failures whose error reports itself as transient.
    TransientOnly,
}

/// Retry an operation up to `max_attempts` times with no delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    max_attempts: u32,
    policy: RetryPolicy,
}

impl Default for Retry {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ATTEMPTS)
    }
}

impl Retry {
    pub const DEFAULT_ATTEMPTS: u32 = 3;

    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            policy: RetryPolicy::Always,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Retry only errors classified as transient.
    pub fn only_transient(self) -> Self {
        self.with_policy(RetryPolicy::TransientOnly)
    }

    /// Attempts actually made. Zero is treated as one.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    fn should_retry<E: Transient>(&self, error: &E) -> bool {
        match self.policy {
            RetryPolicy::Always => true,
            RetryPolicy::TransientOnly => error.is_transient(),
        }
    }

    /// Run `op` until it succeeds or the attempt budget is spent. The last
    /// error is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        let max = self.max_attempts();
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max && self.should_retry(&e) => {
                    warn!(attempt, max, error = %e, "attempt {attempt}/{max} failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// A [`Backend`] whose calls go through a [`Retry`].
pub struct RetryingBackend<B> {
    inner: B,
    retry: Retry,
}

impl<B: Backend> RetryingBackend<B> {
    pub fn new(inner: B, retry: Retry) -> Self {
        Self { inner, retry }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

impl<B: Backend> Backend for RetryingBackend<B> {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        self.retry.run(|| self.inner.call(request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, Usage};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then answers.
    struct Flaky {
        failures: u32,
        error: ModelError,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32, error: ModelError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Backend for Flaky {
        async fn call(&self, _request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                return Err(self.error.clone());
            }
            Ok(ModelResponse {
                text: format!("answered on attempt {n}"),
                usage: Usage::default(),
            })
        }
    }

    fn network() -> ModelError {
        ModelError::Network("connection reset".into())
    }

    async fn ask<B: Backend>(backend: &B) -> Result<ModelResponse, ModelError> {
        let messages = [Message::user("hello")];
        backend.call(ModelRequest::new(&messages)).await
    }

    #[tokio::test]
    async fn recovers_after_failures_within_budget() {
        for failures in 0..3 {
            let backend = RetryingBackend::new(Flaky::new(failures, network()), Retry::new(3));
            let response = ask(&backend).await.unwrap();
            assert_eq!(response.text, format!("answered on attempt {}", failures + 1));
            assert_eq!(backend.inner().calls(), failures + 1);
        }
    }

    #[tokio::test]
    async fn gives_up_with_last_error() {
        let backend = RetryingBackend::new(Flaky::new(u32::MAX, network()), Retry::new(3));
        let err = ask(&backend).await.unwrap_err();
        assert_eq!(err, network());
        assert_eq!(backend.inner().calls(), 3);
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let backend = RetryingBackend::new(Flaky::new(u32::MAX, network()), Retry::new(0));
        assert!(ask(&backend).await.is_err());
        assert_eq!(backend.inner().calls(), 1);
    }

    #[tokio::test]
    async fn transient_policy_skips_permanent_errors() {
        let auth = ModelError::Api {
            status: 401,
            body: "bad key".into(),
        };
        let backend = RetryingBackend::new(Flaky::new(u32::MAX, auth), Retry::new(3).only_transient());
        assert!(ask(&backend).await.is_err());
        assert_eq!(backend.inner().calls(), 1);

        let backend = RetryingBackend::new(Flaky::new(2, network()), Retry::new(3).only_transient());
        assert!(ask(&backend).await.is_ok());
        assert_eq!(backend.inner().calls(), 3);
    }

    #[tokio::test]
    async fn default_policy_retries_everything() {
        let config = ModelError::Config("PROJECT_ID is not set".into());
        let backend = RetryingBackend::new(Flaky::new(u32::MAX, config), Retry::default());
        assert!(ask(&backend).await.is_err());
        assert_eq!(backend.inner().calls(), 3);
    }
}
