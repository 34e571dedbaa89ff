use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    backoff: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(backoff: Duration, max_attempts: u32) -> Self {
        Self {
            backoff,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Debug,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts => {
                    warn!(
                        ?err,
                        attempt,
                        max_attempts = self.max_attempts,
                        "operation failed; retrying after {:?}",
                        self.backoff
                    );
                    sleep(self.backoff).await;
                }
                Err(err) => {
                    warn!(?err, attempt, "operation failed; out of retries");
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Debug, PartialEq)]
    struct Failure(u32);

    #[tokio::test]
    async fn exhausts_attempts_and_returns_last_failure() {
        let policy = RetryPolicy::new(Duration::from_millis(1), 3);
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<(), Failure> = policy
            .run(move || async move {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(Failure(call))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result, Err(Failure(3)));
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let policy = RetryPolicy::new(Duration::from_millis(1), 5);
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result = policy
            .run(move || async move {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call < 2 {
                    Err(Failure(call))
                } else {
                    Ok(call * 10)
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result, Ok(20));
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let policy = RetryPolicy::new(Duration::ZERO, 0);
        assert_eq!(policy.max_attempts(), 1);
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<u32, Failure> = policy
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await;
        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
