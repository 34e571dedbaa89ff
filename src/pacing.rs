use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

const MAX_PENALTY: Duration = Duration::from_secs(60);
const BASE_PENALTY: Duration = Duration::from_secs(1);

pub struct RequestPacer {
    min_spacing: Duration,
    penalty: Mutex<Duration>,
    last_tick: AsyncMutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            penalty: Mutex::new(Duration::ZERO),
            last_tick: AsyncMutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let interval = self.min_spacing + *self.penalty.lock();
        let mut guard = self.last_tick.lock().await;
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < interval {
                sleep(interval - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }

    pub fn record_throttled(&self) {
        let mut penalty = self.penalty.lock();
        *penalty = if penalty.is_zero() {
            BASE_PENALTY
        } else {
            (*penalty * 2).min(MAX_PENALTY)
        };
        debug!(penalty = ?*penalty, "request pacing penalty raised");
    }

    pub fn record_success(&self) {
        let mut penalty = self.penalty.lock();
        if penalty.is_zero() {
            return;
        }
        *penalty /= 2;
        if *penalty < Duration::from_millis(50) {
            *penalty = Duration::ZERO;
        }
    }

    #[cfg(test)]
    fn current_penalty(&self) -> Duration {
        *self.penalty.lock()
    }
}
