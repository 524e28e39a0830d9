//! Process-wide request rate limiting.
//!
//! A rolling one-second counter shared by every worker: each dispatch
//! increments it and schedules a decrement one second later, so the counter
//! always holds the number of requests issued within the last second.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::{Duration, sleep};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct RateLimiter {
    max_rate: usize,
    counter: Arc<AtomicUsize>,
}

impl RateLimiter {
    /// `max_rate == 0` disables limiting; the counter still tracks the
    /// rolling rate for the progress display.
    pub fn new(max_rate: usize) -> Self {
        Self {
            max_rate,
            counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Requests issued within the last second.
    pub fn rate(&self) -> usize {
        self.counter.load(Ordering::Acquire)
    }

    /// Blocks until dispatching another request keeps the rolling count at
    /// or below `max_rate`, then claims a slot.
    pub async fn throttle(&self) {
        if self.max_rate == 0 {
            self.counter.fetch_add(1, Ordering::AcqRel);
        } else {
            loop {
                let current = self.counter.load(Ordering::Acquire);
                if current >= self.max_rate {
                    sleep(POLL_INTERVAL).await;
                    continue;
                }
                if self
                    .counter
                    .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    break;
                }
            }
        }

        let counter = Arc::clone(&self.counter);
        tokio::spawn(async move {
            sleep(WINDOW).await;
            counter.fetch_sub(1, Ordering::AcqRel);
        });
    }
}
