//! Global sliding-window rate limiter serializing exchange API access.
//! `acquire()` blocks the caller until a slot opens within the
//! configured window, shared across every REST call site.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time;

pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    recent: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self { max_requests, window, recent: Mutex::new(VecDeque::new()) }
    }

    /// Blocks until a slot opens in the current window, then consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut recent = self.recent.lock().expect("rate limiter lock poisoned");
                self.evict_expired(&mut recent);
                if (recent.len() as u32) < self.max_requests {
                    recent.push_back(Instant::now());
                    return;
                }
                let oldest = *recent.front().expect("queue is full, front must exist");
                (oldest + self.window).saturating_duration_since(Instant::now())
            };
            time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    fn evict_expired(&self, recent: &mut VecDeque<Instant>) {
        let cutoff = Instant::now() - self.window;
        while let Some(&front) = recent.front() {
            if front < cutoff {
                recent.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_the_configured_limit_immediately() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn blocks_once_the_window_is_full() {
        let limiter = RateLimiter::new(2, Duration::from_millis(100));
        limiter.acquire().await;
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
