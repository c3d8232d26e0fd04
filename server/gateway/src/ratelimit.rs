use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Per-connection sliding-window limiter: 50 frames per rolling second
/// (spec §4.2 step 5). Lives entirely inside one session's task — there is
/// exactly one reader per client, so no shared state is needed.
pub struct RateLimiter {
    window: Duration,
    max_per_window: u32,
    timestamps: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self { window, max_per_window, timestamps: VecDeque::new() }
    }

    pub fn control_default() -> Self {
        Self::new(50, Duration::from_secs(1))
    }

    /// Returns true if the frame should be processed, false if it should be
    /// silently dropped.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        while let Some(&front) = self.timestamps.front() {
            if now.duration_since(front) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        if self.timestamps.len() as u32 >= self.max_per_window {
            return false;
        }
        self.timestamps.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_cap_then_drops() {
        let mut limiter = RateLimiter::new(3, Duration::from_secs(1));
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }
}
