use std::sync::atomic::{AtomicU32, Ordering};

/// Per-client send-failure tracker. Lock-free by design: the breaker must be
/// cheap to consult on every fan-out send, and it has no timer — a successful
/// probe is the only reset, which keeps shutdown and churn free of leaked timers.
#[derive(Debug, Default)]
pub struct SendHealth {
    consecutive_failures: AtomicU32,
    skip_counter: AtomicU32,
}

/// Deployment-tuned breaker parameters, read out of `RoomConfig`.
#[derive(Clone, Copy, Debug)]
pub struct BreakerParams {
    pub open_threshold: u32,
    pub probe_cadence: u32,
}

impl SendHealth {
    /// Returns true if this send should be skipped without attempting it.
    /// While open, only one in `probe_cadence` calls is allowed through.
    pub fn should_skip(&self, params: BreakerParams) -> bool {
        if self.consecutive_failures.load(Ordering::Relaxed) < params.open_threshold {
            return false;
        }
        let n = self.skip_counter.fetch_add(1, Ordering::Relaxed);
        n % params.probe_cadence.max(1) != 0
    }

    pub fn record_success(&self) {
        let was_open = self.consecutive_failures.swap(0, Ordering::Relaxed);
        self.skip_counter.store(0, Ordering::Relaxed);
        if was_open > 0 {
            tracing::info!("send health recovered after {was_open} consecutive failures");
        }
    }

    pub fn record_failure(&self, params: BreakerParams) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures == params.open_threshold {
            tracing::warn!("circuit breaker opened after {failures} consecutive send failures");
        }
    }

    pub fn is_open(&self, params: BreakerParams) -> bool {
        self.consecutive_failures.load(Ordering::Relaxed) >= params.open_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: BreakerParams = BreakerParams { open_threshold: 3, probe_cadence: 2 };

    #[test]
    fn opens_at_exact_threshold() {
        let h = SendHealth::default();
        h.record_failure(P);
        h.record_failure(P);
        assert!(!h.is_open(P));
        h.record_failure(P);
        assert!(h.is_open(P));
    }

    #[test]
    fn success_resets_counters() {
        let h = SendHealth::default();
        h.record_failure(P);
        h.record_failure(P);
        h.record_failure(P);
        assert!(h.is_open(P));
        h.record_success();
        assert!(!h.is_open(P));
    }

    #[test]
    fn probe_cadence_allows_one_of_n() {
        let h = SendHealth::default();
        for _ in 0..P.open_threshold {
            h.record_failure(P);
        }
        assert!(h.is_open(P));
        // skip_counter starts at 0: 0 % 2 == 0 -> first call is a probe (not skipped)
        assert!(!h.should_skip(P));
        assert!(h.should_skip(P));
        assert!(!h.should_skip(P));
    }
}
