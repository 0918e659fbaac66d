use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Time capability injected into the session engine.
///
/// All deadline arithmetic (call timeouts, keep-alive and reconnect intervals) uses the
///  monotonic [Clock::now]; wall-clock millis are only used for the server-clock offset
///  measurement where the server reports its own epoch millis. Injecting the clock
///  decouples the engine from any frame scheduler and makes the timing behavior fully
///  scriptable in tests.
pub trait Clock {
    fn now(&self) -> Instant;

    /// Milliseconds since the unix epoch.
    fn unix_millis(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Convenience for deadline math on optional deadlines.
pub fn is_due(deadline: Option<Instant>, now: Instant) -> bool {
    match deadline {
        Some(d) => now >= d,
        None => false,
    }
}

pub fn after(now: Instant, interval: Duration) -> Option<Instant> {
    Some(now + interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_due() {
        let now = Instant::now();
        assert!(!is_due(None, now));
        assert!(is_due(Some(now), now));
        assert!(is_due(after(now, Duration::from_millis(5)).map(|d| d - Duration::from_millis(5)), now));
        assert!(!is_due(after(now, Duration::from_millis(5)), now));
    }
}
