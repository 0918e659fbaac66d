use std::time::Duration;

use anyhow::bail;

/// All timing and threshold constants of the session engine.
///
/// The original protocol deployments disagreed on some of these (heartbeat stall window
///  of 5 vs. 6 seconds), so they are configuration rather than hardcoded values.
pub struct SessionConfig {
    /// Interval between keep-alive requests while the link is up.
    pub heartbeat_interval: Duration,

    /// A keep-alive record older than this without an acknowledgment counts as a missed
    ///  heartbeat.
    pub heartbeat_stall_window: Duration,

    /// Number of missed heartbeats that defines a stalled link.
    pub heartbeat_stall_count: usize,

    /// Keep-alive records are trimmed once more than this many accumulate...
    pub keep_alive_ring_max: usize,
    /// ...by dropping this many of the oldest ones.
    pub keep_alive_ring_trim: usize,

    /// Interval between silent reconnection attempts.
    pub reconnect_interval: Duration,

    /// Silent reconnection attempts before escalating to a full relogin.
    pub max_silent_attempts: u32,

    /// Granularity of the timeout sweep; the composition root is expected to call
    ///  [crate::engine::SessionEngine::tick] this often.
    pub sweep_interval: Duration,

    pub default_call_timeout: Duration,

    /// Error code delivered to a call's failure path when its deadline expires locally.
    pub timeout_ecode: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_stall_window: Duration::from_secs(6),
            heartbeat_stall_count: 2,
            keep_alive_ring_max: 15,
            keep_alive_ring_trim: 6,
            reconnect_interval: Duration::from_secs(3),
            max_silent_attempts: 4,
            sweep_interval: Duration::from_millis(500),
            default_call_timeout: Duration::from_secs(6),
            timeout_ecode: 100,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_interval.is_zero() {
            bail!("heartbeat interval must be non-zero");
        }
        if self.heartbeat_stall_count == 0 {
            bail!("heartbeat stall count must be at least 1");
        }
        if self.keep_alive_ring_trim == 0 || self.keep_alive_ring_trim > self.keep_alive_ring_max {
            bail!("keep-alive ring trim must be between 1 and the ring maximum");
        }
        if self.reconnect_interval.is_zero() {
            bail!("reconnect interval must be non-zero");
        }
        if self.max_silent_attempts == 0 {
            bail!("at least one silent reconnect attempt is required");
        }
        if self.sweep_interval.is_zero() {
            bail!("sweep interval must be non-zero");
        }
        Ok(())
    }
}
