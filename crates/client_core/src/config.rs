use std::time::Duration;

/// Tuning knobs for the voting client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long a submitted mutation may stay unconfirmed.
    pub confirmation_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub request_timeout: Duration,
    pub sync_backoff_base: Duration,
    pub sync_backoff_max: Duration,
    /// Capacity of the session event channel.
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(15),
            sync_backoff_base: Duration::from_millis(250),
            sync_backoff_max: Duration::from_secs(10),
            event_buffer: 256,
        }
    }
}

impl ClientConfig {
    /// Delay before the next sync attempt after `consecutive_failures` failed cycles.
    pub fn sync_backoff(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exponent = consecutive_failures.saturating_sub(1).min(16);
        self.sync_backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.sync_backoff_max)
    }
}
