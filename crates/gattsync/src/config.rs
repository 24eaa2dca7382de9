use std::time::Duration;

/// Runtime configuration for a [`Central`](crate::Central).
#[derive(Debug, Clone)]
pub struct CentralConfig {
    /// Label attached to the central's log lines.
    pub name: String,
    /// Deadline used when a call passes `None`. `None` here waits forever.
    pub default_timeout: Option<Duration>,
    /// Buffered notifications per subscriber before it starts lagging.
    pub notification_capacity: usize,
}

const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            name: "gattsync".to_string(),
            default_timeout: std::env::var("GATTSYNC_DEFAULT_TIMEOUT")
                .ok()
                .and_then(|s| parse_timeout(&s)),
            notification_capacity: std::env::var("GATTSYNC_NOTIFICATION_CAPACITY")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_NOTIFICATION_CAPACITY),
        }
    }
}

/// Seconds as a float. Negative, non-finite or out-of-range values are ignored.
fn parse_timeout(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

impl CentralConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn without_default_timeout(mut self) -> Self {
        self.default_timeout = None;
        self
    }

    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity.max(1);
        self
    }

    /// The caller's deadline, else the configured default.
    pub(crate) fn deadline(&self, timeout: Option<Duration>) -> Option<Duration> {
        timeout.or(self.default_timeout)
    }
}
