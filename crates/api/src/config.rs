//! Runtime configuration for detail calls, read from `KEEL_*` environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// How the lookups that only depend on the record are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Schedule {
    /// One at a time: pods, pod info, events.
    Sequential,
    /// All three at once, joined on the first error.
    #[default]
    Concurrent,
}

impl FromStr for Schedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" | "seq" => Ok(Schedule::Sequential),
            "concurrent" | "parallel" => Ok(Schedule::Concurrent),
            other => Err(format!("unknown schedule {other:?} (expect sequential|concurrent)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailConfig {
    pub schedule: Schedule,
    /// Upper bound for one detail call; `None` waits until cancelled.
    pub timeout: Option<Duration>,
    /// Attach pod metrics from metrics.k8s.io.
    pub metrics: bool,
    /// Listen address of the Prometheus exporter; unset or unparsable leaves it off.
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for DetailConfig {
    fn default() -> Self {
        Self { schedule: Schedule::default(), timeout: Some(Duration::from_secs(30)), metrics: true, metrics_addr: None }
    }
}

impl DetailConfig {
    /// Defaults overridden by `KEEL_DETAIL_SCHEDULE`, `KEEL_DETAIL_TIMEOUT_SECS` (0 disables),
    /// `KEEL_DETAIL_METRICS` and `KEEL_METRICS_ADDR`.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let schedule = get("KEEL_DETAIL_SCHEDULE").and_then(|s| s.parse().ok()).unwrap_or(d.schedule);
        let timeout = match get("KEEL_DETAIL_TIMEOUT_SECS").and_then(|s| s.parse::<u64>().ok()) {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => d.timeout,
        };
        let metrics = get("KEEL_DETAIL_METRICS").map(|s| !matches!(s.as_str(), "0" | "false" | "off")).unwrap_or(d.metrics);
        let metrics_addr = get("KEEL_METRICS_ADDR").and_then(|s| s.trim().parse().ok());
        Self { schedule, timeout, metrics, metrics_addr }
    }
}
