use serde::Serialize;

/// Shared-tier reachability, reported by the `/health` aggregate.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CacheHealth {
    /// The shared tier is intentionally not configured; this is healthy.
    Disabled,
    /// The shared tier answered a PING.
    Healthy { latency_ms: u64 },
    /// The shared tier is configured but unreachable.
    Unhealthy { error: String },
}

impl CacheHealth {
    pub fn is_healthy(&self) -> bool {
        !matches!(self, CacheHealth::Unhealthy { .. })
    }
}
