//! Shared configuration surface (§6 "Configuration (enumerated options)").
//!
//! Values here are plain defaults; loading them from a config file is out of
//! scope (spec's external collaborator list) — the agent binary wires these
//! up to CLI flags with env fallbacks instead.

use std::time::Duration;

use url::Url;

/// All tunables named in spec §6, with the defaults it specifies.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub endpoint_url: Url,
    /// Opaque per-process identifier attached to uploaded records (§6's
    /// `sessionId`/`isRemoteSession` fields). Derivation is left to the
    /// caller — this spec doesn't define one (§9 Open Questions).
    pub session_id: String,
    pub activity_timeout: Duration,
    pub idle_threshold: Duration,
    pub window_poll_interval: Duration,
    pub batch_max: usize,
    pub batch_interval: Duration,
    pub upload_interval: Duration,
    pub upload_limit: usize,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub worker_count: usize,
    pub screenshot_interval: Duration,
    pub queue_max: usize,
}

impl PipelineConfig {
    pub const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_millis(30_000);
    pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(300);
    pub const DEFAULT_WINDOW_POLL_INTERVAL: Duration = Duration::from_millis(1_000);
    pub const DEFAULT_BATCH_MAX: usize = 50;
    pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_millis(10_000);
    pub const DEFAULT_UPLOAD_INTERVAL: Duration = Duration::from_millis(300_000);
    pub const DEFAULT_UPLOAD_LIMIT: usize = 500;
    pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5_000);
    pub const DEFAULT_WORKER_COUNT: usize = 3;
    pub const DEFAULT_SCREENSHOT_INTERVAL: Duration = Duration::from_millis(600_000);
    pub const DEFAULT_QUEUE_MAX: usize = 10_000;

    pub fn new(endpoint_url: Url, session_id: impl Into<String>) -> Self {
        Self {
            endpoint_url,
            session_id: session_id.into(),
            activity_timeout: Self::DEFAULT_ACTIVITY_TIMEOUT,
            idle_threshold: Self::DEFAULT_IDLE_THRESHOLD,
            window_poll_interval: Self::DEFAULT_WINDOW_POLL_INTERVAL,
            batch_max: Self::DEFAULT_BATCH_MAX,
            batch_interval: Self::DEFAULT_BATCH_INTERVAL,
            upload_interval: Self::DEFAULT_UPLOAD_INTERVAL,
            upload_limit: Self::DEFAULT_UPLOAD_LIMIT,
            retry_attempts: Self::DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Self::DEFAULT_RETRY_DELAY,
            worker_count: Self::DEFAULT_WORKER_COUNT,
            screenshot_interval: Self::DEFAULT_SCREENSHOT_INTERVAL,
            queue_max: Self::DEFAULT_QUEUE_MAX,
        }
    }

    /// IdleDetector rejects non-positive thresholds (§4.4).
    pub fn validate(&self) -> Result<(), String> {
        if self.idle_threshold.is_zero() {
            return Err("idle_threshold_s must be positive".to_string());
        }
        Ok(())
    }
}
