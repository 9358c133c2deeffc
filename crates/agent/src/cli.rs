use std::time::Duration;

use activitymon_core::PipelineConfig;
use clap::Parser;
use url::Url;

#[derive(Debug, Clone, Parser)]
#[command(name = "activitymon", version, about = "Endpoint activity capture agent")]
pub struct Cli {
    /// Base URL of the collection backend (e.g. `https://collector.example.com/`).
    #[arg(long, env = "ACTIVITYMON_ENDPOINT_URL")]
    pub endpoint_url: Url,

    /// Stable session identifier attached to uploaded records. Generated
    /// once per process if unset.
    #[arg(long, env = "ACTIVITYMON_SESSION_ID")]
    pub session_id: Option<String>,

    /// Milliseconds of input silence before a user is considered inactive.
    #[arg(
        long,
        env = "ACTIVITYMON_ACTIVITY_TIMEOUT_MS",
        default_value_t = PipelineConfig::DEFAULT_ACTIVITY_TIMEOUT.as_millis() as u64,
    )]
    pub activity_timeout_ms: u64,

    /// Seconds of continuous inactivity before an idle session is opened.
    #[arg(
        long,
        env = "ACTIVITYMON_IDLE_THRESHOLD_S",
        default_value_t = PipelineConfig::DEFAULT_IDLE_THRESHOLD.as_secs(),
    )]
    pub idle_threshold_s: u64,

    /// Fallback poll interval for platforms without a foreground-change hook.
    #[arg(
        long,
        env = "ACTIVITYMON_WINDOW_POLL_INTERVAL_MS",
        default_value_t = PipelineConfig::DEFAULT_WINDOW_POLL_INTERVAL.as_millis() as u64,
    )]
    pub window_poll_interval_ms: u64,

    /// Maximum activity records persisted per local-store flush.
    #[arg(
        long,
        env = "ACTIVITYMON_BATCH_MAX",
        default_value_t = PipelineConfig::DEFAULT_BATCH_MAX,
    )]
    pub batch_max: usize,

    /// Milliseconds between local-store flushes.
    #[arg(
        long,
        env = "ACTIVITYMON_BATCH_INTERVAL_MS",
        default_value_t = PipelineConfig::DEFAULT_BATCH_INTERVAL.as_millis() as u64,
    )]
    pub batch_interval_ms: u64,

    /// Milliseconds between upload attempts against the backend.
    #[arg(
        long,
        env = "ACTIVITYMON_UPLOAD_INTERVAL_MS",
        default_value_t = PipelineConfig::DEFAULT_UPLOAD_INTERVAL.as_millis() as u64,
    )]
    pub upload_interval_ms: u64,

    /// Maximum records claimed into a single upload batch.
    #[arg(
        long,
        env = "ACTIVITYMON_UPLOAD_LIMIT",
        default_value_t = PipelineConfig::DEFAULT_UPLOAD_LIMIT,
    )]
    pub upload_limit: usize,

    /// Number of upload attempts before a batch is returned to pending.
    #[arg(
        long,
        env = "ACTIVITYMON_RETRY_ATTEMPTS",
        default_value_t = PipelineConfig::DEFAULT_RETRY_ATTEMPTS,
    )]
    pub retry_attempts: u32,

    /// Milliseconds to wait between retry attempts.
    #[arg(
        long,
        env = "ACTIVITYMON_RETRY_DELAY_MS",
        default_value_t = PipelineConfig::DEFAULT_RETRY_DELAY.as_millis() as u64,
    )]
    pub retry_delay_ms: u64,

    /// Number of concurrent upload workers.
    #[arg(
        long,
        env = "ACTIVITYMON_WORKER_COUNT",
        default_value_t = PipelineConfig::DEFAULT_WORKER_COUNT,
    )]
    pub worker_count: usize,

    /// Milliseconds between screenshot captures.
    #[arg(
        long,
        env = "ACTIVITYMON_SCREENSHOT_INTERVAL_MS",
        default_value_t = PipelineConfig::DEFAULT_SCREENSHOT_INTERVAL.as_millis() as u64,
    )]
    pub screenshot_interval_ms: u64,

    /// Maximum in-flight activity records buffered before backpressure kicks in.
    #[arg(
        long,
        env = "ACTIVITYMON_QUEUE_MAX",
        default_value_t = PipelineConfig::DEFAULT_QUEUE_MAX,
    )]
    pub queue_max: usize,

    /// Path to the local sqlite datastore.
    #[arg(long, env = "ACTIVITYMON_STORE_PATH", default_value = "activitymon.sqlite3")]
    pub store_path: std::path::PathBuf,
}

impl Cli {
    pub fn into_pipeline_config(self) -> PipelineConfig {
        let session_id = self
            .session_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        PipelineConfig {
            endpoint_url: self.endpoint_url,
            session_id,
            activity_timeout: Duration::from_millis(self.activity_timeout_ms),
            idle_threshold: Duration::from_secs(self.idle_threshold_s),
            window_poll_interval: Duration::from_millis(self.window_poll_interval_ms),
            batch_max: self.batch_max,
            batch_interval: Duration::from_millis(self.batch_interval_ms),
            upload_interval: Duration::from_millis(self.upload_interval_ms),
            upload_limit: self.upload_limit,
            retry_attempts: self.retry_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            worker_count: self.worker_count,
            screenshot_interval: Duration::from_millis(self.screenshot_interval_ms),
            queue_max: self.queue_max,
        }
    }
}
