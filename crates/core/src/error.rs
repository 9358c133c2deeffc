//! Domain errors shared across the pipeline crates.

use thiserror::Error;

/// Failure classifying a transport response (§4.8 retry policy).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportOutcome {
    #[error("upload accepted")]
    Success,
    #[error("upload failed, retryable")]
    Retryable,
    #[error("upload rejected, terminal")]
    Terminal,
}

impl TransportOutcome {
    /// Classify an HTTP status per §4.8: 2xx success, 4xx (except 408/429)
    /// terminal, everything else (5xx, 408, 429) retryable.
    pub fn from_status(status: u16) -> Self {
        if (200..300).contains(&status) {
            TransportOutcome::Success
        } else if status == 408 || status == 429 {
            TransportOutcome::Retryable
        } else if (400..500).contains(&status) {
            TransportOutcome::Terminal
        } else {
            TransportOutcome::Retryable
        }
    }
}
