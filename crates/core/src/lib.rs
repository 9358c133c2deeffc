#![forbid(unsafe_code)]

//! Shared data model and configuration for the activity capture pipeline.

pub mod config;
pub mod error;
pub mod models;

pub use config::PipelineConfig;
pub use error::TransportOutcome;
pub use models::{
    ActivityRecord, IdleReason, IdleSession, InputStatus, ScreenshotRecord, ScreenshotUploadState,
    SyncState, IDLE_NOTE_MAX_BYTES, WINDOW_TITLE_MAX_BYTES,
};
