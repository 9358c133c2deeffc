//! The data model persisted and transported by the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the user produced input recently enough to count as present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputStatus {
    Active,
    Inactive,
}

/// Where a record sits in the local-store → transport lifecycle (I1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SyncState {
    Pending,
    InFlight { batch_id: String },
    Synced,
}

impl SyncState {
    pub fn batch_id(&self) -> Option<&str> {
        match self {
            SyncState::InFlight { batch_id } => Some(batch_id),
            _ => None,
        }
    }
}

/// Maximum byte length for a window title before truncation (§3).
pub const WINDOW_TITLE_MAX_BYTES: usize = 500;

/// Maximum byte length for an idle-session note (§3).
pub const IDLE_NOTE_MAX_BYTES: usize = 1000;

/// One observation of foreground-window / input state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub window_title: String,
    pub process_name: String,
    pub status: InputStatus,
    pub sync_state: SyncState,
}

impl ActivityRecord {
    pub fn new(user: impl Into<String>, window_title: impl Into<String>, process_name: impl Into<String>, status: InputStatus) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            user: user.into(),
            window_title: truncate_utf8(&window_title.into(), WINDOW_TITLE_MAX_BYTES),
            process_name: process_name.into(),
            status,
            sync_state: SyncState::Pending,
        }
    }

    /// The identity used for the change-significance filter (P3).
    pub fn change_key(&self) -> (&str, &str, InputStatus) {
        (&self.window_title, &self.process_name, self.status)
    }
}

/// Truncate a string to at most `max_bytes`, respecting UTF-8 boundaries.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Closed vocabulary for idle-session annotation (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum IdleReason {
    Meeting,
    Break,
    Lunch,
    #[serde(rename = "Phone Call")]
    PhoneCall,
    #[serde(rename = "Away from Desk")]
    AwayFromDesk,
    Other,
}

impl IdleReason {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            IdleReason::Meeting => "Meeting",
            IdleReason::Break => "Break",
            IdleReason::Lunch => "Lunch",
            IdleReason::PhoneCall => "Phone Call",
            IdleReason::AwayFromDesk => "Away from Desk",
            IdleReason::Other => "Other",
        }
    }
}

/// One user-annotated idle interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleSession {
    pub id: Option<i64>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reason: IdleReason,
    pub note: String,
    pub user: String,
    pub session_id: String,
    pub active_application: String,
    pub sync_state: SyncState,
}

impl IdleSession {
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        reason: IdleReason,
        note: impl Into<String>,
        user: impl Into<String>,
        session_id: impl Into<String>,
        active_application: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            start,
            end,
            reason,
            note: truncate_utf8(&note.into(), IDLE_NOTE_MAX_BYTES),
            user: user.into(),
            session_id: session_id.into(),
            active_application: active_application.into(),
            sync_state: SyncState::Pending,
        }
    }

    /// `duration_seconds` per §3 (I3: within 1 second of `end - start`).
    pub fn duration_seconds(&self) -> i64 {
        (self.end - self.start).num_seconds().max(0)
    }
}

/// Outcome of a screenshot upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenshotUploadState {
    Pending,
    Uploaded,
    Failed,
}

/// Metadata for a captured screenshot; the image bytes live on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenshotRecord {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub session_id: String,
    pub local_path: String,
    pub upload_state: ScreenshotUploadState,
}
