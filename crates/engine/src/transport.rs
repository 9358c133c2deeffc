//! `TransportClient` (§4.8): uploads batches to the backend with bounded
//! retry on transient failure. Grounded on the teacher's `submit_witness`
//! retry loop (`client-engine/src/worker.rs`): classify the failure, sleep
//! a fixed delay between attempts, give up after the configured count.

use std::path::Path;
use std::time::Duration;

use activitymon_core::{ActivityRecord, IdleSession, InputStatus, TransportOutcome};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upload rejected by server: {0}")]
    Terminal(u16),
    #[error("upload failed after exhausting retries")]
    RetriesExhausted,
}

/// §6 `POST /activity` element shape. `ActivityRecord` carries no
/// `session_id` of its own (§3's data model doesn't define one for it), so
/// the pipeline's process-wide session id is threaded in at submit time.
#[derive(Serialize)]
struct ActivityEventWire<'a> {
    timestamp: String,
    #[serde(rename = "eventType")]
    event_type: &'static str,
    details: String,
    #[serde(rename = "userId")]
    user_id: &'a str,
    #[serde(rename = "sessionId")]
    session_id: &'a str,
}

impl<'a> ActivityEventWire<'a> {
    fn from_record(record: &'a ActivityRecord, session_id: &'a str) -> Self {
        Self {
            timestamp: record.timestamp.to_rfc3339(),
            event_type: match record.status {
                InputStatus::Active => "Active",
                InputStatus::Inactive => "Inactive",
            },
            details: format!("{}: {}", record.process_name, record.window_title),
            user_id: &record.user,
            session_id,
        }
    }
}

/// §6 `POST /idletime` object shape. `isRemoteSession` has no counterpart
/// in `IdleSession` (§3 doesn't track it either) — this agent has no remote-
/// session detection, so it always reports `false`.
#[derive(Serialize)]
struct IdleSessionWire<'a> {
    #[serde(rename = "startTime")]
    start_time: String,
    #[serde(rename = "endTime")]
    end_time: String,
    reason: &'static str,
    note: &'a str,
    #[serde(rename = "userId")]
    user_id: &'a str,
    #[serde(rename = "sessionId")]
    session_id: &'a str,
    #[serde(rename = "isRemoteSession")]
    is_remote_session: bool,
    #[serde(rename = "activeApplication")]
    active_application: &'a str,
}

impl<'a> From<&'a IdleSession> for IdleSessionWire<'a> {
    fn from(session: &'a IdleSession) -> Self {
        Self {
            start_time: session.start.to_rfc3339(),
            end_time: session.end.to_rfc3339(),
            reason: session.reason.as_wire_str(),
            note: &session.note,
            user_id: &session.user,
            session_id: &session.session_id,
            is_remote_session: false,
            active_application: &session.active_application,
        }
    }
}

pub struct TransportClient {
    http: Client,
    base_url: Url,
    retry_attempts: u32,
    retry_delay: Duration,
    session_id: String,
}

impl TransportClient {
    pub fn new(
        http: Client,
        base_url: Url,
        retry_attempts: u32,
        retry_delay: Duration,
        session_id: String,
    ) -> Self {
        Self {
            http,
            base_url,
            retry_attempts,
            retry_delay,
            session_id,
        }
    }

    pub async fn submit_activity_batch(&self, records: &[ActivityRecord]) -> Result<(), TransportError> {
        let url = self
            .base_url
            .join("activity")
            .map_err(|_| TransportError::RetriesExhausted)?;
        let wire: Vec<ActivityEventWire> = records
            .iter()
            .map(|record| ActivityEventWire::from_record(record, &self.session_id))
            .collect();
        self.submit_with_retry(url, &wire).await
    }

    pub async fn submit_idle_session(&self, session: &IdleSession) -> Result<(), TransportError> {
        let url = self
            .base_url
            .join("idletime")
            .map_err(|_| TransportError::RetriesExhausted)?;
        self.submit_with_retry(url, &IdleSessionWire::from(session)).await
    }

    /// Uploads a screenshot as the `multipart/form-data` body §6 specifies
    /// (`file` + `userId` + `sessionId`). The caller deletes the local
    /// image file only after this returns `Ok`.
    pub async fn submit_screenshot(
        &self,
        image_path: &Path,
        user_id: &str,
        session_id: &str,
    ) -> Result<(), TransportError> {
        let url = self
            .base_url
            .join("screenshots")
            .map_err(|_| TransportError::RetriesExhausted)?;

        let bytes = match tokio::fs::read(image_path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(%err, path = %image_path.display(), "failed to read screenshot file for upload");
                return Err(TransportError::Terminal(0));
            }
        };
        let file_name = image_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("screenshot.jpg")
            .to_string();

        self.drive_retry(|| {
            let part = Part::bytes(bytes.clone()).file_name(file_name.clone());
            let form = Form::new()
                .part("file", part)
                .text("userId", user_id.to_string())
                .text("sessionId", session_id.to_string());
            self.http.post(url.clone()).multipart(form)
        })
        .await
    }

    async fn submit_with_retry<T: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &T,
    ) -> Result<(), TransportError> {
        self.drive_retry(|| self.http.post(url.clone()).json(body)).await
    }

    async fn drive_retry(
        &self,
        mut build_request: impl FnMut() -> RequestBuilder,
    ) -> Result<(), TransportError> {
        let mut last_status: Option<u16> = None;

        for attempt in 0..self.retry_attempts {
            match build_request().send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    last_status = Some(status);
                    match TransportOutcome::from_status(status) {
                        TransportOutcome::Success => return Ok(()),
                        TransportOutcome::Terminal => {
                            return Err(TransportError::Terminal(status));
                        }
                        TransportOutcome::Retryable => {}
                    }
                }
                Err(err) => {
                    if !(err.is_connect() || err.is_timeout()) {
                        return Err(TransportError::Request(err));
                    }
                }
            }

            if attempt + 1 < self.retry_attempts {
                tracing::warn!(attempt, "transport upload failed, retrying");
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        match last_status {
            Some(status) => Err(TransportError::Terminal(status)),
            None => Err(TransportError::RetriesExhausted),
        }
    }
}
