//! `LocalStore` (§4.5): a durable, append-only, batched local datastore.
//!
//! Grounded on the teacher pack's batched-sqlite-writer idiom (a dedicated
//! connection, WAL journal mode, a transactional flush on a timer/size
//! threshold) generalized here to three record kinds sharing one
//! `sync_state` lifecycle: `pending` → `in_flight(batch_id)` → `synced`.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use activitymon_core::{
    ActivityRecord, IdleReason, IdleSession, InputStatus, ScreenshotRecord, ScreenshotUploadState,
    SyncState,
};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open local store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("local store write failed: {0}")]
    Write(#[source] rusqlite::Error),
    #[error("in-memory queue is full, record dropped")]
    Overflow,
}

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA busy_timeout = 5000;

CREATE TABLE IF NOT EXISTS activity_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    user TEXT NOT NULL,
    window_title TEXT NOT NULL,
    process_name TEXT NOT NULL,
    status TEXT NOT NULL,
    sync_state TEXT NOT NULL,
    batch_id TEXT
);

CREATE TABLE IF NOT EXISTS idle_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    start TEXT NOT NULL,
    end TEXT NOT NULL,
    reason TEXT NOT NULL,
    note TEXT NOT NULL,
    user TEXT NOT NULL,
    session_id TEXT NOT NULL,
    active_application TEXT NOT NULL,
    sync_state TEXT NOT NULL,
    batch_id TEXT
);

CREATE TABLE IF NOT EXISTS screenshot_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    user TEXT NOT NULL,
    session_id TEXT NOT NULL,
    local_path TEXT NOT NULL,
    upload_state TEXT NOT NULL,
    sync_state TEXT NOT NULL,
    batch_id TEXT
);
"#;

fn sync_state_to_columns(state: &SyncState) -> (&'static str, Option<&str>) {
    match state {
        SyncState::Pending => ("pending", None),
        SyncState::InFlight { batch_id } => ("in_flight", Some(batch_id.as_str())),
        SyncState::Synced => ("synced", None),
    }
}

fn sync_state_from_columns(state: &str, batch_id: Option<String>) -> SyncState {
    match state {
        "in_flight" => SyncState::InFlight {
            batch_id: batch_id.unwrap_or_default(),
        },
        "synced" => SyncState::Synced,
        _ => SyncState::Pending,
    }
}

/// Durable local store. The `Connection` lives behind a `Mutex` and all
/// access goes through `tokio::task::spawn_blocking`, matching the
/// teacher's "never let rusqlite block the runtime" discipline.
pub struct LocalStore {
    conn: Mutex<Connection>,
    queue: Mutex<VecDeque<ActivityRecord>>,
    queue_max: usize,
}

impl LocalStore {
    pub fn open(path: impl AsRef<Path>, queue_max: usize) -> Result<Self, StoreError> {
        let path_str = path.as_ref().display().to_string();
        let conn = Connection::open(path.as_ref()).map_err(|source| StoreError::Open {
            path: path_str.clone(),
            source,
        })?;
        conn.execute_batch(SCHEMA).map_err(|source| StoreError::Open {
            path: path_str,
            source,
        })?;
        let store = Self {
            conn: Mutex::new(conn),
            queue: Mutex::new(VecDeque::new()),
            queue_max,
        };
        store.recover_in_flight()?;
        Ok(store)
    }

    /// Startup crash recovery (P1): any record left `in_flight` from a
    /// process that died before the transport ack arrived is demoted back
    /// to `pending` so it is retried, never silently dropped.
    fn recover_in_flight(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        for table in ["activity_records", "idle_sessions", "screenshot_records"] {
            conn.execute(
                &format!(
                    "UPDATE {table} SET sync_state = 'pending', batch_id = NULL WHERE sync_state = 'in_flight'"
                ),
                [],
            )
            .map_err(StoreError::Write)?;
        }
        Ok(())
    }

    /// Non-blocking enqueue into the in-memory buffer (§4.5's bounded
    /// queue). Rejects rather than blocks once `queue_max` is reached
    /// (backpressure, L2).
    pub fn enqueue(&self, record: ActivityRecord) -> Result<(), StoreError> {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.queue_max {
            return Err(StoreError::Overflow);
        }
        queue.push_back(record);
        Ok(())
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Drain up to `max` records from the in-memory queue and persist them
    /// in a single transaction (P1: durable before being considered safe
    /// to ack upstream).
    pub fn flush_activity_queue(&self, max: usize) -> Result<usize, StoreError> {
        let drained: Vec<ActivityRecord> = {
            let mut queue = self.queue.lock().unwrap();
            let n = max.min(queue.len());
            queue.drain(..n).collect()
        };
        if drained.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(StoreError::Write)?;
        for record in &drained {
            let (state, batch_id) = sync_state_to_columns(&record.sync_state);
            tx.execute(
                "INSERT INTO activity_records (timestamp, user, window_title, process_name, status, sync_state, batch_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    record.timestamp.to_rfc3339(),
                    record.user,
                    record.window_title,
                    record.process_name,
                    status_to_str(record.status),
                    state,
                    batch_id,
                ],
            )
            .map_err(StoreError::Write)?;
        }
        tx.commit().map_err(StoreError::Write)?;
        Ok(drained.len())
    }

    pub fn insert_idle_session(&self, session: &IdleSession) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let (state, batch_id) = sync_state_to_columns(&session.sync_state);
        conn.execute(
            "INSERT INTO idle_sessions (start, end, reason, note, user, session_id, active_application, sync_state, batch_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                session.start.to_rfc3339(),
                session.end.to_rfc3339(),
                session.reason.as_wire_str(),
                session.note,
                session.user,
                session.session_id,
                session.active_application,
                state,
                batch_id,
            ],
        )
        .map_err(StoreError::Write)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_screenshot(&self, record: &ScreenshotRecord) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let (state, batch_id) = (
            "pending",
            None::<&str>,
        );
        conn.execute(
            "INSERT INTO screenshot_records (timestamp, user, session_id, local_path, upload_state, sync_state, batch_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.timestamp.to_rfc3339(),
                record.user,
                record.session_id,
                record.local_path,
                upload_state_to_str(record.upload_state),
                state,
                batch_id,
            ],
        )
        .map_err(StoreError::Write)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn idle_session_by_id(&self, id: i64) -> Result<Option<IdleSession>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, start, end, reason, note, user, session_id, active_application, sync_state, batch_id
             FROM idle_sessions WHERE id = ?1",
            [id],
            |row| {
                Ok(IdleSession {
                    id: Some(row.get(0)?),
                    start: parse_timestamp(row.get::<_, String>(1)?),
                    end: parse_timestamp(row.get::<_, String>(2)?),
                    reason: idle_reason_from_str(&row.get::<_, String>(3)?),
                    note: row.get(4)?,
                    user: row.get(5)?,
                    session_id: row.get(6)?,
                    active_application: row.get(7)?,
                    sync_state: sync_state_from_columns(&row.get::<_, String>(8)?, row.get(9)?),
                })
            },
        )
        .map(Some)
        .or_else(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StoreError::Write(other)),
        })
    }

    pub fn mark_idle_session_synced(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE idle_sessions SET sync_state = 'synced', batch_id = NULL WHERE id = ?1",
            [id],
        )
        .map_err(StoreError::Write)?;
        Ok(())
    }

    pub fn mark_idle_session_pending(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE idle_sessions SET sync_state = 'pending', batch_id = NULL WHERE id = ?1",
            [id],
        )
        .map_err(StoreError::Write)?;
        Ok(())
    }

    pub fn screenshot_by_id(&self, id: i64) -> Result<Option<ScreenshotRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, timestamp, user, session_id, local_path, upload_state
             FROM screenshot_records WHERE id = ?1",
            [id],
            |row| {
                Ok(ScreenshotRecord {
                    id: Some(row.get(0)?),
                    timestamp: parse_timestamp(row.get::<_, String>(1)?),
                    user: row.get(2)?,
                    session_id: row.get(3)?,
                    local_path: row.get(4)?,
                    upload_state: upload_state_from_str(&row.get::<_, String>(5)?),
                })
            },
        )
        .map(Some)
        .or_else(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StoreError::Write(other)),
        })
    }

    /// Screenshots awaiting upload, oldest first (§4.5's screenshot table).
    pub fn pending_screenshots(&self, limit: usize) -> Result<Vec<ScreenshotRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, user, session_id, local_path, upload_state
                 FROM screenshot_records WHERE upload_state = 'pending' ORDER BY id ASC LIMIT ?1",
            )
            .map_err(StoreError::Write)?;
        stmt.query_map([limit as i64], |row| {
            Ok(ScreenshotRecord {
                id: Some(row.get(0)?),
                timestamp: parse_timestamp(row.get::<_, String>(1)?),
                user: row.get(2)?,
                session_id: row.get(3)?,
                local_path: row.get(4)?,
                upload_state: upload_state_from_str(&row.get::<_, String>(5)?),
            })
        })
        .map_err(StoreError::Write)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::Write)
    }

    /// Marks a screenshot uploaded. The caller is responsible for deleting
    /// the local image file only after this succeeds (§4.5 error table).
    pub fn mark_screenshot_uploaded(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE screenshot_records SET upload_state = 'uploaded' WHERE id = ?1",
            [id],
        )
        .map_err(StoreError::Write)?;
        Ok(())
    }

    /// Marks a screenshot failed; the local file is left in place for a
    /// later retry (§4.5 error table: "local file left in place").
    pub fn mark_screenshot_failed(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE screenshot_records SET upload_state = 'failed' WHERE id = ?1",
            [id],
        )
        .map_err(StoreError::Write)?;
        Ok(())
    }

    /// Fetch up to `limit` pending activity records and atomically mark
    /// them `in_flight` under `batch_id`, so a concurrent fetch can never
    /// double-claim them.
    pub fn take_activity_batch(
        &self,
        batch_id: &str,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, user, window_title, process_name, status, sync_state, batch_id
                 FROM activity_records WHERE sync_state = 'pending' ORDER BY id ASC LIMIT ?1",
            )
            .map_err(StoreError::Write)?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(ActivityRecord {
                    id: Some(row.get(0)?),
                    timestamp: parse_timestamp(row.get::<_, String>(1)?),
                    user: row.get(2)?,
                    window_title: row.get(3)?,
                    process_name: row.get(4)?,
                    status: status_from_str(&row.get::<_, String>(5)?),
                    sync_state: sync_state_from_columns(&row.get::<_, String>(6)?, row.get(7)?),
                })
            })
            .map_err(StoreError::Write)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Write)?;

        for record in &rows {
            conn.execute(
                "UPDATE activity_records SET sync_state = 'in_flight', batch_id = ?1 WHERE id = ?2",
                rusqlite::params![batch_id, record.id],
            )
            .map_err(StoreError::Write)?;
        }
        Ok(rows)
    }

    /// Re-read the records claimed under `batch_id` (used by an upload
    /// worker that only received the batch id over its job channel).
    pub fn records_in_batch(&self, batch_id: &str) -> Result<Vec<ActivityRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, user, window_title, process_name, status, sync_state, batch_id
                 FROM activity_records WHERE batch_id = ?1 ORDER BY id ASC",
            )
            .map_err(StoreError::Write)?;
        stmt.query_map([batch_id], |row| {
            Ok(ActivityRecord {
                id: Some(row.get(0)?),
                timestamp: parse_timestamp(row.get::<_, String>(1)?),
                user: row.get(2)?,
                window_title: row.get(3)?,
                process_name: row.get(4)?,
                status: status_from_str(&row.get::<_, String>(5)?),
                sync_state: sync_state_from_columns(&row.get::<_, String>(6)?, row.get(7)?),
            })
        })
        .map_err(StoreError::Write)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::Write)
    }

    /// Mark every activity record in `batch_id` as synced (ack received).
    pub fn mark_activity_batch_synced(&self, batch_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE activity_records SET sync_state = 'synced', batch_id = NULL WHERE batch_id = ?1",
            [batch_id],
        )
        .map_err(StoreError::Write)?;
        Ok(())
    }

    /// Demote a batch back to pending after a terminal transport failure
    /// or retry exhaustion (still durable, never lost — P1).
    pub fn mark_activity_batch_pending(&self, batch_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE activity_records SET sync_state = 'pending', batch_id = NULL WHERE batch_id = ?1",
            [batch_id],
        )
        .map_err(StoreError::Write)?;
        Ok(())
    }

    pub fn count_activity_by_state(&self, state: &str) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM activity_records WHERE sync_state = ?1",
            [state],
            |row| row.get(0),
        )
        .map_err(StoreError::Write)
    }
}

fn status_to_str(status: InputStatus) -> &'static str {
    match status {
        InputStatus::Active => "active",
        InputStatus::Inactive => "inactive",
    }
}

fn status_from_str(s: &str) -> InputStatus {
    match s {
        "inactive" => InputStatus::Inactive,
        _ => InputStatus::Active,
    }
}

fn upload_state_to_str(state: ScreenshotUploadState) -> &'static str {
    match state {
        ScreenshotUploadState::Pending => "pending",
        ScreenshotUploadState::Uploaded => "uploaded",
        ScreenshotUploadState::Failed => "failed",
    }
}

fn idle_reason_from_str(s: &str) -> IdleReason {
    match s {
        "Meeting" => IdleReason::Meeting,
        "Break" => IdleReason::Break,
        "Lunch" => IdleReason::Lunch,
        "Phone Call" => IdleReason::PhoneCall,
        "Away from Desk" => IdleReason::AwayFromDesk,
        _ => IdleReason::Other,
    }
}

fn upload_state_from_str(s: &str) -> ScreenshotUploadState {
    match s {
        "uploaded" => ScreenshotUploadState::Uploaded,
        "failed" => ScreenshotUploadState::Failed,
        _ => ScreenshotUploadState::Pending,
    }
}

fn parse_timestamp(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
