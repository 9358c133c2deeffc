//! `IdleDetector` (§4.4): derives idle-session start/end events from
//! `InputMonitor`'s raw last-input timestamp, guaranteeing every `Started`
//! is eventually paired with exactly one `Ended` (P2), including a
//! shutdown-synthesized final pairing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::input_monitor::InputMonitor;

/// An idle interval boundary, broadcast to interested consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleEvent {
    Started { at: DateTime<Utc> },
    Ended { start: DateTime<Utc>, end: DateTime<Utc> },
}

pub struct IdleDetector {
    events_tx: broadcast::Sender<IdleEvent>,
    _task: std::sync::Arc<tokio::task::JoinHandle<()>>,
}

impl IdleDetector {
    /// `idle_threshold` (T_idle) is compared against `input_monitor`'s raw
    /// `idle_millis()` reading — the elapsed time since the last observed
    /// input — not against `InputMonitor`'s own debounced Active/Inactive
    /// status, which only flips after its own, independently configured
    /// `activity_timeout` and would otherwise compound with `idle_threshold`.
    pub fn start(input_monitor: InputMonitor, idle_threshold: Duration) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        let tx_for_task = events_tx.clone();
        let mut status_rx = input_monitor.subscribe();
        let threshold_ms = idle_threshold.as_millis() as i64;

        let task = tokio::spawn(async move {
            let mut idle_since: Option<DateTime<Utc>> = None;
            let mut ticker = tokio::time::interval(Duration::from_millis(100));

            loop {
                tokio::select! {
                    changed = status_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {}
                }

                // `idle_millis()` saturates to `i64::MAX` when no input has
                // ever been observed (§4.2's `-infinity`); clamp before
                // turning it into a `chrono::Duration` subtracted from
                // `now`, which would otherwise overflow `DateTime`'s range
                // and panic.
                let idle_ms = input_monitor.idle_millis().clamp(0, i64::from(u32::MAX));
                let now = Utc::now();
                let last_input_at = now - chrono::Duration::milliseconds(idle_ms);

                if idle_ms >= threshold_ms {
                    if idle_since.is_none() {
                        idle_since = Some(last_input_at);
                        let _ = tx_for_task.send(IdleEvent::Started { at: last_input_at });
                    }
                } else if let Some(start) = idle_since.take() {
                    let _ = tx_for_task.send(IdleEvent::Ended {
                        start,
                        end: last_input_at,
                    });
                }
            }

            // Shutdown while idle: synthesize the closing `Ended` so every
            // `Started` is paired (P2).
            if let Some(start) = idle_since {
                let _ = tx_for_task.send(IdleEvent::Ended {
                    start,
                    end: Utc::now(),
                });
            }
        });

        Self {
            events_tx,
            _task: std::sync::Arc::new(task),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IdleEvent> {
        self.events_tx.subscribe()
    }
}
