//! `InputMonitor` (§4.2): tracks "has there been input recently" without
//! ever inspecting what the input was.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use activitymon_core::InputStatus;
use chrono::Utc;
use tokio::sync::watch;

use crate::platform::PlatformObserver;

/// Watches raw input events and derives `InputStatus` relative to a
/// configured timeout. Cheap to clone; the actual state lives behind the
/// shared `watch` channel.
#[derive(Clone)]
pub struct InputMonitor {
    status_rx: watch::Receiver<InputStatus>,
    last_input_epoch_ms: Arc<AtomicI64>,
    _task: Arc<tokio::task::JoinHandle<()>>,
}

impl InputMonitor {
    /// Starts the monitor immediately; input events observed before this
    /// call are not visible.
    pub fn start(observer: Arc<dyn PlatformObserver>, activity_timeout: Duration) -> Self {
        let mut input_rx = observer.on_input();
        // §4.2: "Initial status is Inactive with `last_input_at = −∞`" — no
        // input has been observed yet, so nothing should read as Active
        // until the first real event arrives.
        let last_input_epoch_ms = Arc::new(AtomicI64::new(i64::MIN));
        let (status_tx, status_rx) = watch::channel(InputStatus::Inactive);

        let last_input_for_task = last_input_epoch_ms.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(500));
            loop {
                tokio::select! {
                    maybe_event = input_rx.recv() => {
                        match maybe_event {
                            Some(_) => {
                                last_input_for_task.store(Utc::now().timestamp_millis(), Ordering::SeqCst);
                                if *status_tx.borrow() != InputStatus::Active {
                                    let _ = status_tx.send(InputStatus::Active);
                                }
                            }
                            None => break,
                        }
                    }
                    _ = ticker.tick() => {
                        let last = last_input_for_task.load(Ordering::SeqCst);
                        let elapsed_ms = Utc::now().timestamp_millis().saturating_sub(last);
                        let derived = if elapsed_ms as u128 >= activity_timeout.as_millis() {
                            InputStatus::Inactive
                        } else {
                            InputStatus::Active
                        };
                        if *status_tx.borrow() != derived {
                            let _ = status_tx.send(derived);
                        }
                    }
                }
                if status_tx.is_closed() {
                    break;
                }
            }
        });

        Self {
            status_rx,
            last_input_epoch_ms,
            _task: Arc::new(task),
        }
    }

    /// Current derived status (Active/Inactive), read without blocking.
    pub fn status(&self) -> InputStatus {
        *self.status_rx.borrow()
    }

    /// A receiver that yields whenever the status flips — the monitor only
    /// notifies on transitions, never on every tick.
    pub fn subscribe(&self) -> watch::Receiver<InputStatus> {
        self.status_rx.clone()
    }

    /// Milliseconds since the last observed input event.
    pub fn idle_millis(&self) -> i64 {
        Utc::now()
            .timestamp_millis()
            .saturating_sub(self.last_input_epoch_ms.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::test_support::ScriptedObserver;
    use crate::platform::RawInputKind;

    #[tokio::test(start_paused = true)]
    async fn starts_inactive_until_first_input() {
        let observer = ScriptedObserver::new();
        let monitor = InputMonitor::start(observer.clone(), Duration::from_millis(200));
        assert_eq!(monitor.status(), InputStatus::Inactive);

        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
        assert_eq!(monitor.status(), InputStatus::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_back_to_inactive_after_timeout() {
        let observer = ScriptedObserver::new();
        let monitor = InputMonitor::start(observer.clone(), Duration::from_millis(200));
        let mut rx = monitor.subscribe();

        observer.push_input(RawInputKind::KeyPress);
        rx.changed().await.unwrap();
        assert_eq!(monitor.status(), InputStatus::Active);

        tokio::time::advance(Duration::from_millis(600)).await;
        tokio::task::yield_now().await;
        assert_eq!(monitor.status(), InputStatus::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn input_event_resets_to_active() {
        let observer = ScriptedObserver::new();
        let monitor = InputMonitor::start(observer.clone(), Duration::from_millis(200));
        let mut rx = monitor.subscribe();

        tokio::time::advance(Duration::from_millis(600)).await;
        tokio::task::yield_now().await;
        assert_eq!(*rx.borrow_and_update(), InputStatus::Inactive);

        observer.push_input(RawInputKind::KeyPress);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), InputStatus::Active);
    }
}
