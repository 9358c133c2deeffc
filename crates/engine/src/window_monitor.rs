//! `WindowMonitor` (§4.3): tracks the foreground window and emits only on
//! change, after a short debounce to absorb focus flicker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};

use crate::platform::{PlatformObserver, WindowHandle, WindowSnapshot};

const DEBOUNCE: Duration = Duration::from_millis(100);

/// Broadcast to all pipeline consumers whenever the foreground window
/// settles on a new value.
pub struct WindowMonitor {
    events_tx: broadcast::Sender<WindowSnapshot>,
    last_seen: Arc<Mutex<Option<(String, String)>>>,
    _task: Arc<tokio::task::JoinHandle<()>>,
}

impl WindowMonitor {
    pub fn start(observer: Arc<dyn PlatformObserver>) -> Self {
        let mut change_rx = observer.on_foreground_change();
        let (events_tx, _) = broadcast::channel(64);
        let last_seen: Arc<Mutex<Option<(String, String)>>> = Arc::new(Mutex::new(None));

        let tx_for_task = events_tx.clone();
        let last_seen_for_task = last_seen.clone();
        let task = tokio::spawn(async move {
            loop {
                let handle = match change_rx.recv().await {
                    Some(h) => h,
                    None => break,
                };
                // Coalesce a burst of focus-change notifications into one.
                tokio::time::sleep(DEBOUNCE).await;
                while let Ok(next) = change_rx.try_recv() {
                    let _ = next;
                }
                let snapshot = observer.query_window(handle);
                let key = (snapshot.title.clone(), snapshot.process_name.clone());
                let mut last = last_seen_for_task.lock().await;
                if last.as_ref() != Some(&key) {
                    *last = Some(key);
                    drop(last);
                    let _ = tx_for_task.send(snapshot);
                }
            }
        });

        Self {
            events_tx,
            last_seen,
            _task: Arc::new(task),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WindowSnapshot> {
        self.events_tx.subscribe()
    }

    /// The last window observed, if any.
    pub async fn current(&self) -> Option<(String, String)> {
        self.last_seen.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::test_support::ScriptedObserver;

    #[tokio::test]
    async fn emits_only_on_distinct_window() {
        let observer = ScriptedObserver::new();
        observer.register_window(
            WindowHandle(1),
            WindowSnapshot {
                title: "A".into(),
                process_name: "app".into(),
                user: "alice".into(),
            },
        );
        observer.register_window(
            WindowHandle(2),
            WindowSnapshot {
                title: "A".into(),
                process_name: "app".into(),
                user: "alice".into(),
            },
        );
        let monitor = WindowMonitor::start(observer.clone());
        let mut rx = monitor.subscribe();

        observer.push_window_change(WindowHandle(1));
        let first = rx.recv().await.unwrap();
        assert_eq!(first.title, "A");

        // Same (title, process) under a different handle must not re-emit.
        observer.push_window_change(WindowHandle(2));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(rx.try_recv().is_err());
    }
}
