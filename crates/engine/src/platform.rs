//! `PlatformObserver`: the abstraction a host platform supplies (§4.1).
//!
//! Real OS hook primitives (win32 `SetWindowsHookEx`, X11 record extension,
//! Carbon event taps, …) are out of scope for this crate — they are the
//! spec's named external collaborator. What lives here is the trait every
//! such backend must implement, a polling reference implementation that
//! satisfies the contract without any native binding, and (test-only) a
//! scripted double used to drive the monitors deterministically.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

/// The *fact* of an input event — never its content (Non-goal: no keystroke
/// capture).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawInputKind {
    KeyPress,
    KeyRelease,
    MouseButton,
    MouseMove,
    Wheel,
}

/// Opaque handle to a foreground window, as reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

/// Best-effort lookup result for a window handle. Every field degrades to
/// empty on failure; this type can never represent a failed query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WindowSnapshot {
    pub title: String,
    pub process_name: String,
    pub user: String,
}

/// Installing OS-level hooks failed; fatal at startup (§4.1, §6 exit code 1).
#[derive(Debug, thiserror::Error)]
#[error("failed to install platform observer: {0}")]
pub struct PlatformError(pub String);

/// Contract a host platform must supply (§4.1).
///
/// `on_input`/`on_foreground_change` install callbacks that MUST return
/// within microseconds — implementations hand off to a channel and return
/// immediately, never performing the pipeline's own work inline.
pub trait PlatformObserver: Send + Sync {
    /// Install the input-event hook. The returned receiver yields one item
    /// per detected input event.
    fn on_input(&self) -> mpsc::UnboundedReceiver<RawInputKind>;

    /// Install the foreground-window-change hook. The returned receiver
    /// yields the new window handle whenever focus changes.
    fn on_foreground_change(&self) -> mpsc::UnboundedReceiver<WindowHandle>;

    /// Synchronous best-effort lookup; never fails, degrades to empty
    /// strings, and must not block the caller for more than 50ms (§4.3).
    fn query_window(&self, handle: WindowHandle) -> WindowSnapshot;

    /// Seconds since the last OS-level input, if the platform can report it
    /// independently of `InputMonitor`'s own bookkeeping (optional
    /// cross-check per §4.1).
    fn idle_seconds(&self) -> Option<u64> {
        None
    }

    /// The window currently in focus, queried once at startup so the
    /// pipeline can emit its synthetic boot record (§4.6). `None` when the
    /// platform can't answer without first observing a change.
    fn foreground_window(&self) -> Option<WindowHandle> {
        None
    }
}

/// Poll-based fallback observer (§4.3's "poll — fallback: a 1s timer").
///
/// Has no real window backend to query, so `query_window` always returns an
/// empty snapshot — exactly the documented degrade-to-empty failure mode —
/// and the foreground-change channel never fires. This is the minimum
/// viable implementation of the contract; a real desktop build swaps it for
/// a native backend without touching any other component.
pub struct PollingObserver {
    poll_interval: Duration,
}

impl PollingObserver {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl PlatformObserver for PollingObserver {
    fn on_input(&self) -> mpsc::UnboundedReceiver<RawInputKind> {
        let (_tx, rx) = mpsc::unbounded_channel();
        rx
    }

    fn on_foreground_change(&self) -> mpsc::UnboundedReceiver<WindowHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        let interval = self.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                // No native backend: nothing changed, so nothing to emit.
                // A real implementation would query the OS here and send
                // WindowHandle on change.
                if tx.is_closed() {
                    break;
                }
            }
        });
        rx
    }

    fn query_window(&self, _handle: WindowHandle) -> WindowSnapshot {
        WindowSnapshot::default()
    }
}
