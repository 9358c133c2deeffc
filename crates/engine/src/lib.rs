#![forbid(unsafe_code)]

//! The activity capture and transport pipeline: monitors, local durable
//! store, work queue and transport client wired together by
//! [`pipeline::ActivityPipeline`].

pub mod idle_detector;
pub mod input_monitor;
pub mod pipeline;
pub mod platform;
pub mod queue;
pub mod store;
pub mod transport;
pub mod window_monitor;

pub use idle_detector::{IdleDetector, IdleEvent};
pub use input_monitor::InputMonitor;
pub use pipeline::ActivityPipeline;
pub use platform::{PlatformError, PlatformObserver, PollingObserver, RawInputKind, WindowHandle, WindowSnapshot};
pub use queue::{QueueFull, UploadJob, WorkQueue};
pub use store::{LocalStore, StoreError};
pub use transport::{TransportClient, TransportError};
pub use window_monitor::WindowMonitor;
