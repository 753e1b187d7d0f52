//! Chain watching: which blocks to scan next, and what events they hold

pub mod events;
pub mod window;

pub use events::{EventBatch, EventSource};
pub use window::{BlockWindowTracker, ScanCheckpoint, ScanWindow, TrackerState};
