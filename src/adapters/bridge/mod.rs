//! Scheduler bridge implementations.

pub mod direct;
pub mod mock;

pub use direct::DirectBridge;
pub use mock::RecordingBridge;
