//! Capture module for microphone input
//!
//! Continuous speech recognition and push-to-talk recording share one
//! microphone; the coordinator decides which (if either) is live.

mod bridge;
mod source;

pub use bridge::BridgedCapture;
pub use source::{CaptureError, CaptureErrorKind, CaptureEvent, CaptureSource};
