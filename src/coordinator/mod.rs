//! Turn-taking coordinator module
//!
//! Arbitrates the microphone and the loudspeaker so that at most one speaker
//! is active, and returns to listening after each machine turn while
//! continuous mode is on. Modes:
//! - Idle: nothing active
//! - ArmedListening: capture restart pending confirmation
//! - Capturing: continuous recognition live
//! - ManualRecording: push-to-talk recording and its transcription
//! - AwaitingReply / Synthesizing: a gateway request is outstanding
//! - Speaking: a reply is playing

mod input;
mod machine;
mod mode;


pub use input::{Input, UserCommand};
pub use machine::{Collaborators, Coordinator, CoordinatorSettings, Snapshot, DEFAULT_APOLOGY};
pub use mode::Mode;
