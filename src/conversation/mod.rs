//! Conversation log module
//!
//! Holds the ordered turns of the dialogue, seeded with the directive.

mod log;

pub use log::{ConversationLog, HistoryMessage, Role, Turn};
