//! Activity detection from the agent's conversation logs.

pub mod format;
pub mod log_reader;

pub use log_reader::ConversationLogReader;
