#![forbid(unsafe_code)]

//! `rushd` runs and supervises interactive coding-agent sessions in tmux.

pub mod activity;
pub mod config;
pub mod errors;
pub mod models;
pub mod multiplexer;
pub mod orchestrator;
pub mod persistence;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
