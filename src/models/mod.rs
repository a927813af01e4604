//! Domain model module declarations.

pub mod activity;
pub mod instance;
pub mod notification;
