//! Persistence layer modules.
//!
//! Both stores are plain files guarded by advisory locks so that separate
//! `rushd` processes can share them.

pub mod instance_repo;
pub mod lock;
pub mod notification_repo;
pub mod retention;
