//! `wakeup-core`: configuration, shared errors and time helpers used by every
//! other crate in the workspace.

pub mod config;
pub mod error;
pub mod time;

pub use config::WakeupConfig;
pub use error::{CoreError, Result};
