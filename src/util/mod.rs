//! Utility modules

pub mod log;
pub mod time;
