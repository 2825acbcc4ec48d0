//! Shared helpers

pub mod env;
pub mod logger;
