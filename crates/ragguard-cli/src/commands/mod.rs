//! CLI command handlers

pub mod config;
pub mod probe;
pub mod status;
