//! Library half of the `medrag` binary: configuration loading, JSON-lines
//! acquisition and the subcommand handlers.

pub mod commands;
pub mod config;
pub mod records;

pub use config::AppConfig;
