//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module handles:
//!
//! - Reading the TOML configuration file from the platform-appropriate directory.
//! - Applying the `CRSDK_*` environment overrides on top of it.
//! - Providing defaults when the file does not exist yet (first run).
//! - Converting the file's sections into session, poller, and overlay settings.

pub mod config;
