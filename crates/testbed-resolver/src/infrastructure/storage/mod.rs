//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the optional TOML configuration file, falls
//! back to defaults for anything missing, and can write the effective
//! configuration back out as a starting point for users.

pub mod config;
