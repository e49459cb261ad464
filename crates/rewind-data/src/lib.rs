//! Configuration file loading for Rewind.
//!
//! Reads a [`RewindConfig`](rewind_core::config::RewindConfig) from RON, TOML
//! or JSON, chosen by file extension, and validates its limits before
//! handing it to the core crate.

pub mod loader;

pub use loader::{ConfigLoadError, Format, find_config, load_config, load_config_from_dir};
