//! # actpack-cli
//!
//! Command line front end of [`actpack`].
//!
//! ## Modules
//!
//! - [`commands`] - Command line definitions and handlers
//! - [`config`] - Firmware description (`firmware.toml`)
//! - [`firmware`] - Whole firmware pipeline
//! - [`utils`] - Host process runner and file helpers

/// Command line definitions and handlers.
pub mod commands;

/// Firmware description loading.
///
/// Partitions, version and external tools are read from a TOML file.
pub mod config;

/// Whole firmware pipeline.
pub mod firmware;

/// Common utilities and helper functions.
pub mod utils;

#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;
