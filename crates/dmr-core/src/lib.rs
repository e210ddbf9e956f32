//! Core domain + application logic for dmr.
//!
//! Framework-agnostic: the platform protocol lives behind the `PlatformClient`
//! port, implemented in adapter crates; the console only renders and prompts.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod platform;
pub mod session;
pub mod totp;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
