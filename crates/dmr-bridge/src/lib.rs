//! Bridge adapter: implements `PlatformClient` by driving an external process
//! that speaks the platform protocol, over newline-delimited JSON on its stdio.

mod client;
mod process;
pub mod protocol;

pub use client::{BridgeClient, BridgeConnection};
pub use process::BridgeConfig;
