pub mod client;
pub mod throttled;
pub mod types;

pub use client::{PlatformClient, RealtimeConnection};
pub use throttled::{ThrottleConfig, ThrottledConnection};
pub use types::{MessageHandler, RawMessage, Subscriptions};
