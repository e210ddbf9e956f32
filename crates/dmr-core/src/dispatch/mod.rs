pub mod dispatcher;
pub mod payload;
pub mod report;

pub use dispatcher::Dispatcher;
pub use payload::{Payload, PayloadMode};
pub use report::{
    DispatchSummary, InboundHistory, NoopReporter, ProgressReporter, SendOutcome, SendResult,
    SendRound,
};
