pub mod batch;
pub mod manager;
pub mod retry;
pub mod types;

pub use batch::{BatchLogin, BatchResult};
pub use manager::{AuthManager, LoginRun};
pub use retry::{RetryDecision, RetryPolicy};
pub use types::{AttemptOutcome, AuthState, LoginAttempt, LoginError, LoginErrorKind};
