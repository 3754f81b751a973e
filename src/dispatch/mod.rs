//! Rate-limited bulk dispatch.

pub mod queue;
pub mod rate;

pub use queue::{DispatchOutcome, DispatchQueue, DispatchReport, RecipientError};
pub use rate::RateLimiter;
