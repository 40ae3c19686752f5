//! Core matching abstractions and the token pool itself.

pub mod affinity;
pub mod cancel;
pub mod error;
pub mod identity;
pub mod pool;
pub mod token;

pub use affinity::{AffinityEvaluator, SimpleAffinityEvaluator};
pub use cancel::CancellationToken;
pub use error::{AppResult, PoolError};
pub use identity::{Identity, Interest};
pub use pool::TokenPool;
pub use token::TokenSnapshot;
