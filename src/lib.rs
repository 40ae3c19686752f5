//! # Grid Token Pool
//!
//! An affinity-based worker token pool for distributed execution grids.
//!
//! Remote workers register themselves with the pool as *tokens* that advertise
//! attributes (key/value capabilities) and interests (constraints on who may
//! use them). Requesters — *pretenders* — declare their own attributes and
//! interests and ask the pool for the best matching available worker, blocking
//! with a bounded wait when every compatible worker is busy.
//!
//! ## Core Problem Solved
//!
//! Routing execution requests to heterogeneous worker resources has
//! constraints that a plain free-list cannot express:
//!
//! - **Bidirectional matching**: a worker may require something of its caller
//!   (a capability flag) just as the caller requires something of the worker
//!   (a specific OS), and both sides accumulate soft preferences as
//!   tie-breakers
//! - **Blocking acquisition**: when every compatible worker is reserved, the
//!   caller waits, with a longer patience when a suitable worker is known to
//!   exist than when none could ever match
//! - **Health expiry**: workers that stop signaling are invalidated by a
//!   background sweep that must not race foreground operations
//!
//! ## Key Features
//!
//! - **Affinity scoring**: symmetric, fail-fast-on-mandatory-miss scoring
//!   over regex interests ([`SimpleAffinityEvaluator`])
//! - **Atomic scan-and-reserve**: the selection fast path holds the registry
//!   lock for the whole scan, so two callers can never claim the same token
//! - **Per-pretender wake-up**: each blocked selection parks on its own
//!   condition variable; a newly available token wakes exactly one compatible
//!   waiter in FIFO order, never the whole herd
//! - **Deferred invalidation**: invalidating a reserved token never yanks it
//!   from an in-flight execution; removal happens on return
//! - **Cancellation**: a blocked selection can be abandoned before its
//!   timeout through a [`CancellationToken`]
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use grid_token_pool::{Identity, Interest, SimpleAffinityEvaluator, TokenPool};
//!
//! # fn main() -> Result<(), grid_token_pool::PoolError> {
//! let pool = TokenPool::new(Arc::new(SimpleAffinityEvaluator));
//!
//! let worker = Identity::new().attribute("os", "linux");
//! pool.offer_token(worker);
//!
//! let pretender = Identity::new().interest("os", Interest::new("linux", true)?);
//! let token = pool.select_token(
//!     &pretender,
//!     Duration::from_secs(1),
//!     Duration::from_secs(1),
//! )?;
//! assert_eq!(token.attributes().get("os").map(String::as_str), Some("linux"));
//!
//! pool.return_token(&token)?;
//! # Ok(())
//! # }
//! ```

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core matching abstractions and the token pool itself.
pub mod core;
/// Configuration models for the pool and its health sweep.
pub mod config;
/// Builders to construct a pool from configuration.
pub mod builders;
/// Shared utilities.
pub mod util;

pub use crate::builders::TokenPoolBuilder;
pub use crate::config::TokenPoolConfig;
pub use crate::core::{
    AffinityEvaluator, AppResult, CancellationToken, Identity, Interest, PoolError,
    SimpleAffinityEvaluator, TokenPool, TokenSnapshot,
};
