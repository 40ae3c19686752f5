//! Registry state for registered worker resources.

use std::sync::Arc;
use std::time::Instant;

use super::Identity;

/// Pool-internal wrapper around a registered worker identity.
///
/// Mutated only while the registry lock is held. An entry leaves the registry
/// when invalidated while available, or when returned while invalidated; an
/// invalidated-but-reserved entry stays until returned so a resource is never
/// yanked out from under an in-flight execution.
#[derive(Debug)]
pub(crate) struct TokenEntry {
    pub(crate) resource: Arc<Identity>,
    pub(crate) available: bool,
    pub(crate) invalidated: bool,
    pub(crate) last_keepalive: Instant,
}

impl TokenEntry {
    pub(crate) fn new(resource: Arc<Identity>) -> Self {
        Self {
            resource,
            available: true,
            invalidated: false,
            last_keepalive: Instant::now(),
        }
    }

    pub(crate) fn snapshot(&self) -> TokenSnapshot {
        TokenSnapshot {
            resource: Arc::clone(&self.resource),
            available: self.available,
            invalidated: self.invalidated,
            last_keepalive: self.last_keepalive,
        }
    }
}

/// Point-in-time copy of one registered token's state.
///
/// Returned by [`TokenPool::tokens`](super::TokenPool::tokens); never a live
/// reference into the registry.
#[derive(Debug, Clone)]
pub struct TokenSnapshot {
    /// The worker identity behind this token.
    pub resource: Arc<Identity>,
    /// Whether the token was free at snapshot time.
    pub available: bool,
    /// Whether the token was marked invalid (removal pending if reserved).
    pub invalidated: bool,
    /// When the worker last signaled health.
    pub last_keepalive: Instant,
}
