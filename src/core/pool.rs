//! The affinity-based token pool.
//!
//! Coordinates registration, matching, blocking selection, release,
//! invalidation, and health expiry of worker tokens. All registry reads and
//! mutations happen under one exclusive lock, so the selection fast path's
//! scan-and-reserve is atomic: two pretenders can never claim the same
//! available token. Blocked pretenders each park on their own condition
//! variable and are woken individually, in FIFO arrival order, by whichever
//! offer or return produces a compatible token.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use super::cancel::CancellationToken;
use super::token::{TokenEntry, TokenSnapshot};
use super::{AffinityEvaluator, Identity, PoolError};
use crate::config::TokenPoolConfig;

/// Wait state of one queued, blocked selection request.
#[derive(Debug, Default)]
struct WaitState {
    /// The token reserved for this pretender, set exactly once by whichever
    /// thread satisfies it.
    matched: Option<Arc<Identity>>,
    /// Set when a token removal left this pretender without any candidate
    /// match, prompting a re-evaluation of the timeout policy.
    match_gone: bool,
    /// Set by [`CancellationToken::cancel`].
    cancelled: bool,
}

/// A queued selection request parked on its own condition variable.
///
/// Per-pretender granularity keeps a token offer or return from waking the
/// whole herd: the satisfying thread signals exactly one waiter.
#[derive(Debug)]
pub(crate) struct Waiter {
    pretender: Arc<Identity>,
    state: Mutex<WaitState>,
    condvar: Condvar,
}

impl Waiter {
    fn new(pretender: Arc<Identity>) -> Self {
        Self {
            pretender,
            state: Mutex::new(WaitState::default()),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn mark_cancelled(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        self.condvar.notify_one();
    }
}

/// Registry contents, guarded as one unit by the pool's exclusive lock.
#[derive(Debug)]
struct Registry {
    tokens: HashMap<String, TokenEntry>,
    /// `None` disables the health sweep's invalidation effect.
    keepalive_timeout: Option<Duration>,
}

/// Outcome of the atomic scan-and-reserve over the registry.
enum FastPath {
    /// An available compatible token was reserved for the caller.
    Reserved(Arc<Identity>),
    /// Compatible tokens exist but every one is currently reserved.
    Busy,
    /// Nothing in the registry can ever satisfy the pretender.
    NoMatch,
}

/// How a finished wait loop exited; the matched slot is resolved afterwards,
/// once the waiter is out of the queue and can no longer be assigned to.
enum WaitOutcome {
    Matched,
    Cancelled,
    TimedOut,
}

/// Pool state shared with the sweeper thread.
struct PoolInner {
    evaluator: Arc<dyn AffinityEvaluator>,
    registry: Mutex<Registry>,
    /// Outstanding blocked selections, FIFO by arrival.
    waiting: Mutex<Vec<Arc<Waiter>>>,
    sweep_shutdown: Mutex<bool>,
    sweep_condvar: Condvar,
    sweep_interval: Duration,
    /// Configured defaults for [`TokenPool::select_token_with_defaults`].
    match_exists_timeout: Duration,
    no_match_exists_timeout: Duration,
}

impl PoolInner {
    /// Single scan tracking the best match overall (timeout policy input)
    /// and the best available match, which gets reserved on the spot. Ties
    /// on score go to the lowest worker id, making selection deterministic
    /// regardless of registry iteration order.
    fn try_reserve_best(&self, registry: &mut Registry, pretender: &Identity) -> FastPath {
        let mut best: Option<(u32, &str)> = None;
        let mut best_available: Option<(u32, &str)> = None;
        for (id, entry) in &registry.tokens {
            let Some(score) = self.evaluator.score(pretender, &entry.resource) else {
                continue;
            };
            if beats(score, id, best) {
                best = Some((score, id));
            }
            if entry.available && beats(score, id, best_available) {
                best_available = Some((score, id));
            }
        }

        let reserved_id = best_available.map(|(_, id)| id.to_string());
        let match_exists = best.is_some();
        if let Some(id) = reserved_id {
            if let Some(entry) = registry.tokens.get_mut(&id) {
                entry.available = false;
                return FastPath::Reserved(Arc::clone(&entry.resource));
            }
        }
        if match_exists {
            FastPath::Busy
        } else {
            FastPath::NoMatch
        }
    }

    /// Hand the (available) token `id` to the first compatible blocked
    /// pretender in FIFO order, if any: reserve it, set the match, and wake
    /// that single waiter.
    fn try_satisfy_one_waiter(&self, registry: &mut Registry, id: &str) {
        let Some(resource) = registry.tokens.get(id).map(|entry| Arc::clone(&entry.resource))
        else {
            return;
        };
        let waiting = self.waiting.lock();
        let chosen = waiting.iter().find(|waiter| {
            let state = waiter.state.lock();
            if state.matched.is_some() || state.cancelled {
                return false;
            }
            self.evaluator.score(&waiter.pretender, &resource).is_some()
        });
        if let Some(waiter) = chosen {
            if let Some(entry) = registry.tokens.get_mut(id) {
                entry.available = false;
            }
            let mut state = waiter.state.lock();
            state.matched = Some(resource);
            waiter.condvar.notify_one();
        }
    }

    /// Wake every blocked pretender that no longer has any candidate match
    /// in the registry, so it can re-evaluate its timeout policy. Called
    /// after a token removal.
    fn notify_waiters_without_candidate(&self, registry: &Registry) {
        let waiting = self.waiting.lock();
        for waiter in waiting.iter() {
            let mut state = waiter.state.lock();
            if state.matched.is_some() {
                continue;
            }
            let has_candidate = registry.tokens.values().any(|entry| {
                self.evaluator
                    .score(&waiter.pretender, &entry.resource)
                    .is_some()
            });
            if !has_candidate {
                state.match_gone = true;
                waiter.condvar.notify_one();
            }
        }
    }

    /// Invalidate the token `id` if registered: removed immediately when
    /// available, otherwise left in place until returned.
    fn invalidate_locked(&self, registry: &mut Registry, id: &str) {
        let available = match registry.tokens.get_mut(id) {
            None => return,
            Some(entry) => {
                debug!("invalidating token {}", entry.resource);
                entry.invalidated = true;
                entry.available
            }
        };
        if available {
            registry.tokens.remove(id);
            self.notify_waiters_without_candidate(registry);
        }
    }

    /// One pass of the health sweep: expire every token whose keepalive is
    /// older than the configured timeout.
    fn sweep_once(&self) {
        let mut registry = self.registry.lock();
        let Some(timeout) = registry.keepalive_timeout else {
            return;
        };
        let now = Instant::now();
        let expired: Vec<String> = registry
            .tokens
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_keepalive) > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            warn!("token {id} missed its keepalive window, invalidating");
            self.invalidate_locked(&mut registry, &id);
        }
    }
}

fn beats(score: u32, id: &str, current: Option<(u32, &str)>) -> bool {
    match current {
        None => true,
        Some((best_score, best_id)) => score > best_score || (score == best_score && id < best_id),
    }
}

/// The central structure coordinating token registration, matching, blocking
/// selection, release, invalidation, and health expiry.
///
/// Explicitly constructed and dependency-injected: no global state, so
/// several independent pools can coexist in one process. The background
/// health sweep thread starts with the pool and is joined when the pool is
/// dropped (or on [`shutdown`](Self::shutdown)).
pub struct TokenPool {
    inner: Arc<PoolInner>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TokenPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPool")
            .field("size", &self.len())
            .field("waiting", &self.inner.waiting.lock().len())
            .finish_non_exhaustive()
    }
}

impl TokenPool {
    /// New pool with the default configuration.
    #[must_use]
    pub fn new(evaluator: Arc<dyn AffinityEvaluator>) -> Self {
        Self::with_config(&TokenPoolConfig::default(), evaluator)
    }

    /// New pool from explicit configuration.
    #[must_use]
    pub fn with_config(config: &TokenPoolConfig, evaluator: Arc<dyn AffinityEvaluator>) -> Self {
        let inner = Arc::new(PoolInner {
            evaluator,
            registry: Mutex::new(Registry {
                tokens: HashMap::new(),
                keepalive_timeout: config.keepalive_timeout(),
            }),
            waiting: Mutex::new(Vec::new()),
            sweep_shutdown: Mutex::new(false),
            sweep_condvar: Condvar::new(),
            sweep_interval: config.sweep_interval(),
            match_exists_timeout: config.match_exists_timeout(),
            no_match_exists_timeout: config.no_match_exists_timeout(),
        });
        let sweeper = Self::spawn_sweeper(Arc::clone(&inner));
        Self {
            inner,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Register a worker token, or refresh its health stamp if already
    /// registered (an idempotent re-offer doubles as a keepalive).
    ///
    /// A newly registered token is immediately matched against the waiting
    /// queue; at most one compatible blocked pretender is satisfied.
    /// Returns the worker id.
    pub fn offer_token(&self, resource: Identity) -> String {
        let resource = Arc::new(resource);
        let id = resource.id().to_string();
        let mut registry = self.inner.registry.lock();
        if let Some(entry) = registry.tokens.get_mut(&id) {
            entry.last_keepalive = Instant::now();
        } else {
            debug!("offering token {resource}");
            registry
                .tokens
                .insert(id.clone(), TokenEntry::new(resource));
            self.inner.try_satisfy_one_waiter(&mut registry, &id);
        }
        id
    }

    /// Return a previously selected token to the pool.
    ///
    /// If the token was invalidated while reserved it is removed now, and
    /// blocked pretenders that thereby lost their last candidate match are
    /// woken to re-evaluate their timeout policy. Otherwise the token becomes
    /// available again and at most one compatible blocked pretender is
    /// satisfied with it.
    ///
    /// # Errors
    ///
    /// [`PoolError::UnknownToken`] if the worker id is not in the registry.
    pub fn return_token(&self, resource: &Identity) -> Result<(), PoolError> {
        let mut registry = self.inner.registry.lock();
        debug!("returning token {resource}");
        let invalidated = registry
            .tokens
            .get(resource.id())
            .map(|entry| entry.invalidated)
            .ok_or_else(|| PoolError::UnknownToken(resource.id().to_string()))?;
        if invalidated {
            registry.tokens.remove(resource.id());
            self.inner.notify_waiters_without_candidate(&registry);
        } else {
            if let Some(entry) = registry.tokens.get_mut(resource.id()) {
                entry.available = true;
            }
            self.inner.try_satisfy_one_waiter(&mut registry, resource.id());
        }
        Ok(())
    }

    /// Mark the token with this worker id invalid.
    ///
    /// An available token is removed immediately; a reserved one stays
    /// registered until returned, so it is never yanked out from under an
    /// in-flight execution. Unknown ids are ignored.
    pub fn invalidate(&self, id: &str) {
        let mut registry = self.inner.registry.lock();
        self.inner.invalidate_locked(&mut registry, id);
    }

    /// Mark this worker's token invalid. See [`invalidate`](Self::invalidate).
    pub fn invalidate_token(&self, resource: &Identity) {
        self.invalidate(resource.id());
    }

    /// Refresh the health stamp of the token with this worker id, without
    /// changing its availability. Unknown ids are ignored.
    pub fn keepalive_token(&self, id: &str) {
        let mut registry = self.inner.registry.lock();
        if let Some(entry) = registry.tokens.get_mut(id) {
            entry.last_keepalive = Instant::now();
        }
    }

    /// Select the best matching available token, blocking when none is free.
    ///
    /// The registry is scanned once under the lock; the best-scoring
    /// *available* token (ties broken towards the lowest worker id) is
    /// reserved and returned without blocking. Otherwise the caller queues up
    /// and waits: for `match_exists_timeout` when a compatible token exists
    /// but is currently reserved, else for `no_match_exists_timeout`. A zero
    /// duration means "do not wait".
    ///
    /// # Errors
    ///
    /// [`PoolError::SelectionTimeout`] when the wait window elapses without a
    /// compatible token becoming available.
    pub fn select_token(
        &self,
        pretender: &Identity,
        match_exists_timeout: Duration,
        no_match_exists_timeout: Duration,
    ) -> Result<Arc<Identity>, PoolError> {
        self.select_inner(pretender, match_exists_timeout, no_match_exists_timeout, None)
    }

    /// [`select_token`](Self::select_token) with the wait windows taken from
    /// the pool's configuration.
    ///
    /// # Errors
    ///
    /// [`PoolError::SelectionTimeout`] when the configured wait window
    /// elapses without a compatible token becoming available.
    pub fn select_token_with_defaults(
        &self,
        pretender: &Identity,
    ) -> Result<Arc<Identity>, PoolError> {
        self.select_inner(
            pretender,
            self.inner.match_exists_timeout,
            self.inner.no_match_exists_timeout,
            None,
        )
    }

    /// [`select_token`](Self::select_token) that can additionally be
    /// abandoned through `cancellation` before the wait window elapses.
    ///
    /// # Errors
    ///
    /// [`PoolError::SelectionTimeout`] on timeout, [`PoolError::Cancelled`]
    /// when `cancellation` fires first (or had already fired on entry).
    pub fn select_token_with_cancellation(
        &self,
        pretender: &Identity,
        match_exists_timeout: Duration,
        no_match_exists_timeout: Duration,
        cancellation: &CancellationToken,
    ) -> Result<Arc<Identity>, PoolError> {
        self.select_inner(
            pretender,
            match_exists_timeout,
            no_match_exists_timeout,
            Some(cancellation),
        )
    }

    fn select_inner(
        &self,
        pretender: &Identity,
        match_exists_timeout: Duration,
        no_match_exists_timeout: Duration,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Arc<Identity>, PoolError> {
        if cancellation.is_some_and(CancellationToken::is_cancelled) {
            return Err(PoolError::Cancelled);
        }
        let start = Instant::now();

        // Fast path: atomic scan-and-reserve under the registry lock. The
        // availability-agnostic best match only decides which timeout governs
        // the slow path.
        let match_exists = {
            let mut registry = self.inner.registry.lock();
            match self.inner.try_reserve_best(&mut registry, pretender) {
                FastPath::Reserved(resource) => {
                    debug!("found token without queuing, pretender={pretender} token={resource}");
                    return Ok(resource);
                }
                FastPath::Busy => true,
                FastPath::NoMatch => false,
            }
        };

        debug!("no free token found, enqueuing pretender {pretender}");
        let pretender = Arc::new(pretender.clone());
        let waiter = Arc::new(Waiter::new(Arc::clone(&pretender)));
        if let Some(cancellation) = cancellation {
            if !cancellation.register(&waiter) {
                return Err(PoolError::Cancelled);
            }
        }
        self.inner.waiting.lock().push(Arc::clone(&waiter));

        // A token returned between the fast-path scan and the enqueue above
        // would otherwise go unnoticed until the timeout. Assignments to
        // waiters only ever happen under the registry lock, so one more scan
        // under it closes the window.
        {
            let mut registry = self.inner.registry.lock();
            let unmatched = waiter.state.lock().matched.is_none();
            if unmatched {
                if let FastPath::Reserved(resource) =
                    self.inner.try_reserve_best(&mut registry, &pretender)
                {
                    waiter.state.lock().matched = Some(resource);
                }
            }
        }

        let wait_timeout = if match_exists {
            match_exists_timeout
        } else {
            no_match_exists_timeout
        };
        let outcome = wait_for_match(&waiter, start, wait_timeout, no_match_exists_timeout);

        // Cleanup, regardless of exit path: leave the queue first, then
        // resolve the matched slot. After removal no thread can assign to
        // this waiter anymore.
        if let Some(cancellation) = cancellation {
            cancellation.unregister();
        }
        self.inner
            .waiting
            .lock()
            .retain(|queued| !Arc::ptr_eq(queued, &waiter));
        let late_match = waiter.state.lock().matched.take();

        match (outcome, late_match) {
            // A token assigned in the instant between giving up and leaving
            // the queue is still a valid selection.
            (WaitOutcome::Matched | WaitOutcome::TimedOut, Some(resource)) => {
                debug!("found token after queuing, pretender={pretender} token={resource}");
                Ok(resource)
            }
            (WaitOutcome::Cancelled, Some(resource)) => {
                // Cancelled and matched raced; the caller no longer wants the
                // token, so it goes straight back into circulation.
                self.release(&resource);
                Err(PoolError::Cancelled)
            }
            (WaitOutcome::Cancelled, None) => Err(PoolError::Cancelled),
            (WaitOutcome::TimedOut | WaitOutcome::Matched, None) => {
                warn!("timeout while selecting token, pretender={pretender}");
                Err(PoolError::SelectionTimeout)
            }
        }
    }

    /// Non-blocking probe: would the selection fast path succeed right now?
    /// Reserves nothing.
    #[must_use]
    pub fn exists_available_matching_token(&self, pretender: &Identity) -> bool {
        let registry = self.inner.registry.lock();
        registry.tokens.values().any(|entry| {
            entry.available
                && self
                    .inner
                    .evaluator
                    .score(pretender, &entry.resource)
                    .is_some()
        })
    }

    /// Snapshot of every registered token's state.
    #[must_use]
    pub fn tokens(&self) -> Vec<TokenSnapshot> {
        let registry = self.inner.registry.lock();
        registry.tokens.values().map(TokenEntry::snapshot).collect()
    }

    /// Identities of the pretenders currently blocked in selection, FIFO.
    #[must_use]
    pub fn waiting_pretenders(&self) -> Vec<Arc<Identity>> {
        let waiting = self.inner.waiting.lock();
        waiting
            .iter()
            .map(|waiter| Arc::clone(&waiter.pretender))
            .collect()
    }

    /// Number of registered tokens, reserved ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.registry.lock().tokens.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set the keepalive timeout; `None` disables the health sweep's
    /// invalidation effect. Takes effect on the next sweep cycle.
    pub fn set_keepalive_timeout(&self, timeout: Option<Duration>) {
        self.inner.registry.lock().keepalive_timeout = timeout;
    }

    /// Stop the background health sweep and join its thread. Idempotent;
    /// also invoked on drop. Foreground operations remain usable afterwards,
    /// but stale tokens are no longer expired.
    pub fn shutdown(&self) {
        {
            let mut shutdown = self.inner.sweep_shutdown.lock();
            *shutdown = true;
        }
        self.inner.sweep_condvar.notify_all();
        if let Some(handle) = self.sweeper.lock().take() {
            if handle.join().is_err() {
                error!("keepalive sweeper thread panicked during shutdown");
            }
        }
    }

    /// Put a reserved token back into circulation after a cancelled
    /// selection won the race against its own match.
    fn release(&self, resource: &Arc<Identity>) {
        let mut registry = self.inner.registry.lock();
        let invalidated = registry
            .tokens
            .get(resource.id())
            .map(|entry| entry.invalidated);
        match invalidated {
            Some(true) => {
                registry.tokens.remove(resource.id());
                self.inner.notify_waiters_without_candidate(&registry);
            }
            Some(false) => {
                if let Some(entry) = registry.tokens.get_mut(resource.id()) {
                    entry.available = true;
                }
                self.inner.try_satisfy_one_waiter(&mut registry, resource.id());
            }
            None => {}
        }
    }

    fn spawn_sweeper(inner: Arc<PoolInner>) -> JoinHandle<()> {
        std::thread::spawn(move || loop {
            {
                let mut shutdown = inner.sweep_shutdown.lock();
                if !*shutdown {
                    let _ = inner
                        .sweep_condvar
                        .wait_for(&mut shutdown, inner.sweep_interval);
                }
                if *shutdown {
                    break;
                }
            }
            // The sweep runs unattended; nothing it hits may escape the loop.
            if panic::catch_unwind(AssertUnwindSafe(|| inner.sweep_once())).is_err() {
                error!("an error occurred while running the keepalive sweep");
            }
        })
    }
}

/// Park on the waiter's condvar until matched, cancelled, or past the
/// deadline. A `match_gone` signal tightens the deadline to the
/// no-match-exists policy, since the compatible token that justified the
/// longer wait no longer exists.
fn wait_for_match(
    waiter: &Waiter,
    start: Instant,
    wait_timeout: Duration,
    no_match_exists_timeout: Duration,
) -> WaitOutcome {
    let mut deadline = start + wait_timeout;
    let mut state = waiter.state.lock();
    loop {
        if state.matched.is_some() {
            return WaitOutcome::Matched;
        }
        if state.cancelled {
            return WaitOutcome::Cancelled;
        }
        if state.match_gone {
            state.match_gone = false;
            deadline = deadline.min(start + no_match_exists_timeout);
        }
        if Instant::now() >= deadline {
            return WaitOutcome::TimedOut;
        }
        let _ = waiter.condvar.wait_until(&mut state, deadline);
    }
}

impl Drop for TokenPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
