//! Integration tests for the matching and blocking selection protocol.
//!
//! These tests verify that the pool behaves correctly in realistic scenarios:
//! bidirectional matching, soft-preference ranking, blocking acquisition with
//! FIFO hand-off, and mutual exclusion under concurrent load.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use grid_token_pool::{
    Identity, Interest, PoolError, SimpleAffinityEvaluator, TokenPool,
};

fn new_pool() -> TokenPool {
    grid_token_pool::util::init_tracing();
    TokenPool::new(Arc::new(SimpleAffinityEvaluator))
}

fn interest(pattern: &str, mandatory: bool) -> Interest {
    Interest::new(pattern, mandatory).unwrap()
}

const SHORT: Duration = Duration::from_millis(50);
const LONG: Duration = Duration::from_secs(2);

/// A mandatory interest met by an available token is satisfied immediately.
#[test]
fn test_match_positive() {
    let pool = new_pool();

    pool.offer_token(
        Identity::new()
            .attribute("color", "red")
            .attribute("shape", "circle"),
    );

    let pretender = Identity::new().interest("color", interest("red", true));
    let selected = pool.select_token(&pretender, SHORT, SHORT).unwrap();
    assert_eq!(
        selected.attributes().get("color").map(String::as_str),
        Some("red")
    );
}

/// Both sides can impose mandatory interests on each other.
#[test]
fn test_match_bidirectional() {
    let pool = new_pool();

    pool.offer_token(
        Identity::new()
            .attribute("color", "red")
            .interest("color", interest("green", true)),
    );

    let pretender = Identity::new()
        .attribute("color", "green")
        .interest("color", interest("red", true));
    assert!(pool.select_token(&pretender, SHORT, SHORT).is_ok());
}

/// A pretender failing the token's mandatory interest is vetoed even though
/// its own interest is met.
#[test]
fn test_match_negative() {
    let pool = new_pool();

    pool.offer_token(
        Identity::new()
            .attribute("color", "red")
            .interest("color", interest("green", true)),
    );

    let pretender = Identity::new()
        .attribute("color", "yellow")
        .interest("color", interest("red", true));
    let err = pool.select_token(&pretender, SHORT, SHORT).unwrap_err();
    assert!(matches!(err, PoolError::SelectionTimeout));
}

/// A satisfied soft interest outranks an otherwise equal token.
#[test]
fn test_match_preference() {
    let pool = new_pool();

    pool.offer_token(
        Identity::new()
            .attribute("color", "red")
            .attribute("shape", "circle")
            .interest("color", interest("green", true)),
    );
    pool.offer_token(
        Identity::new()
            .attribute("color", "red")
            .attribute("shape", "triangle")
            .interest("color", interest("green", true)),
    );

    let pretender = Identity::new()
        .attribute("color", "green")
        .interest("color", interest("red", true))
        .interest("shape", interest("circle", false));

    let selected = pool.select_token(&pretender, SHORT, SHORT).unwrap();
    assert_eq!(
        selected.attributes().get("shape").map(String::as_str),
        Some("circle")
    );
}

/// Soft interests on the token side count towards the score too.
#[test]
fn test_match_preference_bidirectional() {
    let pool = new_pool();

    pool.offer_token(
        Identity::new()
            .attribute("color", "red")
            .attribute("shape", "circle")
            .attribute("rank", "1")
            .interest("color", interest("green", true)),
    );
    // Same as above plus a satisfied soft interest of its own.
    pool.offer_token(
        Identity::new()
            .attribute("color", "red")
            .attribute("shape", "circle")
            .attribute("rank", "2")
            .interest("color", interest("green", true))
            .interest("shape", interest("line", false)),
    );
    pool.offer_token(
        Identity::new()
            .attribute("color", "red")
            .attribute("shape", "triangle")
            .attribute("rank", "3")
            .interest("color", interest("green", true)),
    );

    let pretender = Identity::new()
        .attribute("color", "green")
        .attribute("shape", "line")
        .interest("color", interest("red", true))
        .interest("shape", interest("circle", false));

    let selected = pool.select_token(&pretender, SHORT, SHORT).unwrap();
    assert_eq!(
        selected.attributes().get("rank").map(String::as_str),
        Some("2")
    );
}

/// With no compatible token registered at all, selection times out.
#[test]
fn test_no_match_times_out() {
    let pool = new_pool();

    pool.offer_token(Identity::new().attribute("color", "red"));

    let pretender = Identity::new().interest("color", interest("green", true));
    let err = pool.select_token(&pretender, SHORT, SHORT).unwrap_err();
    assert!(matches!(err, PoolError::SelectionTimeout));
}

/// Equal scores resolve to the lowest worker id, independent of registry
/// iteration order.
#[test]
fn test_select_prefers_lowest_id_on_tie() {
    let pool = new_pool();

    for id in ["worker-c", "worker-a", "worker-b"] {
        pool.offer_token(Identity::with_id(id).attribute("color", "red"));
    }

    let pretender = Identity::new().interest("color", interest("red", true));
    let selected = pool.select_token(&pretender, SHORT, SHORT).unwrap();
    assert_eq!(selected.id(), "worker-a");
}

/// A blocked selection is satisfied by a token offered later.
#[test]
fn test_blocked_select_woken_by_offer() {
    let pool = Arc::new(new_pool());
    let pool2 = Arc::clone(&pool);

    let offerer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        pool2.offer_token(
            Identity::new()
                .attribute("color", "red")
                .attribute("shape", "circle"),
        );
    });

    let pretender = Identity::new().interest("color", interest("red", true));
    let selected = pool.select_token(&pretender, LONG, LONG).unwrap();
    assert_eq!(
        selected.attributes().get("color").map(String::as_str),
        Some("red")
    );
    offerer.join().unwrap();
}

/// A blocked selection is satisfied when the only compatible token is
/// returned by its current holder.
#[test]
fn test_blocked_select_woken_by_return() {
    let pool = Arc::new(new_pool());

    pool.offer_token(Identity::new().attribute("os", "linux"));
    let pretender = Identity::new().interest("os", interest("linux", true));

    let held = pool.select_token(&pretender, SHORT, SHORT).unwrap();

    let pool2 = Arc::clone(&pool);
    let held2 = Arc::clone(&held);
    let holder = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        pool2.return_token(&held2).unwrap();
    });

    let selected = pool.select_token(&pretender, LONG, LONG).unwrap();
    assert_eq!(selected.id(), held.id());
    holder.join().unwrap();
}

/// Among several compatible blocked pretenders, the one that started waiting
/// first receives the newly offered token.
#[test]
fn test_fifo_fairness() {
    const NUM_WAITERS: usize = 4;

    let pool = Arc::new(new_pool());
    let (tx, rx) = mpsc::channel::<usize>();

    let mut handles = vec![];
    for rank in 0..NUM_WAITERS {
        // Sequence arrivals deterministically: wait until the previous
        // pretender is actually queued before starting the next.
        while pool.waiting_pretenders().len() < rank {
            thread::sleep(Duration::from_millis(1));
        }
        let pool = Arc::clone(&pool);
        let tx = tx.clone();
        handles.push(thread::spawn(move || {
            let pretender = Identity::new().interest("color", interest("red", true));
            if pool.select_token(&pretender, SHORT, LONG).is_ok() {
                tx.send(rank).unwrap();
            }
        }));
    }
    while pool.waiting_pretenders().len() < NUM_WAITERS {
        thread::sleep(Duration::from_millis(1));
    }

    pool.offer_token(Identity::new().attribute("color", "red"));

    let winner = rx.recv_timeout(LONG).unwrap();
    assert_eq!(winner, 0);
    for handle in handles {
        handle.join().unwrap();
    }
}

/// The configured default wait windows apply when none are passed.
#[test]
fn test_select_with_default_timeouts() {
    let pool = new_pool();
    pool.offer_token(Identity::with_id("w1").attribute("color", "red"));

    let pretender = Identity::new().interest("color", interest("red", true));
    let selected = pool.select_token_with_defaults(&pretender).unwrap();
    assert_eq!(selected.id(), "w1");
}

/// The probe reports availability without reserving anything.
#[test]
fn test_exists_available_matching_token() {
    let pool = new_pool();
    let pretender = Identity::new().interest("color", interest("red", true));

    assert!(!pool.exists_available_matching_token(&pretender));

    pool.offer_token(Identity::new().attribute("color", "red"));
    assert!(pool.exists_available_matching_token(&pretender));
    // Probing twice: nothing was reserved.
    assert!(pool.exists_available_matching_token(&pretender));

    let selected = pool.select_token(&pretender, SHORT, SHORT).unwrap();
    assert!(!pool.exists_available_matching_token(&pretender));

    pool.return_token(&selected).unwrap();
    assert!(pool.exists_available_matching_token(&pretender));
}

/// Returning a token the pool never saw reports an error and corrupts
/// nothing.
#[test]
fn test_return_unknown_token() {
    let pool = new_pool();
    pool.offer_token(Identity::with_id("known").attribute("color", "red"));

    let err = pool
        .return_token(&Identity::with_id("unknown"))
        .unwrap_err();
    assert!(matches!(err, PoolError::UnknownToken(id) if id == "unknown"));
    assert_eq!(pool.len(), 1);
}

/// Introspection returns snapshots reflecting reservation state.
#[test]
fn test_introspection_snapshots() {
    let pool = new_pool();
    pool.offer_token(Identity::with_id("w1").attribute("color", "red"));
    pool.offer_token(Identity::with_id("w2").attribute("color", "blue"));
    assert_eq!(pool.len(), 2);

    let pretender = Identity::new().interest("color", interest("red", true));
    let selected = pool.select_token(&pretender, SHORT, SHORT).unwrap();

    let tokens = pool.tokens();
    assert_eq!(tokens.len(), 2);
    let reserved = tokens
        .iter()
        .find(|t| t.resource.id() == selected.id())
        .unwrap();
    assert!(!reserved.available);
    assert!(!reserved.invalidated);
    let free = tokens.iter().find(|t| t.resource.id() == "w2").unwrap();
    assert!(free.available);

    assert!(pool.waiting_pretenders().is_empty());
}

/// Re-offering a registered worker neither duplicates it nor disturbs its
/// reservation state.
#[test]
fn test_reoffer_is_idempotent() {
    let pool = new_pool();
    let worker = Identity::with_id("w1").attribute("color", "red");

    pool.offer_token(worker.clone());
    pool.offer_token(worker.clone());
    assert_eq!(pool.len(), 1);

    let pretender = Identity::new().interest("color", interest("red", true));
    let selected = pool.select_token(&pretender, SHORT, SHORT).unwrap();

    pool.offer_token(worker);
    assert_eq!(pool.len(), 1);
    // Still reserved: a second selection must not steal it.
    assert!(pool.select_token(&pretender, SHORT, SHORT).is_err());
    pool.return_token(&selected).unwrap();
}

/// No two concurrent selections are ever handed the same token while the
/// other still holds it.
#[test]
fn test_concurrent_select_mutual_exclusion() {
    const NUM_THREADS: usize = 4;
    const NUM_TOKENS: usize = 3;
    const ITERATIONS: usize = 100;

    let pool = Arc::new(new_pool());
    let mut in_use = HashMap::new();
    for i in 0..NUM_TOKENS {
        let id = format!("worker-{i}");
        pool.offer_token(Identity::with_id(&id).attribute("color", "red"));
        in_use.insert(id, AtomicBool::new(false));
    }
    let in_use = Arc::new(in_use);

    let mut handles = vec![];
    for _ in 0..NUM_THREADS {
        let pool = Arc::clone(&pool);
        let in_use = Arc::clone(&in_use);
        handles.push(thread::spawn(move || {
            let pretender = Identity::new().interest("color", interest("red", true));
            for _ in 0..ITERATIONS {
                let token = pool.select_token(&pretender, LONG, LONG).unwrap();
                let flag = &in_use[token.id()];
                assert!(
                    !flag.swap(true, Ordering::SeqCst),
                    "token handed out twice concurrently"
                );
                thread::sleep(Duration::from_micros(200));
                flag.store(false, Ordering::SeqCst);
                pool.return_token(&token).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(pool.len(), NUM_TOKENS);
    for snapshot in pool.tokens() {
        assert!(snapshot.available);
    }
}
