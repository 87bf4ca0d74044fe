use super::*;
use std::sync::{Arc, Barrier};
use std::thread;

fn p(s: &str) -> DavPath {
    DavPath::parse(s)
}

const HOUR: Option<Duration> = Some(Duration::from_secs(3600));

#[test]
fn exclusive_lock_blocks_second_exclusive() {
    let mgr = LockManager::new();
    let lock = mgr
        .acquire(&p("a"), LockScope::Exclusive, LockDepth::Zero, HOUR, None)
        .unwrap();
    assert!(lock.token.starts_with("opaquelocktoken:"));
    assert_eq!(
        mgr.acquire(&p("a"), LockScope::Exclusive, LockDepth::Zero, HOUR, None)
            .unwrap_err(),
        LockError::Conflict
    );
    assert_eq!(
        mgr.acquire(&p("a"), LockScope::Shared, LockDepth::Zero, HOUR, None)
            .unwrap_err(),
        LockError::Conflict
    );
}

#[test]
fn shared_locks_coexist_but_block_exclusive() {
    let mgr = LockManager::new();
    let first = mgr
        .acquire(&p("a"), LockScope::Shared, LockDepth::Zero, HOUR, None)
        .unwrap();
    let second = mgr
        .acquire(&p("a"), LockScope::Shared, LockDepth::Zero, HOUR, None)
        .unwrap();
    assert_ne!(first.token, second.token);
    assert_eq!(mgr.covering(&p("a")).len(), 2);
    assert!(mgr
        .acquire(&p("a"), LockScope::Exclusive, LockDepth::Zero, HOUR, None)
        .is_err());
}

#[test]
fn infinite_depth_covers_descendants() {
    let mgr = LockManager::new();
    mgr.acquire(&p("dir"), LockScope::Exclusive, LockDepth::Infinity, HOUR, None)
        .unwrap();
    assert!(mgr.is_locked(&p("dir")));
    assert!(mgr.is_locked(&p("dir/a/b")));
    assert!(!mgr.is_locked(&p("dirt")));
    assert!(!mgr.is_locked(&DavPath::root()));
    assert_eq!(
        mgr.acquire(&p("dir/a"), LockScope::Exclusive, LockDepth::Zero, HOUR, None)
            .unwrap_err(),
        LockError::Conflict
    );
}

#[test]
fn zero_depth_does_not_cover_children() {
    let mgr = LockManager::new();
    mgr.acquire(&p("dir"), LockScope::Exclusive, LockDepth::Zero, HOUR, None)
        .unwrap();
    assert!(!mgr.is_locked(&p("dir/a")));
    assert!(mgr
        .acquire(&p("dir/a"), LockScope::Exclusive, LockDepth::Zero, HOUR, None)
        .is_ok());
}

#[test]
fn infinite_request_conflicts_with_descendant_lock() {
    let mgr = LockManager::new();
    mgr.acquire(&p("dir/a"), LockScope::Exclusive, LockDepth::Zero, HOUR, None)
        .unwrap();
    assert_eq!(
        mgr.acquire(&p("dir"), LockScope::Shared, LockDepth::Infinity, HOUR, None)
            .unwrap_err(),
        LockError::Conflict
    );
    assert!(mgr
        .acquire(&p("dir"), LockScope::Exclusive, LockDepth::Zero, HOUR, None)
        .is_ok());
}

#[test]
fn release_unknown_token_is_not_found_and_changes_nothing() {
    let mgr = LockManager::new();
    let lock = mgr
        .acquire(&p("a"), LockScope::Exclusive, LockDepth::Zero, HOUR, None)
        .unwrap();
    assert_eq!(
        mgr.release("opaquelocktoken:nope"),
        Err(LockError::NotFound)
    );
    assert!(mgr.is_locked(&p("a")));
    assert_eq!(mgr.find(&lock.token).unwrap().path, p("a"));

    mgr.release(&lock.token).unwrap();
    assert!(!mgr.is_locked(&p("a")));
    assert_eq!(mgr.release(&lock.token), Err(LockError::NotFound));
}

#[test]
fn expired_locks_behave_as_absent() {
    let mgr = LockManager::new();
    let lock = mgr
        .acquire(&p("a"), LockScope::Exclusive, LockDepth::Zero, Some(Duration::ZERO), None)
        .unwrap();
    assert!(!mgr.is_locked(&p("a")));
    assert_eq!(mgr.refresh(&lock.token, HOUR).unwrap_err(), LockError::NotFound);
    assert!(mgr
        .acquire(&p("a"), LockScope::Exclusive, LockDepth::Zero, HOUR, None)
        .is_ok());
}

#[test]
fn refresh_extends_expiry() {
    let mgr = LockManager::new();
    let lock = mgr
        .acquire(&p("a"), LockScope::Exclusive, LockDepth::Zero, Some(Duration::from_secs(1)), None)
        .unwrap();
    let refreshed = mgr.refresh(&lock.token, HOUR).unwrap();
    assert!(refreshed.remaining().unwrap() > Duration::from_secs(60));
    assert_eq!(mgr.refresh(&lock.token, None).unwrap().timeout_value(), "Infinite");
    assert_eq!(
        mgr.refresh("opaquelocktoken:missing", HOUR).unwrap_err(),
        LockError::NotFound
    );
}

#[test]
fn release_subtree_drops_nested_locks() {
    let mgr = LockManager::new();
    mgr.acquire(&p("d/x"), LockScope::Exclusive, LockDepth::Zero, HOUR, None)
        .unwrap();
    mgr.acquire(&p("d/y/z"), LockScope::Exclusive, LockDepth::Zero, HOUR, None)
        .unwrap();
    mgr.acquire(&p("other"), LockScope::Exclusive, LockDepth::Zero, HOUR, None)
        .unwrap();
    assert_eq!(mgr.release_subtree(&p("d")), 2);
    assert!(mgr.is_locked(&p("other")));
}

#[test]
fn concurrent_acquire_has_exactly_one_winner() {
    for _ in 0..50 {
        let mgr = Arc::new(LockManager::new());
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let mgr = mgr.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    mgr.acquire(&p("race"), LockScope::Exclusive, LockDepth::Zero, HOUR, None)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(LockError::Conflict)))
                .count(),
            1
        );
    }
}

#[test]
fn active_lock_element_lists_token_and_root() {
    let mgr = LockManager::new();
    let lock = mgr
        .acquire(&p("a"), LockScope::Shared, LockDepth::Infinity, None, None)
        .unwrap();
    let xml = lock.active_lock("/a").to_document();
    assert!(xml.contains("<D:shared/>"));
    assert!(xml.contains("<D:depth>infinity</D:depth>"));
    assert!(xml.contains("<D:timeout>Infinite</D:timeout>"));
    assert!(xml.contains(&lock.token));
    assert!(xml.contains("<D:lockroot><D:href>/a</D:href></D:lockroot>"));
}

#[test]
fn unrepresentable_timeout_never_expires() {
    let mgr = LockManager::new();
    let huge = Some(Duration::from_secs(u64::MAX));
    let lock = mgr
        .acquire(&p("a"), LockScope::Exclusive, LockDepth::Zero, huge, None)
        .unwrap();
    assert_eq!(lock.remaining(), None);
    assert_eq!(lock.timeout_value(), "Infinite");

    let refreshed = mgr.refresh(&lock.token, huge).unwrap();
    assert_eq!(refreshed.remaining(), None);
    assert!(mgr.is_locked(&p("a")));
}
