//! Lock manager
//!
//! Owns every active WebDAV lock. The table sits behind a single mutex and
//! each public operation is one critical section, so racing LOCK requests
//! on the same resource resolve to exactly one winner. Expired locks are
//! purged lazily whenever the table is touched.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::path::DavPath;
use crate::xml::Element;

#[cfg(test)]
mod tests;

const TOKEN_SCHEME: &str = "opaquelocktoken:";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockScope {
    Exclusive,
    Shared,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockDepth {
    Zero,
    Infinity,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("resource is covered by a conflicting lock")]
    Conflict,
    #[error("no active lock holds this token")]
    NotFound,
}

#[derive(Clone, Debug)]
pub struct Lock {
    pub token: String,
    pub path: DavPath,
    pub scope: LockScope,
    pub depth: LockDepth,
    /// `DAV:owner` element exactly as the client sent it.
    pub owner: Option<Element>,
    /// `None` means the lock never times out.
    pub timeout: Option<Duration>,
    expires_at: Option<Instant>,
}

impl Lock {
    /// Whether this lock applies to `path`, either directly or through an
    /// infinite-depth lock on an ancestor.
    pub fn covers(&self, path: &DavPath) -> bool {
        self.path == *path || (self.depth == LockDepth::Infinity && self.path.is_ancestor_of(path))
    }

    fn expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Time left before expiry, `None` for infinite locks.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Value for the `Timeout` header and the `DAV:timeout` element.
    pub fn timeout_value(&self) -> String {
        match self.remaining() {
            Some(left) => format!("Second-{}", left.as_secs()),
            None => "Infinite".to_string(),
        }
    }

    /// `DAV:activelock` element describing this lock.
    pub fn active_lock(&self, root_href: &str) -> Element {
        let scope = match self.scope {
            LockScope::Exclusive => "exclusive",
            LockScope::Shared => "shared",
        };
        let depth = match self.depth {
            LockDepth::Zero => "0",
            LockDepth::Infinity => "infinity",
        };
        let mut active = Element::dav("activelock")
            .with_child(Element::dav("locktype").with_child(Element::dav("write")))
            .with_child(Element::dav("lockscope").with_child(Element::dav(scope)))
            .with_child(Element::dav("depth").with_text(depth));
        if let Some(owner) = &self.owner {
            active.push(owner.clone());
        }
        active
            .with_child(Element::dav("timeout").with_text(self.timeout_value()))
            .with_child(
                Element::dav("locktoken")
                    .with_child(Element::dav("href").with_text(self.token.clone())),
            )
            .with_child(
                Element::dav("lockroot").with_child(Element::dav("href").with_text(root_href)),
            )
    }
}

#[derive(Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Lock>>,
}

fn purge(locks: &mut HashMap<String, Lock>) {
    let now = Instant::now();
    locks.retain(|token, lock| {
        let keep = !lock.expired(now);
        if !keep {
            debug!(%token, path = %lock.path, "lock expired");
        }
        keep
    });
}

/// Expiry instant for `timeout`. A timeout too large to represent never
/// expires.
fn deadline(timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|t| Instant::now().checked_add(t))
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new lock on `path`.
    ///
    /// Fails with [`LockError::Conflict`] if an existing lock covering the
    /// path (or, for infinite-depth requests, any lock below it) is
    /// incompatible: exclusive locks conflict with everything, shared locks
    /// only with exclusive ones.
    pub fn acquire(
        &self,
        path: &DavPath,
        scope: LockScope,
        depth: LockDepth,
        timeout: Option<Duration>,
        owner: Option<Element>,
    ) -> Result<Lock, LockError> {
        let mut locks = self.locks.lock();
        purge(&mut locks);

        let conflict = locks.values().any(|existing| {
            let overlaps = existing.covers(path)
                || (depth == LockDepth::Infinity && path.is_ancestor_of(&existing.path));
            overlaps && (scope == LockScope::Exclusive || existing.scope == LockScope::Exclusive)
        });
        if conflict {
            debug!(%path, ?scope, "lock request conflicts with an active lock");
            return Err(LockError::Conflict);
        }

        let lock = Lock {
            token: format!("{TOKEN_SCHEME}{}", Uuid::new_v4()),
            path: path.clone(),
            scope,
            depth,
            owner,
            timeout,
            expires_at: deadline(timeout),
        };
        info!(%path, token = %lock.token, ?scope, ?depth, "lock acquired");
        locks.insert(lock.token.clone(), lock.clone());
        Ok(lock)
    }

    pub fn release(&self, token: &str) -> Result<(), LockError> {
        let mut locks = self.locks.lock();
        purge(&mut locks);
        match locks.remove(token) {
            Some(lock) => {
                info!(path = %lock.path, %token, "lock released");
                Ok(())
            }
            None => Err(LockError::NotFound),
        }
    }

    /// Restart the expiry clock of an active lock.
    pub fn refresh(&self, token: &str, timeout: Option<Duration>) -> Result<Lock, LockError> {
        let mut locks = self.locks.lock();
        purge(&mut locks);
        let lock = locks.get_mut(token).ok_or(LockError::NotFound)?;
        lock.timeout = timeout;
        lock.expires_at = deadline(timeout);
        debug!(path = %lock.path, %token, "lock refreshed");
        Ok(lock.clone())
    }

    pub fn is_locked(&self, path: &DavPath) -> bool {
        let mut locks = self.locks.lock();
        purge(&mut locks);
        locks.values().any(|lock| lock.covers(path))
    }

    /// Every active lock that applies to `path`.
    pub fn covering(&self, path: &DavPath) -> Vec<Lock> {
        let mut locks = self.locks.lock();
        purge(&mut locks);
        let mut found: Vec<Lock> = locks
            .values()
            .filter(|lock| lock.covers(path))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.token.cmp(&b.token)));
        found
    }

    pub fn find(&self, token: &str) -> Option<Lock> {
        let mut locks = self.locks.lock();
        purge(&mut locks);
        locks.get(token).cloned()
    }

    /// Drop every lock rooted at `path` or below it. Returns how many were
    /// removed.
    pub fn release_subtree(&self, path: &DavPath) -> usize {
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|_, lock| !path.contains(&lock.path));
        let removed = before - locks.len();
        if removed > 0 {
            debug!(%path, removed, "released locks below removed resource");
        }
        removed
    }
}
