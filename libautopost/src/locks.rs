//! Per-account advisory locks
//!
//! Keeps two overlapping ticks in the same process from working on one
//! account at the same time. A lease is released when its guard drops; a
//! lease older than the TTL is treated as abandoned and can be taken over.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Lease {
    acquired_at: Instant,
    token: u64,
}

#[derive(Clone)]
pub struct AccountLocks {
    leases: Arc<DashMap<String, Lease>>,
    next_token: Arc<AtomicU64>,
    ttl: Duration,
}

impl AccountLocks {
    pub fn new(ttl: Duration) -> Self {
        Self {
            leases: Arc::new(DashMap::new()),
            next_token: Arc::new(AtomicU64::new(1)),
            ttl,
        }
    }

    /// Take the lease for `account_id`, or `None` if a live lease exists
    pub fn try_acquire(&self, account_id: &str) -> Option<AccountLockGuard> {
        let lease = Lease {
            acquired_at: Instant::now(),
            token: self.next_token.fetch_add(1, Ordering::Relaxed),
        };

        match self.leases.entry(account_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let age = occupied.get().acquired_at.elapsed();
                if age < self.ttl {
                    return None;
                }
                tracing::warn!(
                    account_id = %account_id,
                    age_secs = age.as_secs(),
                    "Taking over stale account lease"
                );
                occupied.insert(lease);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(lease);
            }
        }

        Some(AccountLockGuard {
            leases: Arc::clone(&self.leases),
            account_id: account_id.to_string(),
            token: lease.token,
        })
    }

    pub fn is_locked(&self, account_id: &str) -> bool {
        self.leases
            .get(account_id)
            .map(|lease| lease.acquired_at.elapsed() < self.ttl)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

/// Releases the lease on drop, unless it was taken over in the meantime
pub struct AccountLockGuard {
    leases: Arc<DashMap<String, Lease>>,
    account_id: String,
    token: u64,
}

impl AccountLockGuard {
    pub fn account_id(&self) -> &str {
        &self.account_id
    }
}

impl Drop for AccountLockGuard {
    fn drop(&mut self) {
        let token = self.token;
        self.leases
            .remove_if(&self.account_id, |_, lease| lease.token == token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused() {
        let locks = AccountLocks::new(Duration::from_secs(600));
        let guard = locks.try_acquire("a").unwrap();
        assert_eq!(guard.account_id(), "a");
        assert!(locks.is_locked("a"));
        assert!(locks.try_acquire("a").is_none());

        // Other accounts are independent
        assert!(locks.try_acquire("b").is_some());
    }

    #[test]
    fn test_drop_releases() {
        let locks = AccountLocks::new(Duration::from_secs(600));
        {
            let _guard = locks.try_acquire("a").unwrap();
        }
        assert!(!locks.is_locked("a"));
        assert!(locks.is_empty());
        assert!(locks.try_acquire("a").is_some());
    }

    #[test]
    fn test_stale_lease_is_taken_over() {
        let locks = AccountLocks::new(Duration::ZERO);
        let stale = locks.try_acquire("a").unwrap();
        let fresh = locks.try_acquire("a");
        assert!(fresh.is_some());

        // Dropping the stale guard must not release the new holder's lease
        drop(stale);
        assert_eq!(locks.len(), 1);
        drop(fresh);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_release_on_panic() {
        let locks = AccountLocks::new(Duration::from_secs(600));
        let cloned = locks.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = cloned.try_acquire("a").unwrap();
            panic!("worker failed");
        }));
        assert!(result.is_err());
        assert!(!locks.is_locked("a"));
    }
}
