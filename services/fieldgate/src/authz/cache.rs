//! TTL-bounded memo of computed effective permissions.
//!
//! Entries are disposable derived state keyed by user id; the role tables
//! stay the source of truth. A stale entry is simply recomputed — two
//! concurrent recomputes of the same user are harmless and cheaper than a
//! global lock around the computation.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use super::engine::EffectivePermissions;

#[derive(Debug)]
pub struct PermissionCache {
    ttl: chrono::Duration,
    entries: Mutex<HashMap<Uuid, EffectivePermissions>>,
}

impl PermissionCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(5)),
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Return the cached computation for `user_id` unless it has expired.
    /// An entry past `expires_at` is never returned, whatever its age.
    #[must_use]
    pub fn get(&self, user_id: Uuid, now: DateTime<Utc>) -> Option<EffectivePermissions> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&user_id)
            .filter(|entry| entry.expires_at > now)
            .cloned()
    }

    pub fn insert(&self, entry: EffectivePermissions) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = entry.computed_at;
        entries.retain(|_, cached| cached.expires_at > now);
        entries.insert(entry.user_id, entry);
    }

    pub fn invalidate(&self, user_id: Uuid) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as TimeDelta;

    fn entry(user_id: Uuid, computed_at: DateTime<Utc>, ttl: TimeDelta) -> EffectivePermissions {
        EffectivePermissions {
            user_id,
            permissions: Vec::new(),
            roles: Vec::new(),
            computed_at,
            expires_at: computed_at + ttl,
        }
    }

    #[test]
    fn expired_entries_are_never_served() {
        let cache = PermissionCache::new(Duration::from_secs(300));
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        cache.insert(entry(user_id, now, TimeDelta::seconds(300)));
        assert!(cache.get(user_id, now).is_some());
        assert!(cache.get(user_id, now + TimeDelta::seconds(301)).is_none());
    }

    #[test]
    fn invalidate_drops_the_entry_immediately() {
        let cache = PermissionCache::new(Duration::from_secs(300));
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        cache.insert(entry(user_id, now, TimeDelta::seconds(300)));
        cache.invalidate(user_id);
        assert!(cache.get(user_id, now).is_none());
    }

    #[test]
    fn insert_purges_entries_that_already_lapsed() {
        let cache = PermissionCache::new(Duration::from_secs(300));
        let now = Utc::now();
        let stale_user = Uuid::new_v4();

        cache.insert(entry(stale_user, now - TimeDelta::seconds(600), TimeDelta::seconds(300)));
        cache.insert(entry(Uuid::new_v4(), now, TimeDelta::seconds(300)));
        assert_eq!(cache.len(), 1);
    }
}
