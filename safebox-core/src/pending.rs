//! Pending-request table: one waiter per correlation id, taken out exactly once.

use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry<W> {
    waiter: W,
    created_at: Instant,
    deadline: Instant,
}

/// Waiters keyed by correlation id (an address or an upload id).
///
/// Every accessor that hands a waiter back also removes it, so a waiter can only
/// ever be resolved once.
pub struct PendingTable<W> {
    entries: HashMap<String, Entry<W>>,
}

impl<W> PendingTable<W> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register `waiter` under `id` with a deadline of `now + timeout`.
    /// Returns the waiter it replaced, if one was already registered.
    pub fn insert(&mut self, id: String, waiter: W, now: Instant, timeout: Duration) -> Option<W> {
        self.entries
            .insert(
                id,
                Entry {
                    waiter,
                    created_at: now,
                    deadline: now + timeout,
                },
            )
            .map(|old| old.waiter)
    }

    /// Remove and return the waiter for `id`.
    pub fn take(&mut self, id: &str) -> Option<W> {
        self.entries.remove(id).map(|e| e.waiter)
    }

    /// Remove and return every waiter whose deadline is at or before `now`.
    pub fn take_expired(&mut self, now: Instant) -> Vec<(String, W)> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|e| (id, e.waiter)))
            .collect()
    }

    /// Remove and return all waiters.
    pub fn take_all(&mut self) -> Vec<(String, W)> {
        self.entries.drain().map(|(id, e)| (id, e.waiter)).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Ids currently waiting, oldest first.
    pub fn ids(&self) -> Vec<String> {
        let mut v: Vec<(&String, Instant)> = self
            .entries
            .iter()
            .map(|(id, e)| (id, e.created_at))
            .collect();
        v.sort_by_key(|(_, t)| *t);
        v.into_iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<W> Default for PendingTable<W> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(10);

    #[test]
    fn insert_take_once() {
        let now = Instant::now();
        let mut t = PendingTable::new();
        assert!(t.insert("a".into(), 1u32, now, T).is_none());
        assert!(t.contains("a"));
        assert_eq!(t.take("a"), Some(1));
        assert_eq!(t.take("a"), None);
        assert!(t.is_empty());
    }

    #[test]
    fn second_insert_replaces() {
        let now = Instant::now();
        let mut t = PendingTable::new();
        t.insert("a".into(), 1u32, now, T);
        assert_eq!(t.insert("a".into(), 2u32, now, T), Some(1));
        assert_eq!(t.len(), 1);
        assert_eq!(t.take("a"), Some(2));
    }

    #[test]
    fn expiry_removes_only_due_entries() {
        let now = Instant::now();
        let mut t = PendingTable::new();
        t.insert("short".into(), 1u32, now, Duration::from_secs(1));
        t.insert("long".into(), 2u32, now, Duration::from_secs(60));
        assert!(t.take_expired(now).is_empty());
        let expired = t.take_expired(now + Duration::from_secs(2));
        assert_eq!(expired, vec![("short".to_string(), 1)]);
        assert!(t.contains("long"));
        assert!(!t.contains("short"));
        // already removed: a second sweep yields nothing
        assert!(t.take_expired(now + Duration::from_secs(2)).is_empty());
    }

    #[test]
    fn ids_oldest_first() {
        let now = Instant::now();
        let mut t = PendingTable::new();
        t.insert("b".into(), 0u8, now + Duration::from_millis(5), T);
        t.insert("a".into(), 0u8, now, T);
        assert_eq!(t.ids(), vec!["a", "b"]);
    }

    #[test]
    fn take_all_empties() {
        let now = Instant::now();
        let mut t = PendingTable::new();
        t.insert("a".into(), 1u8, now, T);
        t.insert("b".into(), 2u8, now, T);
        let mut all = t.take_all();
        all.sort();
        assert_eq!(all, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
        assert!(t.is_empty());
    }
}
