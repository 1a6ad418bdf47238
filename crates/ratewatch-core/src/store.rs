//! Last-seen raw counters per entity.
//!
//! One [`EntitySnapshotStore`] exists per entity class (disks, interfaces,
//! cores, processes), so keys of different classes never collide.

use std::collections::{BTreeMap, HashMap, HashSet};

/// Raw cumulative counters of one entity at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub fields: BTreeMap<&'static str, u64>,
    pub captured_at_ms: u64,
}

impl CounterSnapshot {
    pub fn new(captured_at_ms: u64) -> Self {
        Self {
            fields: BTreeMap::new(),
            captured_at_ms,
        }
    }

    pub fn with(mut self, field: &'static str, value: u64) -> Self {
        self.fields.insert(field, value);
        self
    }

    /// Missing fields read as zero.
    pub fn get(&self, field: &str) -> u64 {
        self.fields.get(field).copied().unwrap_or(0)
    }
}

/// Entity key → last [`CounterSnapshot`].
#[derive(Debug, Clone, Default)]
pub struct EntitySnapshotStore {
    entries: HashMap<String, CounterSnapshot>,
}

impl EntitySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the snapshot for `key` and return the one it replaced.
    ///
    /// `None` means first sight: the caller has a baseline now but no rate
    /// until the next pass.
    pub fn update(&mut self, key: &str, snapshot: CounterSnapshot) -> Option<CounterSnapshot> {
        self.entries.insert(key.to_string(), snapshot)
    }

    /// Remove every key absent from `present`, returning the removed keys
    /// sorted so callers can discard matching histories.
    pub fn prune_except<'a, I>(&mut self, present: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let keep: HashSet<&str> = present.into_iter().collect();
        let mut removed: Vec<String> = self
            .entries
            .keys()
            .filter(|k| !keep.contains(k.as_str()))
            .cloned()
            .collect();
        for key in &removed {
            self.entries.remove(key);
        }
        removed.sort();
        removed
    }

    pub fn get(&self, key: &str) -> Option<&CounterSnapshot> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(t: u64, v: u64) -> CounterSnapshot {
        CounterSnapshot::new(t).with("read", v)
    }

    #[test]
    fn first_update_returns_none() {
        let mut s = EntitySnapshotStore::new();
        assert!(s.update("sda", snap(0, 1)).is_none());
        let prev = s.update("sda", snap(1000, 5));
        assert_eq!(prev.map(|p| p.get("read")), Some(1));
        assert_eq!(s.get("sda").map(|p| p.captured_at_ms), Some(1000));
    }

    #[test]
    fn prune_keeps_exactly_present_keys() {
        let mut s = EntitySnapshotStore::new();
        for k in ["sda", "sdb", "nvme0n1"] {
            s.update(k, snap(0, 0));
        }
        let removed = s.prune_except(["sda", "nvme0n1", "never-seen"]);
        assert_eq!(removed, vec!["sdb".to_string()]);
        assert_eq!(s.keys(), vec!["nvme0n1".to_string(), "sda".to_string()]);
        assert!(!s.contains("never-seen"));
    }

    #[test]
    fn prune_with_empty_set_clears_everything() {
        let mut s = EntitySnapshotStore::new();
        s.update("eth0", snap(0, 0));
        s.prune_except(std::iter::empty());
        assert!(s.is_empty());
    }

    #[test]
    fn missing_field_reads_zero() {
        assert_eq!(snap(0, 9).get("write"), 0);
    }
}
