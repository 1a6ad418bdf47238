//! Fixed-capacity rolling histories.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

/// Points kept per stream: two minutes at the default 2 s cadence.
pub const HISTORY_CAPACITY: usize = 60;

/// One timestamped sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp_ms: u64,
    pub value: f64,
}

/// Strict FIFO ring of [`HistoryPoint`]s.
#[derive(Debug, Clone)]
pub struct RingHistory {
    points: VecDeque<HistoryPoint>,
    capacity: usize,
}

impl Default for RingHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl RingHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, evicting from the front until within capacity.
    pub fn append(&mut self, value: f64, timestamp_ms: u64) {
        self.points.push_back(HistoryPoint {
            timestamp_ms,
            value,
        });
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }

    /// Owned copy, oldest first.
    pub fn snapshot(&self) -> Vec<HistoryPoint> {
        self.points.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<HistoryPoint> {
        self.points.back().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Per-entity streams keyed by entity id, created on first append.
#[derive(Debug, Clone, Default)]
pub struct HistoryMap {
    streams: BTreeMap<String, RingHistory>,
}

impl HistoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, key: &str, value: f64, timestamp_ms: u64) {
        if let Some(stream) = self.streams.get_mut(key) {
            stream.append(value, timestamp_ms);
            return;
        }
        let mut stream = RingHistory::new();
        stream.append(value, timestamp_ms);
        self.streams.insert(key.to_string(), stream);
    }

    /// Drop the whole stream. A later append under the same key starts a new
    /// series.
    pub fn discard(&mut self, key: &str) -> bool {
        self.streams.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.streams.clear();
    }

    pub fn get(&self, key: &str) -> Option<&RingHistory> {
        self.streams.get(key)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Owned copies of every stream.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<HistoryPoint>> {
        self.streams
            .iter()
            .map(|(k, v)| (k.clone(), v.snapshot()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_is_min_of_appends_and_capacity() {
        for n in [0usize, 1, 59, 60, 61, 200] {
            let mut h = RingHistory::new();
            for i in 0..n {
                h.append(i as f64, i as u64);
            }
            assert_eq!(h.len(), n.min(HISTORY_CAPACITY));
        }
    }

    #[test]
    fn keeps_most_recent_in_order() {
        let mut h = RingHistory::new();
        for i in 0..150u64 {
            h.append(i as f64, i * 10);
        }
        let snap = h.snapshot();
        assert_eq!(snap.len(), HISTORY_CAPACITY);
        assert_eq!(snap.first().map(|p| p.timestamp_ms), Some(900));
        assert_eq!(snap.last().map(|p| p.timestamp_ms), Some(1490));
        assert!(snap.windows(2).all(|w| w[0].timestamp_ms < w[1].timestamp_ms));
    }

    #[test]
    fn snapshot_is_independent() {
        let mut h = RingHistory::new();
        h.append(1.0, 1);
        let mut snap = h.snapshot();
        snap.clear();
        h.append(2.0, 2);
        assert_eq!(h.len(), 2);
        assert!(snap.is_empty());
    }

    #[test]
    fn discard_starts_a_fresh_series() {
        let mut m = HistoryMap::new();
        for t in 0..5 {
            m.append("eth0", 1.0, t);
        }
        assert!(m.discard("eth0"));
        assert!(!m.discard("eth0"));
        m.append("eth0", 0.0, 99);
        assert_eq!(m.get("eth0").map(RingHistory::len), Some(1));
    }

    #[test]
    fn small_capacity_evicts() {
        let mut h = RingHistory::with_capacity(2);
        h.append(1.0, 1);
        h.append(2.0, 2);
        h.append(3.0, 3);
        let values: Vec<f64> = h.snapshot().iter().map(|p| p.value).collect();
        assert_eq!(values, vec![2.0, 3.0]);
        assert_eq!(h.latest().map(|p| p.value), Some(3.0));
    }
}
