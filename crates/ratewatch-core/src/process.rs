//! Per-process storage I/O rates.
//!
//! Same derivation and lifecycle as disks: a pid seen for the first time
//! only sets a baseline, and pids missing from a scan are forgotten.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::parse::ProcIo;
use crate::rate::kb_per_sec;
use crate::store::{CounterSnapshot, EntitySnapshotStore};

const READ: &str = "read_bytes";
const WRITE: &str = "write_bytes";

/// Read/write throughput of one process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessIoRate {
    pub read_kbps: f64,
    pub write_kbps: f64,
}

/// Tracks cumulative `/proc/<pid>/io` counters across passes.
#[derive(Debug, Default)]
pub struct ProcessIoTracker {
    store: EntitySnapshotStore,
}

impl ProcessIoTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one full scan. Returns rates for pids that were already tracked;
    /// newly seen pids are baselined and left out.
    pub fn update(&mut self, rows: &[(u32, ProcIo)], now_ms: u64) -> BTreeMap<u32, ProcessIoRate> {
        let mut rates = BTreeMap::new();
        let mut present = Vec::with_capacity(rows.len());

        for (pid, io) in rows {
            let key = pid.to_string();
            let snapshot = CounterSnapshot::new(now_ms)
                .with(READ, io.read_bytes)
                .with(WRITE, io.write_bytes);
            if let Some(prev) = self.store.update(&key, snapshot) {
                rates.insert(
                    *pid,
                    ProcessIoRate {
                        read_kbps: kb_per_sec(
                            prev.get(READ),
                            io.read_bytes,
                            prev.captured_at_ms,
                            now_ms,
                        ),
                        write_kbps: kb_per_sec(
                            prev.get(WRITE),
                            io.write_bytes,
                            prev.captured_at_ms,
                            now_ms,
                        ),
                    },
                );
            }
            present.push(key);
        }

        let gone = self.store.prune_except(present.iter().map(String::as_str));
        if !gone.is_empty() {
            log::trace!("forgetting {} exited processes", gone.len());
        }
        rates
    }

    pub fn tracked(&self) -> usize {
        self.store.len()
    }

    pub fn is_tracked(&self, pid: u32) -> bool {
        self.store.contains(&pid.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io(read: u64, write: u64) -> ProcIo {
        ProcIo {
            read_bytes: read,
            write_bytes: write,
        }
    }

    #[test]
    fn first_sight_yields_no_rate() {
        let mut t = ProcessIoTracker::new();
        let rates = t.update(&[(100, io(0, 0))], 0);
        assert!(rates.is_empty());
        assert!(t.is_tracked(100));
    }

    #[test]
    fn second_pass_yields_kbps() {
        let mut t = ProcessIoTracker::new();
        t.update(&[(100, io(0, 0))], 0);
        let rates = t.update(&[(100, io(4096, 2048))], 2_000);
        let r = rates[&100];
        assert!((r.read_kbps - 2.0).abs() < 1e-9);
        assert!((r.write_kbps - 1.0).abs() < 1e-9);
    }

    #[test]
    fn exited_pids_are_pruned_and_restart_as_new() {
        let mut t = ProcessIoTracker::new();
        t.update(&[(1, io(0, 0)), (2, io(0, 0))], 0);
        t.update(&[(1, io(10, 10))], 1_000);
        assert_eq!(t.tracked(), 1);
        assert!(!t.is_tracked(2));
        // pid reuse: counters far below the old ones must not produce a rate.
        let rates = t.update(&[(1, io(20, 20)), (2, io(5, 5))], 2_000);
        assert!(rates.contains_key(&1));
        assert!(!rates.contains_key(&2));
    }

    #[test]
    fn counter_regression_is_zero() {
        let mut t = ProcessIoTracker::new();
        t.update(&[(9, io(10_000, 10_000))], 0);
        let rates = t.update(&[(9, io(1, 1))], 1_000);
        assert_eq!(rates[&9], ProcessIoRate::default());
    }
}
