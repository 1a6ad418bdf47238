//! The OS counter source and the clock the sampler reads.
//!
//! The sampler never touches the filesystem directly; it asks a
//! [`CounterSource`] for raw text, one family at a time, so any family can
//! fail on its own and tests can feed synthetic counters.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::error::SourceError;

/// Raw counter text on demand. Every method may fail independently.
pub trait CounterSource: Send {
    /// Cheap reachability check run before a pass reads anything.
    fn check(&self) -> Result<(), SourceError>;

    /// Aggregate and per-core cpu tick lines (`/proc/stat`).
    fn cpu_stat(&self) -> Result<String, SourceError>;

    /// Memory gauge table (`/proc/meminfo`).
    fn meminfo(&self) -> Result<String, SourceError>;

    /// Per-block-device sector counters (`/proc/diskstats`).
    fn diskstats(&self) -> Result<String, SourceError>;

    /// Per-interface byte counters (`/proc/net/dev`).
    fn net_dev(&self) -> Result<String, SourceError>;

    /// Load average line (`/proc/loadavg`).
    fn loadavg(&self) -> Result<String, SourceError>;

    /// Uptime line (`/proc/uptime`).
    fn uptime(&self) -> Result<String, SourceError>;

    /// Raw `io` text of every readable process, keyed by pid. Processes that
    /// exit or deny access mid-scan are left out.
    fn process_io(&self) -> Result<Vec<(u32, String)>, SourceError>;
}

/// [`CounterSource`] backed by a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcfsSource {
    root: PathBuf,
}

impl Default for ProcfsSource {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcfsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, family: &'static str, rel: &str) -> Result<String, SourceError> {
        let path = self.root.join(rel);
        std::fs::read_to_string(&path).map_err(|source| SourceError::Unavailable {
            family,
            path,
            source,
        })
    }
}

impl CounterSource for ProcfsSource {
    fn check(&self) -> Result<(), SourceError> {
        std::fs::metadata(&self.root)
            .map(|_| ())
            .map_err(|source| SourceError::Unavailable {
                family: "procfs",
                path: self.root.clone(),
                source,
            })
    }

    fn cpu_stat(&self) -> Result<String, SourceError> {
        self.read("cpu", "stat")
    }

    fn meminfo(&self) -> Result<String, SourceError> {
        self.read("memory", "meminfo")
    }

    fn diskstats(&self) -> Result<String, SourceError> {
        self.read("disk", "diskstats")
    }

    fn net_dev(&self) -> Result<String, SourceError> {
        self.read("network", "net/dev")
    }

    fn loadavg(&self) -> Result<String, SourceError> {
        match self.read("loadavg", "loadavg") {
            Ok(text) => Ok(text),
            Err(err) => libc_loadavg().ok_or(err),
        }
    }

    fn uptime(&self) -> Result<String, SourceError> {
        self.read("uptime", "uptime")
    }

    fn process_io(&self) -> Result<Vec<(u32, String)>, SourceError> {
        let entries = std::fs::read_dir(&self.root).map_err(|source| SourceError::Unavailable {
            family: "process",
            path: self.root.clone(),
            source,
        })?;
        let mut rows = Vec::new();
        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };
            // Short-lived and foreign processes vanish or deny access; skip.
            if let Ok(text) = std::fs::read_to_string(entry.path().join("io")) {
                rows.push((pid, text));
            }
        }
        rows.sort_by_key(|(pid, _)| *pid);
        Ok(rows)
    }
}

/// `getloadavg(3)` rendered in `/proc/loadavg` form.
fn libc_loadavg() -> Option<String> {
    #[cfg(unix)]
    {
        let mut values = [0.0_f64; 3];
        // SAFETY: `getloadavg` writes up to `n` doubles to a valid buffer.
        let n = unsafe { libc::getloadavg(values.as_mut_ptr(), 3) };
        if n < 3 {
            None
        } else {
            Some(format!("{} {} {}", values[0], values[1], values[2]))
        }
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// Wall-clock capability injected into the sampler.
pub trait Clock: Send {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// The real clock: epoch milliseconds read once at construction, advanced
/// by a monotonic [`Instant`] so wall-clock steps never reach rate deltas.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch_ms: u64,
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.epoch_ms + self.started.elapsed().as_millis() as u64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl<C: Clock + Sync> Clock for std::sync::Arc<C> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock::new().now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn system_clock_never_goes_backwards() {
        let clock = SystemClock::new();
        let mut prev = clock.now_ms();
        for _ in 0..1_000 {
            let now = clock.now_ms();
            assert!(now >= prev);
            prev = now;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(clock.now_ms() >= prev + 20);
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(2_000);
        assert_eq!(clock.now_ms(), 3_000);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn procfs_reads_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stat"), "cpu 1 2 3 4\n").unwrap();
        std::fs::create_dir_all(dir.path().join("net")).unwrap();
        std::fs::write(dir.path().join("net/dev"), "h\nh\n").unwrap();
        let src = ProcfsSource::new(dir.path());
        assert!(src.check().is_ok());
        assert_eq!(src.cpu_stat().unwrap(), "cpu 1 2 3 4\n");
        assert!(src.net_dev().is_ok());
        assert!(matches!(
            src.meminfo(),
            Err(SourceError::Unavailable {
                family: "memory",
                ..
            })
        ));
    }

    #[test]
    fn procfs_check_fails_on_missing_root() {
        let src = ProcfsSource::new("/definitely/not/a/procfs/root");
        assert!(src.check().is_err());
    }

    #[test]
    fn procfs_process_io_scans_numeric_dirs() {
        let dir = tempfile::tempdir().unwrap();
        for pid in ["42", "7"] {
            std::fs::create_dir_all(dir.path().join(pid)).unwrap();
            std::fs::write(
                dir.path().join(pid).join("io"),
                "read_bytes: 1\nwrite_bytes: 2\n",
            )
            .unwrap();
        }
        std::fs::create_dir_all(dir.path().join("self")).unwrap();
        std::fs::create_dir_all(dir.path().join("99")).unwrap();
        let rows = ProcfsSource::new(dir.path()).process_io().unwrap();
        let pids: Vec<u32> = rows.iter().map(|(p, _)| *p).collect();
        assert_eq!(pids, vec![7, 42]);
    }
}
