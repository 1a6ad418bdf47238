//! Counter-to-rate derivation.
//!
//! Every function here is pure: two cumulative readings in, one
//! non-negative number out. Regressions (device reattached, counter wrapped)
//! and clock anomalies collapse to zero instead of producing negative or
//! infinite rates.

/// Bytes per block-layer sector as reported by `/proc/diskstats`.
pub const SECTOR_BYTES: u64 = 512;

/// Positional tick categories of a `/proc/stat` cpu line.
pub const CPU_TICK_FIELDS: usize = 8;

const IDLE: usize = 3;
const IOWAIT: usize = 4;

/// Units of `curr - prev` per second between two readings.
///
/// Returns `0.0` when no time elapsed (or time went backwards) and when the
/// counter went backwards.
pub fn rate_per_sec(prev: u64, curr: u64, prev_ms: u64, curr_ms: u64) -> f64 {
    if curr_ms <= prev_ms {
        return 0.0;
    }
    let Some(delta) = curr.checked_sub(prev) else {
        log::trace!("counter regressed {prev} -> {curr}; clamping rate to 0");
        return 0.0;
    };
    let elapsed_secs = (curr_ms - prev_ms) as f64 / 1000.0;
    delta as f64 / elapsed_secs
}

/// Byte counters to kilobytes per second.
pub fn kb_per_sec(prev_bytes: u64, curr_bytes: u64, prev_ms: u64, curr_ms: u64) -> f64 {
    rate_per_sec(prev_bytes, curr_bytes, prev_ms, curr_ms) / 1024.0
}

/// 512-byte sector counters to kilobytes per second.
pub fn sectors_kb_per_sec(prev_sectors: u64, curr_sectors: u64, prev_ms: u64, curr_ms: u64) -> f64 {
    rate_per_sec(prev_sectors, curr_sectors, prev_ms, curr_ms) * SECTOR_BYTES as f64 / 1024.0
}

/// Busy percentage between two tick vectors.
///
/// Ticks already encode elapsed CPU time, so wall time plays no part:
/// `100 * (1 - Δ(idle + iowait) / Δtotal)`. A zero or negative total delta
/// yields `0.0`; the result is clamped to `0..=100`.
pub fn busy_percent(prev: &[u64; CPU_TICK_FIELDS], curr: &[u64; CPU_TICK_FIELDS]) -> f64 {
    let prev_total: u64 = prev.iter().sum();
    let curr_total: u64 = curr.iter().sum();
    let Some(total_delta) = curr_total.checked_sub(prev_total).filter(|d| *d > 0) else {
        return 0.0;
    };
    let prev_idle = prev[IDLE] + prev[IOWAIT];
    let curr_idle = curr[IDLE] + curr[IOWAIT];
    let idle_delta = curr_idle.saturating_sub(prev_idle).min(total_delta);
    let busy = 1.0 - idle_delta as f64 / total_delta as f64;
    (busy * 100.0).clamp(0.0, 100.0)
}

/// `part / whole` as a percentage, `0.0` for an empty whole.
pub fn percent_of(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64 * 100.0).clamp(0.0, 100.0)
    }
}
