//! Fixed-arity parsers for the text formats the counter source emits.
//!
//! Each parser handles one line or one small file and returns
//! `Result<_, ParseError>`. Family-level helpers skip malformed rows
//! individually instead of failing the whole family.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::rate::CPU_TICK_FIELDS;

/// Which `/proc/stat` cpu line a row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuLabel {
    Aggregate,
    Core(usize),
}

/// One `cpu`/`cpuN` line: user nice system idle iowait irq softirq steal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuLine {
    pub label: CpuLabel,
    pub ticks: [u64; CPU_TICK_FIELDS],
}

/// All cpu lines of a `/proc/stat` read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuStat {
    pub aggregate: Option<[u64; CPU_TICK_FIELDS]>,
    /// Sorted by core index.
    pub cores: Vec<(usize, [u64; CPU_TICK_FIELDS])>,
}

/// One whole-disk row of `/proc/diskstats`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskRow {
    pub name: String,
    pub read_sectors: u64,
    pub write_sectors: u64,
}

/// One interface row of `/proc/net/dev`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetRow {
    pub iface: String,
    pub recv_bytes: u64,
    pub sent_bytes: u64,
}

/// The `/proc/meminfo` fields the engine needs, in kilobytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub total_kb: u64,
    pub free_kb: u64,
    pub available_kb: u64,
    pub buffers_kb: u64,
    pub cached_kb: u64,
    pub slab_reclaimable_kb: u64,
    pub swap_total_kb: u64,
    pub swap_free_kb: u64,
}

/// 1, 5 and 15 minute load averages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Cumulative storage I/O of one process (`/proc/<pid>/io`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcIo {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

fn parse_u64(index: usize, raw: &str) -> Result<u64, ParseError> {
    raw.parse::<u64>().map_err(|_| ParseError::NotNumber {
        index,
        raw: raw.to_string(),
    })
}

fn parse_f64(index: usize, raw: &str) -> Result<f64, ParseError> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParseError::NotNumber {
            index,
            raw: raw.to_string(),
        })
}

/// Parse a `cpu` or `cpuN` line. Trailing tick fields the kernel omits
/// default to zero; fewer than four is malformed.
pub fn parse_cpu_line(line: &str) -> Result<CpuLine, ParseError> {
    let mut parts = line.split_whitespace();
    let head = parts.next().unwrap_or_default();
    let label = match head.strip_prefix("cpu") {
        Some("") => CpuLabel::Aggregate,
        Some(idx) => CpuLabel::Core(
            idx.parse::<usize>()
                .map_err(|_| ParseError::UnexpectedPrefix(head.to_string()))?,
        ),
        None => return Err(ParseError::UnexpectedPrefix(head.to_string())),
    };

    let values: Vec<&str> = parts.take(CPU_TICK_FIELDS).collect();
    if values.len() < 4 {
        return Err(ParseError::TooFewFields {
            expected: 4,
            found: values.len(),
        });
    }
    let mut ticks = [0u64; CPU_TICK_FIELDS];
    for (i, raw) in values.iter().enumerate() {
        ticks[i] = parse_u64(i, raw)?;
    }
    Ok(CpuLine { label, ticks })
}

/// Collect every cpu line of `/proc/stat`, skipping malformed ones.
pub fn parse_cpu_stat(text: &str) -> CpuStat {
    let mut stat = CpuStat::default();
    for line in text.lines().filter(|l| l.starts_with("cpu")) {
        match parse_cpu_line(line) {
            Ok(CpuLine {
                label: CpuLabel::Aggregate,
                ticks,
            }) => stat.aggregate = Some(ticks),
            Ok(CpuLine {
                label: CpuLabel::Core(idx),
                ticks,
            }) => stat.cores.push((idx, ticks)),
            Err(e) => log::debug!("skipping cpu line {line:?}: {e}"),
        }
    }
    stat.cores.sort_by_key(|(idx, _)| *idx);
    stat
}

/// Parse one `Key:   value kB` line of `/proc/meminfo`.
pub fn parse_meminfo_line(line: &str) -> Result<(&str, u64), ParseError> {
    let (key, rest) = line
        .split_once(':')
        .ok_or(ParseError::MissingSeparator(':'))?;
    let raw = rest.split_whitespace().next().ok_or(ParseError::TooFewFields {
        expected: 1,
        found: 0,
    })?;
    Ok((key.trim(), parse_u64(0, raw)?))
}

/// Parse `/proc/meminfo`. `MemTotal` is required; everything else defaults
/// to zero when absent.
pub fn parse_meminfo(text: &str) -> Result<MemInfo, ParseError> {
    let mut values: HashMap<&str, u64> = HashMap::new();
    for line in text.lines() {
        match parse_meminfo_line(line) {
            Ok((key, value)) => {
                values.insert(key, value);
            }
            Err(e) => log::debug!("skipping meminfo line {line:?}: {e}"),
        }
    }
    let get = |key: &str| values.get(key).copied().unwrap_or(0);
    let total_kb = values
        .get("MemTotal")
        .copied()
        .ok_or(ParseError::MissingKey("MemTotal"))?;
    Ok(MemInfo {
        total_kb,
        free_kb: get("MemFree"),
        available_kb: get("MemAvailable"),
        buffers_kb: get("Buffers"),
        cached_kb: get("Cached"),
        slab_reclaimable_kb: get("SReclaimable"),
        swap_total_kb: get("SwapTotal"),
        swap_free_kb: get("SwapFree"),
    })
}

/// Whole block devices only: virtual devices and partitions are excluded.
pub fn is_block_device(name: &str) -> bool {
    if name.starts_with("loop")
        || name.starts_with("ram")
        || name.starts_with("dm-")
        || name.starts_with("md")
        || name.starts_with("zram")
        || name.starts_with("sr")
        || name.starts_with("fd")
        || name.starts_with("nbd")
    {
        return false;
    }
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        return !name.contains('p');
    }
    !name.chars().last().is_some_and(|c| c.is_ascii_digit())
}

/// Parse one `/proc/diskstats` row (major minor name reads ...).
pub fn parse_diskstats_line(line: &str) -> Result<DiskRow, ParseError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 14 {
        return Err(ParseError::TooFewFields {
            expected: 14,
            found: parts.len(),
        });
    }
    Ok(DiskRow {
        name: parts[2].to_string(),
        read_sectors: parse_u64(5, parts[5])?,
        write_sectors: parse_u64(9, parts[9])?,
    })
}

/// Qualifying disk rows of `/proc/diskstats`.
pub fn parse_diskstats(text: &str) -> Vec<DiskRow> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| match parse_diskstats_line(line) {
            Ok(row) => Some(row),
            Err(e) => {
                log::debug!("skipping diskstats line {line:?}: {e}");
                None
            }
        })
        .filter(|row| is_block_device(&row.name))
        .collect()
}

/// Parse one `/proc/net/dev` interface row.
pub fn parse_net_dev_line(line: &str) -> Result<NetRow, ParseError> {
    let (iface, stats) = line
        .split_once(':')
        .ok_or(ParseError::MissingSeparator(':'))?;
    let fields: Vec<&str> = stats.split_whitespace().collect();
    if fields.len() < 16 {
        return Err(ParseError::TooFewFields {
            expected: 16,
            found: fields.len(),
        });
    }
    Ok(NetRow {
        iface: iface.trim().to_string(),
        recv_bytes: parse_u64(0, fields[0])?,
        sent_bytes: parse_u64(8, fields[8])?,
    })
}

/// Non-loopback interface rows of `/proc/net/dev` (two header lines).
pub fn parse_net_dev(text: &str) -> Vec<NetRow> {
    text.lines()
        .skip(2)
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| match parse_net_dev_line(line) {
            Ok(row) => Some(row),
            Err(e) => {
                log::debug!("skipping net/dev line {line:?}: {e}");
                None
            }
        })
        .filter(|row| row.iface != "lo")
        .collect()
}

/// Parse `/proc/loadavg`.
pub fn parse_loadavg(text: &str) -> Result<LoadAverage, ParseError> {
    let parts: Vec<&str> = text.split_whitespace().take(3).collect();
    if parts.len() < 3 {
        return Err(ParseError::TooFewFields {
            expected: 3,
            found: parts.len(),
        });
    }
    Ok(LoadAverage {
        one: parse_f64(0, parts[0])?,
        five: parse_f64(1, parts[1])?,
        fifteen: parse_f64(2, parts[2])?,
    })
}

/// Seconds since boot from `/proc/uptime`.
pub fn parse_uptime(text: &str) -> Result<f64, ParseError> {
    let raw = text.split_whitespace().next().ok_or(ParseError::TooFewFields {
        expected: 1,
        found: 0,
    })?;
    parse_f64(0, raw)
}

/// Parse `/proc/<pid>/io`; both byte counters are required.
pub fn parse_proc_io(text: &str) -> Result<ProcIo, ParseError> {
    let mut read_bytes = None;
    let mut write_bytes = None;
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "read_bytes" => read_bytes = Some(parse_u64(0, value.trim())?),
            "write_bytes" => write_bytes = Some(parse_u64(0, value.trim())?),
            _ => {}
        }
    }
    Ok(ProcIo {
        read_bytes: read_bytes.ok_or(ParseError::MissingKey("read_bytes"))?,
        write_bytes: write_bytes.ok_or(ParseError::MissingKey("write_bytes"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  123456     100    0    0    0     0          0         0   123456     100    0    0    0     0       0          0
  eth0: 2048000    1500    0    0    0     0          0         0  1024000    1200    0    0    0     0       0          0
 wlan0 garbage
";

    #[test]
    fn cpu_line_aggregate() {
        let line = parse_cpu_line("cpu  100 0 50 800 50 0 0 0 0 0").unwrap();
        assert_eq!(line.label, CpuLabel::Aggregate);
        assert_eq!(line.ticks, [100, 0, 50, 800, 50, 0, 0, 0]);
    }

    #[test]
    fn cpu_line_core_with_short_tail() {
        let line = parse_cpu_line("cpu3 1 2 3 4").unwrap();
        assert_eq!(line.label, CpuLabel::Core(3));
        assert_eq!(line.ticks, [1, 2, 3, 4, 0, 0, 0, 0]);
    }

    #[test]
    fn cpu_line_rejects_malformed() {
        assert!(matches!(
            parse_cpu_line("cpu 1 2"),
            Err(ParseError::TooFewFields { .. })
        ));
        assert!(matches!(
            parse_cpu_line("cpu 1 2 x 4"),
            Err(ParseError::NotNumber { index: 2, .. })
        ));
        assert!(matches!(
            parse_cpu_line("cpux 1 2 3 4"),
            Err(ParseError::UnexpectedPrefix(_))
        ));
    }

    #[test]
    fn cpu_stat_skips_bad_rows_and_sorts_cores() {
        let text = "cpu 4 0 4 8 0 0 0 0\ncpu1 2 0 2 4 0 0 0 0\ncpu0 2 0 2 4 0 0 0 0\ncpu2 oops\nintr 1 2 3\n";
        let stat = parse_cpu_stat(text);
        assert_eq!(stat.aggregate, Some([4, 0, 4, 8, 0, 0, 0, 0]));
        let idx: Vec<usize> = stat.cores.iter().map(|(i, _)| *i).collect();
        assert_eq!(idx, vec![0, 1]);
    }

    #[test]
    fn meminfo_requires_total() {
        let text = "MemTotal: 1000 kB\nMemFree: 200 kB\nCached: 100 kB\nbogus line\n";
        let mem = parse_meminfo(text).unwrap();
        assert_eq!(mem.total_kb, 1000);
        assert_eq!(mem.free_kb, 200);
        assert_eq!(mem.cached_kb, 100);
        assert_eq!(mem.buffers_kb, 0);
        assert_eq!(
            parse_meminfo("MemFree: 1 kB\n"),
            Err(ParseError::MissingKey("MemTotal"))
        );
    }

    #[test]
    fn block_device_filter() {
        for name in ["sda", "vdb", "xvda", "nvme0n1", "mmcblk0", "hdc"] {
            assert!(is_block_device(name), "{name} should qualify");
        }
        for name in [
            "sda1", "nvme0n1p2", "mmcblk0p1", "loop0", "ram1", "dm-0", "md127", "zram0", "sr0",
            "nbd3",
        ] {
            assert!(!is_block_device(name), "{name} should be excluded");
        }
    }

    #[test]
    fn diskstats_rows() {
        let text = "\
   8       0 sda 100 0 1000 10 50 0 2000 5 0 20 15 0 0 0 0
   8       1 sda1 90 0 900 9 40 0 1900 4 0 19 14 0 0 0 0
   7       0 loop0 1 0 2 0 0 0 0 0 0 0 0 0 0 0 0
 259       0 nvme0n1 5 0 64 1 6 0 128 1 0 2 2
   8      16 sdb short
";
        let rows = parse_diskstats(text);
        assert_eq!(
            rows,
            vec![
                DiskRow {
                    name: "sda".into(),
                    read_sectors: 1000,
                    write_sectors: 2000
                },
                DiskRow {
                    name: "nvme0n1".into(),
                    read_sectors: 64,
                    write_sectors: 128
                },
            ]
        );
    }

    #[test]
    fn net_dev_excludes_loopback_and_garbage() {
        let rows = parse_net_dev(NET_DEV);
        assert_eq!(
            rows,
            vec![NetRow {
                iface: "eth0".into(),
                recv_bytes: 2_048_000,
                sent_bytes: 1_024_000
            }]
        );
    }

    #[test]
    fn loadavg_and_uptime() {
        let la = parse_loadavg("0.50 1.25 2.00 1/234 5678\n").unwrap();
        assert_eq!(
            la,
            LoadAverage {
                one: 0.5,
                five: 1.25,
                fifteen: 2.0
            }
        );
        assert!(parse_loadavg("0.5").is_err());
        assert!((parse_uptime("12345.67 54321.00\n").unwrap() - 12345.67).abs() < 1e-9);
        assert!(parse_uptime("").is_err());
    }

    #[test]
    fn proc_io_counters() {
        let text = "rchar: 10\nwchar: 20\nsyscr: 1\nsyscw: 2\nread_bytes: 4096\nwrite_bytes: 8192\ncancelled_write_bytes: 0\n";
        assert_eq!(
            parse_proc_io(text).unwrap(),
            ProcIo {
                read_bytes: 4096,
                write_bytes: 8192
            }
        );
        assert_eq!(
            parse_proc_io("rchar: 1\n"),
            Err(ParseError::MissingKey("read_bytes"))
        );
    }
}
