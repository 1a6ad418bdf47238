//! Owned, serializable outputs of a sampling pass.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::gpu::GpuStats;
use crate::history::HistoryPoint;
use crate::parse::LoadAverage;
use crate::process::ProcessIoRate;

/// A metric family read independently within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Cpu,
    Memory,
    Disk,
    Network,
    LoadAverage,
    Uptime,
    Processes,
    Gpu,
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Memory => write!(f, "memory"),
            Self::Disk => write!(f, "disk"),
            Self::Network => write!(f, "network"),
            Self::LoadAverage => write!(f, "load_average"),
            Self::Uptime => write!(f, "uptime"),
            Self::Processes => write!(f, "processes"),
            Self::Gpu => write!(f, "gpu"),
        }
    }
}

/// Memory gauges in kilobytes. `used_kb` is derived, never read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryGauge {
    pub total_kb: u64,
    pub used_kb: u64,
    pub free_kb: u64,
    pub available_kb: u64,
    pub cached_kb: u64,
    pub buffers_kb: u64,
    pub slab_reclaimable_kb: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SwapGauge {
    pub total_kb: u64,
    pub used_kb: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskRate {
    pub read_kbps: f64,
    pub write_kbps: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NetRate {
    pub recv_kbps: f64,
    pub sent_kbps: f64,
}

/// Copies of every rolling history, oldest point first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub cpu: Vec<HistoryPoint>,
    pub memory: Vec<HistoryPoint>,
    pub disk_read: Vec<HistoryPoint>,
    pub disk_write: Vec<HistoryPoint>,
    pub net_recv: Vec<HistoryPoint>,
    pub net_sent: Vec<HistoryPoint>,
    pub cores: BTreeMap<String, Vec<HistoryPoint>>,
    pub disk_read_by_device: BTreeMap<String, Vec<HistoryPoint>>,
    pub disk_write_by_device: BTreeMap<String, Vec<HistoryPoint>>,
    pub net_recv_by_iface: BTreeMap<String, Vec<HistoryPoint>>,
    pub net_sent_by_iface: BTreeMap<String, Vec<HistoryPoint>>,
    pub gpu_usage: BTreeMap<String, Vec<HistoryPoint>>,
    pub gpu_memory: BTreeMap<String, Vec<HistoryPoint>>,
}

/// Everything one pass produced.
///
/// Families listed in `failed_families` carry their last-known values,
/// except GPUs, where only devices answering this pass appear.
/// Entities seen for the first time this pass have a history baseline but no
/// entry in the rate maps yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub pass: u64,
    pub collected_unix_ms: u64,
    pub cpu_percent: f64,
    pub per_core_percent: BTreeMap<usize, f64>,
    pub memory: MemoryGauge,
    pub swap: SwapGauge,
    pub disk_read_kbps: f64,
    pub disk_write_kbps: f64,
    pub net_recv_kbps: f64,
    pub net_sent_kbps: f64,
    pub load_average: LoadAverage,
    pub uptime_secs: f64,
    pub disks: BTreeMap<String, DiskRate>,
    pub interfaces: BTreeMap<String, NetRate>,
    pub processes: BTreeMap<u32, ProcessIoRate>,
    pub gpus: BTreeMap<u32, GpuStats>,
    pub failed_families: Vec<Family>,
    pub history: HistorySnapshot,
}

impl TelemetryReport {
    pub fn family_failed(&self, family: Family) -> bool {
        self.failed_families.contains(&family)
    }
}
