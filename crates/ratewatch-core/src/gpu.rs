//! GPU detection and per-pass utilization.
//!
//! Vendors are a closed set of probes tried in a fixed order:
//! 1. `nvidia-smi` CSV query,
//! 2. sysfs DRM per-card attributes (amdgpu, and any driver exposing
//!    `gpu_busy_percent`).
//!
//! Detection runs once per session and the first probe that returns at least
//! one device wins. Sampling re-queries through the probe that detected the
//! devices; a failed query omits that device for the pass only.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{GpuError, ParseError, SourceError};
use crate::rate::percent_of;

/// Sentinel for a temperature or power reading the hardware did not give.
pub const UNAVAILABLE: f64 = -1.0;

const NVIDIA_QUERY: &str = "--query-gpu=index,name,utilization.gpu,memory.total,memory.used,temperature.gpu,power.draw";
const NVIDIA_FORMAT: &str = "--format=csv,noheader,nounits";
const NVIDIA_COLUMNS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Unknown,
}

impl GpuVendor {
    /// Map a PCI vendor id such as `0x1002`.
    pub fn from_pci_id(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "0x10de" => Self::Nvidia,
            "0x1002" => Self::Amd,
            "0x8086" => Self::Intel,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nvidia => write!(f, "nvidia"),
            Self::Amd => write!(f, "amd"),
            Self::Intel => write!(f, "intel"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A GPU found at detection time. Immutable for the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuDevice {
    pub index: u32,
    pub name: String,
    pub vendor: GpuVendor,
}

/// One pass worth of GPU readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpuStats {
    pub usage_percent: f64,
    pub memory_usage_percent: f64,
    pub memory_total_mb: f64,
    pub memory_used_mb: f64,
    /// [`UNAVAILABLE`] when unreadable.
    pub temperature_c: f64,
    /// [`UNAVAILABLE`] when unreadable.
    pub power_draw_w: f64,
}

/// One parsed `nvidia-smi` CSV row.
#[derive(Debug, Clone, PartialEq)]
pub struct NvidiaRow {
    pub index: u32,
    pub name: String,
    pub stats: GpuStats,
}

fn best_effort(raw: &str) -> f64 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(UNAVAILABLE)
}

fn required(index: usize, raw: &str) -> Result<f64, ParseError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParseError::NotNumber {
            index,
            raw: raw.trim().to_string(),
        })
}

/// Parse `index, name, util, mem.total, mem.used, temp, power`.
pub fn parse_nvidia_row(line: &str) -> Result<NvidiaRow, ParseError> {
    let cols: Vec<&str> = line.split(',').map(str::trim).collect();
    if cols.len() < NVIDIA_COLUMNS {
        return Err(ParseError::TooFewFields {
            expected: NVIDIA_COLUMNS,
            found: cols.len(),
        });
    }
    let index = cols[0].parse::<u32>().map_err(|_| ParseError::NotNumber {
        index: 0,
        raw: cols[0].to_string(),
    })?;
    let memory_total_mb = required(3, cols[3])?;
    let memory_used_mb = required(4, cols[4])?;
    Ok(NvidiaRow {
        index,
        name: cols[1].to_string(),
        stats: GpuStats {
            usage_percent: required(2, cols[2])?,
            memory_usage_percent: if memory_total_mb > 0.0 {
                (memory_used_mb / memory_total_mb * 100.0).clamp(0.0, 100.0)
            } else {
                0.0
            },
            memory_total_mb,
            memory_used_mb,
            temperature_c: best_effort(cols[5]),
            power_draw_w: best_effort(cols[6]),
        },
    })
}

/// Parse every usable row, skipping malformed ones.
pub fn parse_nvidia_rows(text: &str) -> Vec<NvidiaRow> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| match parse_nvidia_row(line) {
            Ok(row) => Some(row),
            Err(e) => {
                log::debug!("skipping nvidia-smi row {line:?}: {e}");
                None
            }
        })
        .collect()
}

/// Run a command with a deadline and return its stdout.
fn run_command(program: &Path, args: &[&str], timeout: Duration) -> Result<String, SourceError> {
    let command_error = |reason: String| SourceError::Command {
        program: program.display().to_string(),
        reason,
    };
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| command_error(e.to_string()))?;

    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    return Err(command_error(format!("exited with {status}")));
                }
                let mut out = Vec::new();
                if let Some(mut stdout) = child.stdout.take() {
                    stdout
                        .read_to_end(&mut out)
                        .map_err(|e| command_error(e.to_string()))?;
                }
                return Ok(String::from_utf8_lossy(&out).into_owned());
            }
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(command_error(format!("timed out after {timeout:?}")));
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => return Err(command_error(e.to_string())),
        }
    }
}

/// `nvidia-smi` CSV probe.
#[derive(Debug, Clone)]
pub struct NvidiaSmiProbe {
    program: PathBuf,
    timeout: Duration,
}

impl NvidiaSmiProbe {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn query(&self, extra: Option<&str>) -> Result<Vec<NvidiaRow>, SourceError> {
        let mut args = vec![NVIDIA_QUERY, NVIDIA_FORMAT];
        if let Some(arg) = extra {
            args.push(arg);
        }
        let text = run_command(&self.program, &args, self.timeout)?;
        Ok(parse_nvidia_rows(&text))
    }

    pub fn detect(&self) -> Result<Vec<GpuDevice>, GpuError> {
        let rows = self.query(None).map_err(|e| GpuError::Probe {
            probe: "nvidia-smi",
            reason: e.to_string(),
        })?;
        Ok(rows
            .into_iter()
            .map(|row| GpuDevice {
                index: row.index,
                name: row.name,
                vendor: GpuVendor::Nvidia,
            })
            .collect())
    }

    pub fn sample(&self, device: &GpuDevice) -> Result<GpuStats, GpuError> {
        let id = format!("--id={}", device.index);
        self.query(Some(&id))?
            .into_iter()
            .find(|row| row.index == device.index)
            .map(|row| row.stats)
            .ok_or_else(|| GpuError::Query {
                index: device.index,
                reason: "no matching row".to_string(),
            })
    }
}

/// sysfs DRM probe over `cardN/device/*` attribute files.
#[derive(Debug, Clone)]
pub struct DrmProbe {
    root: PathBuf,
}

impl DrmProbe {
    /// Attribute a card directory must expose to be accepted.
    pub const REQUIRED_ATTRIBUTE: &'static str = "gpu_busy_percent";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn card_device_dir(&self, index: u32) -> PathBuf {
        self.root.join(format!("card{index}")).join("device")
    }

    pub fn detect(&self) -> Result<Vec<GpuDevice>, GpuError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| GpuError::Probe {
            probe: "drm",
            reason: format!("{}: {e}", self.root.display()),
        })?;

        let mut devices = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            // `card0-DP-1` style entries are connectors, not cards.
            let Some(index) = name
                .strip_prefix("card")
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            let device_dir = self.card_device_dir(index);
            if !device_dir.join(Self::REQUIRED_ATTRIBUTE).is_file() {
                continue;
            }
            let vendor = read_trimmed(&device_dir.join("vendor"))
                .map(|v| GpuVendor::from_pci_id(&v))
                .unwrap_or(GpuVendor::Unknown);
            let name = read_trimmed(&device_dir.join("product_name"))
                .unwrap_or_else(|| format!("{vendor} card{index}"));
            devices.push(GpuDevice {
                index,
                name,
                vendor,
            });
        }
        devices.sort_by_key(|d| d.index);
        Ok(devices)
    }

    pub fn sample(&self, device: &GpuDevice) -> Result<GpuStats, GpuError> {
        let dir = self.card_device_dir(device.index);
        let usage_percent = read_trimmed(&dir.join(Self::REQUIRED_ATTRIBUTE))
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| GpuError::Query {
                index: device.index,
                reason: format!("{} unreadable", Self::REQUIRED_ATTRIBUTE),
            })?;

        let vram_total = read_u64(&dir.join("mem_info_vram_total")).unwrap_or(0);
        let vram_used = read_u64(&dir.join("mem_info_vram_used")).unwrap_or(0);
        let (temperature_c, power_draw_w) = read_hwmon(&dir.join("hwmon"));

        Ok(GpuStats {
            usage_percent,
            memory_usage_percent: percent_of(vram_used, vram_total),
            memory_total_mb: vram_total as f64 / (1024.0 * 1024.0),
            memory_used_mb: vram_used as f64 / (1024.0 * 1024.0),
            temperature_c,
            power_draw_w,
        })
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let v = raw.trim();
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

fn read_u64(path: &Path) -> Option<u64> {
    read_trimmed(path).and_then(|s| s.parse().ok())
}

/// Temperature (°C) and power (W) from the first hwmon dir that has them.
fn read_hwmon(root: &Path) -> (f64, f64) {
    let mut temperature = UNAVAILABLE;
    let mut power = UNAVAILABLE;
    let Ok(entries) = std::fs::read_dir(root) else {
        return (temperature, power);
    };
    let mut dirs: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    dirs.sort();
    for dir in dirs {
        if temperature == UNAVAILABLE
            && let Some(milli_c) = read_u64(&dir.join("temp1_input"))
        {
            temperature = milli_c as f64 / 1000.0;
        }
        if power == UNAVAILABLE
            && let Some(micro_w) = read_u64(&dir.join("power1_average"))
                .or_else(|| read_u64(&dir.join("power1_input")))
        {
            power = micro_w as f64 / 1_000_000.0;
        }
    }
    (temperature, power)
}

/// The closed set of vendor probes.
#[derive(Debug, Clone)]
pub enum GpuProbe {
    NvidiaSmi(NvidiaSmiProbe),
    Drm(DrmProbe),
}

impl GpuProbe {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NvidiaSmi(_) => "nvidia-smi",
            Self::Drm(_) => "drm",
        }
    }

    pub fn detect(&self) -> Result<Vec<GpuDevice>, GpuError> {
        match self {
            Self::NvidiaSmi(p) => p.detect(),
            Self::Drm(p) => p.detect(),
        }
    }

    pub fn sample(&self, device: &GpuDevice) -> Result<GpuStats, GpuError> {
        match self {
            Self::NvidiaSmi(p) => p.sample(device),
            Self::Drm(p) => p.sample(device),
        }
    }
}

#[derive(Debug, Clone)]
struct Detected {
    probe: usize,
    devices: Vec<GpuDevice>,
}

/// Ordered fallback over [`GpuProbe`]s with a session-long detection cache.
#[derive(Debug, Clone)]
pub struct GpuProbeChain {
    probes: Vec<GpuProbe>,
    detected: Option<Detected>,
}

impl GpuProbeChain {
    pub fn new(probes: Vec<GpuProbe>) -> Self {
        Self {
            probes,
            detected: None,
        }
    }

    /// `nvidia-smi` first, then sysfs DRM.
    pub fn standard(nvidia_smi: impl Into<PathBuf>, drm_root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self::new(vec![
            GpuProbe::NvidiaSmi(NvidiaSmiProbe::new(nvidia_smi, timeout)),
            GpuProbe::Drm(DrmProbe::new(drm_root)),
        ])
    }

    /// Run detection once; later calls return the cached result.
    pub fn detect(&mut self) -> &[GpuDevice] {
        if self.detected.is_none() {
            self.detected = Some(self.run_detection());
        }
        self.devices()
    }

    fn run_detection(&self) -> Detected {
        for (i, probe) in self.probes.iter().enumerate() {
            match probe.detect() {
                Ok(devices) if !devices.is_empty() => {
                    log::info!("{} detected {} GPU(s)", probe.name(), devices.len());
                    return Detected { probe: i, devices };
                }
                Ok(_) => log::debug!("{} found no GPUs", probe.name()),
                Err(e) => log::debug!("skipping GPU probe {}: {e}", probe.name()),
            }
        }
        log::info!("no GPUs detected");
        Detected {
            probe: 0,
            devices: Vec::new(),
        }
    }

    pub fn is_detected(&self) -> bool {
        self.detected.is_some()
    }

    /// Devices found by [`detect`](Self::detect); empty before detection.
    pub fn devices(&self) -> &[GpuDevice] {
        self.detected
            .as_ref()
            .map(|d| d.devices.as_slice())
            .unwrap_or(&[])
    }

    /// Name of the probe that won detection.
    pub fn active_probe(&self) -> Option<&'static str> {
        let detected = self.detected.as_ref()?;
        if detected.devices.is_empty() {
            return None;
        }
        self.probes.get(detected.probe).map(GpuProbe::name)
    }

    /// Stats keyed by GPU index; devices whose query fails are omitted.
    pub fn sample_all(&self) -> BTreeMap<u32, GpuStats> {
        let mut out = BTreeMap::new();
        let Some(detected) = &self.detected else {
            return out;
        };
        let Some(probe) = self.probes.get(detected.probe) else {
            return out;
        };
        for device in &detected.devices {
            match probe.sample(device) {
                Ok(stats) => {
                    out.insert(device.index, stats);
                }
                Err(e) => log::warn!("GPU {} temporarily unavailable: {e}", device.index),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    fn amd_card(root: &Path, index: u32) {
        let dev = root.join(format!("card{index}/device"));
        write(&dev.join("gpu_busy_percent"), "37\n");
        write(&dev.join("vendor"), "0x1002\n");
        write(&dev.join("mem_info_vram_total"), &(8u64 << 30).to_string());
        write(&dev.join("mem_info_vram_used"), &(2u64 << 30).to_string());
        write(&dev.join("hwmon/hwmon3/temp1_input"), "61000\n");
        write(&dev.join("hwmon/hwmon3/power1_average"), "45500000\n");
    }

    #[test]
    fn nvidia_row_full() {
        let row = parse_nvidia_row("0, NVIDIA GeForce RTX 3080, 35, 10240, 2560, 55, 120.50").unwrap();
        assert_eq!(row.index, 0);
        assert_eq!(row.name, "NVIDIA GeForce RTX 3080");
        assert!((row.stats.usage_percent - 35.0).abs() < 1e-9);
        assert!((row.stats.memory_usage_percent - 25.0).abs() < 1e-9);
        assert!((row.stats.power_draw_w - 120.5).abs() < 1e-9);
    }

    #[test]
    fn nvidia_row_na_sentinels() {
        let row = parse_nvidia_row("1, Tesla T4, 0, 15360, 0, [N/A], [N/A]").unwrap();
        assert_eq!(row.stats.temperature_c, UNAVAILABLE);
        assert_eq!(row.stats.power_draw_w, UNAVAILABLE);
    }

    #[test]
    fn nvidia_rows_skip_malformed() {
        let text = "garbage\n0, A, 1, 100, 50, 40, 10\nx, B, 1, 1, 1, 1, 1\n\n";
        let rows = parse_nvidia_rows(text);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "A");
    }

    #[test]
    fn drm_detects_only_cards_with_required_attribute() {
        let dir = tempfile::tempdir().unwrap();
        amd_card(dir.path(), 1);
        // connector entry and a card without the attribute
        std::fs::create_dir_all(dir.path().join("card1-DP-1")).unwrap();
        write(&dir.path().join("card0/device/vendor"), "0x8086\n");
        write(&dir.path().join("version"), "drm 1.1.0\n");

        let devices = DrmProbe::new(dir.path()).detect().unwrap();
        assert_eq!(
            devices,
            vec![GpuDevice {
                index: 1,
                name: "amd card1".to_string(),
                vendor: GpuVendor::Amd,
            }]
        );
    }

    #[test]
    fn drm_sample_reads_attributes() {
        let dir = tempfile::tempdir().unwrap();
        amd_card(dir.path(), 0);
        let probe = DrmProbe::new(dir.path());
        let device = probe.detect().unwrap().remove(0);
        let stats = probe.sample(&device).unwrap();
        assert!((stats.usage_percent - 37.0).abs() < 1e-9);
        assert!((stats.memory_total_mb - 8192.0).abs() < 1e-9);
        assert!((stats.memory_used_mb - 2048.0).abs() < 1e-9);
        assert!((stats.memory_usage_percent - 25.0).abs() < 1e-9);
        assert!((stats.temperature_c - 61.0).abs() < 1e-9);
        assert!((stats.power_draw_w - 45.5).abs() < 1e-9);
    }

    #[test]
    fn drm_missing_hwmon_uses_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("card2/device/gpu_busy_percent"), "5\n");
        let probe = DrmProbe::new(dir.path());
        let device = probe.detect().unwrap().remove(0);
        assert_eq!(device.vendor, GpuVendor::Unknown);
        let stats = probe.sample(&device).unwrap();
        assert_eq!(stats.temperature_c, UNAVAILABLE);
        assert_eq!(stats.power_draw_w, UNAVAILABLE);
        assert_eq!(stats.memory_usage_percent, 0.0);
    }

    #[cfg(unix)]
    #[test]
    fn chain_falls_through_empty_nvidia_to_drm() {
        let dir = tempfile::tempdir().unwrap();
        amd_card(dir.path(), 0);
        // `true` exits 0 with no output: zero usable rows.
        let mut chain = GpuProbeChain::standard("true", dir.path(), Duration::from_secs(5));
        let devices = chain.detect().to_vec();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].vendor, GpuVendor::Amd);
        assert_eq!(chain.active_probe(), Some("drm"));
        assert!(chain.sample_all().contains_key(&0));
    }

    #[test]
    fn chain_skips_probe_that_errors() {
        let dir = tempfile::tempdir().unwrap();
        amd_card(dir.path(), 3);
        let mut chain = GpuProbeChain::standard(
            "/nonexistent/bin/nvidia-smi",
            dir.path(),
            Duration::from_secs(1),
        );
        assert_eq!(chain.detect().len(), 1);
        assert_eq!(chain.devices()[0].index, 3);
    }

    #[test]
    fn detection_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let mut chain = GpuProbeChain::new(vec![GpuProbe::Drm(DrmProbe::new(dir.path()))]);
        assert!(chain.detect().is_empty());
        amd_card(dir.path(), 0);
        assert!(chain.detect().is_empty(), "a second detect must not re-probe");
        assert!(chain.is_detected());
    }

    #[test]
    fn failed_query_omits_device() {
        let dir = tempfile::tempdir().unwrap();
        amd_card(dir.path(), 0);
        amd_card(dir.path(), 1);
        let mut chain = GpuProbeChain::new(vec![GpuProbe::Drm(DrmProbe::new(dir.path()))]);
        assert_eq!(chain.detect().len(), 2);
        std::fs::remove_file(dir.path().join("card1/device/gpu_busy_percent")).unwrap();
        let stats = chain.sample_all();
        assert!(stats.contains_key(&0));
        assert!(!stats.contains_key(&1));
        assert_eq!(chain.devices().len(), 2, "a failed query never removes a device");
    }
}
