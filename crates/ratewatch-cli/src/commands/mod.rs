pub mod gpus;
pub mod sample;
pub mod serve;
pub mod watch;

use std::path::{Path, PathBuf};

use ratewatch_core::{EngineConfig, TelemetryFacade, TelemetryReport};

/// Command-line values layered over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub proc_root: Option<PathBuf>,
    pub no_gpu: bool,
    pub interval_ms: Option<u64>,
}

impl Overrides {
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(root) = &self.proc_root {
            config.proc_root = root.clone();
        }
        if self.no_gpu {
            config.gpu_enabled = false;
        }
        if let Some(ms) = self.interval_ms {
            config.interval_ms = ms;
        }
    }
}

/// Build the effective config or exit with a message.
pub fn load_config(path: Option<&Path>, overrides: &Overrides) -> EngineConfig {
    let mut config = match path {
        Some(p) => match EngineConfig::from_path(p) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config {}: {e}", p.display());
                std::process::exit(2);
            }
        },
        None => EngineConfig::default(),
    };
    overrides.apply(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(2);
    }
    log::debug!("effective config: {config:?}");
    config
}

pub fn make_engine(config: &EngineConfig) -> TelemetryFacade {
    TelemetryFacade::from_config(config)
}

/// Pretty-print `value` as JSON to `path`.
pub fn write_json<T: serde::Serialize>(value: &T, path: &str, label: &str) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => match std::fs::write(path, json) {
            Ok(()) => println!("{label} written to {path}"),
            Err(e) => eprintln!("Error writing {path}: {e}"),
        },
        Err(e) => eprintln!("Error serializing {label}: {e}"),
    }
}

/// Kilobytes rendered with a binary unit.
pub fn format_kb(kb: u64) -> String {
    format_scaled(kb as f64, 1024.0, &["KiB", "MiB", "GiB", "TiB"])
}

/// KB/s rendered with a binary unit.
pub fn format_kbps(kbps: f64) -> String {
    format!("{}/s", format_scaled(kbps, 1024.0, &["KiB", "MiB", "GiB", "TiB"]))
}

fn format_scaled(value: f64, base: f64, units: &[&str]) -> String {
    let mut v = value.abs();
    let mut idx = 0usize;
    while v >= base && idx < units.len() - 1 {
        v /= base;
        idx += 1;
    }
    format!("{v:.2}{}", units[idx])
}

/// `-1` readings mean the hardware did not expose the value.
fn format_optional(value: f64, unit: &str) -> String {
    if value < 0.0 {
        "n/a".to_string()
    } else {
        format!("{value:.1}{unit}")
    }
}

/// Multi-line human summary of one pass.
pub fn print_summary(report: &TelemetryReport) {
    println!(
        "pass {}  cpu {:5.1}%  load {:.2} {:.2} {:.2}  uptime {:.0}s",
        report.pass,
        report.cpu_percent,
        report.load_average.one,
        report.load_average.five,
        report.load_average.fifteen,
        report.uptime_secs,
    );
    if !report.per_core_percent.is_empty() {
        let cores: Vec<String> = report
            .per_core_percent
            .iter()
            .map(|(idx, pct)| format!("{idx}:{pct:.0}%"))
            .collect();
        println!("  cores   {}", cores.join(" "));
    }
    println!(
        "  memory  {} / {} ({:.1}%)  swap {} / {} ({:.1}%)",
        format_kb(report.memory.used_kb),
        format_kb(report.memory.total_kb),
        report.memory.percent,
        format_kb(report.swap.used_kb),
        format_kb(report.swap.total_kb),
        report.swap.percent,
    );
    println!(
        "  disk    read {}  write {}",
        format_kbps(report.disk_read_kbps),
        format_kbps(report.disk_write_kbps),
    );
    for (name, rate) in &report.disks {
        println!(
            "    {name:<12} read {:>14}  write {:>14}",
            format_kbps(rate.read_kbps),
            format_kbps(rate.write_kbps)
        );
    }
    println!(
        "  net     recv {}  sent {}",
        format_kbps(report.net_recv_kbps),
        format_kbps(report.net_sent_kbps),
    );
    for (iface, rate) in &report.interfaces {
        println!(
            "    {iface:<12} recv {:>14}  sent {:>14}",
            format_kbps(rate.recv_kbps),
            format_kbps(rate.sent_kbps)
        );
    }
    for (index, gpu) in &report.gpus {
        println!(
            "  gpu{index}    {:.0}%  vram {:.0}/{:.0} MB  temp {}  power {}",
            gpu.usage_percent,
            gpu.memory_used_mb,
            gpu.memory_total_mb,
            format_optional(gpu.temperature_c, "C"),
            format_optional(gpu.power_draw_w, "W"),
        );
    }
    let busiest = busiest_processes(report, 5);
    if !busiest.is_empty() {
        println!("  top I/O processes");
        for (pid, total) in busiest {
            println!("    pid {pid:<8} {}", format_kbps(total));
        }
    }
    if !report.failed_families.is_empty() {
        let failed: Vec<String> = report.failed_families.iter().map(|f| f.to_string()).collect();
        println!("  unavailable this pass: {}", failed.join(", "));
    }
}

/// Processes with the highest combined read+write rate, busiest first.
fn busiest_processes(report: &TelemetryReport, max: usize) -> Vec<(u32, f64)> {
    let mut rows: Vec<(u32, f64)> = report
        .processes
        .iter()
        .map(|(pid, r)| (*pid, r.read_kbps + r.write_kbps))
        .filter(|(_, total)| *total > 0.0)
        .collect();
    rows.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    rows.truncate(max);
    rows
}
