//! One sampling pass over every metric family.
//!
//! The sampler is the only writer of the snapshot stores and histories.
//! Families are read independently: a family that cannot be read or parsed
//! keeps its last-known output, is listed in
//! [`TelemetryReport::failed_families`], and never prunes its entities.
//! GPUs are the exception: a device whose query fails is left out of that
//! pass's report.

use std::collections::BTreeMap;

use crate::error::{SampleError, SourceError};
use crate::gpu::{GpuDevice, GpuProbeChain};
use crate::history::{HistoryMap, RingHistory};
use crate::parse::{self, MemInfo, ProcIo};
use crate::process::ProcessIoTracker;
use crate::rate::{self, CPU_TICK_FIELDS};
use crate::report::{
    DiskRate, Family, HistorySnapshot, MemoryGauge, NetRate, SwapGauge, TelemetryReport,
};
use crate::source::{Clock, CounterSource};
use crate::store::{CounterSnapshot, EntitySnapshotStore};

const TICK_NAMES: [&str; CPU_TICK_FIELDS] = [
    "user", "nice", "system", "idle", "iowait", "irq", "softirq", "steal",
];

fn ticks_snapshot(ticks: &[u64; CPU_TICK_FIELDS], at_ms: u64) -> CounterSnapshot {
    TICK_NAMES
        .iter()
        .zip(ticks)
        .fold(CounterSnapshot::new(at_ms), |s, (name, v)| s.with(*name, *v))
}

fn snapshot_ticks(snapshot: &CounterSnapshot) -> [u64; CPU_TICK_FIELDS] {
    let mut ticks = [0u64; CPU_TICK_FIELDS];
    for (slot, name) in ticks.iter_mut().zip(TICK_NAMES) {
        *slot = snapshot.get(name);
    }
    ticks
}

/// Previous summed counters of a whole family, kept apart from the
/// per-entity stores so churn cannot skew the aggregate rate.
#[derive(Debug, Clone, Copy)]
struct AggregateCounter {
    a: u64,
    b: u64,
    at_ms: u64,
}

/// A two-counter entity class: its store and one history map per counter.
#[derive(Debug, Default)]
struct PairTracker {
    store: EntitySnapshotStore,
    history_a: HistoryMap,
    history_b: HistoryMap,
    total: Option<AggregateCounter>,
}

type RateFn = fn(u64, u64, u64, u64) -> f64;
type FamilyStep<S, C> = fn(&mut Sampler<S, C>, &mut TelemetryReport, u64) -> Result<(), SourceError>;

impl PairTracker {
    /// Update every entity of the pass, prune the missing ones and return
    /// rates for entities that were already tracked plus the aggregate rate.
    fn track(
        &mut self,
        rows: &[(String, u64, u64)],
        fields: (&'static str, &'static str),
        now_ms: u64,
        to_rate: RateFn,
    ) -> (BTreeMap<String, (f64, f64)>, (f64, f64)) {
        let mut rates = BTreeMap::new();
        for (key, a, b) in rows {
            let snapshot = CounterSnapshot::new(now_ms)
                .with(fields.0, *a)
                .with(fields.1, *b);
            match self.store.update(key, snapshot) {
                Some(prev) => {
                    let ra = to_rate(prev.get(fields.0), *a, prev.captured_at_ms, now_ms);
                    let rb = to_rate(prev.get(fields.1), *b, prev.captured_at_ms, now_ms);
                    self.history_a.append(key, ra, now_ms);
                    self.history_b.append(key, rb, now_ms);
                    rates.insert(key.clone(), (ra, rb));
                }
                None => {
                    self.history_a.append(key, 0.0, now_ms);
                    self.history_b.append(key, 0.0, now_ms);
                }
            }
        }

        for gone in self.store.prune_except(rows.iter().map(|(k, _, _)| k.as_str())) {
            log::debug!("{} vanished; discarding its history", gone);
            self.history_a.discard(&gone);
            self.history_b.discard(&gone);
        }

        let sum_a = rows.iter().map(|(_, a, _)| *a).fold(0u64, u64::saturating_add);
        let sum_b = rows.iter().map(|(_, _, b)| *b).fold(0u64, u64::saturating_add);
        let aggregate = match self.total {
            Some(prev) => (
                to_rate(prev.a, sum_a, prev.at_ms, now_ms),
                to_rate(prev.b, sum_b, prev.at_ms, now_ms),
            ),
            None => (0.0, 0.0),
        };
        self.total = Some(AggregateCounter {
            a: sum_a,
            b: sum_b,
            at_ms: now_ms,
        });
        (rates, aggregate)
    }
}

#[derive(Debug, Default)]
struct GlobalHistories {
    cpu: RingHistory,
    memory: RingHistory,
    disk_read: RingHistory,
    disk_write: RingHistory,
    net_recv: RingHistory,
    net_sent: RingHistory,
    cores: HistoryMap,
    gpu_usage: HistoryMap,
    gpu_memory: HistoryMap,
}

/// Drives passes against a [`CounterSource`] with an injected [`Clock`].
pub struct Sampler<S, C> {
    source: S,
    clock: C,
    gpu: Option<GpuProbeChain>,
    track_processes: bool,

    cpu_prev: Option<[u64; CPU_TICK_FIELDS]>,
    cores: EntitySnapshotStore,
    core_count: Option<usize>,
    disks: PairTracker,
    interfaces: PairTracker,
    processes: ProcessIoTracker,

    histories: GlobalHistories,
    last: TelemetryReport,
    passes: u64,
}

impl<S: CounterSource, C: Clock> Sampler<S, C> {
    pub fn new(source: S, clock: C) -> Self {
        Self {
            source,
            clock,
            gpu: None,
            track_processes: false,
            cpu_prev: None,
            cores: EntitySnapshotStore::new(),
            core_count: None,
            disks: PairTracker::default(),
            interfaces: PairTracker::default(),
            processes: ProcessIoTracker::new(),
            histories: GlobalHistories::default(),
            last: TelemetryReport::default(),
            passes: 0,
        }
    }

    /// Attach a GPU probe chain and run its one-time detection now.
    pub fn with_gpu(mut self, mut chain: GpuProbeChain) -> Self {
        chain.detect();
        self.gpu = Some(chain);
        self
    }

    pub fn with_process_tracking(mut self, enabled: bool) -> Self {
        self.track_processes = enabled;
        self
    }

    pub fn gpu_devices(&self) -> &[GpuDevice] {
        self.gpu.as_ref().map(GpuProbeChain::devices).unwrap_or(&[])
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Keys currently in the disk store.
    pub fn tracked_disks(&self) -> Vec<String> {
        self.disks.store.keys()
    }

    /// Keys currently in the interface store.
    pub fn tracked_interfaces(&self) -> Vec<String> {
        self.interfaces.store.keys()
    }

    pub fn history(&self) -> HistorySnapshot {
        let h = &self.histories;
        HistorySnapshot {
            cpu: h.cpu.snapshot(),
            memory: h.memory.snapshot(),
            disk_read: h.disk_read.snapshot(),
            disk_write: h.disk_write.snapshot(),
            net_recv: h.net_recv.snapshot(),
            net_sent: h.net_sent.snapshot(),
            cores: h.cores.snapshot(),
            disk_read_by_device: self.disks.history_a.snapshot(),
            disk_write_by_device: self.disks.history_b.snapshot(),
            net_recv_by_iface: self.interfaces.history_a.snapshot(),
            net_sent_by_iface: self.interfaces.history_b.snapshot(),
            gpu_usage: h.gpu_usage.snapshot(),
            gpu_memory: h.gpu_memory.snapshot(),
        }
    }

    /// Run one pass. Fails only when the source is unreachable before any
    /// family is read; in that case no state changes.
    pub fn run_pass(&mut self) -> Result<TelemetryReport, SampleError> {
        if let Err(e) = self.source.check() {
            return Err(SampleError::PassAborted {
                reason: e.to_string(),
                source: Some(e),
            });
        }

        let now_ms = self.clock.now_ms();
        let mut report = self.last.clone();
        report.failed_families.clear();
        report.collected_unix_ms = now_ms;

        let families: [(Family, FamilyStep<S, C>); 7] = [
            (Family::Cpu, Self::sample_cpu),
            (Family::Memory, Self::sample_memory),
            (Family::Disk, Self::sample_disks),
            (Family::Network, Self::sample_network),
            (Family::LoadAverage, Self::sample_loadavg),
            (Family::Uptime, Self::sample_uptime),
            (Family::Processes, Self::sample_processes),
        ];
        for (family, step) in families {
            if family == Family::Processes && !self.track_processes {
                continue;
            }
            if let Err(e) = step(self, &mut report, now_ms) {
                log::warn!("{family} family unavailable this pass: {e}");
                report.failed_families.push(family);
            }
        }
        self.sample_gpus(&mut report, now_ms);

        let h = &mut self.histories;
        h.cpu.append(report.cpu_percent, now_ms);
        h.memory.append(report.memory.percent, now_ms);
        h.disk_read.append(report.disk_read_kbps, now_ms);
        h.disk_write.append(report.disk_write_kbps, now_ms);
        h.net_recv.append(report.net_recv_kbps, now_ms);
        h.net_sent.append(report.net_sent_kbps, now_ms);

        self.passes += 1;
        report.pass = self.passes;
        report.history = self.history();
        self.last = report.clone();
        Ok(report)
    }

    fn sample_cpu(&mut self, report: &mut TelemetryReport, now_ms: u64) -> Result<(), SourceError> {
        let text = self.source.cpu_stat()?;
        let stat = parse::parse_cpu_stat(&text);
        let Some(aggregate) = stat.aggregate else {
            return Err(SourceError::Empty { family: "cpu" });
        };

        report.cpu_percent = match self.cpu_prev {
            Some(prev) => rate::busy_percent(&prev, &aggregate),
            None => 0.0,
        };
        self.cpu_prev = Some(aggregate);

        let hot_plugged = self
            .core_count
            .is_some_and(|count| count != stat.cores.len());
        if hot_plugged {
            log::info!(
                "core count changed {} -> {}; resetting per-core state",
                self.core_count.unwrap_or_default(),
                stat.cores.len()
            );
            self.cores.clear();
            self.histories.cores.clear();
        }
        self.core_count = Some(stat.cores.len());

        let mut per_core = BTreeMap::new();
        for (idx, ticks) in &stat.cores {
            let key = idx.to_string();
            let percent = match self.cores.update(&key, ticks_snapshot(ticks, now_ms)) {
                Some(prev) => rate::busy_percent(&snapshot_ticks(&prev), ticks),
                None => 0.0,
            };
            self.histories.cores.append(&key, percent, now_ms);
            per_core.insert(*idx, percent);
        }
        let keys: Vec<String> = stat.cores.iter().map(|(i, _)| i.to_string()).collect();
        for gone in self.cores.prune_except(keys.iter().map(String::as_str)) {
            self.histories.cores.discard(&gone);
        }
        report.per_core_percent = per_core;
        Ok(())
    }

    fn sample_memory(&mut self, report: &mut TelemetryReport, _now_ms: u64) -> Result<(), SourceError> {
        let text = self.source.meminfo()?;
        let mem = parse::parse_meminfo(&text).map_err(|e| {
            log::debug!("meminfo unusable: {e}");
            SourceError::Empty { family: "memory" }
        })?;
        report.memory = memory_gauge(&mem);
        report.swap = swap_gauge(&mem);
        Ok(())
    }

    fn sample_disks(&mut self, report: &mut TelemetryReport, now_ms: u64) -> Result<(), SourceError> {
        let text = self.source.diskstats()?;
        let rows: Vec<(String, u64, u64)> = parse::parse_diskstats(&text)
            .into_iter()
            .map(|r| (r.name, r.read_sectors, r.write_sectors))
            .collect();
        let (rates, (read, write)) = self.disks.track(
            &rows,
            ("read_sectors", "write_sectors"),
            now_ms,
            rate::sectors_kb_per_sec,
        );
        report.disks = rates
            .into_iter()
            .map(|(k, (r, w))| {
                (
                    k,
                    DiskRate {
                        read_kbps: r,
                        write_kbps: w,
                    },
                )
            })
            .collect();
        report.disk_read_kbps = read;
        report.disk_write_kbps = write;
        Ok(())
    }

    fn sample_network(&mut self, report: &mut TelemetryReport, now_ms: u64) -> Result<(), SourceError> {
        let text = self.source.net_dev()?;
        let rows: Vec<(String, u64, u64)> = parse::parse_net_dev(&text)
            .into_iter()
            .map(|r| (r.iface, r.recv_bytes, r.sent_bytes))
            .collect();
        let (rates, (recv, sent)) = self.interfaces.track(
            &rows,
            ("recv_bytes", "sent_bytes"),
            now_ms,
            rate::kb_per_sec,
        );
        report.interfaces = rates
            .into_iter()
            .map(|(k, (r, s))| {
                (
                    k,
                    NetRate {
                        recv_kbps: r,
                        sent_kbps: s,
                    },
                )
            })
            .collect();
        report.net_recv_kbps = recv;
        report.net_sent_kbps = sent;
        Ok(())
    }

    fn sample_loadavg(&mut self, report: &mut TelemetryReport, _now_ms: u64) -> Result<(), SourceError> {
        let text = self.source.loadavg()?;
        report.load_average = parse::parse_loadavg(&text)
            .map_err(|_| SourceError::Empty { family: "loadavg" })?;
        Ok(())
    }

    fn sample_uptime(&mut self, report: &mut TelemetryReport, _now_ms: u64) -> Result<(), SourceError> {
        let text = self.source.uptime()?;
        report.uptime_secs =
            parse::parse_uptime(&text).map_err(|_| SourceError::Empty { family: "uptime" })?;
        Ok(())
    }

    fn sample_processes(&mut self, report: &mut TelemetryReport, now_ms: u64) -> Result<(), SourceError> {
        let raw = self.source.process_io()?;
        let rows: Vec<(u32, ProcIo)> = raw
            .iter()
            .filter_map(|(pid, text)| match parse::parse_proc_io(text) {
                Ok(io) => Some((*pid, io)),
                Err(e) => {
                    log::debug!("skipping io of pid {pid}: {e}");
                    None
                }
            })
            .collect();
        report.processes = self.processes.update(&rows, now_ms);
        Ok(())
    }

    fn sample_gpus(&mut self, report: &mut TelemetryReport, now_ms: u64) {
        let Some(chain) = &self.gpu else {
            return;
        };
        let stats = chain.sample_all();
        if stats.len() < chain.devices().len() {
            report.failed_families.push(Family::Gpu);
        }
        for (index, s) in &stats {
            let key = index.to_string();
            self.histories.gpu_usage.append(&key, s.usage_percent, now_ms);
            self.histories
                .gpu_memory
                .append(&key, s.memory_usage_percent, now_ms);
        }
        // a device whose query failed is absent for this pass
        report.gpus = stats;
    }
}

fn memory_gauge(mem: &MemInfo) -> MemoryGauge {
    let reclaimable = mem.cached_kb + mem.buffers_kb + mem.slab_reclaimable_kb;
    let used_kb = mem
        .total_kb
        .saturating_sub(mem.free_kb)
        .saturating_sub(reclaimable);
    MemoryGauge {
        total_kb: mem.total_kb,
        used_kb,
        free_kb: mem.free_kb,
        available_kb: mem.available_kb,
        cached_kb: mem.cached_kb,
        buffers_kb: mem.buffers_kb,
        slab_reclaimable_kb: mem.slab_reclaimable_kb,
        percent: rate::percent_of(used_kb, mem.total_kb),
    }
}

fn swap_gauge(mem: &MemInfo) -> SwapGauge {
    let used_kb = mem.swap_total_kb.saturating_sub(mem.swap_free_kb);
    SwapGauge {
        total_kb: mem.swap_total_kb,
        used_kb,
        percent: rate::percent_of(used_kb, mem.swap_total_kb),
    }
}
