//! # ratewatch-core
//!
//! **Counters in, rates and rolling histories out.**
//!
//! `ratewatch-core` samples cumulative operating-system counters (cpu ticks,
//! memory gauges, disk sectors, network octets, per-process I/O bytes, GPU
//! utilization) on a fixed cadence and turns them into non-negative
//! per-second rates plus bounded 60-point histories.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ratewatch_core::{EngineConfig, TelemetryFacade};
//!
//! let mut engine = TelemetryFacade::from_config(&EngineConfig::default());
//!
//! // The first pass only establishes baselines.
//! engine.sample().unwrap();
//! std::thread::sleep(std::time::Duration::from_secs(2));
//!
//! let report = engine.sample().unwrap();
//! println!("cpu {:.1}%  disk read {:.1} KB/s", report.cpu_percent, report.disk_read_kbps);
//! ```
//!
//! ## Architecture
//!
//! CounterSource → Sampler → (snapshot stores, rate derivation, histories) → Facade
//!
//! Every metric family is read on its own. A family that cannot be read keeps
//! its last-known values and is listed in
//! [`TelemetryReport::failed_families`]; the rest of the pass proceeds.
//! Entities (disks, interfaces, cores, processes) that vanish are pruned at
//! the end of the pass, history included, so memory stays bounded while the
//! host churns.

pub mod config;
pub mod error;
pub mod facade;
pub mod gpu;
pub mod history;
pub mod parse;
pub mod process;
pub mod rate;
pub mod report;
pub mod sampler;
pub mod source;
pub mod store;

pub use config::{DEFAULT_INTERVAL_MS, EngineConfig, MIN_INTERVAL_MS};
pub use error::{ConfigError, GpuError, ParseError, SampleError, SourceError};
pub use facade::TelemetryFacade;
pub use gpu::{DrmProbe, GpuDevice, GpuProbe, GpuProbeChain, GpuStats, GpuVendor, NvidiaSmiProbe};
pub use history::{HISTORY_CAPACITY, HistoryMap, HistoryPoint, RingHistory};
pub use parse::LoadAverage;
pub use process::{ProcessIoRate, ProcessIoTracker};
pub use report::{
    DiskRate, Family, HistorySnapshot, MemoryGauge, NetRate, SwapGauge, TelemetryReport,
};
pub use sampler::Sampler;
pub use source::{Clock, CounterSource, ManualClock, ProcfsSource, SystemClock};
pub use store::{CounterSnapshot, EntitySnapshotStore};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
