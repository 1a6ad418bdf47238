//! The presentation-facing entry point.
//!
//! A [`TelemetryFacade`] owns one [`Sampler`] for the lifetime of the
//! process. `sample` takes `&mut self`, so at most one pass runs at a time;
//! every accessor hands out owned copies and never triggers a pass.

use crate::config::EngineConfig;
use crate::error::SampleError;
use crate::gpu::{GpuDevice, GpuProbeChain};
use crate::report::{HistorySnapshot, TelemetryReport};
use crate::sampler::Sampler;
use crate::source::{Clock, CounterSource, ProcfsSource, SystemClock};

pub struct TelemetryFacade<S = ProcfsSource, C = SystemClock> {
    sampler: Sampler<S, C>,
    latest: Option<TelemetryReport>,
}

impl TelemetryFacade {
    /// Engine over the procfs mount and GPU probes named in `config`.
    ///
    /// GPU detection runs here, once, when enabled.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut sampler = Sampler::new(ProcfsSource::new(&config.proc_root), SystemClock::new())
            .with_process_tracking(config.track_processes);
        if config.gpu_enabled {
            sampler = sampler.with_gpu(GpuProbeChain::standard(
                &config.nvidia_smi,
                &config.drm_root,
                config.gpu_timeout(),
            ));
        }
        Self::new(sampler)
    }
}

impl<S: CounterSource, C: Clock> TelemetryFacade<S, C> {
    pub fn new(sampler: Sampler<S, C>) -> Self {
        Self {
            sampler,
            latest: None,
        }
    }

    /// Run one pass and remember its report.
    ///
    /// On [`SampleError::PassAborted`] the previous report stays available
    /// through [`latest`](Self::latest).
    pub fn sample(&mut self) -> Result<TelemetryReport, SampleError> {
        match self.sampler.run_pass() {
            Ok(report) => {
                self.latest = Some(report.clone());
                Ok(report)
            }
            Err(e) => {
                log::warn!("sampling pass aborted: {e}");
                Err(e)
            }
        }
    }

    /// Report of the most recent successful pass.
    pub fn latest(&self) -> Option<TelemetryReport> {
        self.latest.clone()
    }

    pub fn latest_history(&self) -> HistorySnapshot {
        self.sampler.history()
    }

    pub fn gpus(&self) -> Vec<GpuDevice> {
        self.sampler.gpu_devices().to_vec()
    }

    pub fn pass_count(&self) -> u64 {
        self.sampler.passes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::tests::{FakeSource, diskstats, net_dev};
    use crate::source::ManualClock;
    use std::sync::Arc;

    fn facade() -> (FakeSource, Arc<ManualClock>, TelemetryFacade<FakeSource, Arc<ManualClock>>) {
        let src = FakeSource::default();
        src.set("stat", "cpu 1 0 1 8 0 0 0 0\ncpu0 1 0 1 8 0 0 0 0\n");
        src.set("meminfo", "MemTotal: 100 kB\nMemFree: 50 kB\n");
        src.set("diskstats", &diskstats(&[("vda", 0, 0)]));
        src.set("net/dev", &net_dev(&[("eth0", 0, 0)]));
        src.set("loadavg", "0.00 0.00 0.00 1/1 1\n");
        src.set("uptime", "1.0 1.0\n");
        let clock = Arc::new(ManualClock::new(5_000));
        let f = TelemetryFacade::new(Sampler::new(src.clone(), Arc::clone(&clock)));
        (src, clock, f)
    }

    #[test]
    fn accessors_do_not_sample() {
        let (_src, _clock, f) = facade();
        assert!(f.latest().is_none());
        assert!(f.latest_history().cpu.is_empty());
        assert!(f.gpus().is_empty());
        assert_eq!(f.pass_count(), 0);
    }

    #[test]
    fn aborted_pass_keeps_latest() {
        let (src, clock, mut f) = facade();
        let first = f.sample().unwrap();
        assert_eq!(f.latest(), Some(first.clone()));

        *src.down.lock().unwrap() = true;
        clock.advance(2_000);
        assert!(f.sample().is_err());
        assert_eq!(f.latest(), Some(first));
        assert_eq!(f.pass_count(), 1);
    }

    #[test]
    fn report_serializes_to_json() {
        let (_src, _clock, mut f) = facade();
        let report = f.sample().unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["pass"], 1);
        assert_eq!(json["collected_unix_ms"], 5_000);
        assert!(json["history"]["cpu"].is_array());
    }
}
