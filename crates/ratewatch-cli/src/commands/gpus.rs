use ratewatch_core::{EngineConfig, GpuProbeChain};

pub fn run(config: &EngineConfig, json: bool) {
    if !config.gpu_enabled {
        eprintln!("GPU probing is disabled by configuration");
        std::process::exit(1);
    }
    let mut chain =
        GpuProbeChain::standard(&config.nvidia_smi, &config.drm_root, config.gpu_timeout());
    let devices = chain.detect().to_vec();

    if json {
        match serde_json::to_string_pretty(&devices) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("Error serializing devices: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    if devices.is_empty() {
        println!("No GPUs detected.");
        return;
    }
    println!(
        "{} GPU(s) via {}",
        devices.len(),
        chain.active_probe().unwrap_or("unknown probe")
    );
    let stats = chain.sample_all();
    for device in &devices {
        let usage = stats
            .get(&device.index)
            .map(|s| format!("{:.0}% busy", s.usage_percent))
            .unwrap_or_else(|| "unavailable".to_string());
        println!(
            "  [{}] {:<32} {:<8} {}",
            device.index, device.name, device.vendor, usage
        );
    }
}
