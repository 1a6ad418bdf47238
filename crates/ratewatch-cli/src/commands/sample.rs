use ratewatch_core::EngineConfig;

/// Baseline pass, one interval of sleep, measured pass.
pub fn run(config: &EngineConfig, json: bool, output_path: Option<&str>) {
    let mut engine = super::make_engine(config);

    if let Err(e) = engine.sample() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    if !json {
        println!("Measuring over {}ms...", config.interval_ms);
    }
    std::thread::sleep(config.interval());

    let report = match engine.sample() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("Error serializing report: {e}");
                std::process::exit(1);
            }
        }
    } else {
        super::print_summary(&report);
    }
    if let Some(path) = output_path {
        super::write_json(&report, path, "Report");
    }
}
