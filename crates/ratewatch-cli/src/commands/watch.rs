use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ratewatch_core::EngineConfig;

pub fn run(config: &EngineConfig, count: Option<u64>, json: bool) {
    let mut engine = super::make_engine(config);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Error setting Ctrl+C handler: {e}");
        std::process::exit(1);
    }

    if !json {
        println!(
            "Watching every {}ms (Ctrl+C to stop)",
            config.interval_ms
        );
    }

    let interval = config.interval();
    let mut completed = 0u64;
    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        match engine.sample() {
            Ok(report) => {
                if json {
                    match serde_json::to_string(&report) {
                        Ok(line) => println!("{line}"),
                        Err(e) => eprintln!("Error serializing report: {e}"),
                    }
                } else {
                    super::print_summary(&report);
                    println!();
                }
                completed += 1;
            }
            // The next pass retries against the same baselines.
            Err(e) => eprintln!("pass skipped: {e}"),
        }
        if count.is_some_and(|n| completed >= n) {
            break;
        }
        sleep_until(started + interval, &running);
    }
    log::info!("stopped after {completed} passes");
}

/// Sleep in short slices so Ctrl+C is honoured promptly.
fn sleep_until(deadline: Instant, running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(100)));
    }
}
