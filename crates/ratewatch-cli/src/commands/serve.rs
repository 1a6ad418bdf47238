use ratewatch_core::EngineConfig;

pub fn run(config: &EngineConfig, host: &str, port: u16, background: bool) {
    let engine = super::make_engine(config);
    let base = format!("http://{host}:{port}");
    let gpus = engine.gpus().len();

    println!("ratewatch server v{}", ratewatch_core::VERSION);
    println!("   {base}");
    println!("   procfs {}  ({gpus} GPU(s))", config.proc_root.display());
    if background {
        println!("   sampling every {}ms", config.interval_ms);
    } else {
        println!("   sampling on request only");
    }
    println!();
    println!("   Endpoints:");
    println!("     GET /              API index (try: curl {base})");
    println!("     GET /api/sample    Run one pass and return its report");
    println!("     GET /api/latest    Most recent report");
    println!("     GET /api/history   Rolling histories");
    println!("     GET /api/gpus      Detected GPUs");
    println!("     GET /health        Liveness and pass count");
    println!();

    let interval = background.then(|| config.interval());
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error starting runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(ratewatch_server::run_server(engine, host, port, interval)) {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }
}
