//! CLI for ratewatch: live host rates and rolling histories.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ratewatch")]
#[command(about = "ratewatch — turn live OS counters into rates and rolling histories")]
#[command(version = ratewatch_core::VERSION)]
struct Cli {
    /// JSON engine config; flags below override its fields
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// procfs mount to read instead of the configured one
    #[arg(long, global = true)]
    proc_root: Option<PathBuf>,

    /// Skip GPU detection entirely
    #[arg(long, global = true)]
    no_gpu: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take a baseline, wait one interval, and print the resulting rates
    Sample {
        /// Milliseconds between the baseline and the measured pass
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Print the full report as JSON instead of a summary
        #[arg(long)]
        json: bool,

        /// Also write the report as JSON to this path
        #[arg(long)]
        output: Option<String>,
    },

    /// Sample continuously until Ctrl+C
    Watch {
        /// Milliseconds between passes
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Stop after this many passes
        #[arg(long)]
        count: Option<u64>,

        /// Emit one JSON report per line instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// List GPUs found by the probe chain
    Gpus {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Serve reports over HTTP
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8042")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Milliseconds between background passes
        #[arg(long)]
        interval_ms: Option<u64>,

        /// No background passes; sample only when /api/sample is requested
        #[arg(long)]
        on_demand: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let overrides = commands::Overrides {
        proc_root: cli.proc_root,
        no_gpu: cli.no_gpu,
        interval_ms: match &cli.command {
            Commands::Sample { interval_ms, .. }
            | Commands::Watch { interval_ms, .. }
            | Commands::Serve { interval_ms, .. } => *interval_ms,
            Commands::Gpus { .. } => None,
        },
    };
    let config = commands::load_config(cli.config.as_deref(), &overrides);

    match cli.command {
        Commands::Sample { json, output, .. } => {
            commands::sample::run(&config, json, output.as_deref())
        }
        Commands::Watch { count, json, .. } => commands::watch::run(&config, count, json),
        Commands::Gpus { json } => commands::gpus::run(&config, json),
        Commands::Serve {
            port,
            host,
            on_demand,
            ..
        } => commands::serve::run(&config, &host, port, !on_demand),
    }
}
