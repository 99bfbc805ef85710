use clap::Parser;
use rlimit_watch::config::{LogFormat, MonitorConfig, ReportingMode};
use rlimit_watch::{core_logic, logger};
use std::process::ExitCode;
use tracing::error;

/// Command line options for rlimit-watch
#[derive(Debug, Parser)]
#[command(author, version, about = "Reports RLIMIT_NPROC changes made by mysqld", long_about = None)]
struct Cli {
    /// Probe variant: structured records through the perf buffer, or trace_pipe lines only
    #[arg(long, value_enum, default_value_t = ReportingMode::Structured)]
    mode: ReportingMode,

    /// Records buffered per CPU before new ones are dropped
    #[arg(long, default_value_t = 256)]
    ring_capacity: usize,

    /// Pages per CPU for the kernel perf buffer (power of two)
    #[arg(long, default_value_t = 1)]
    perf_pages: usize,

    /// Log output format; the level comes from RUST_LOG
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            mode: self.mode,
            ring_capacity: self.ring_capacity,
            perf_pages: self.perf_pages,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logger::init_logging(cli.log_format) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let config = cli.monitor_config();
    if let Err(e) = config.validate() {
        error!("Invalid options: {:#}", e);
        return ExitCode::FAILURE;
    }

    match core_logic::async_runtime(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
