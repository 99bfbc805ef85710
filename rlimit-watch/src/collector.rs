use crate::channel::{EventSource, ReadError};
use crate::record::{self, comm_str, format_event};
use rlimit_watch_common::NprocEvent;
use tracing::{debug, info, warn};

/// Where decoded events end up.
pub trait Reporter: Send {
    fn report(&mut self, event: &NprocEvent);
}

/// Writes one info line per event to the log sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&mut self, event: &NprocEvent) {
        info!(pid = event.pid, comm = %comm_str(&event.comm), "{}", format_event(event));
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectorStats {
    pub decoded: u64,
    pub decode_errors: u64,
    pub read_errors: u64,
}

/// Drains `source` until it reports `ReadError::Closed`.
///
/// Read and decode failures are logged and absorbed here; nothing but closure
/// ends the loop.
pub async fn run_collector<S, R>(mut source: S, mut reporter: R) -> CollectorStats
where
    S: EventSource,
    R: Reporter,
{
    let mut stats = CollectorStats::default();
    info!("[Collector] Started.");

    loop {
        let raw = match source.read().await {
            Ok(raw) => raw,
            Err(ReadError::Closed) => {
                debug!("[Collector] Channel closed, exiting loop.");
                break;
            }
            Err(e) => {
                stats.read_errors += 1;
                warn!(error = %e, "[Collector] Reading from delivery channel failed, continuing.");
                continue;
            }
        };

        match record::decode(&raw) {
            Ok(event) => {
                stats.decoded += 1;
                reporter.report(&event);
            }
            Err(e) => {
                stats.decode_errors += 1;
                warn!(error = %e, "[Collector] Parsing event record failed, skipping.");
            }
        }
    }

    info!(
        decoded = stats.decoded,
        decode_errors = stats.decode_errors,
        read_errors = stats.read_errors,
        "[Collector] Stopped."
    );
    stats
}
