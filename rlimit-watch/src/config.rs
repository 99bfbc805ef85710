use crate::channel::ring::MAX_RING_CAPACITY;
use anyhow::{ensure, Result};
use clap::ValueEnum;
use rlimit_watch_common::{
    PRLIMIT_ENTRY_POINT, PRLIMIT_PROGRAM, SETRLIMIT_ENTRY_POINT, SETRLIMIT_PROGRAM,
};
use std::fmt;

/// Which probe variant is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportingMode {
    /// kprobe on `prlimit64`, NPROC records delivered through the perf buffer
    Structured,
    /// kprobe on `setrlimit`, one line per call written to the kernel trace pipe
    TraceOnly,
}

impl ReportingMode {
    pub fn program_name(self) -> &'static str {
        match self {
            ReportingMode::Structured => PRLIMIT_PROGRAM,
            ReportingMode::TraceOnly => SETRLIMIT_PROGRAM,
        }
    }

    pub fn entry_point(self) -> &'static str {
        match self {
            ReportingMode::Structured => PRLIMIT_ENTRY_POINT,
            ReportingMode::TraceOnly => SETRLIMIT_ENTRY_POINT,
        }
    }

    /// Only structured mode has a delivery channel and collector.
    pub fn uses_channel(self) -> bool {
        matches!(self, ReportingMode::Structured)
    }
}

impl fmt::Display for ReportingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportingMode::Structured => write!(f, "structured"),
            ReportingMode::TraceOnly => write!(f, "trace-only"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub mode: ReportingMode,
    /// 每个CPU的用户态环形缓冲区容量（记录条数）
    pub ring_capacity: usize,
    /// 每个CPU的perf缓冲区页数，必须是2的幂
    pub perf_pages: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mode: ReportingMode::Structured,
            ring_capacity: 256,
            perf_pages: 1,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.ring_capacity > 0, "ring capacity must be at least 1");
        ensure!(
            self.ring_capacity <= MAX_RING_CAPACITY,
            "ring capacity must be at most {}, got {}",
            MAX_RING_CAPACITY,
            self.ring_capacity
        );
        ensure!(
            self.perf_pages.is_power_of_two(),
            "perf buffer page count must be a power of two, got {}",
            self.perf_pages
        );
        Ok(())
    }
}
