use crate::backend::KernelBackend;
use crate::channel::{ChannelGuard, ChannelHandle};
use crate::collector::{run_collector, CollectorStats, Reporter};
use crate::config::MonitorConfig;
use anyhow::Result;
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const COLLECTOR_GRACE: Duration = Duration::from_secs(3);
const PUMP_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    PrivilegeAdjusted,
    BytecodeLoaded,
    Attached,
    CollectorRunning,
    Detaching,
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStep {
    AdjustPrivileges,
    LoadBytecode,
    Attach,
    OpenChannel,
}

impl fmt::Display for StartupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            StartupStep::AdjustPrivileges => "removing memlock limit",
            StartupStep::LoadBytecode => "loading probe bytecode",
            StartupStep::Attach => "attaching kprobe",
            StartupStep::OpenChannel => "opening delivery channel",
        };
        f.write_str(step)
    }
}

/// Fatal startup failure, tagged with the step that failed.
#[derive(Debug)]
pub struct StartupError {
    pub step: StartupStep,
    pub source: anyhow::Error,
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed", self.step)
    }
}

impl std::error::Error for StartupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

/// "Entry point X is hooked to program Y". Detaching twice is a no-op.
pub struct ProbeAttachment<L> {
    program: &'static str,
    entry_point: &'static str,
    link: Option<L>,
}

impl<L> ProbeAttachment<L> {
    pub fn new(program: &'static str, entry_point: &'static str, link: L) -> Self {
        Self {
            program,
            entry_point,
            link: Some(link),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.link.is_some()
    }

    pub fn entry_point(&self) -> &'static str {
        self.entry_point
    }

    /// Returns whether this call performed the detach.
    ///
    /// The link is consumed before the backend is called, so a failed detach
    /// is not retried either.
    pub fn detach<B>(&mut self, backend: &mut B) -> Result<bool>
    where
        B: KernelBackend<Link = L>,
    {
        match self.link.take() {
            Some(link) => {
                backend.detach(self.program, link)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSummary {
    pub collector: Option<CollectorStats>,
    /// Records dropped because a per-CPU ring was full.
    pub dropped: u64,
    /// Samples the kernel overwrote before they were read.
    pub lost: u64,
    pub detached: bool,
}

/// Owns every kernel-side resource and tears them down in reverse order.
pub struct LifecycleController<B: KernelBackend> {
    backend: B,
    config: MonitorConfig,
    state: LifecycleState,
    attachment: Option<ProbeAttachment<B::Link>>,
    channel: Option<ChannelGuard>,
    collector: Option<JoinHandle<CollectorStats>>,
}

impl<B: KernelBackend> LifecycleController<B> {
    pub fn new(backend: B, config: MonitorConfig) -> Self {
        Self {
            backend,
            config,
            state: LifecycleState::Uninitialized,
            attachment: None,
            channel: None,
            collector: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn attachment(&self) -> Option<&ProbeAttachment<B::Link>> {
        self.attachment.as_ref()
    }

    /// Runs privilege adjustment, load, attach and (structured mode) starts
    /// the collector. Must be called from within a tokio runtime.
    ///
    /// On failure everything acquired so far is released and the controller
    /// ends in `Exited`.
    pub fn start<R>(&mut self, reporter: R) -> Result<(), StartupError>
    where
        R: Reporter + 'static,
    {
        if self.state != LifecycleState::Uninitialized {
            warn!("Lifecycle: start() called in state {:?}, ignoring.", self.state);
            return Ok(());
        }
        let mode = self.config.mode;

        if let Err(e) = self.backend.remove_memlock_limit() {
            return Err(self.abort(StartupStep::AdjustPrivileges, e));
        }
        self.state = LifecycleState::PrivilegeAdjusted;

        if let Err(e) = self.backend.load(mode.program_name()) {
            return Err(self.abort(StartupStep::LoadBytecode, e));
        }
        self.state = LifecycleState::BytecodeLoaded;

        match self.backend.attach(mode.program_name(), mode.entry_point()) {
            Ok(link) => {
                self.attachment = Some(ProbeAttachment::new(
                    mode.program_name(),
                    mode.entry_point(),
                    link,
                ));
            }
            Err(e) => return Err(self.abort(StartupStep::Attach, e)),
        }
        self.state = LifecycleState::Attached;

        if mode.uses_channel() {
            let ChannelHandle {
                reader,
                closer,
                pumps,
            } = match self.backend.open_channel(&self.config) {
                Ok(handle) => handle,
                Err(e) => return Err(self.abort(StartupStep::OpenChannel, e)),
            };
            self.channel = Some(ChannelGuard::new(closer, pumps));
            self.collector = Some(tokio::spawn(run_collector(reader, reporter)));
            self.state = LifecycleState::CollectorRunning;
        }

        debug!("Lifecycle: startup finished in state {:?}.", self.state);
        Ok(())
    }

    /// Close channel, wait for the collector, detach, release. Safe to call
    /// more than once; later calls return an empty summary.
    pub async fn shutdown(&mut self) -> ShutdownSummary {
        let mut summary = ShutdownSummary::default();
        if self.state == LifecycleState::Exited {
            debug!("Lifecycle: already shut down.");
            return summary;
        }
        self.state = LifecycleState::Detaching;

        if let Some(channel) = self.channel.as_ref() {
            channel.close();
        }
        if let Some(handle) = self.collector.take() {
            let abort = handle.abort_handle();
            match tokio::time::timeout(COLLECTOR_GRACE, handle).await {
                Ok(Ok(stats)) => summary.collector = Some(stats),
                Ok(Err(e)) => error!("Lifecycle: collector task failed: {}", e),
                Err(_) => {
                    warn!("Lifecycle: collector did not stop within timeout, aborting.");
                    abort.abort();
                }
            }
        }
        if let Some(mut channel) = self.channel.take() {
            channel.join_pumps(PUMP_GRACE).await;
            summary.dropped = channel.dropped();
            summary.lost = channel.lost();
        }

        summary.detached = self.release_kernel_resources();
        self.state = LifecycleState::Exited;
        summary
    }

    fn abort(&mut self, step: StartupStep, source: anyhow::Error) -> StartupError {
        debug!("Lifecycle: {} failed, releasing acquired resources.", step);
        self.release_kernel_resources();
        self.state = LifecycleState::Exited;
        StartupError { step, source }
    }

    fn release_kernel_resources(&mut self) -> bool {
        let mut detached = false;
        if let Some(attachment) = self.attachment.as_mut() {
            match attachment.detach(&mut self.backend) {
                Ok(true) => {
                    detached = true;
                    info!("Lifecycle: probe detached from '{}'.", attachment.entry_point());
                }
                Ok(false) => debug!("Lifecycle: probe already detached."),
                Err(e) => error!("Lifecycle: detaching probe failed: {:#}", e),
            }
        }
        self.backend.release();
        detached
    }
}

impl<B: KernelBackend> Drop for LifecycleController<B> {
    fn drop(&mut self) {
        if self.state == LifecycleState::Exited {
            return;
        }
        // 未调用 shutdown 时，保证通道先于探针关闭
        if let Some(channel) = self.channel.as_ref() {
            channel.close();
        }
        if let Some(handle) = self.collector.take() {
            handle.abort();
        }
        self.release_kernel_resources();
        self.state = LifecycleState::Exited;
    }
}
