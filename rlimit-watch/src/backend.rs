use crate::channel::{self, perf, ChannelHandle};
use crate::config::MonitorConfig;
use anyhow::{anyhow, Context, Result};
use aya::maps::PerfEventArray;
use aya::programs::{kprobe::KProbeLinkId, KProbe};
use aya::util::online_cpus;
use aya::Ebpf;
use nix::sys::resource::{setrlimit, Resource};
use rlimit_watch_common::EVENTS_MAP;
use tracing::{debug, info};

/// Kernel-facing services the lifecycle controller drives.
///
/// Every method is called at most once per startup, in declaration order,
/// except `detach` and `release` which must tolerate teardown after a
/// partial startup.
pub trait KernelBackend: Send {
    type Link: Send;

    fn remove_memlock_limit(&mut self) -> Result<()>;

    /// Loads the object file (once) and verifies `program` into the kernel.
    fn load(&mut self, program: &str) -> Result<()>;

    fn attach(&mut self, program: &str, entry_point: &str) -> Result<Self::Link>;

    fn detach(&mut self, program: &str, link: Self::Link) -> Result<()>;

    /// Builds the delivery channel and starts feeding it from the kernel.
    fn open_channel(&mut self, config: &MonitorConfig) -> Result<ChannelHandle>;

    /// Drops programs and maps still held. Idempotent.
    fn release(&mut self);
}

/// Backend over aya and the real kernel.
#[derive(Default)]
pub struct AyaBackend {
    ebpf: Option<Ebpf>,
}

impl AyaBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn ebpf_mut(&mut self) -> Result<&mut Ebpf> {
        self.ebpf
            .as_mut()
            .ok_or_else(|| anyhow!("eBPF object is not loaded"))
    }

    fn kprobe_mut<'a>(ebpf: &'a mut Ebpf, program: &str) -> Result<&'a mut KProbe> {
        let kprobe: &mut KProbe = ebpf
            .program_mut(program)
            .ok_or_else(|| anyhow!("Program '{}' not found", program))?
            .try_into()?;
        Ok(kprobe)
    }
}

impl KernelBackend for AyaBackend {
    type Link = KProbeLinkId;

    fn remove_memlock_limit(&mut self) -> Result<()> {
        // Bump the memlock rlimit. This is needed for older kernels that don't use the
        // new memcg-based accounting, see https://lwn.net/Articles/837122/
        setrlimit(
            Resource::RLIMIT_MEMLOCK,
            nix::libc::RLIM_INFINITY,
            nix::libc::RLIM_INFINITY,
        )
        .context("failed to remove memlock limit")?;
        Ok(())
    }

    fn load(&mut self, program: &str) -> Result<()> {
        if self.ebpf.is_none() {
            let ebpf = Ebpf::load(aya::include_bytes_aligned!(concat!(
                env!("OUT_DIR"),
                "/rlimit-watch"
            )))
            .context("failed to load eBPF object")?;
            self.ebpf = Some(ebpf);
        }
        let ebpf = self.ebpf_mut()?;
        Self::kprobe_mut(ebpf, program)?
            .load()
            .with_context(|| format!("verifier rejected program '{}'", program))?;
        debug!("[AyaBackend] Program '{}' loaded.", program);
        Ok(())
    }

    fn attach(&mut self, program: &str, entry_point: &str) -> Result<KProbeLinkId> {
        let ebpf = self.ebpf_mut()?;
        let link = Self::kprobe_mut(ebpf, program)?
            .attach(entry_point, 0)
            .with_context(|| format!("failed to attach kprobe to '{}'", entry_point))?;
        info!("[AyaBackend] Kprobe '{}' attached to '{}'.", program, entry_point);
        Ok(link)
    }

    fn detach(&mut self, program: &str, link: KProbeLinkId) -> Result<()> {
        let ebpf = self.ebpf_mut()?;
        Self::kprobe_mut(ebpf, program)?
            .detach(link)
            .with_context(|| format!("failed to detach kprobe '{}'", program))?;
        info!("[AyaBackend] Kprobe '{}' detached.", program);
        Ok(())
    }

    fn open_channel(&mut self, config: &MonitorConfig) -> Result<ChannelHandle> {
        let ebpf = self.ebpf_mut()?;
        let events_map = ebpf
            .take_map(EVENTS_MAP)
            .ok_or_else(|| anyhow!("Failed to take ownership of '{}' map", EVENTS_MAP))?;
        let mut events = PerfEventArray::try_from(events_map)?;

        let cpus = online_cpus().map_err(|(path, e)| anyhow!("failed to read {}: {}", path, e))?;
        let (producers, reader, closer) = channel::bounded(cpus.len(), config.ring_capacity)?;
        let pumps = match perf::spawn_pumps(&mut events, &cpus, producers, config.perf_pages) {
            Ok(pumps) => pumps,
            Err(e) => {
                // 已启动的 pump 任务在通道关闭后退出
                closer.close();
                return Err(e);
            }
        };
        Ok(ChannelHandle::new(reader, closer, pumps))
    }

    fn release(&mut self) {
        if let Some(ebpf) = self.ebpf.take() {
            drop(ebpf);
            info!("[AyaBackend] eBPF programs and maps released.");
        }
    }
}
