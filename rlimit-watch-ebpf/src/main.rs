#![cfg_attr(feature = "build-ebpf", no_std)]
#![cfg_attr(feature = "build-ebpf", no_main)]

// 将 eBPF 相关代码放到一个 cfg 模块里，避免到处写 #[cfg(...)]
#[cfg(feature = "build-ebpf")]
mod ebpf {
    use aya_ebpf::{
        EbpfContext,
        helpers::{bpf_get_current_comm, bpf_probe_read_user},
        macros::{kprobe, map},
        maps::PerfEventArray,
        programs::ProbeContext,
    };
    use rlimit_watch_common::{NprocEvent, RLIMIT_NPROC, RawRlimit, is_target_comm};

    #[map]
    static EVENTS: PerfEventArray<NprocEvent> = PerfEventArray::new(0);

    // prlimit64(pid, resource, new_rlim, old_rlim)
    #[kprobe]
    pub fn trace_prlimit(ctx: ProbeContext) -> u32 {
        match try_trace_prlimit(&ctx) {
            Ok(ret) => ret,
            Err(ret) => ret,
        }
    }

    fn try_trace_prlimit(ctx: &ProbeContext) -> Result<u32, u32> {
        let comm = match bpf_get_current_comm() {
            Ok(comm_array) => comm_array,
            Err(_) => return Ok(0),
        };
        if !is_target_comm(&comm) {
            return Ok(0);
        }

        let resource: u32 = ctx.arg(1).ok_or(0u32)?;
        if resource != RLIMIT_NPROC {
            return Ok(0);
        }

        let new_rlim: *const RawRlimit = ctx.arg(2).ok_or(0u32)?;
        if new_rlim.is_null() {
            return Ok(0);
        }
        // 一次性读取 cur 和 max，读取失败时整条事件丢弃
        let limit = match unsafe { bpf_probe_read_user(new_rlim) } {
            Ok(limit) => limit,
            Err(_) => return Ok(0),
        };

        let event = NprocEvent {
            pid: ctx.tgid(),
            _pad: [0; 4],
            nproc_cur: limit.rlim_cur,
            nproc_max: limit.rlim_max,
            comm,
        };
        // 缓冲区满时内核直接丢弃，不向探针返回错误
        EVENTS.output(ctx, &event, 0);

        Ok(0)
    }

    // setrlimit(resource, rlim): trace line only, read with
    // `cat /sys/kernel/debug/tracing/trace_pipe`
    #[kprobe]
    pub fn trace_setrlimit(ctx: ProbeContext) -> u32 {
        let comm = match bpf_get_current_comm() {
            Ok(comm_array) => comm_array,
            Err(_) => return 0,
        };
        if is_target_comm(&comm) {
            let pid = ctx.tgid();
            unsafe {
                aya_ebpf::bpf_printk!(b"mysqld(PID: %u) called setrlimit", pid);
            }
        }
        0
    }

    // 提供 panic 处理，仅在 eBPF 特性开启时使用（no_std 环境）
    #[cfg(not(test))]
    #[panic_handler]
    fn panic(_info: &core::panic::PanicInfo) -> ! {
        loop {}
    }

    #[unsafe(link_section = "license")]
    #[unsafe(no_mangle)]
    static LICENSE: [u8; 13] = *b"Dual MIT/GPL\0";
}

// 未启用 eBPF 时，提供一个空的 std main，避免宿主构建报错。
#[cfg(not(feature = "build-ebpf"))]
fn main() {
    eprintln!("rlimit-watch-ebpf built without 'build-ebpf' feature; skipping eBPF program");
}
