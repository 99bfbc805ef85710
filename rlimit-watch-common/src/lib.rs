#![cfg_attr(not(test), no_std)]

/// 内核进程名长度（TASK_COMM_LEN，包括null终止符）
pub const TASK_COMM_LEN: usize = 16;

/// 被监控的进程名，包括null终止符，保证只匹配完全相同的 "mysqld"
pub const TARGET_COMM: [u8; 7] = *b"mysqld\0";

/// `RLIMIT_NPROC` resource id from the kernel's generic resource table.
pub const RLIMIT_NPROC: u32 = 6;

/// Kernel function hooked in structured mode.
pub const PRLIMIT_ENTRY_POINT: &str = "prlimit64";
/// Kernel function hooked in trace-only mode.
pub const SETRLIMIT_ENTRY_POINT: &str = "setrlimit";

pub const PRLIMIT_PROGRAM: &str = "trace_prlimit";
pub const SETRLIMIT_PROGRAM: &str = "trace_setrlimit";

/// Name of the perf event array the structured probe writes to.
pub const EVENTS_MAP: &str = "EVENTS";

/// One `RLIMIT_NPROC` change requested by the target process.
///
/// The padding after `pid` is spelled out so the probe never copies
/// uninitialized stack bytes into the perf buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NprocEvent {
    pub pid: u32,
    pub _pad: [u8; 4],
    pub nproc_cur: u64,
    pub nproc_max: u64,
    pub comm: [u8; TASK_COMM_LEN], // 内核进程名，填满时不保证以null结尾
}

/// Size of one record on the wire.
pub const EVENT_SIZE: usize = core::mem::size_of::<NprocEvent>();

/// `struct rlimit64` as passed to `prlimit64` from user space.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct RawRlimit {
    pub rlim_cur: u64,
    pub rlim_max: u64,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for NprocEvent {}

/// Returns true only when `comm` holds exactly the target name.
///
/// Fixed-length comparison so the verifier sees a bounded loop.
#[inline(always)]
pub fn is_target_comm(comm: &[u8; TASK_COMM_LEN]) -> bool {
    let mut i = 0;
    while i < TARGET_COMM.len() {
        if comm[i] != TARGET_COMM[i] {
            return false;
        }
        i += 1;
    }
    true
}
