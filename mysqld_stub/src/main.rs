// 测试进程：可执行文件名为 mysqld，使内核中的 comm 与探针过滤条件一致。
// 用法: mysqld [cur] [max]，默认把自己的 RLIMIT_NPROC 设为 100/200。

use nix::sys::resource::{Resource, getrlimit, setrlimit};
use std::env;
use std::process;

fn parse_arg(args: &[String], index: usize, default: u64) -> u64 {
    match args.get(index) {
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(e) => {
                eprintln!("invalid limit '{}': {}", raw, e);
                process::exit(2);
            }
        },
        None => default,
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let cur = parse_arg(&args, 1, 100);
    let max = parse_arg(&args, 2, 200);

    let pid = process::id();
    println!("mysqld stub started, PID: {}", pid);

    // glibc 的 setrlimit 通过 prlimit64 系统调用实现
    if let Err(e) = setrlimit(Resource::RLIMIT_NPROC, cur, max) {
        eprintln!("setrlimit(RLIMIT_NPROC, {}, {}) failed: {}", cur, max, e);
        process::exit(1);
    }

    match getrlimit(Resource::RLIMIT_NPROC) {
        Ok((soft, hard)) => println!("[PID: {}] RLIMIT_NPROC now {}/{}", pid, soft, hard),
        Err(e) => eprintln!("getrlimit failed: {}", e),
    }
}
