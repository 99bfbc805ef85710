use crate::{
    backend::AyaBackend,
    collector::LogReporter,
    config::{MonitorConfig, ReportingMode},
    lifecycle::LifecycleController,
    signal_handler::SignalHandler,
};
use anyhow::{Context, Result};
use tracing::info;

pub fn async_runtime(config: MonitorConfig) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("rlimit-watch")
        .build()
        .context("failed to build async runtime")?;

    rt.block_on(monitor_core_logic(config))
}

async fn monitor_core_logic(config: MonitorConfig) -> Result<()> {
    info!(
        "Core Logic: Starting in {} mode (entry point '{}').",
        config.mode,
        config.mode.entry_point()
    );

    // 1. 先注册信号处理，保证挂载后收到的信号都走优雅关闭
    let mut signals = SignalHandler::new().context("failed to register signal handlers")?;

    // 2. 提权 -> 加载 -> 挂载 -> 启动收集器，任何一步失败都会回滚并返回
    let mut controller = LifecycleController::new(AyaBackend::new(), config.clone());
    controller.start(LogReporter)?;
    info!("eBPF program attached. Press Ctrl+C to exit.");
    if config.mode == ReportingMode::TraceOnly {
        info!("Core Logic: Trace lines go to /sys/kernel/debug/tracing/trace_pipe.");
    }

    // 3. 等待关闭信号
    let signal = signals.wait_for_signal().await;

    // 4. 关闭通道 -> 等待收集器 -> 卸载探针 -> 释放内核资源
    let summary = controller.shutdown().await;
    match summary.collector {
        Some(stats) => info!(
            signal = ?signal,
            events = stats.decoded,
            decode_errors = stats.decode_errors,
            read_errors = stats.read_errors,
            dropped = summary.dropped,
            lost = summary.lost,
            "Exiting... shutdown completed."
        ),
        None => info!(signal = ?signal, "Exiting... shutdown completed."),
    }
    Ok(())
}
