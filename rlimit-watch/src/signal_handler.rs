use anyhow::Result;
use tokio::signal::unix::{self, Signal, SignalKind};
use tracing::info;

/// 信号处理器，启动时注册，避免在探针挂载期间收到信号被默认处理直接杀死
pub struct SignalHandler {
    term_signal: Signal,
    int_signal: Signal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl SignalHandler {
    pub fn new() -> Result<Self> {
        Ok(Self {
            term_signal: unix::signal(SignalKind::terminate())?,
            int_signal: unix::signal(SignalKind::interrupt())?,
        })
    }

    /// 等待下一个关闭信号
    pub async fn wait_for_signal(&mut self) -> SignalEvent {
        tokio::select! {
            _ = self.term_signal.recv() => {
                info!("SignalHandler: Received SIGTERM, initiating graceful shutdown.");
                SignalEvent::Terminate
            }
            _ = self.int_signal.recv() => {
                info!("SignalHandler: Received SIGINT (Ctrl+C), initiating graceful shutdown.");
                SignalEvent::Interrupt
            }
        }
    }
}
