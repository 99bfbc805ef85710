use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub mod perf;
pub mod ring;

pub use ring::{bounded, ChannelCloser, RingProducer, RingReader};

#[derive(Debug)]
pub enum ReadError {
    /// 通道已关闭，消费者应当退出
    Closed,
    Io(std::io::Error),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Closed => write!(f, "delivery channel closed"),
            ReadError::Io(e) => write!(f, "delivery channel read failed: {}", e),
        }
    }
}

impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReadError::Closed => None,
            ReadError::Io(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ReadError {
    fn from(err: std::io::Error) -> ReadError {
        ReadError::Io(err)
    }
}

/// Consumer side of a delivery channel.
#[async_trait]
pub trait EventSource: Send {
    /// Waits for the next raw record. `ReadError::Closed` is terminal.
    async fn read(&mut self) -> Result<Bytes, ReadError>;
}

#[async_trait]
impl EventSource for RingReader {
    async fn read(&mut self) -> Result<Bytes, ReadError> {
        RingReader::read(self).await
    }
}

/// Everything the lifecycle controller owns for one open channel.
pub struct ChannelHandle {
    pub reader: RingReader,
    pub closer: ChannelCloser,
    /// Tasks feeding the ring from kernel buffers; they exit on close.
    pub pumps: Vec<JoinHandle<()>>,
}

impl ChannelHandle {
    pub fn new(reader: RingReader, closer: ChannelCloser, pumps: Vec<JoinHandle<()>>) -> Self {
        Self {
            reader,
            closer,
            pumps,
        }
    }
}

/// Close side kept after the reader has been handed to the collector.
pub struct ChannelGuard {
    closer: ChannelCloser,
    pumps: Vec<JoinHandle<()>>,
}

impl ChannelGuard {
    pub fn new(closer: ChannelCloser, pumps: Vec<JoinHandle<()>>) -> Self {
        Self { closer, pumps }
    }

    /// Idempotent.
    pub fn close(&self) -> bool {
        self.closer.close()
    }

    pub fn dropped(&self) -> u64 {
        self.closer.dropped()
    }

    pub fn lost(&self) -> u64 {
        self.closer.lost()
    }

    /// Waits for the pump tasks after close; stragglers are aborted.
    pub async fn join_pumps(&mut self, grace: Duration) {
        let mut stopped = 0;
        for handle in self.pumps.drain(..) {
            let abort = handle.abort_handle();
            match tokio::time::timeout(grace, handle).await {
                Ok(_) => stopped += 1,
                Err(_) => {
                    warn!("[Channel] Pump task did not stop within {:?}, aborting.", grace);
                    abort.abort();
                }
            }
        }
        debug!("[Channel] {} pump tasks stopped.", stopped);
    }
}
