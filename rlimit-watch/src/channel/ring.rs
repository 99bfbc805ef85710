use super::ReadError;
use anyhow::{anyhow, ensure, Result};
use bytes::Bytes;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};

/// Largest record a slot can hold. Perf samples for one event are 44 bytes.
pub const MAX_RECORD_LEN: usize = 64;

/// Upper bound on records per CPU ring.
pub const MAX_RING_CAPACITY: usize = 1 << 20;

struct Slot {
    len: usize,
    data: [u8; MAX_RECORD_LEN],
}

/// Single-producer/single-consumer ring for one CPU.
///
/// `head` and `tail` grow monotonically and wrap; the slot index is the low
/// bits because the capacity is a power of two.
struct CpuRing {
    slots: Box<[UnsafeCell<Slot>]>,
    mask: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
    dropped: AtomicU64,
}

// SAFETY: a slot is written only by the one `RingProducer` for this CPU while
// `tail - head < capacity`, and read only by the one `RingReader` while
// `head != tail`. The release store on `tail` (producer) and on `head`
// (consumer) publishes the slot to the other side.
unsafe impl Sync for CpuRing {}

impl CpuRing {
    fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| {
                UnsafeCell::new(Slot {
                    len: 0,
                    data: [0; MAX_RECORD_LEN],
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: capacity - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, record: &[u8]) -> bool {
        if record.len() > MAX_RECORD_LEN {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) > self.mask {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let slot = unsafe { &mut *self.slots[tail & self.mask].get() };
        slot.len = record.len();
        slot.data[..record.len()].copy_from_slice(record);
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    fn pop(&self) -> Option<Bytes> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }

        let slot = unsafe { &*self.slots[head & self.mask].get() };
        let record = Bytes::copy_from_slice(&slot.data[..slot.len]);
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(record)
    }
}

struct Shared {
    rings: Vec<CpuRing>,
    /// Samples the kernel overwrote before a pump could read them.
    lost: AtomicU64,
    data_ready: Notify,
    closed: watch::Sender<bool>,
}

/// Builds a channel with one ring per CPU, each holding at least `capacity`
/// records (rounded up to a power of two).
///
/// Returns one producer per CPU, the single reader, and a closer.
pub fn bounded(
    cpus: usize,
    capacity: usize,
) -> Result<(Vec<RingProducer>, RingReader, ChannelCloser)> {
    ensure!(
        capacity <= MAX_RING_CAPACITY,
        "ring capacity {} exceeds the limit of {}",
        capacity,
        MAX_RING_CAPACITY
    );
    let capacity = capacity
        .max(1)
        .checked_next_power_of_two()
        .ok_or_else(|| anyhow!("ring capacity {} is too large", capacity))?;
    let (closed, _) = watch::channel(false);
    let shared = Arc::new(Shared {
        rings: (0..cpus.max(1)).map(|_| CpuRing::new(capacity)).collect(),
        lost: AtomicU64::new(0),
        data_ready: Notify::new(),
        closed,
    });

    let producers = (0..shared.rings.len())
        .map(|cpu| RingProducer {
            shared: Arc::clone(&shared),
            cpu,
        })
        .collect();
    let reader = RingReader {
        shared: Arc::clone(&shared),
        next_cpu: 0,
    };
    Ok((producers, reader, ChannelCloser { shared }))
}

/// Write side for one CPU. Not `Clone`: each ring has exactly one writer.
pub struct RingProducer {
    shared: Arc<Shared>,
    cpu: usize,
}

impl RingProducer {
    /// Never blocks. Returns false when the record was dropped because the
    /// ring is full, the record is oversized, or the channel is closed.
    pub fn push(&mut self, record: &[u8]) -> bool {
        if self.is_closed() {
            return false;
        }
        let pushed = self.shared.rings[self.cpu].push(record);
        if pushed {
            self.shared.data_ready.notify_one();
        }
        pushed
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Counts samples lost before they reached this ring.
    pub fn record_lost(&self, count: u64) {
        if count > 0 {
            self.shared.lost.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Resolves once the channel has been closed.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// The single consumer of the channel.
pub struct RingReader {
    shared: Arc<Shared>,
    next_cpu: usize,
}

impl RingReader {
    /// Waits for the next record from any CPU.
    ///
    /// Returns `ReadError::Closed` once the channel is closed, even if records
    /// are still buffered.
    pub async fn read(&mut self) -> Result<Bytes, ReadError> {
        let mut closed = self.shared.closed.subscribe();
        loop {
            if *closed.borrow_and_update() {
                return Err(ReadError::Closed);
            }
            if let Some(record) = self.try_read() {
                return Ok(record);
            }
            tokio::select! {
                _ = self.shared.data_ready.notified() => {}
                _ = closed.changed() => {}
            }
        }
    }

    /// Round-robins over the per-CPU rings so one busy CPU cannot starve the rest.
    pub fn try_read(&mut self) -> Option<Bytes> {
        let cpus = self.shared.rings.len();
        for offset in 0..cpus {
            let cpu = (self.next_cpu + offset) % cpus;
            if let Some(record) = self.shared.rings[cpu].pop() {
                self.next_cpu = (cpu + 1) % cpus;
                return Some(record);
            }
        }
        None
    }
}

#[derive(Clone)]
pub struct ChannelCloser {
    shared: Arc<Shared>,
}

impl ChannelCloser {
    /// Closes the channel. Returns true only for the call that actually closed it.
    pub fn close(&self) -> bool {
        let was_closed = self.shared.closed.send_replace(true);
        self.shared.data_ready.notify_one();
        !was_closed
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Records dropped on the producer side so far.
    pub fn dropped(&self) -> u64 {
        self.shared
            .rings
            .iter()
            .map(|ring| ring.dropped.load(Ordering::Relaxed))
            .sum()
    }

    /// Samples lost upstream of the rings (perf buffer overruns).
    pub fn lost(&self) -> u64 {
        self.shared.lost.load(Ordering::Relaxed)
    }
}
