use super::ring::RingProducer;
use anyhow::Result;
use aya::maps::{MapData, PerfEventArray};
use bytes::BytesMut;
use std::fmt::Display;
use tokio::io::unix::AsyncFd;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Records pulled from a perf buffer per wakeup.
const PUMP_BATCH: usize = 16;

/// Opens one perf buffer per CPU and spawns a task that moves its samples
/// into the matching ring producer. `cpus[i]` feeds `producers[i]`.
pub fn spawn_pumps(
    events: &mut PerfEventArray<MapData>,
    cpus: &[u32],
    producers: Vec<RingProducer>,
    page_count: usize,
) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(cpus.len());
    for (&cpu_id, mut producer) in cpus.iter().zip(producers) {
        let perf_buf = events.open(cpu_id, Some(page_count))?;
        let mut async_fd = AsyncFd::new(perf_buf)?;

        let handle = tokio::spawn(async move {
            debug!("[Pump] Perf buffer pump for CPU {} started.", cpu_id);
            let mut bufs = (0..PUMP_BATCH)
                .map(|_| BytesMut::with_capacity(64))
                .collect::<Vec<_>>();

            loop {
                let mut guard = tokio::select! {
                    _ = producer.closed() => break,
                    ready = async_fd.readable_mut() => match ready {
                        Ok(guard) => guard,
                        Err(e) => {
                            warn!(cpu = cpu_id, error = %e, "[Pump] Perf buffer poll failed, stopping.");
                            break;
                        }
                    },
                };

                // 先清理可读状态再读空缓冲区，之后到达的样本会触发新的唤醒
                guard.clear_ready();
                let perf_buf = guard.get_inner_mut();
                drain_batches(cpu_id, &mut producer, &mut bufs, |bufs| {
                    perf_buf
                        .read_events(bufs)
                        .map(|events| (events.read, events.lost))
                });
            }
            debug!("[Pump] Perf buffer pump for CPU {} shutting down.", cpu_id);
        });
        handles.push(handle);
    }

    info!("[Pump] {} perf buffer pumps dispatched.", handles.len());
    Ok(handles)
}

/// Reads batches until one comes back short, pushing every sample into the
/// ring and counting overruns. `read` fills `bufs` and returns
/// `(samples read, samples lost)`.
fn drain_batches<F, E>(
    cpu_id: u32,
    producer: &mut RingProducer,
    bufs: &mut [BytesMut],
    mut read: F,
) where
    F: FnMut(&mut [BytesMut]) -> Result<(usize, usize), E>,
    E: Display,
{
    loop {
        match read(bufs) {
            Ok((count, lost)) => {
                if lost > 0 {
                    debug!(cpu = cpu_id, lost, "[Pump] Perf buffer overrun.");
                    producer.record_lost(lost as u64);
                }
                for buf in bufs.iter().take(count) {
                    if !producer.push(buf) {
                        debug!(cpu = cpu_id, "[Pump] Ring full, record dropped.");
                    }
                }
                if count < bufs.len() {
                    break;
                }
            }
            Err(e) => {
                warn!(cpu = cpu_id, error = %e, "[Pump] Perf buffer read error, continuing.");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::bounded;
    use std::collections::VecDeque;

    fn batch(bufs: &mut [BytesMut], records: &[&[u8]]) -> usize {
        for (buf, record) in bufs.iter_mut().zip(records) {
            buf.clear();
            buf.extend_from_slice(record);
        }
        records.len()
    }

    #[test]
    fn overruns_are_counted_and_full_batches_reread() {
        let (mut producers, mut reader, closer) = bounded(1, 8).unwrap();
        let mut bufs = vec![BytesMut::new(); 2];
        let mut script: VecDeque<(Vec<&[u8]>, usize)> = VecDeque::from([
            (vec![b"a".as_slice(), b"b".as_slice()], 5),
            (vec![b"c".as_slice()], 1),
            (vec![b"never".as_slice()], 0),
        ]);

        drain_batches(0, &mut producers[0], &mut bufs, |bufs| {
            let (records, lost) = script.pop_front().unwrap();
            Ok::<_, String>((batch(bufs, &records), lost))
        });

        // the short second batch ends the drain
        assert_eq!(script.len(), 1);
        assert_eq!(closer.lost(), 6);
        assert_eq!(closer.dropped(), 0);
        let drained: Vec<Vec<u8>> = std::iter::from_fn(|| reader.try_read())
            .map(|record| record.to_vec())
            .collect();
        assert_eq!(drained, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn read_error_ends_the_drain() {
        let (mut producers, mut reader, closer) = bounded(1, 8).unwrap();
        let mut bufs = vec![BytesMut::new(); 2];
        let mut calls = 0;

        drain_batches(3, &mut producers[0], &mut bufs, |_| {
            calls += 1;
            Err::<(usize, usize), _>("mmap gone")
        });

        assert_eq!(calls, 1);
        assert_eq!(closer.lost(), 0);
        assert!(reader.try_read().is_none());
    }

    #[test]
    fn full_ring_counts_drops_not_losses() {
        let (mut producers, _reader, closer) = bounded(1, 1).unwrap();
        let mut bufs = vec![BytesMut::new(); 4];

        drain_batches(0, &mut producers[0], &mut bufs, |bufs| {
            let records = [b"x".as_slice(), b"y".as_slice(), b"z".as_slice()];
            Ok::<_, String>((batch(bufs, &records), 0))
        });

        assert_eq!(closer.dropped(), 2);
        assert_eq!(closer.lost(), 0);
    }
}
