use async_trait::async_trait;
use bytes::Bytes;
use rlimit_watch::channel::{self, EventSource, ReadError};
use rlimit_watch::collector::{run_collector, CollectorStats, Reporter};
use rlimit_watch::record::{encode, format_event};
use rlimit_watch_common::{NprocEvent, EVENT_SIZE};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct CapturingReporter {
    lines: Arc<Mutex<Vec<String>>>,
}

impl Reporter for CapturingReporter {
    fn report(&mut self, event: &NprocEvent) {
        self.lines.lock().unwrap().push(format_event(event));
    }
}

/// Replays a fixed script, then reports closure.
struct ScriptedSource {
    script: VecDeque<Result<Bytes, ReadError>>,
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn read(&mut self) -> Result<Bytes, ReadError> {
        self.script.pop_front().unwrap_or(Err(ReadError::Closed))
    }
}

fn event(pid: u32, cur: u64, max: u64) -> NprocEvent {
    let mut comm = [0u8; 16];
    comm[..6].copy_from_slice(b"mysqld");
    NprocEvent {
        pid,
        _pad: [0; 4],
        nproc_cur: cur,
        nproc_max: max,
        comm,
    }
}

fn raw(event: &NprocEvent) -> Bytes {
    encode(event).freeze()
}

#[tokio::test]
async fn reports_pid_and_both_limits() {
    let reporter = CapturingReporter::default();
    let source = ScriptedSource {
        script: VecDeque::from([Ok(raw(&event(2024, 100, 200)))]),
    };

    let stats = run_collector(source, reporter.clone()).await;

    assert_eq!(stats.decoded, 1);
    let lines = reporter.lines.lock().unwrap();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("2024"));
    assert!(lines[0].contains("current: 100"));
    assert!(lines[0].contains("max: 200"));
}

#[tokio::test]
async fn short_record_is_skipped_and_loop_continues() {
    let reporter = CapturingReporter::default();
    let source = ScriptedSource {
        script: VecDeque::from([
            Ok(Bytes::from_static(&[1, 2, 3])),
            Ok(Bytes::from(vec![0u8; EVENT_SIZE - 1])),
            Ok(raw(&event(7, 1, 2))),
        ]),
    };

    let stats = run_collector(source, reporter.clone()).await;

    assert_eq!(
        stats,
        CollectorStats {
            decoded: 1,
            decode_errors: 2,
            read_errors: 0,
        }
    );
    assert_eq!(reporter.lines.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn transient_read_errors_do_not_stop_the_loop() {
    let reporter = CapturingReporter::default();
    let source = ScriptedSource {
        script: VecDeque::from([
            Err(ReadError::Io(std::io::Error::other("EINTR"))),
            Ok(raw(&event(9, 100, 200))),
            Err(ReadError::Io(std::io::Error::other("EAGAIN"))),
        ]),
    };

    let stats = run_collector(source, reporter.clone()).await;

    assert_eq!(stats.read_errors, 2);
    assert_eq!(stats.decoded, 1);
}

#[tokio::test]
async fn closing_the_channel_ends_a_blocked_collector() {
    let (_producers, reader, closer) = channel::bounded(4, 8).unwrap();
    let reporter = CapturingReporter::default();
    let collector = tokio::spawn(run_collector(reader, reporter.clone()));

    // let the collector park in read()
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!collector.is_finished());

    closer.close();
    let stats = tokio::time::timeout(Duration::from_secs(2), collector)
        .await
        .expect("collector must stop after close")
        .expect("collector task must not panic");

    assert_eq!(stats, CollectorStats::default());
    assert!(reporter.lines.lock().unwrap().is_empty());
}

#[tokio::test]
async fn records_from_ring_reach_the_reporter() {
    let (mut producers, reader, closer) = channel::bounded(2, 8).unwrap();
    let reporter = CapturingReporter::default();
    let collector = tokio::spawn(run_collector(reader, reporter.clone()));

    assert!(producers[0].push(&encode(&event(11, 100, 200))));
    assert!(producers[1].push(&[0xde, 0xad]));
    assert!(producers[1].push(&encode(&event(12, 5, 6))));

    for _ in 0..200 {
        if reporter.lines.lock().unwrap().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    closer.close();
    let stats = collector.await.unwrap();

    assert_eq!(stats.decoded, 2);
    assert_eq!(stats.decode_errors, 1);
    let mut lines = reporter.lines.lock().unwrap().clone();
    lines.sort();
    assert_eq!(
        lines,
        vec![
            "MySQL(PID: 11) NPROC limits - current: 100, max: 200".to_string(),
            "MySQL(PID: 12) NPROC limits - current: 5, max: 6".to_string(),
        ]
    );
}
