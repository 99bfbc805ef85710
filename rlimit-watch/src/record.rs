//! Little-endian codec for the fixed-size records the probe emits.

use bytes::{Buf, BufMut, BytesMut};
use rlimit_watch_common::{NprocEvent, EVENT_SIZE, TASK_COMM_LEN};
use std::borrow::Cow;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// 记录长度不足一个完整事件
    TooShort { len: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TooShort { len } => write!(
                f,
                "record too short: got {} bytes, expected at least {}",
                len, EVENT_SIZE
            ),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decodes one raw sample.
///
/// Perf samples are padded to 8-byte alignment by the kernel, so bytes past
/// `EVENT_SIZE` are ignored.
pub fn decode(raw: &[u8]) -> Result<NprocEvent, DecodeError> {
    if raw.len() < EVENT_SIZE {
        return Err(DecodeError::TooShort { len: raw.len() });
    }

    let mut buf = &raw[..EVENT_SIZE];
    let pid = buf.get_u32_le();
    let mut pad = [0u8; 4];
    buf.copy_to_slice(&mut pad);
    let nproc_cur = buf.get_u64_le();
    let nproc_max = buf.get_u64_le();
    let mut comm = [0u8; TASK_COMM_LEN];
    buf.copy_to_slice(&mut comm);

    Ok(NprocEvent {
        pid,
        _pad: pad,
        nproc_cur,
        nproc_max,
        comm,
    })
}

pub fn encode(event: &NprocEvent) -> BytesMut {
    let mut buf = BytesMut::with_capacity(EVENT_SIZE);
    buf.put_u32_le(event.pid);
    buf.put_slice(&event._pad);
    buf.put_u64_le(event.nproc_cur);
    buf.put_u64_le(event.nproc_max);
    buf.put_slice(&event.comm);
    buf
}

/// 进程名截止到第一个null，缓冲区填满时取全部16字节
pub fn comm_str(comm: &[u8; TASK_COMM_LEN]) -> Cow<'_, str> {
    let end = comm.iter().position(|&x| x == 0).unwrap_or(TASK_COMM_LEN);
    String::from_utf8_lossy(&comm[..end])
}

/// The operator-facing line for one event.
pub fn format_event(event: &NprocEvent) -> String {
    format!(
        "MySQL(PID: {}) NPROC limits - current: {}, max: {}",
        event.pid, event.nproc_cur, event.nproc_max
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pid: u32, cur: u64, max: u64, name: &[u8]) -> NprocEvent {
        let mut comm = [0u8; TASK_COMM_LEN];
        comm[..name.len()].copy_from_slice(name);
        NprocEvent {
            pid,
            _pad: [0; 4],
            nproc_cur: cur,
            nproc_max: max,
            comm,
        }
    }

    #[test]
    fn decode_then_encode_reproduces_bytes() {
        let mut mixed = [0u8; EVENT_SIZE];
        for (i, b) in mixed.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(37).wrapping_add(11);
        }
        let mut full_comm = [0u8; EVENT_SIZE];
        full_comm[24..].copy_from_slice(b"0123456789abcdef");

        for raw in [
            mixed,
            [0u8; EVENT_SIZE],
            [0xffu8; EVENT_SIZE],
            [0x80u8; EVENT_SIZE],
            full_comm,
            encode(&sample(u32::MAX, u64::MAX, 0, b"mysqld"))[..]
                .try_into()
                .unwrap(),
        ] {
            let event = decode(&raw).unwrap();
            assert_eq!(&encode(&event)[..], &raw[..], "{:02x?}", raw);
        }
    }

    #[test]
    fn decodes_little_endian_fields() {
        let mut raw = vec![0u8; EVENT_SIZE];
        raw[0..4].copy_from_slice(&4242u32.to_le_bytes());
        raw[8..16].copy_from_slice(&100u64.to_le_bytes());
        raw[16..24].copy_from_slice(&200u64.to_le_bytes());
        raw[24..30].copy_from_slice(b"mysqld");

        let event = decode(&raw).unwrap();
        assert_eq!(event, sample(4242, 100, 200, b"mysqld"));
        assert_eq!(comm_str(&event.comm), "mysqld");
    }

    #[test]
    fn trailing_perf_padding_is_ignored() {
        let event = sample(7, u64::MAX, 0, b"mysqld");
        let mut raw = encode(&event);
        raw.put_u32_le(0);
        assert_eq!(decode(&raw).unwrap(), event);
    }

    #[test]
    fn short_record_is_rejected() {
        let raw = [0u8; EVENT_SIZE - 1];
        assert_eq!(
            decode(&raw),
            Err(DecodeError::TooShort {
                len: EVENT_SIZE - 1
            })
        );
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn full_comm_without_terminator() {
        let event = sample(1, 0, 0, b"0123456789abcdef");
        assert_eq!(comm_str(&event.comm), "0123456789abcdef");
    }

    #[test]
    fn line_contains_pid_and_both_limits() {
        let line = format_event(&sample(31337, 100, 200, b"mysqld"));
        assert_eq!(line, "MySQL(PID: 31337) NPROC limits - current: 100, max: 200");
    }
}
