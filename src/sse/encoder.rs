//! Server-sent-event frame encoding
//!
//! Wire layout of one frame:
//!
//! ```text
//! id: <u64>\n          (omitted for control frames)
//! event: <type>\n      (omitted for plain data frames)
//! data: <payload>\n
//! \n
//! ```
//!
//! Payloads are treated as opaque bytes. [`EventFramer::fast_encode`] puts
//! the payload verbatim on a single `data:` line; [`EventFramer::encode`]
//! splits it on `\n` into one `data:` line per line, for text consumers.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Result;

use super::event::{SessionMeta, SystemEvent};

/// Event type tag for control messages
pub const EVENT_SYSTEM: &str = "system";

/// Event type tag for the per-subscriber meta frame
pub const EVENT_META: &str = "meta";

/// Upper bound on framing bytes around a payload without an event type
pub const FRAME_OVERHEAD: usize = 64;

const ID_PREFIX: &[u8] = b"id: ";
const EVENT_PREFIX: &[u8] = b"event: ";
const DATA_PREFIX: &[u8] = b"data: ";
const TERMINATOR: &[u8] = b"\n\n";

/// Frame encoder that assigns monotonically increasing sequence ids
#[derive(Debug, Default)]
pub struct EventFramer {
    last_id: u64,
}

impl EventFramer {
    /// Create a framer whose first frame gets id 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a framer that continues after `last_id`
    pub fn resume_after(last_id: u64) -> Self {
        Self { last_id }
    }

    /// Last sequence id handed out (0 if none)
    pub fn last_id(&self) -> u64 {
        self.last_id
    }

    /// Reserve the next sequence id
    pub fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    /// Frame a payload with the next sequence id on a single data line.
    ///
    /// Allocates exactly once: head, payload and trailer are written into a
    /// buffer sized up front.
    pub fn fast_encode(&mut self, payload: &[u8]) -> (u64, Bytes) {
        let id = self.next_id();
        let mut buf = BytesMut::with_capacity(FRAME_OVERHEAD + payload.len());

        buf.put_slice(ID_PREFIX);
        put_decimal(&mut buf, id);
        buf.put_u8(b'\n');
        buf.put_slice(DATA_PREFIX);
        buf.put_slice(payload);
        buf.put_slice(TERMINATOR);

        (id, buf.freeze())
    }

    /// Frame a payload with the next sequence id and an optional event type
    pub fn encode_next(&mut self, payload: &[u8], event_type: Option<&str>) -> (u64, Bytes) {
        let id = self.next_id();
        (id, Self::encode(Some(id), payload, event_type))
    }

    /// Frame a payload with an explicit (optional) id and event type.
    ///
    /// Each `\n`-separated line of the payload becomes its own `data:` line.
    pub fn encode(id: Option<u64>, payload: &[u8], event_type: Option<&str>) -> Bytes {
        let lines = payload.iter().filter(|&&b| b == b'\n').count() + 1;
        let event_len = event_type.map_or(0, |t| EVENT_PREFIX.len() + t.len() + 1);
        let mut buf = BytesMut::with_capacity(
            ID_PREFIX.len() + 21 + event_len + lines * (DATA_PREFIX.len() + 1) + payload.len() + 1,
        );

        if let Some(id) = id {
            buf.put_slice(ID_PREFIX);
            put_decimal(&mut buf, id);
            buf.put_u8(b'\n');
        }
        if let Some(event_type) = event_type {
            buf.put_slice(EVENT_PREFIX);
            buf.put_slice(event_type.as_bytes());
            buf.put_u8(b'\n');
        }
        for line in payload.split(|&b| b == b'\n') {
            buf.put_slice(DATA_PREFIX);
            buf.put_slice(line);
            buf.put_u8(b'\n');
        }
        buf.put_u8(b'\n');

        buf.freeze()
    }

    /// Frame an out-of-band control message (`event: system`, no id)
    pub fn system_event(event: &SystemEvent) -> Result<Bytes> {
        let body = event.to_json()?;
        Ok(Self::encode(None, &body, Some(EVENT_SYSTEM)))
    }

    /// Frame the synthetic meta message sent first to each new subscriber
    pub fn meta(meta: &SessionMeta) -> Result<Bytes> {
        let body = serde_json::to_vec(meta)?;
        Ok(Self::encode(None, &body, Some(EVENT_META)))
    }
}

fn put_decimal(buf: &mut BytesMut, mut n: u64) {
    let mut digits = [0u8; 20];
    let mut i = digits.len();
    loop {
        i -= 1;
        digits[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    buf.put_slice(&digits[i..]);
}

/// Find the id of the last numbered frame in a slice of framed output.
///
/// `from_frame_start` says whether `tail` begins on a frame boundary (true
/// when it is the whole log); otherwise only ids preceded by a blank line
/// are trusted.
pub fn scan_last_id(tail: &[u8], from_frame_start: bool) -> Option<u64> {
    if tail.len() < ID_PREFIX.len() {
        return None;
    }

    for i in (0..=tail.len() - ID_PREFIX.len()).rev() {
        if &tail[i..i + ID_PREFIX.len()] != ID_PREFIX {
            continue;
        }
        let at_boundary = if i == 0 {
            from_frame_start
        } else {
            i >= 2 && &tail[i - 2..i] == TERMINATOR
        };
        if !at_boundary {
            continue;
        }

        let rest = &tail[i + ID_PREFIX.len()..];
        let end = match rest.iter().position(|&b| b == b'\n') {
            Some(end) if end > 0 => end,
            _ => continue,
        };
        let digits = &rest[..end];
        if !digits.iter().all(u8::is_ascii_digit) {
            continue;
        }
        if let Ok(id) = std::str::from_utf8(digits).unwrap_or("").parse() {
            return Some(id);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ClientId;

    #[test]
    fn test_fast_encode_layout() {
        let mut framer = EventFramer::new();

        let (id, frame) = framer.fast_encode(b"hello");
        assert_eq!(id, 1);
        assert_eq!(&frame[..], b"id: 1\ndata: hello\n\n");

        let (id, frame) = framer.fast_encode(b"world");
        assert_eq!(id, 2);
        assert_eq!(&frame[..], b"id: 2\ndata: world\n\n");
    }

    #[test]
    fn test_fast_encode_keeps_binary_verbatim() {
        let mut framer = EventFramer::resume_after(41);
        let payload = [0u8, 0xff, b'\n', 0x80, b'\r'];

        let (id, frame) = framer.fast_encode(&payload);
        assert_eq!(id, 42);

        let mut expected = b"id: 42\ndata: ".to_vec();
        expected.extend_from_slice(&payload);
        expected.extend_from_slice(b"\n\n");
        assert_eq!(&frame[..], &expected[..]);
    }

    #[test]
    fn test_encode_multiline_with_event_type() {
        let frame = EventFramer::encode(Some(7), b"line one\nline two", Some("log"));
        assert_eq!(
            &frame[..],
            b"id: 7\nevent: log\ndata: line one\ndata: line two\n\n"
        );
    }

    #[test]
    fn test_encode_without_id() {
        let frame = EventFramer::encode(None, b"", None);
        assert_eq!(&frame[..], b"data: \n\n");
    }

    #[test]
    fn test_system_event_frame() {
        let client_id = ClientId::parse("00c0ffee").unwrap();
        let event = SystemEvent::ClientConnected {
            client_id,
            client_count: 2,
        };

        let frame = EventFramer::system_event(&event).unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("event: system\ndata: {"));
        assert!(text.contains(r#""eventName":"client:connected""#));
        assert!(text.contains(r#""clientId":"00c0ffee""#));
        assert!(text.ends_with("}\n\n"));
        assert!(!text.contains("id: "));
    }

    #[test]
    fn test_scan_last_id() {
        let log = b"id: 1\ndata: a\n\nid: 2\ndata: b\n\nid: 3\ndata: c\n\n";
        assert_eq!(scan_last_id(log, true), Some(3));
        assert_eq!(scan_last_id(&log[..21], true), Some(2));
        assert_eq!(scan_last_id(&log[..20], true), Some(1));
        assert_eq!(scan_last_id(b"", true), None);
    }

    #[test]
    fn test_scan_last_id_ignores_mid_frame_match() {
        // Tail starts mid-frame, so the leading "id: 9" is not trusted
        assert_eq!(scan_last_id(b"id: 9\ndata: x\n\n", false), None);
        assert_eq!(scan_last_id(b"ta: id: 5\n\nid: 4\ndata: x\n\n", false), Some(4));
    }
}
