//! Server-sent-event wire framing
//!
//! Raw producer chunks are wrapped into numbered `data:` frames exactly once,
//! at publish time. The resulting bytes are what the ring, the log file and
//! every subscriber see, so replay from any source is byte-identical to the
//! live stream.

pub mod encoder;
pub mod event;

pub use encoder::{scan_last_id, EventFramer, EVENT_META, EVENT_SYSTEM, FRAME_OVERHEAD};
pub use event::{SessionMeta, SystemEvent, CLIENT_CLOSED, CLIENT_CONNECTED, STREAM_CLOSED};
