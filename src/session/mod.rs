//! Sessions and their subscribers
//!
//! A session is one named debug stream: a single logical writer, any number
//! of viewers, and a history kept in memory and on disk.
//!
//! ```text
//!   producer ──► Session::publish ──► EventFramer ──┬──► PersistentLog (.sse)
//!                                                   ├──► CircularBuffer
//!                                                   └──► SubscriberRegistry
//!                                                          │ try_send
//!                                                          ▼
//!                                               SubscriberStream (per viewer)
//! ```

pub mod clients;
pub mod hub;
pub mod state;
pub mod stream;
pub mod subscriber;

pub use clients::SubscriberRegistry;
pub use hub::{PublishReceipt, Session};
pub use state::{ClientId, SessionId, SessionStatus};
pub use stream::{SubscriberStream, CACHE_CONTROL, CONTENT_TYPE, SESSION_HEADER};
pub use subscriber::Subscriber;
