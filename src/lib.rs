//! Live broadcast hub for debug dumps
//!
//! A producer streams arbitrary bytes into a named session; every viewer of
//! that session receives them live as server-sent events, and viewers who
//! join late first replay the history kept in memory and on disk.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dumphub::{GarbageCollector, HubConfig, SessionTable};
//! use futures_util::StreamExt;
//!
//! # async fn run() -> dumphub::Result<()> {
//! let table = Arc::new(SessionTable::with_config(HubConfig::with_output_dir("dumps")));
//! let _gc = Arc::new(GarbageCollector::new(Arc::clone(&table))).spawn();
//!
//! let session = table.get_or_create("ab12cd").await?;
//! let mut viewer = session.subscribe().await?;
//!
//! session.publish_bytes("hello").await?;
//!
//! while let Some(frame) = viewer.next().await {
//!     print!("{}", String::from_utf8_lossy(&frame));
//! }
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod error;
pub mod registry;
pub mod session;
pub mod sse;
pub mod stats;
pub mod storage;

pub use buffer::{CircularBuffer, Cursor};
pub use error::{Error, ErrorKind, Result};
pub use registry::{GarbageCollector, GcReport, HubConfig, HubEvent, PersistenceMode, SessionTable};
pub use session::{ClientId, PublishReceipt, Session, SessionId, SessionStatus, SubscriberStream};
pub use sse::{EventFramer, SystemEvent};
pub use stats::{HubStats, SessionStats};
