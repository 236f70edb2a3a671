//! Session registry and housekeeping
//!
//! The registry owns every session of the process and the background task
//! that keeps them tidy.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<SessionTable>
//!                     ┌─────────────────────────┐
//!                     │ sessions: HashMap<Id,   │
//!                     │   Arc<Session> {        │
//!                     │     ring, log, framer,  │
//!                     │     subscribers,        │
//!                     │   }                     │
//!                     │ >                       │
//!                     │ events: broadcast::Tx   │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!    [Producer]              [Viewer]             [GarbageCollector]
//!    publish(body)           subscribe()          sweep subscribers,
//!         │                       ▲               reap idle sessions,
//!         └──► frame ─► log ─► ring ─► fan-out    enforce disk quota
//! ```
//!
//! # Zero-Copy Fan-out
//!
//! Each frame is encoded once into `bytes::Bytes`. Every subscriber queue
//! receives a reference-counted clone of the same allocation.

pub mod config;
pub mod events;
pub mod gc;
pub mod store;

pub use config::{HubConfig, PersistenceMode};
pub use events::HubEvent;
pub use gc::{GarbageCollector, GcReport};
pub use store::SessionTable;
