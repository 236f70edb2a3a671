//! In-memory replay window
//!
//! A fixed-capacity byte ring that records the most recent framed output of
//! a session so late joiners can be caught up without touching disk.

pub mod ring;

pub use ring::{CircularBuffer, Cursor};
