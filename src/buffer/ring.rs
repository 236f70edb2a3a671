//! Fixed-capacity byte ring for late-joiner replay
//!
//! The ring keeps the most recent `capacity` bytes written to a session.
//! Older bytes are overwritten in place. Readers hold a [`Cursor`]
//! (position + wrap generation) recorded at some earlier point and ask for
//! everything written since.
//!
//! ```text
//!              write_pos
//!                  │
//!   ┌──────────────▼───────────────────────┐
//!   │ newest bytes │ oldest retained bytes │   wrap_count = 3
//!   └──────────────────────────────────────┘
//! ```
//!
//! A cursor one generation behind is still readable (the ring has wrapped
//! once since it was taken); two or more generations behind means the range
//! is gone and the read fails with [`Error::CursorExpired`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Read position into a [`CircularBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Cursor {
    /// Byte position inside the ring
    pub position: usize,
    /// Number of times the ring had wrapped when the cursor was taken
    pub generation: u64,
}

impl Cursor {
    /// Cursor at the very beginning of the ring's history
    pub const START: Cursor = Cursor {
        position: 0,
        generation: 0,
    };

    /// Create a cursor
    pub fn new(position: usize, generation: u64) -> Self {
        Self {
            position,
            generation,
        }
    }

    /// Logical byte offset (total bytes written before this cursor)
    pub fn offset(&self, capacity: usize) -> u64 {
        self.generation * capacity as u64 + self.position as u64
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.position, self.generation)
    }
}

/// Fixed-size byte ring recording the most recent writes
#[derive(Debug)]
pub struct CircularBuffer {
    data: Box<[u8]>,
    write_pos: usize,
    wrap_count: u64,
}

impl CircularBuffer {
    /// Create a ring holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            write_pos: 0,
            wrap_count: 0,
        }
    }

    /// Ring capacity in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Append a chunk, overwriting the oldest bytes when the ring is full.
    ///
    /// A chunk larger than the whole ring is rejected and nothing is written.
    pub fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let capacity = self.capacity();
        if chunk.len() > capacity {
            return Err(Error::ChunkTooLarge {
                len: chunk.len(),
                capacity,
            });
        }
        if chunk.is_empty() {
            return Ok(());
        }

        let end = self.write_pos + chunk.len();
        if end < capacity {
            self.data[self.write_pos..end].copy_from_slice(chunk);
            self.write_pos = end;
        } else {
            // Crosses (or lands exactly on) the end: head then wrapped tail
            let head = capacity - self.write_pos;
            self.data[self.write_pos..].copy_from_slice(&chunk[..head]);
            let tail = chunk.len() - head;
            self.data[..tail].copy_from_slice(&chunk[head..]);
            self.write_pos = tail;
            self.wrap_count += 1;
        }

        Ok(())
    }

    /// Cursor pointing just past the most recent byte
    pub fn current_cursor(&self) -> Cursor {
        Cursor::new(self.write_pos, self.wrap_count)
    }

    /// Total bytes ever written
    pub fn total_written(&self) -> u64 {
        self.current_cursor().offset(self.capacity())
    }

    /// Number of bytes currently retained
    pub fn len(&self) -> usize {
        self.total_written().min(self.capacity() as u64) as usize
    }

    /// Whether nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.write_pos == 0 && self.wrap_count == 0
    }

    /// Whether the ring has overwritten any data
    pub fn has_wrapped(&self) -> bool {
        self.total_written() > self.capacity() as u64
    }

    /// Logical offset of the oldest byte still retained
    pub fn oldest_offset(&self) -> u64 {
        self.total_written().saturating_sub(self.capacity() as u64)
    }

    /// Cursor for a logical byte offset
    pub fn cursor_at(&self, offset: u64) -> Cursor {
        let capacity = self.capacity() as u64;
        if capacity == 0 {
            return Cursor::START;
        }
        Cursor::new((offset % capacity) as usize, offset / capacity)
    }

    /// Whether every byte after `cursor` is still retained
    pub fn is_intact(&self, cursor: Cursor) -> bool {
        let offset = cursor.offset(self.capacity());
        offset >= self.oldest_offset() && offset <= self.total_written()
    }

    /// Read everything written since `cursor`, in chronological order.
    ///
    /// Returns an empty buffer when the cursor is current. If the ring has
    /// wrapped once past the cursor and overwritten part of its range, the
    /// most recent `capacity` bytes are returned instead.
    pub fn read_since(&self, cursor: Cursor) -> Result<Bytes> {
        let expired = || Error::CursorExpired {
            cursor,
            current: self.current_cursor(),
        };

        let lag = self
            .wrap_count
            .checked_sub(cursor.generation)
            .ok_or_else(expired)?;

        match lag {
            0 => {
                if cursor.position > self.write_pos {
                    return Err(expired());
                }
                Ok(Bytes::copy_from_slice(
                    &self.data[cursor.position..self.write_pos],
                ))
            }
            1 => {
                let start = if cursor.position >= self.write_pos {
                    cursor.position
                } else {
                    // Partially overwritten: everything retained
                    self.write_pos
                };
                let mut out = BytesMut::with_capacity(self.capacity() - start + self.write_pos);
                out.put_slice(&self.data[start..]);
                out.put_slice(&self.data[..self.write_pos]);
                Ok(out.freeze())
            }
            _ => Err(expired()),
        }
    }

    /// Get ring utilization as a percentage
    pub fn utilization(&self) -> f32 {
        if self.capacity() > 0 {
            (self.len() as f32 / self.capacity() as f32) * 100.0
        } else {
            0.0
        }
    }

    /// Drop all retained bytes and reset cursors
    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.wrap_count = 0;
    }
}
