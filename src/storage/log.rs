//! Append-only session log
//!
//! Every framed chunk a session commits is appended here exactly once, so
//! the file is the complete wire history of the session. The log is used to
//! hydrate the in-memory ring on startup and to replay history to
//! subscribers whose range the ring no longer holds.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use crate::buffer::CircularBuffer;
use crate::error::Result;
use crate::session::SessionId;
use crate::sse::scan_last_id;

/// File extension of session logs
pub const LOG_EXTENSION: &str = "sse";

/// Chunk size used when streaming a log back out
const READ_CHUNK: usize = 64 * 1024;

/// Result of loading an existing log at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hydration {
    /// Size of the log file when opened
    pub file_len: u64,
    /// Bytes copied into the ring
    pub loaded: u64,
    /// Whether the ring now holds the complete history
    pub fully_in_memory: bool,
    /// Id of the last numbered frame found in the log
    pub last_id: Option<u64>,
}

/// Append-only on-disk copy of a session's framed output
#[derive(Debug)]
pub struct PersistentLog {
    path: PathBuf,
    file: Option<File>,
    size: u64,
}

impl PersistentLog {
    /// Deterministic log path for a session
    pub fn path_for(dir: &Path, id: &SessionId) -> PathBuf {
        dir.join(format!("{}.{}", id, LOG_EXTENSION))
    }

    /// Open (or create) the log at `path` for appending
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = open_append(&path).await?;
        let size = file.metadata().await?.len();

        tracing::debug!(path = %path.display(), size = size, "Log opened");

        Ok(Self {
            path,
            file: Some(file),
            size,
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the log in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the file handle is currently open
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Load existing history.
    ///
    /// A log that fits in `ring` is copied into it whole. A larger log is left
    /// on disk and reported as not fully in memory. In both cases the tail is
    /// scanned (up to `scan_window` bytes) for the last frame id.
    pub async fn hydrate(
        &self,
        ring: Option<&mut CircularBuffer>,
        scan_window: usize,
    ) -> Result<Hydration> {
        let mut hydration = Hydration {
            file_len: self.size,
            fully_in_memory: true,
            ..Default::default()
        };
        if self.size == 0 {
            return Ok(hydration);
        }

        match ring {
            Some(ring) if self.size <= ring.capacity() as u64 => {
                let data = tokio::fs::read(&self.path).await?;
                ring.write(&data)?;
                hydration.loaded = data.len() as u64;
                hydration.last_id = scan_last_id(&data, true);
            }
            _ => {
                hydration.fully_in_memory = false;
                hydration.last_id = self.scan_tail(scan_window).await?;
            }
        }

        tracing::debug!(
            path = %self.path.display(),
            file_len = hydration.file_len,
            loaded = hydration.loaded,
            last_id = ?hydration.last_id,
            "Log hydrated"
        );

        Ok(hydration)
    }

    /// Find the last frame id in the log's tail.
    ///
    /// The window doubles until a frame boundary turns up or the whole file
    /// has been read, so a last frame larger than `window` is still found.
    async fn scan_tail(&self, window: usize) -> Result<Option<u64>> {
        let mut file = File::open(&self.path).await?;
        let mut window = (window as u64).max(1);

        loop {
            let start = self.size.saturating_sub(window);
            file.seek(SeekFrom::Start(start)).await?;

            let mut tail = Vec::with_capacity((self.size - start) as usize);
            file.read_to_end(&mut tail).await?;

            let last_id = scan_last_id(&tail, start == 0);
            if last_id.is_some() || start == 0 {
                return Ok(last_id);
            }

            tracing::debug!(path = %self.path.display(), window, "No frame id in log tail, widening scan");
            window = window.saturating_mul(2);
        }
    }

    /// Append a chunk and flush it before returning.
    ///
    /// Reopens the file if the log was closed.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        if self.file.is_none() {
            let file = open_append(&self.path).await?;
            self.size = file.metadata().await?.len();
            self.file = Some(file);
            tracing::debug!(path = %self.path.display(), "Log reopened");
        }

        if let Some(file) = self.file.as_mut() {
            file.write_all(chunk).await?;
            file.flush().await?;
            self.size += chunk.len() as u64;
        }

        Ok(())
    }

    /// Stream the first `len` bytes of the log from a fresh read handle
    pub fn stream_from_start(&self, len: u64) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        read_prefix(self.path.clone(), len)
    }

    /// Flush and release the file handle. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush().await {
                tracing::warn!(path = %self.path.display(), error = %e, "Log flush on close failed");
            }
            tracing::debug!(path = %self.path.display(), "Log closed");
        }
    }

    /// Close the log and remove its file. The next write starts a fresh file.
    pub async fn truncate(&mut self) -> Result<()> {
        self.close().await;
        remove_if_exists(&self.path).await?;
        self.size = 0;
        Ok(())
    }

    /// Close the log and permanently delete its file
    pub async fn delete(mut self) -> Result<()> {
        self.truncate().await?;
        tracing::info!(path = %self.path.display(), "Log deleted");
        Ok(())
    }
}

async fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    OpenOptions::new().create(true).append(true).open(path).await
}

pub(crate) async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

enum ReadState {
    Pending(PathBuf),
    Reading(File),
    Done,
}

/// Stream up to `len` bytes from the start of `path`.
///
/// Ends early (without error) if the file is shorter than `len`.
pub fn read_prefix(path: PathBuf, len: u64) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    stream::unfold(
        (ReadState::Pending(path), len),
        |(state, remaining)| async move {
            if remaining == 0 {
                return None;
            }

            let mut file = match state {
                ReadState::Pending(path) => match File::open(&path).await {
                    Ok(file) => file,
                    Err(e) => return Some((Err(e), (ReadState::Done, 0))),
                },
                ReadState::Reading(file) => file,
                ReadState::Done => return None,
            };

            let want = remaining.min(READ_CHUNK as u64) as usize;
            let mut buf = vec![0u8; want];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((
                        Ok(Bytes::from(buf)),
                        (ReadState::Reading(file), remaining - n as u64),
                    ))
                }
                Err(e) => Some((Err(e), (ReadState::Done, 0))),
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use tempfile::TempDir;

    use super::*;

    async fn collect(stream: impl Stream<Item = io::Result<Bytes>>) -> Vec<u8> {
        let chunks: Vec<_> = stream.collect().await;
        chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect()
    }

    #[test]
    fn test_path_for() {
        let id = SessionId::new("ab12cd").unwrap();
        let path = PersistentLog::path_for(Path::new("/tmp/dumps"), &id);
        assert_eq!(path, Path::new("/tmp/dumps/ab12cd.sse"));
    }

    #[tokio::test]
    async fn test_write_and_stream_back() {
        let dir = TempDir::new().unwrap();
        let mut log = PersistentLog::open(dir.path().join("s1.sse")).await.unwrap();

        log.write(b"id: 1\ndata: a\n\n").await.unwrap();
        log.write(b"id: 2\ndata: b\n\n").await.unwrap();
        assert_eq!(log.size(), 30);

        let all = collect(log.stream_from_start(log.size())).await;
        assert_eq!(&all[..], b"id: 1\ndata: a\n\nid: 2\ndata: b\n\n");

        let prefix = collect(log.stream_from_start(15)).await;
        assert_eq!(&prefix[..], b"id: 1\ndata: a\n\n");
    }

    #[tokio::test]
    async fn test_hydrate_small_log_into_ring() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s2.sse");
        tokio::fs::write(&path, b"id: 1\ndata: a\n\nid: 2\ndata: b\n\n")
            .await
            .unwrap();

        let log = PersistentLog::open(&path).await.unwrap();
        let mut ring = CircularBuffer::new(1024);
        let hydration = log.hydrate(Some(&mut ring), 4096).await.unwrap();

        assert!(hydration.fully_in_memory);
        assert_eq!(hydration.loaded, 30);
        assert_eq!(hydration.last_id, Some(2));
        assert_eq!(ring.len(), 30);
    }

    #[tokio::test]
    async fn test_hydrate_large_log_stays_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s3.sse");
        let mut content = Vec::new();
        for id in 1..=10 {
            content.extend_from_slice(format!("id: {}\ndata: xxxxxxxx\n\n", id).as_bytes());
        }
        tokio::fs::write(&path, &content).await.unwrap();

        let log = PersistentLog::open(&path).await.unwrap();
        let mut ring = CircularBuffer::new(32);
        let hydration = log.hydrate(Some(&mut ring), 64).await.unwrap();

        assert!(!hydration.fully_in_memory);
        assert_eq!(hydration.loaded, 0);
        assert_eq!(hydration.last_id, Some(10));
        assert!(ring.is_empty());
    }

    #[tokio::test]
    async fn test_hydrate_finds_id_of_frame_larger_than_window() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s7.sse");
        let payload = "x".repeat(60_000);
        let mut content = Vec::new();
        for id in 1..=3 {
            content.extend_from_slice(format!("id: {}\ndata: {}\n\n", id, payload).as_bytes());
        }
        tokio::fs::write(&path, &content).await.unwrap();

        let log = PersistentLog::open(&path).await.unwrap();
        let hydration = log.hydrate(None, 4096).await.unwrap();
        assert!(!hydration.fully_in_memory);
        assert_eq!(hydration.last_id, Some(3));

        // A single oversized frame is found by reading back to the start
        let single = dir.path().join("s8.sse");
        tokio::fs::write(&single, format!("id: 7\ndata: {}\n\n", payload))
            .await
            .unwrap();
        let log = PersistentLog::open(&single).await.unwrap();
        assert_eq!(log.hydrate(None, 100).await.unwrap().last_id, Some(7));
    }

    #[tokio::test]
    async fn test_hydrate_log_without_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s9.sse");
        tokio::fs::write(&path, vec![b'z'; 5000]).await.unwrap();

        let log = PersistentLog::open(&path).await.unwrap();
        assert_eq!(log.hydrate(None, 64).await.unwrap().last_id, None);
    }

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let log = PersistentLog::open(dir.path().join("nested/s4.sse"))
            .await
            .unwrap();

        assert_eq!(log.size(), 0);
        let hydration = log.hydrate(None, 1024).await.unwrap();
        assert!(hydration.fully_in_memory);
        assert_eq!(hydration.last_id, None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_write_reopens() {
        let dir = TempDir::new().unwrap();
        let mut log = PersistentLog::open(dir.path().join("s5.sse")).await.unwrap();
        log.write(b"one").await.unwrap();

        log.close().await;
        log.close().await;
        assert!(!log.is_open());

        log.write(b"two").await.unwrap();
        assert!(log.is_open());
        assert_eq!(log.size(), 6);
        assert_eq!(tokio::fs::read(log.path()).await.unwrap(), b"onetwo");
    }

    #[tokio::test]
    async fn test_delete_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s6.sse");
        let mut log = PersistentLog::open(&path).await.unwrap();
        log.write(b"data").await.unwrap();

        log.delete().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_stream_of_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        let mut stream = Box::pin(read_prefix(dir.path().join("absent.sse"), 10));

        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }
}
