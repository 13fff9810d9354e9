//! Buffered audio writer: a bounded, timeout-aware sink that decouples
//! "audio chunk arrived" from "audio chunk durably written", so a slow
//! disk never stalls the network receive path.
//!
//! The writer owns the output file exclusively for the session's
//! lifetime. Chunks are appended and flushed as they arrive because
//! playback may start reading the file before synthesis completes.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Handle to the writer task spawned for one synthesis session.
pub struct AudioFileWriter {
    handle: tokio::task::JoinHandle<()>,
    finished: Arc<AtomicBool>,
    clean: Arc<AtomicBool>,
}

impl AudioFileWriter {
    /// Spawns the writer bound to `path`.
    ///
    /// `outbox` delivers audio chunks in receipt order; `None` is the
    /// end-of-stream sentinel. `session_closed` lets the writer stop on
    /// repeated empty timeouts once the owning session has closed.
    pub(crate) fn spawn(
        path: PathBuf,
        outbox: mpsc::UnboundedReceiver<Option<Bytes>>,
        session_closed: Arc<AtomicBool>,
        recv_timeout: Duration,
    ) -> Self {
        let finished = Arc::new(AtomicBool::new(false));
        let clean = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(write_loop(
            path,
            outbox,
            session_closed,
            recv_timeout,
            finished.clone(),
            clean.clone(),
        ));
        Self {
            handle,
            finished,
            clean,
        }
    }

    /// Whether the writer reached its terminal state.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Whether every chunk made it to the file without an I/O error.
    pub fn is_clean(&self) -> bool {
        self.clean.load(Ordering::Acquire)
    }

    /// Waits up to `wait` for the writer to stop; returns whether it
    /// finished cleanly. A writer that never stops is unclean.
    pub(crate) async fn join(mut self, wait: Duration) -> bool {
        if timeout(wait, &mut self.handle).await.is_err() {
            warn!("audio writer did not stop within {wait:?}");
            self.handle.abort();
        }
        self.is_finished() && self.is_clean()
    }
}

async fn write_loop(
    path: PathBuf,
    mut outbox: mpsc::UnboundedReceiver<Option<Bytes>>,
    session_closed: Arc<AtomicBool>,
    recv_timeout: Duration,
    finished: Arc<AtomicBool>,
    clean: Arc<AtomicBool>,
) {
    // Start from a clean slate: playback watchers key off the file size.
    if let Err(e) = tokio::fs::remove_file(&path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "could not remove stale audio file");
    }

    let mut file = match OpenOptions::new().append(true).create(true).open(&path).await {
        Ok(file) => file,
        Err(e) => {
            error!(path = %path.display(), error = %e, "could not open audio file");
            finished.store(true, Ordering::Release);
            return;
        }
    };

    let mut written: u64 = 0;
    let mut wrote_clean = true;

    loop {
        match timeout(recv_timeout, outbox.recv()).await {
            Ok(Some(Some(chunk))) => {
                if let Err(e) = write_chunk(&mut file, &chunk).await {
                    error!(path = %path.display(), error = %e, "audio write failed");
                    wrote_clean = false;
                    break;
                }
                written += chunk.len() as u64;
            }
            Ok(Some(None)) => {
                debug!("audio writer received end-of-stream");
                break;
            }
            Ok(None) => {
                // Every sender dropped without a sentinel; nothing more
                // can arrive.
                debug!("audio outbox closed");
                break;
            }
            Err(_) => {
                if session_closed.load(Ordering::Acquire) && outbox.is_empty() {
                    debug!("audio writer stopping: session closed and outbox drained");
                    break;
                }
            }
        }
    }

    if let Err(e) = file.flush().await {
        error!(path = %path.display(), error = %e, "final audio flush failed");
        wrote_clean = false;
    }

    info!(path = %path.display(), bytes = written, clean = wrote_clean, "audio writer stopped");
    clean.store(wrote_clean, Ordering::Release);
    finished.store(true, Ordering::Release);
}

async fn write_chunk(file: &mut tokio::fs::File, chunk: &[u8]) -> std::io::Result<()> {
    file.write_all(chunk).await?;
    // Flush immediately: durability over batching, the player may already
    // be reading.
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbox() -> (
        mpsc::UnboundedSender<Option<Bytes>>,
        mpsc::UnboundedReceiver<Option<Bytes>>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn test_writer_concatenates_chunks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reply.raw");
        let (tx, rx) = outbox();
        let closed = Arc::new(AtomicBool::new(false));

        let writer = AudioFileWriter::spawn(path.clone(), rx, closed, Duration::from_secs(1));

        let chunks: Vec<Vec<u8>> = vec![vec![1, 2, 3], vec![4], vec![5, 6]];
        for chunk in &chunks {
            tx.send(Some(Bytes::from(chunk.clone()))).unwrap();
        }
        tx.send(None).unwrap();

        assert!(writer.join(Duration::from_secs(2)).await);

        let contents = std::fs::read(&path).unwrap();
        let expected: Vec<u8> = chunks.into_iter().flatten().collect();
        assert_eq!(contents, expected);
    }

    #[tokio::test]
    async fn test_writer_removes_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reply.raw");
        std::fs::write(&path, b"stale bytes from a previous session").unwrap();

        let (tx, rx) = outbox();
        let closed = Arc::new(AtomicBool::new(false));
        let writer = AudioFileWriter::spawn(path.clone(), rx, closed, Duration::from_secs(1));

        tx.send(Some(Bytes::from_static(b"fresh"))).unwrap();
        tx.send(None).unwrap();

        assert!(writer.join(Duration::from_secs(2)).await);
        assert_eq!(std::fs::read(&path).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_writer_stops_on_closed_session_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reply.raw");
        let (tx, rx) = outbox();
        let closed = Arc::new(AtomicBool::new(false));

        let writer =
            AudioFileWriter::spawn(path.clone(), rx, closed.clone(), Duration::from_millis(50));

        tx.send(Some(Bytes::from_static(b"abc"))).unwrap();
        // No sentinel: simulate a session that closed without one.
        closed.store(true, Ordering::Release);

        assert!(writer.join(Duration::from_secs(2)).await);
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
        // The sender side stays usable; nothing panicked.
        drop(tx);
    }

    #[tokio::test]
    async fn test_writer_unclean_when_file_cannot_open() {
        let dir = tempfile::tempdir().unwrap();
        // A directory at the target path makes open fail.
        let path = dir.path().join("not-a-file");
        std::fs::create_dir(&path).unwrap();

        let (tx, rx) = outbox();
        let closed = Arc::new(AtomicBool::new(true));
        let writer = AudioFileWriter::spawn(path, rx, closed, Duration::from_millis(50));
        drop(tx);

        assert!(!writer.join(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_writer_terminal_flag_observable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reply.raw");
        let (tx, rx) = outbox();
        let closed = Arc::new(AtomicBool::new(false));
        let writer = AudioFileWriter::spawn(path, rx, closed, Duration::from_secs(1));

        assert!(!writer.is_finished());
        tx.send(None).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(writer.is_finished());
        assert!(writer.is_clean());
    }
}
