//! Storage reader stage.
//!
//! A background thread owns the open file and the ring's [`Producer`] and keeps the ring topped
//! up in contiguous chunks:
//! - ring full → sleep `reader_backoff` and retry
//! - zero-byte read → mark end-of-stream and exit
//! - session deactivated → exit at the top of the next iteration
//! - ring reset under the reader → exit without touching the new session
//!
//! On exit the file and producer are dropped first, then the running flag is cleared and a
//! [`ReaderExit`] is sent on a completion channel that `stop()` waits on.

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::config::StreamConfig;
use crate::ring::{FillOutcome, Producer};

/// Why the reader loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    EndOfStream,
    Cancelled,
    /// The ring was reset while this reader still held its producer.
    Superseded,
    /// Treated as end-of-stream.
    ReadError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReaderExit {
    pub reason: ExitReason,
    pub bytes_read: u64,
}

/// Handle to a running reader thread.
pub struct ReaderHandle {
    done_rx: Receiver<ReaderExit>,
    running: Arc<AtomicBool>,
    join: thread::JoinHandle<()>,
}

/// Spawn the reader thread for one session.
///
/// `active` is the session flag; clearing it asks the reader to exit.
pub fn spawn<F>(
    file: F,
    producer: Producer,
    active: Arc<AtomicBool>,
    cfg: &StreamConfig,
) -> Result<ReaderHandle>
where
    F: Read + Send + 'static,
{
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let running = Arc::new(AtomicBool::new(true));
    let running_for_thread = running.clone();
    let chunk = cfg.chunk_bytes;
    let backoff = cfg.reader_backoff;

    let join = thread::Builder::new()
        .name("pwm-audio-reader".to_string())
        .spawn(move || {
            let exit = reader_loop(file, producer, &active, chunk, backoff);
            running_for_thread.store(false, Ordering::Release);
            let _ = done_tx.send(exit);
        })
        .context("spawn storage reader thread")?;

    Ok(ReaderHandle {
        done_rx,
        running,
        join,
    })
}

/// Pull chunks until end-of-stream or cancellation. Consumes (and so closes) the file.
fn reader_loop<F: Read>(
    mut file: F,
    mut producer: Producer,
    active: &AtomicBool,
    chunk: usize,
    backoff: Duration,
) -> ReaderExit {
    let mut bytes_read = 0u64;

    let reason = loop {
        if !active.load(Ordering::Acquire) {
            break ExitReason::Cancelled;
        }

        match producer.fill_from(&mut file, chunk) {
            Ok(FillOutcome::Full) => thread::sleep(backoff),
            Ok(FillOutcome::Filled(n)) => {
                bytes_read += n as u64;
                tracing::trace!(bytes = n, total = bytes_read, "reader chunk");
            }
            Ok(FillOutcome::EndOfStream) => {
                producer.close();
                break ExitReason::EndOfStream;
            }
            Ok(FillOutcome::Stale) => {
                tracing::warn!(bytes_read, "ring reset under the storage reader");
                break ExitReason::Superseded;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::warn!("storage read error, ending stream: {e}");
                producer.close();
                break ExitReason::ReadError;
            }
        }
    };

    tracing::debug!(?reason, bytes_read, "reader exiting");
    ReaderExit { reason, bytes_read }
}

impl ReaderHandle {
    /// Cleared by the thread once the file is closed and the producer released.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Block until the reader has exited, waking every `poll` to re-check.
    ///
    /// Returns `None` if the thread died without reporting (panicked).
    pub fn wait(self, poll: Duration) -> Option<ReaderExit> {
        let mut polls = 0u32;
        let exit = loop {
            match self.done_rx.recv_timeout(poll) {
                Ok(exit) => break Some(exit),
                Err(RecvTimeoutError::Timeout) => {
                    polls += 1;
                    if polls % 1000 == 0 {
                        tracing::warn!(polls, "still waiting for storage reader to exit");
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break None,
            }
        };
        if self.join.join().is_err() {
            tracing::warn!("storage reader thread panicked");
        }
        exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::RingBuffer;
    use crate::testing::MemFile;
    use std::time::Instant;

    fn cfg(chunk: usize) -> StreamConfig {
        StreamConfig {
            chunk_bytes: chunk,
            ..StreamConfig::default()
        }
    }

    #[test]
    fn reads_whole_file_and_marks_end() {
        let ring = Arc::new(RingBuffer::new(64));
        let data: Vec<u8> = (0..40).collect();
        let active = Arc::new(AtomicBool::new(true));
        let handle = spawn(
            MemFile::new(data.clone()),
            ring.producer().unwrap(),
            active,
            &cfg(16),
        )
        .unwrap();

        let exit = handle.wait(Duration::from_millis(1)).unwrap();
        assert_eq!(exit.reason, ExitReason::EndOfStream);
        assert_eq!(exit.bytes_read, 40);
        assert!(ring.is_closed());

        let mut out = vec![0u8; 64];
        assert_eq!(ring.read(&mut out), 40);
        assert_eq!(&out[..40], &data[..]);
    }

    #[test]
    fn backs_off_when_full_and_exits_on_cancel() {
        let ring = Arc::new(RingBuffer::new(32));
        let active = Arc::new(AtomicBool::new(true));
        let handle = spawn(
            MemFile::new(vec![7u8; 4096]),
            ring.producer().unwrap(),
            active.clone(),
            &cfg(16),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while ring.available_to_write() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(ring.available_to_read(), 32);
        assert!(handle.is_running());

        active.store(false, Ordering::Release);
        let exit = handle.wait(Duration::from_millis(1)).unwrap();
        assert_eq!(exit.reason, ExitReason::Cancelled);
        assert!(!ring.is_closed());
        assert!(ring.producer().is_some(), "producer released on exit");
    }

    #[test]
    fn read_error_ends_stream() {
        let ring = Arc::new(RingBuffer::new(32));
        let active = Arc::new(AtomicBool::new(true));
        let handle = spawn(
            MemFile::new(vec![1, 2, 3]).failing_after(3),
            ring.producer().unwrap(),
            active,
            &cfg(16),
        )
        .unwrap();

        let exit = handle.wait(Duration::from_millis(1)).unwrap();
        assert_eq!(exit.reason, ExitReason::ReadError);
        assert_eq!(exit.bytes_read, 3);
        assert!(ring.is_closed());
    }

    #[test]
    fn exits_without_writing_after_ring_reset() {
        let ring = Arc::new(RingBuffer::new(32));
        let producer = ring.producer().unwrap();
        ring.reset();

        let active = Arc::new(AtomicBool::new(true));
        let handle = spawn(MemFile::new(vec![5u8; 64]), producer, active, &cfg(16)).unwrap();

        let exit = handle.wait(Duration::from_millis(1)).unwrap();
        assert_eq!(exit.reason, ExitReason::Superseded);
        assert_eq!(exit.bytes_read, 0);
        assert_eq!(ring.available_to_read(), 0);
        assert!(!ring.is_closed());
    }
}
