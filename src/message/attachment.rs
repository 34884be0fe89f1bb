//! Attachment readers
// (c) 2025 Ross Younger

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::{Buf as _, Bytes};

/// A permanent failure reading attachment data
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("attachment read failed: {0}")]
pub struct AttachmentError(pub String);

/// Result of one [`AttachmentReader::read`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus {
    /// This many bytes were written to the front of the buffer
    Data(usize),
    /// No data is available yet, but more may arrive later
    WouldBlock,
    /// The attachment has ended; there will be no more data
    Closed,
    /// The attachment cannot be read
    Error(AttachmentError),
}

/// Source of the bytes of one attachment.
///
/// Readers are polled by the MIME encoder from the connection's I/O context, so they must never
/// block. Return [`ReadStatus::WouldBlock`] when no data is ready; the request is paused and
/// resumed later.
pub trait AttachmentReader: Send {
    /// Copies up to `buf.len()` bytes into `buf`
    fn read(&mut self, buf: &mut [u8]) -> ReadStatus;
}

impl AttachmentReader for Bytes {
    fn read(&mut self, buf: &mut [u8]) -> ReadStatus {
        if self.is_empty() {
            return ReadStatus::Closed;
        }
        let n = buf.len().min(self.len());
        self.copy_to_slice(&mut buf[..n]);
        ReadStatus::Data(n)
    }
}

#[derive(Debug, Default)]
struct PipeState {
    data: VecDeque<u8>,
    closed: bool,
    failed: Option<String>,
}

/// The producing end of an in-memory attachment pipe. See [`pipe`].
#[derive(Debug, Clone)]
pub struct AttachmentWriter {
    shared: Arc<Mutex<PipeState>>,
}

/// The consuming end of an in-memory attachment pipe. See [`pipe`].
#[derive(Debug)]
pub struct PipeReader {
    shared: Arc<Mutex<PipeState>>,
}

/// Creates an in-memory attachment whose data is supplied over time.
///
/// The reader reports [`ReadStatus::WouldBlock`] while the pipe is empty and open, which is how
/// a slow producer (say, a microphone) pauses the request that carries it.
#[must_use]
pub fn pipe() -> (AttachmentWriter, PipeReader) {
    let shared = Arc::new(Mutex::new(PipeState::default()));
    (
        AttachmentWriter {
            shared: shared.clone(),
        },
        PipeReader { shared },
    )
}

impl AttachmentWriter {
    /// Appends data to the pipe. Has no effect once the pipe is closed.
    pub fn write(&self, data: &[u8]) {
        let mut state = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.closed {
            state.data.extend(data);
        }
    }

    /// Marks the end of the attachment. Buffered data is still delivered.
    pub fn close(&self) {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed = true;
    }

    /// Marks the attachment as failed; the reader reports an error on its next call.
    pub fn fail(&self, reason: &str) {
        let mut state = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        state.failed = Some(reason.to_owned());
        state.closed = true;
    }
}

impl AttachmentReader for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> ReadStatus {
        let mut state = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(reason) = &state.failed {
            return ReadStatus::Error(AttachmentError(reason.clone()));
        }
        if state.data.is_empty() {
            return if state.closed {
                ReadStatus::Closed
            } else {
                ReadStatus::WouldBlock
            };
        }
        let n = buf.len().min(state.data.len());
        for (slot, byte) in buf.iter_mut().zip(state.data.drain(..n)) {
            *slot = byte;
        }
        ReadStatus::Data(n)
    }
}
