//! Bounded capture of sandbox output streams.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 8 * 1024;

/// Byte buffer that keeps the first `limit` bytes and drops the rest.
#[derive(Debug, Clone, Default)]
pub struct CappedBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl CappedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append as much of `chunk` as fits.
    pub fn push(&mut self, chunk: &[u8]) {
        let remaining = self.limit.saturating_sub(self.data.len());
        if chunk.len() > remaining {
            self.truncated = true;
        }
        self.data.extend_from_slice(&chunk[..remaining.min(chunk.len())]);
    }

    pub fn into_parts(self) -> (Vec<u8>, bool) {
        (self.data, self.truncated)
    }

    /// Cap an already collected buffer.
    pub fn capped(bytes: Vec<u8>, limit: usize) -> (Vec<u8>, bool) {
        let mut buffer = Self::new(limit);
        buffer.push(&bytes);
        buffer.into_parts()
    }
}

/// A capped buffer shared between a reader task and its owner.
///
/// The owner can take whatever was read so far even if the reader is aborted.
pub type SharedBuffer = Arc<Mutex<CappedBuffer>>;

pub fn shared_buffer(limit: usize) -> SharedBuffer {
    Arc::new(Mutex::new(CappedBuffer::new(limit)))
}

/// Move the contents out of a shared buffer.
pub fn take_shared(buffer: &SharedBuffer) -> (Vec<u8>, bool) {
    match buffer.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard).into_parts(),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()).into_parts(),
    }
}

/// Drain `reader` to EOF into `buffer`.
///
/// Keeps reading past the cap so the writer never blocks on a full pipe.
pub async fn drain_into<R>(mut reader: R, buffer: SharedBuffer) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        if let Ok(mut guard) = buffer.lock() {
            guard.push(&chunk[..n]);
        }
    }
}
