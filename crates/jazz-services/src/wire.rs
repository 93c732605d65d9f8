//! Blocking write helpers shared by both relay threads

use std::io::{self, ErrorKind, Write};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::trace;

use crate::error::{RelayError, Result};

/// Give up on a descriptor after this many short or interrupted writes
pub const MAX_WRITE_ATTEMPTS: u32 = 100_000;

/// Write all of `data`, retrying partial, interrupted and would-block writes
pub fn write_all_retry<W: Write + ?Sized>(writer: &mut W, mut data: &[u8]) -> Result<()> {
    let mut attempts = 0;
    while !data.is_empty() {
        if attempts == MAX_WRITE_ATTEMPTS {
            return Err(RelayError::WriteExhausted(attempts));
        }
        attempts += 1;
        match writer.write(data) {
            Ok(0) => continue,
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::yield_now(),
            Err(e) => return Err(e.into()),
        }
    }
    if attempts > 1 {
        trace!(attempts, "Write needed retries");
    }
    Ok(())
}

/// Transport writer shared by the dispatcher and reader threads.
/// Each call writes one whole frame under the lock.
pub struct SharedWriter<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for SharedWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: Write> SharedWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write the pieces back to back without letting the other thread in between
    pub fn send(&self, pieces: &[&[u8]]) -> Result<()> {
        let mut writer = self
            .inner
            .lock()
            .map_err(|_| RelayError::Io(io::Error::other("transport writer poisoned")))?;
        for piece in pieces {
            write_all_retry(&mut *writer, piece)?;
        }
        writer.flush()?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn with<T>(&self, f: impl FnOnce(&W) -> T) -> T {
        let writer = self.inner.lock().unwrap();
        f(&writer)
    }
}
