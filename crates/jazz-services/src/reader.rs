//! Device reader: waits on the MIDI device and the doorbell pipe

use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};

use tracing::{debug, info, trace};

use crate::classifier::{InputClassifier, RecordBuffer, Routed};
use crate::error::{RelayError, Result};
use crate::wire::SharedWriter;

const READ_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ready {
    Device,
    Control,
}

/// Block until the device or the control pipe is readable, device first
fn wait_readable(device: RawFd, control: RawFd) -> io::Result<Vec<Ready>> {
    let mut fds = [
        libc::pollfd {
            fd: device,
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: control,
            events: libc::POLLIN,
            revents: 0,
        },
    ];
    loop {
        // SAFETY: `fds` is a valid array of two pollfd for the whole call
        let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        let readable = libc::POLLIN | libc::POLLHUP | libc::POLLERR;
        let mut ready = Vec::with_capacity(2);
        if fds[0].revents & readable != 0 {
            ready.push(Ready::Device);
        }
        if fds[1].revents & readable != 0 {
            ready.push(Ready::Control);
        }
        if !ready.is_empty() {
            return Ok(ready);
        }
    }
}

fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Reader half of the relay. Forwards realtime input at once and answers
/// each doorbell byte on the control pipe with the buffered input.
pub struct InputReader<D, C, W> {
    device: D,
    control: C,
    sink: SharedWriter<W>,
    classifier: InputClassifier,
    buffer: RecordBuffer,
}

impl<D, C, W> InputReader<D, C, W>
where
    D: Read + AsRawFd,
    C: Read + AsRawFd,
    W: Write,
{
    pub fn new(device: D, control: C, sink: SharedWriter<W>) -> Self {
        Self {
            device,
            control,
            sink,
            classifier: InputClassifier::new(),
            buffer: RecordBuffer::new(),
        }
    }

    /// Serve until the control pipe closes. Device EOF and write failures
    /// are errors.
    pub fn run(mut self) -> Result<()> {
        let mut buf = [0u8; READ_SIZE];
        loop {
            let ready = wait_readable(self.device.as_raw_fd(), self.control.as_raw_fd())?;
            for source in ready {
                match source {
                    Ready::Device => {
                        let n = read_some(&mut self.device, &mut buf)?;
                        if n == 0 {
                            return Err(RelayError::Disconnected);
                        }
                        self.handle_input(&buf[..n])?;
                    }
                    Ready::Control => {
                        let n = read_some(&mut self.control, &mut buf[..1])?;
                        if n == 0 {
                            info!("Control pipe closed, reader stopping");
                            return Ok(());
                        }
                        self.flush()?;
                    }
                }
            }
        }
    }

    /// Route one read's worth of device bytes
    pub fn handle_input(&mut self, bytes: &[u8]) -> Result<()> {
        trace!(len = bytes.len(), "Device input");
        for &byte in bytes {
            match self.classifier.classify(byte) {
                Routed::Record(b) => self.buffer.push(b),
                Routed::Forward(message) => self.sink.send(&[message.as_slice()])?,
                Routed::Nothing => {}
            }
        }
        Ok(())
    }

    /// Send `[0x7E][length][buffer]` and start a new buffer
    pub fn flush(&mut self) -> Result<()> {
        let header = self.buffer.frame_header();
        let mut pieces: Vec<&[u8]> = vec![header.as_slice()];
        pieces.extend(self.buffer.chunks());
        self.sink.send(&pieces)?;
        debug!(len = self.buffer.len(), "Flushed record buffer");
        self.buffer.reset();
        Ok(())
    }

    pub fn buffered(&self) -> &[u8] {
        self.buffer.as_slice()
    }
}
