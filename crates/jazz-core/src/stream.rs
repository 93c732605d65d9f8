//! Event sources and sinks, and the binary song stream

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{JazzError, Result};
use crate::event::{status, Clock};

/// One framed event as it travels through a source or sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub clock: Clock,
    pub status: u8,
    pub channel: Option<u8>,
    pub payload: Vec<u8>,
}

/// Receives events in clock order
pub trait EventSink {
    fn write_frame(&mut self, clock: Clock, status: u8, channel: Option<u8>, payload: &[u8]) -> Result<()>;
}

/// Produces events in stored order; `None` at a clean end of input
pub trait EventSource {
    fn read_frame(&mut self) -> Result<Option<Frame>>;
}

impl EventSink for Vec<Frame> {
    fn write_frame(&mut self, clock: Clock, status: u8, channel: Option<u8>, payload: &[u8]) -> Result<()> {
        self.push(Frame {
            clock,
            status,
            channel,
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

impl EventSource for std::vec::IntoIter<Frame> {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.next())
    }
}

/// Song-level header of the binary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SongHeader {
    pub ticks_per_quarter: u16,
    pub max_quarters: u32,
    pub track_count: u16,
}

const MAGIC: &[u8; 4] = b"JZSF";
const VERSION: u8 = 1;

fn eof_to_jazz(err: io::Error) -> JazzError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        JazzError::UnexpectedEof
    } else {
        JazzError::Io(err)
    }
}

/// Writes framed events: clock, status, channel (channel events only),
/// payload length, payload
pub struct FrameWriter<W: Write> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_header(&mut self, header: &SongHeader) -> Result<()> {
        self.inner.write_all(MAGIC)?;
        self.inner.write_u8(VERSION)?;
        self.inner.write_u16::<BigEndian>(header.ticks_per_quarter)?;
        self.inner.write_u32::<BigEndian>(header.max_quarters)?;
        self.inner.write_u16::<BigEndian>(header.track_count)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> EventSink for FrameWriter<W> {
    fn write_frame(&mut self, clock: Clock, status: u8, channel: Option<u8>, payload: &[u8]) -> Result<()> {
        self.inner.write_i32::<BigEndian>(clock)?;
        self.inner.write_u8(status)?;
        if status::is_channel(status) {
            self.inner.write_u8(channel.unwrap_or(0))?;
        }
        self.inner.write_u32::<BigEndian>(payload.len() as u32)?;
        self.inner.write_all(payload)?;
        Ok(())
    }
}

pub struct FrameReader<R: Read> {
    inner: R,
}

impl<R: Read> FrameReader<R> {
    /// Frames larger than this are treated as corrupt input
    const MAX_PAYLOAD: u32 = 1 << 24;

    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn read_header(&mut self) -> Result<SongHeader> {
        let mut magic = [0u8; 4];
        self.inner.read_exact(&mut magic).map_err(eof_to_jazz)?;
        if &magic != MAGIC || self.inner.read_u8().map_err(eof_to_jazz)? != VERSION {
            return Err(JazzError::BadHeader);
        }
        Ok(SongHeader {
            ticks_per_quarter: self.inner.read_u16::<BigEndian>().map_err(eof_to_jazz)?,
            max_quarters: self.inner.read_u32::<BigEndian>().map_err(eof_to_jazz)?,
            track_count: self.inner.read_u16::<BigEndian>().map_err(eof_to_jazz)?,
        })
    }
}

impl<R: Read> EventSource for FrameReader<R> {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let mut first = [0u8; 1];
        if self.inner.read(&mut first)? == 0 {
            return Ok(None);
        }
        let mut rest = [0u8; 3];
        self.inner.read_exact(&mut rest).map_err(eof_to_jazz)?;
        let clock = i32::from_be_bytes([first[0], rest[0], rest[1], rest[2]]);

        let status = self.inner.read_u8().map_err(eof_to_jazz)?;
        let channel = if status::is_channel(status) {
            Some(self.inner.read_u8().map_err(eof_to_jazz)?)
        } else {
            None
        };
        let len = self.inner.read_u32::<BigEndian>().map_err(eof_to_jazz)?;
        if len > Self::MAX_PAYLOAD {
            return Err(JazzError::BadPayload {
                status,
                len: len as usize,
            });
        }
        let mut payload = vec![0u8; len as usize];
        self.inner.read_exact(&mut payload).map_err(eof_to_jazz)?;

        Ok(Some(Frame {
            clock,
            status,
            channel,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_frame(0x0102, status::CONTROL, Some(3), &[7, 100]).unwrap();
        writer.write_frame(5, status::END_OF_TRACK, None, &[]).unwrap();
        let bytes = writer.into_inner();
        assert_eq!(
            bytes,
            vec![0, 0, 1, 2, 0xB0, 3, 0, 0, 0, 2, 7, 100, 0, 0, 0, 5, 0x2F, 0, 0, 0, 0]
        );

        let mut reader = FrameReader::new(bytes.as_slice());
        let control = reader.read_frame().unwrap().unwrap();
        assert_eq!(control.channel, Some(3));
        assert_eq!(control.payload, vec![7, 100]);
        let end = reader.read_frame().unwrap().unwrap();
        assert_eq!(end.status, status::END_OF_TRACK);
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn test_truncated_frame() {
        let bytes = [0u8, 0, 0, 1, 0x90, 0, 0, 0, 0, 7, 60];
        let mut reader = FrameReader::new(&bytes[..]);
        assert!(matches!(reader.read_frame(), Err(JazzError::UnexpectedEof)));
    }

    #[test]
    fn test_header_round_trip() {
        let header = SongHeader {
            ticks_per_quarter: 192,
            max_quarters: 800,
            track_count: 16,
        };
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_header(&header).unwrap();
        let bytes = writer.into_inner();
        assert_eq!(FrameReader::new(bytes.as_slice()).read_header().unwrap(), header);
        assert!(matches!(
            FrameReader::new(&b"MThd\x01"[..]).read_header(),
            Err(JazzError::BadHeader)
        ));
    }
}
