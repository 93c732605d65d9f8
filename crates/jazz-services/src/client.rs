//! Host side of the relay connection

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};

use byteorder::{BigEndian, ReadBytesExt};
use jazz_core::status;
use tracing::debug;

use crate::classifier::FLUSH_MARKER;
use crate::error::{RelayError, Result};
use crate::rpc::{self, ReplyBody, XdrReader, XdrWriter};
use crate::wire::write_all_retry;

/// Any byte below 0x80 rings the doorbell
const DOORBELL: u8 = 0x00;

enum Incoming {
    Reply(Vec<u8>),
    Input(Vec<u8>),
}

/// Client for a relay daemon. Replies, buffered input and forwarded
/// realtime messages share one stream; realtime messages are queued until
/// [`RelayClient::take_realtime`].
pub struct RelayClient {
    stream: TcpStream,
    program: u32,
    version: u32,
    next_xid: u32,
    realtime: Vec<Vec<u8>>,
}

impl RelayClient {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            program: rpc::RELAY_PROGRAM,
            version: rpc::RELAY_VERSION,
            next_xid: 1,
            realtime: Vec::new(),
        })
    }

    pub fn with_program(mut self, program: u32, version: u32) -> Self {
        self.program = program;
        self.version = version;
        self
    }

    pub fn null(&mut self) -> Result<()> {
        self.call(rpc::PROC_NULL, &[]).map(|_| ())
    }

    /// Write to the device and wait for the byte count
    pub fn write_ack(&mut self, data: &[u8]) -> Result<u32> {
        let args = XdrWriter::new().opaque(data).finish();
        let results = self.call(rpc::PROC_WRITE_ACK, &args)?;
        Ok(XdrReader::new(&results).i32()? as u32)
    }

    pub fn write_no_ack(&mut self, data: &[u8]) -> Result<()> {
        let args = XdrWriter::new().opaque(data).finish();
        self.send_call(rpc::PROC_WRITE_NOACK, &args).map(|_| ())
    }

    /// Ring the doorbell and return the input buffered since the last request
    pub fn request_input(&mut self) -> Result<Vec<u8>> {
        write_all_retry(&mut self.stream, &[DOORBELL])?;
        loop {
            if let Incoming::Input(data) = self.receive()? {
                return Ok(data);
            }
            debug!("Ignoring stray reply while waiting for input");
        }
    }

    /// Realtime and song position messages received so far
    pub fn take_realtime(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.realtime)
    }

    fn send_call(&mut self, procedure: u32, args: &[u8]) -> Result<u32> {
        let xid = self.next_xid;
        self.next_xid = self.next_xid.wrapping_add(1);
        let call = rpc::encode_call(xid, self.program, self.version, procedure, args);
        write_all_retry(&mut self.stream, &rpc::encode_record(&call))?;
        Ok(xid)
    }

    fn call(&mut self, procedure: u32, args: &[u8]) -> Result<Vec<u8>> {
        let xid = self.send_call(procedure, args)?;
        loop {
            let Incoming::Reply(record) = self.receive()? else {
                debug!("Ignoring unrequested input while waiting for reply");
                continue;
            };
            match rpc::decode_reply(&record)? {
                (id, _) if id != xid => debug!(id, "Skipping reply to another call"),
                (_, ReplyBody::Success(results)) => return Ok(results),
                (_, other) => return Err(RelayError::Rpc(format!("call rejected: {other:?}"))),
            }
        }
    }

    /// Next reply or input frame, queueing realtime messages on the way
    fn receive(&mut self) -> Result<Incoming> {
        loop {
            let first = match self.stream.read_u8() {
                Ok(byte) => byte,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(RelayError::Disconnected);
                }
                Err(e) => return Err(e.into()),
            };
            match first {
                FLUSH_MARKER => {
                    let len = self.stream.read_u32::<BigEndian>()? as usize;
                    let mut data = vec![0u8; len];
                    self.stream.read_exact(&mut data)?;
                    return Ok(Incoming::Input(data));
                }
                status::SONG_POINTER => {
                    let mut message = vec![first, 0, 0];
                    self.stream.read_exact(&mut message[1..])?;
                    self.realtime.push(message);
                }
                status::START_PLAY..=status::CLOCK_TO_HOST => self.realtime.push(vec![first]),
                0x80 => return Ok(Incoming::Reply(rpc::read_record_after(&mut self.stream, first)?)),
                other => return Err(RelayError::UnexpectedReply(other)),
            }
        }
    }
}
