//! ONC-RPC over TCP: record marking, XDR call and reply headers, portmapper unset
//!
//! Only AUTH_NONE is produced. Credentials on incoming calls are skipped.

use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use tracing::{debug, warn};

use crate::error::{RelayError, Result};

/// Program number the relay serves
pub const RELAY_PROGRAM: u32 = 0x2000_4A5A;
pub const RELAY_VERSION: u32 = 1;

pub const PROC_NULL: u32 = 0;
/// Write opaque bytes to the device, reply with the count written
pub const PROC_WRITE_ACK: u32 = 1;
/// Write opaque bytes to the device, no reply
pub const PROC_WRITE_NOACK: u32 = 2;

const RPC_VERSION: u32 = 2;
const MSG_CALL: u32 = 0;
const MSG_REPLY: u32 = 1;
const MSG_ACCEPTED: u32 = 0;
const MSG_DENIED: u32 = 1;
const AUTH_NONE: u32 = 0;
const AUTH_BYTES_MAX: usize = 400;

const LAST_FRAGMENT: u32 = 0x8000_0000;
/// Largest record accepted, summed over fragments
pub const MAX_RECORD: usize = 1 << 20;

const PMAP_PROGRAM: u32 = 100_000;
const PMAP_VERSION: u32 = 2;
const PMAPPROC_UNSET: u32 = 2;
const PMAP_PORT: u16 = 111;

/// Reads XDR items from a decoded record
pub struct XdrReader<'a> {
    data: &'a [u8],
}

impl<'a> XdrReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.data
            .read_u32::<BigEndian>()
            .map_err(|_| RelayError::Rpc("truncated XDR integer".into()))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }

    /// Variable length opaque data, padded to four bytes
    pub fn opaque(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        let padded = len.checked_add(3).map(|n| n & !3);
        let Some(padded) = padded.filter(|&n| n <= self.data.len()) else {
            return Err(RelayError::Rpc(format!("opaque of {len} bytes overruns record")));
        };
        let value = &self.data[..len];
        self.data = &self.data[padded..];
        Ok(value)
    }

    pub fn remaining(&self) -> &'a [u8] {
        self.data
    }
}

/// Appends XDR items to a buffer
#[derive(Default)]
pub struct XdrWriter {
    buf: Vec<u8>,
}

impl XdrWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        // Writing to a Vec cannot fail
        let _ = self.buf.write_u32::<BigEndian>(value);
        self
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.u32(value as u32)
    }

    pub fn opaque(&mut self, data: &[u8]) -> &mut Self {
        self.u32(data.len() as u32);
        self.buf.extend_from_slice(data);
        let pad = (4 - data.len() % 4) % 4;
        self.buf.extend(std::iter::repeat_n(0, pad));
        self
    }

    /// Bytes already in XDR form
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

/// Frame a record as a single last fragment
pub fn encode_record(body: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 4];
    BigEndian::write_u32(&mut out, LAST_FRAGMENT | body.len() as u32);
    out.extend_from_slice(body);
    out
}

/// Read one record whose first header byte has already been consumed
pub fn read_record_after<R: Read + ?Sized>(reader: &mut R, first: u8) -> Result<Vec<u8>> {
    let mut rest = [0u8; 3];
    reader.read_exact(&mut rest)?;
    let mut header = u32::from_be_bytes([first, rest[0], rest[1], rest[2]]);
    let mut record = Vec::new();
    loop {
        let len = (header & !LAST_FRAGMENT) as usize;
        if record.len() + len > MAX_RECORD {
            return Err(RelayError::Rpc(format!("record larger than {MAX_RECORD} bytes")));
        }
        let start = record.len();
        record.resize(start + len, 0);
        reader.read_exact(&mut record[start..])?;
        if header & LAST_FRAGMENT != 0 {
            return Ok(record);
        }
        header = reader.read_u32::<BigEndian>()?;
    }
}

pub fn read_record<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>> {
    let first = reader.read_u8()?;
    read_record_after(reader, first)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallHeader {
    pub xid: u32,
    pub rpc_version: u32,
    pub program: u32,
    pub version: u32,
    pub procedure: u32,
}

/// Parse a call record into its header and argument bytes
pub fn decode_call(record: &[u8]) -> Result<(CallHeader, &[u8])> {
    let mut xdr = XdrReader::new(record);
    let xid = xdr.u32()?;
    let kind = xdr.u32()?;
    if kind != MSG_CALL {
        return Err(RelayError::Rpc(format!("message type {kind} is not a call")));
    }
    let header = CallHeader {
        xid,
        rpc_version: xdr.u32()?,
        program: xdr.u32()?,
        version: xdr.u32()?,
        procedure: xdr.u32()?,
    };
    for _ in 0..2 {
        let _flavor = xdr.u32()?;
        let body = xdr.opaque()?;
        if body.len() > AUTH_BYTES_MAX {
            return Err(RelayError::Rpc("oversized credentials".into()));
        }
    }
    Ok((header, xdr.remaining()))
}

pub fn encode_call(xid: u32, program: u32, version: u32, procedure: u32, args: &[u8]) -> Vec<u8> {
    let mut xdr = XdrWriter::new();
    xdr.u32(xid)
        .u32(MSG_CALL)
        .u32(RPC_VERSION)
        .u32(program)
        .u32(version)
        .u32(procedure)
        .u32(AUTH_NONE)
        .opaque(&[])
        .u32(AUTH_NONE)
        .opaque(&[]);
    let mut body = xdr.finish();
    body.extend_from_slice(args);
    body
}

/// Outcome of a call as carried in the reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    Success(Vec<u8>),
    ProgUnavail,
    ProgMismatch { low: u32, high: u32 },
    ProcUnavail,
    GarbageArgs,
    /// Denied: caller speaks another RPC protocol version
    RpcMismatch { low: u32, high: u32 },
}

impl ReplyBody {
    /// Reply for a call this server cannot route to a procedure, if any
    pub fn reject(header: &CallHeader, program: u32, version: u32) -> Option<Self> {
        if header.rpc_version != RPC_VERSION {
            Some(Self::RpcMismatch {
                low: RPC_VERSION,
                high: RPC_VERSION,
            })
        } else if header.program != program {
            Some(Self::ProgUnavail)
        } else if header.version != version {
            Some(Self::ProgMismatch {
                low: version,
                high: version,
            })
        } else {
            None
        }
    }
}

pub fn encode_reply(xid: u32, body: &ReplyBody) -> Vec<u8> {
    let mut xdr = XdrWriter::new();
    xdr.u32(xid).u32(MSG_REPLY);
    let accepted = |xdr: &mut XdrWriter, stat: u32| {
        xdr.u32(MSG_ACCEPTED).u32(AUTH_NONE).opaque(&[]).u32(stat);
    };
    match body {
        ReplyBody::Success(results) => {
            accepted(&mut xdr, 0);
            xdr.raw(results);
        }
        ReplyBody::ProgUnavail => accepted(&mut xdr, 1),
        ReplyBody::ProgMismatch { low, high } => {
            accepted(&mut xdr, 2);
            xdr.u32(*low).u32(*high);
        }
        ReplyBody::ProcUnavail => accepted(&mut xdr, 3),
        ReplyBody::GarbageArgs => accepted(&mut xdr, 4),
        ReplyBody::RpcMismatch { low, high } => {
            // reject_stat RPC_MISMATCH
            xdr.u32(MSG_DENIED).u32(0).u32(*low).u32(*high);
        }
    }
    xdr.finish()
}

pub fn decode_reply(record: &[u8]) -> Result<(u32, ReplyBody)> {
    let mut xdr = XdrReader::new(record);
    let xid = xdr.u32()?;
    if xdr.u32()? != MSG_REPLY {
        return Err(RelayError::Rpc("expected a reply".into()));
    }
    match xdr.u32()? {
        MSG_ACCEPTED => {}
        MSG_DENIED => {
            let body = match xdr.u32()? {
                0 => ReplyBody::RpcMismatch {
                    low: xdr.u32()?,
                    high: xdr.u32()?,
                },
                stat => return Err(RelayError::Rpc(format!("call denied, auth status {stat}"))),
            };
            return Ok((xid, body));
        }
        stat => return Err(RelayError::Rpc(format!("bad reply status {stat}"))),
    }
    let _verifier_flavor = xdr.u32()?;
    xdr.opaque()?;
    let body = match xdr.u32()? {
        0 => ReplyBody::Success(xdr.remaining().to_vec()),
        1 => ReplyBody::ProgUnavail,
        2 => ReplyBody::ProgMismatch {
            low: xdr.u32()?,
            high: xdr.u32()?,
        },
        3 => ReplyBody::ProcUnavail,
        4 => ReplyBody::GarbageArgs,
        stat => return Err(RelayError::Rpc(format!("bad accept status {stat}"))),
    };
    Ok((xid, body))
}

/// Ask the local portmapper to drop any registration of `(program, version)`.
/// Returns whether a mapping was removed.
pub fn unset_portmap(program: u32, version: u32) -> Result<bool> {
    let addr = SocketAddr::from(([127, 0, 0, 1], PMAP_PORT));
    let timeout = Duration::from_secs(2);
    let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;

    // mapping: prog, vers, prot, port (prot and port ignored by UNSET)
    let args = XdrWriter::new().u32(program).u32(version).u32(0).u32(0).finish();
    let call = encode_call(1, PMAP_PROGRAM, PMAP_VERSION, PMAPPROC_UNSET, &args);
    crate::wire::write_all_retry(&mut stream, &encode_record(&call))?;

    let record = read_record(&mut stream)?;
    match decode_reply(&record)? {
        (_, ReplyBody::Success(results)) => {
            let removed = XdrReader::new(&results).u32()? != 0;
            debug!(program, version, removed, "Portmapper unset");
            Ok(removed)
        }
        (_, other) => {
            warn!(?other, "Portmapper refused unset");
            Err(RelayError::Rpc(format!("portmapper replied {other:?}")))
        }
    }
}
