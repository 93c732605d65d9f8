//! RPC dispatcher: sole reader of the client connection

use std::io::{ErrorKind, Read, Write};

use byteorder::ReadBytesExt;
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};
use crate::rpc::{self, ReplyBody, XdrReader, XdrWriter};
use crate::wire::{write_all_retry, SharedWriter};

/// Serves relay calls from the transport. Bytes with the top bit set open
/// an RPC record; any other byte is a doorbell for the reader thread.
pub struct Dispatcher<S, D, P, W> {
    transport: S,
    device: D,
    doorbell: P,
    sink: SharedWriter<W>,
    program: u32,
    version: u32,
}

impl<S, D, P, W> Dispatcher<S, D, P, W>
where
    S: Read,
    D: Write,
    P: Write,
    W: Write,
{
    pub fn new(transport: S, device: D, doorbell: P, sink: SharedWriter<W>) -> Self {
        Self {
            transport,
            device,
            doorbell,
            sink,
            program: rpc::RELAY_PROGRAM,
            version: rpc::RELAY_VERSION,
        }
    }

    pub fn with_program(mut self, program: u32, version: u32) -> Self {
        self.program = program;
        self.version = version;
        self
    }

    /// Serve until the client goes away. Dropping `self` on return closes
    /// the doorbell pipe, which stops the reader.
    pub fn run(mut self) -> Result<()> {
        loop {
            let first = match self.transport.read_u8() {
                Ok(byte) => byte,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    info!("Client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            // Records must open with their last fragment; the header of a
            // leading non-final fragment starts below 0x80 and reads as a doorbell.
            if first & 0x80 == 0 {
                write_all_retry(&mut self.doorbell, &[first])?;
                continue;
            }
            let record = rpc::read_record_after(&mut self.transport, first)?;
            self.handle_record(&record)?;
        }
    }

    /// Execute one call record, replying unless the procedure is one-way
    pub fn handle_record(&mut self, record: &[u8]) -> Result<()> {
        let (header, args) = match rpc::decode_call(record) {
            Ok(call) => call,
            Err(e) => {
                warn!("Dropping malformed record: {}", e);
                return Ok(());
            }
        };
        let reply = match ReplyBody::reject(&header, self.program, self.version) {
            Some(rejection) => {
                debug!(?header, "Rejecting call");
                Some(rejection)
            }
            None => self.call(header.procedure, args)?,
        };
        if let Some(body) = reply {
            let frame = rpc::encode_record(&rpc::encode_reply(header.xid, &body));
            self.sink.send(&[frame.as_slice()])?;
        }
        Ok(())
    }

    fn call(&mut self, procedure: u32, args: &[u8]) -> Result<Option<ReplyBody>> {
        match procedure {
            rpc::PROC_NULL => Ok(Some(ReplyBody::Success(Vec::new()))),
            rpc::PROC_WRITE_ACK => {
                let Ok(data) = XdrReader::new(args).opaque() else {
                    return Ok(Some(ReplyBody::GarbageArgs));
                };
                self.write_device(data)?;
                let written = XdrWriter::new().i32(data.len() as i32).finish();
                Ok(Some(ReplyBody::Success(written)))
            }
            rpc::PROC_WRITE_NOACK => {
                match XdrReader::new(args).opaque() {
                    Ok(data) => self.write_device(data)?,
                    Err(e) => warn!("Ignoring one-way write: {}", e),
                }
                Ok(None)
            }
            _ => Ok(Some(ReplyBody::ProcUnavail)),
        }
    }

    fn write_device(&mut self, data: &[u8]) -> Result<()> {
        write_all_retry(&mut self.device, data)?;
        self.device.flush().map_err(RelayError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{decode_reply, encode_call, read_record, RELAY_PROGRAM, RELAY_VERSION};

    type TestDispatcher<'a> = Dispatcher<&'a [u8], Vec<u8>, Vec<u8>, Vec<u8>>;

    fn dispatcher(input: &[u8]) -> (TestDispatcher<'_>, SharedWriter<Vec<u8>>) {
        let sink = SharedWriter::new(Vec::new());
        (Dispatcher::new(input, Vec::new(), Vec::new(), sink.clone()), sink)
    }

    fn call(xid: u32, procedure: u32, args: &[u8]) -> Vec<u8> {
        rpc::encode_record(&encode_call(xid, RELAY_PROGRAM, RELAY_VERSION, procedure, args))
    }

    fn replies(sink: &SharedWriter<Vec<u8>>) -> Vec<(u32, ReplyBody)> {
        sink.with(|out| {
            let mut reader = out.as_slice();
            let mut all = Vec::new();
            while !reader.is_empty() {
                let record = read_record(&mut reader).unwrap();
                all.push(decode_reply(&record).unwrap());
            }
            all
        })
    }

    #[test]
    fn test_write_ack_and_noack() {
        let payload = XdrWriter::new().opaque(&[0x90, 0x3C, 0x40]).finish();
        let mut input = call(1, rpc::PROC_WRITE_ACK, &payload);
        input.extend(call(2, rpc::PROC_WRITE_NOACK, &payload));
        input.extend(call(3, rpc::PROC_NULL, &[]));

        let (mut dispatcher, sink) = dispatcher(&input);
        let mut transport = std::mem::take(&mut dispatcher.transport);
        while let Ok(first) = transport.read_u8() {
            let record = rpc::read_record_after(&mut transport, first).unwrap();
            dispatcher.handle_record(&record).unwrap();
        }
        assert_eq!(dispatcher.device, vec![0x90, 0x3C, 0x40, 0x90, 0x3C, 0x40]);
        assert_eq!(
            replies(&sink),
            vec![
                (1, ReplyBody::Success(vec![0, 0, 0, 3])),
                (3, ReplyBody::Success(Vec::new())),
            ]
        );
    }

    #[test]
    fn test_doorbell_goes_to_pipe() {
        let mut input = vec![0x00];
        input.extend(call(9, rpc::PROC_NULL, &[]));
        input.push(0x41);

        let sink = SharedWriter::new(Vec::new());
        let mut doorbell = Vec::new();
        let dispatcher = Dispatcher::new(input.as_slice(), Vec::new(), &mut doorbell, sink.clone());
        dispatcher.run().unwrap();
        assert_eq!(doorbell, vec![0x00, 0x41]);
        assert_eq!(replies(&sink), vec![(9, ReplyBody::Success(Vec::new()))]);
    }

    #[test]
    fn test_large_write_is_one_record() {
        let data = vec![0xF8; 70_000];
        let input = call(4, rpc::PROC_WRITE_ACK, &XdrWriter::new().opaque(&data).finish());
        assert!(input[0] & 0x80 != 0);

        let sink = SharedWriter::new(Vec::new());
        let mut doorbell = Vec::new();
        let dispatcher = Dispatcher::new(input.as_slice(), Vec::new(), &mut doorbell, sink.clone());
        dispatcher.run().unwrap();
        assert!(doorbell.is_empty());
        let written = XdrWriter::new().i32(70_000).finish();
        assert_eq!(replies(&sink), vec![(4, ReplyBody::Success(written))]);
    }

    #[test]
    fn test_rejections() {
        let mut input = rpc::encode_record(&encode_call(1, 77, 1, 0, &[]));
        input.extend(rpc::encode_record(&encode_call(2, RELAY_PROGRAM, 4, 0, &[])));
        input.extend(call(3, 9, &[]));
        input.extend(call(4, rpc::PROC_WRITE_ACK, &[0, 0, 0, 50]));

        let (dispatcher, sink) = dispatcher(&input);
        dispatcher.run().unwrap();
        assert_eq!(
            replies(&sink),
            vec![
                (1, ReplyBody::ProgUnavail),
                (2, ReplyBody::ProgMismatch { low: 1, high: 1 }),
                (3, ReplyBody::ProcUnavail),
                (4, ReplyBody::GarbageArgs),
            ]
        );
    }

    #[test]
    fn test_custom_program() {
        let input = rpc::encode_record(&encode_call(5, 0x2000_0001, 2, 0, &[]));
        let (dispatcher, sink) = dispatcher(&input);
        dispatcher.with_program(0x2000_0001, 2).run().unwrap();
        assert_eq!(replies(&sink), vec![(5, ReplyBody::Success(Vec::new()))]);
    }

    #[test]
    fn test_truncated_record_is_an_error() {
        let mut input = call(1, rpc::PROC_NULL, &[]);
        input.truncate(input.len() - 2);
        let (dispatcher, _) = dispatcher(&input);
        assert!(dispatcher.run().is_err());
    }
}
