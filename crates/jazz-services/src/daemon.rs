//! Relay supervisor: wires the device, the client connection and both threads

use std::fs::{File, OpenOptions};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::os::fd::{FromRawFd, OwnedFd};
use std::path::PathBuf;
use std::thread;

use crossbeam_channel::{bounded, Sender};
use tracing::{error, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::{RelayError, Result};
use crate::reader::InputReader;
use crate::rpc;
use crate::wire::SharedWriter;

/// Where the client connection comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Accept one client on this address
    Listen(SocketAddr),
    /// Connected socket on stdin, as started by inetd
    Inherited,
}

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub device: PathBuf,
    pub transport: Transport,
    pub program: u32,
    pub version: u32,
    /// Drop stale portmapper registrations before serving
    pub unregister_stale: bool,
}

impl RelayOptions {
    pub fn new(device: impl Into<PathBuf>, transport: Transport) -> Self {
        Self {
            device: device.into(),
            transport,
            program: rpc::RELAY_PROGRAM,
            version: rpc::RELAY_VERSION,
            unregister_stale: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Dispatcher,
    Reader,
}

fn pipe() -> io::Result<(File, File)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` has room for the two descriptors pipe() writes
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: both descriptors were just created and are owned by nobody else
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    Ok((File::from(read), File::from(write)))
}

fn spawn_role<F>(role: Role, exits: Sender<(Role, Result<()>)>, work: F) -> io::Result<thread::JoinHandle<()>>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    thread::Builder::new()
        .name(format!("relay-{role:?}").to_lowercase())
        .spawn(move || {
            let _ = exits.send((role, work()));
        })
}

/// One relay session over an already connected client
#[derive(Debug, Clone, Copy)]
pub struct RelayService {
    program: u32,
    version: u32,
}

impl Default for RelayService {
    fn default() -> Self {
        Self {
            program: rpc::RELAY_PROGRAM,
            version: rpc::RELAY_VERSION,
        }
    }
}

impl RelayService {
    pub fn new(program: u32, version: u32) -> Self {
        Self { program, version }
    }

    /// Run the dispatcher and reader threads until the client leaves or
    /// either side fails. Returns the first failure.
    pub fn serve(&self, stream: TcpStream, device: File) -> Result<()> {
        let peer = stream.peer_addr().ok();
        info!(?peer, program = self.program, version = self.version, "Relay session started");

        let sink = SharedWriter::new(stream.try_clone()?);
        let transport = stream.try_clone()?;
        let device_input = device.try_clone()?;
        let (control, doorbell) = pipe()?;
        let (exit_tx, exit_rx) = bounded::<(Role, Result<()>)>(2);

        let dispatcher = Dispatcher::new(transport, device, doorbell, sink.clone())
            .with_program(self.program, self.version);
        let dispatcher = spawn_role(Role::Dispatcher, exit_tx.clone(), move || dispatcher.run())?;

        let reader = InputReader::new(device_input, control, sink);
        let reader = match spawn_role(Role::Reader, exit_tx, move || reader.run()) {
            Ok(handle) => handle,
            Err(e) => {
                let _ = stream.shutdown(Shutdown::Both);
                let _ = dispatcher.join();
                return Err(e.into());
            }
        };

        let mut first_error = None;
        for round in 0..2 {
            let Ok((role, outcome)) = exit_rx.recv() else {
                break;
            };
            match outcome {
                Ok(()) => info!(?role, "Relay thread finished"),
                Err(e) => {
                    error!(?role, "Relay thread failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
            if round == 0 {
                // Unblocks the dispatcher; its exit then closes the doorbell pipe
                let _ = stream.shutdown(Shutdown::Both);
            }
        }

        let _ = dispatcher.join();
        let _ = reader.join();
        info!("Relay session ended");
        first_error.map_or(Ok(()), Err)
    }
}

/// Relay daemon: opens the device, obtains a client and serves it
pub struct RelayDaemon {
    options: RelayOptions,
}

impl RelayDaemon {
    pub fn new(options: RelayOptions) -> Self {
        Self { options }
    }

    pub fn run(&self) -> Result<()> {
        let options = &self.options;
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&options.device)
            .map_err(|e| RelayError::Config(format!("cannot open {}: {e}", options.device.display())))?;
        info!(device = %options.device.display(), "Opened MIDI device");

        if options.unregister_stale {
            match rpc::unset_portmap(options.program, options.version) {
                Ok(removed) => info!(removed, "Cleared stale portmapper entry"),
                Err(e) => warn!("Could not clear portmapper entry: {}", e),
            }
        }

        let stream = self.accept()?;
        RelayService::new(options.program, options.version).serve(stream, device)
    }

    fn accept(&self) -> Result<TcpStream> {
        match self.options.transport {
            Transport::Listen(addr) => {
                let listener = TcpListener::bind(addr)?;
                info!(addr = %listener.local_addr()?, "Waiting for client");
                let (stream, peer) = listener.accept()?;
                info!(%peer, "Client connected");
                Ok(stream)
            }
            Transport::Inherited => {
                // SAFETY: fd 0 is the connected socket handed over by inetd,
                // and nothing else in the process uses stdin
                let fd = unsafe { OwnedFd::from_raw_fd(0) };
                Ok(TcpStream::from(fd))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RelayClient;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    fn socketpair_device() -> (File, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        (File::from(OwnedFd::from(ours)), theirs)
    }

    fn start() -> (RelayClient, UnixStream, thread::JoinHandle<Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (device, hardware) = socketpair_device();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            RelayService::default().serve(stream, device)
        });
        let client = RelayClient::connect(addr).unwrap();
        (client, hardware, server)
    }

    #[test]
    fn test_session_end_to_end() {
        let (mut client, mut hardware, server) = start();

        client.null().unwrap();
        assert_eq!(client.write_ack(&[0x90, 0x3C, 0x40]).unwrap(), 3);
        client.write_no_ack(&[0x80, 0x3C, 0x00]).unwrap();
        let mut written = [0u8; 6];
        hardware.read_exact(&mut written).unwrap();
        assert_eq!(written, [0x90, 0x3C, 0x40, 0x80, 0x3C, 0x00]);

        hardware.write_all(&[0x90, 0x3C, 0x40, 0xFD, 0x41]).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(client.request_input().unwrap(), vec![0x90, 0x3C, 0x40, 0x41]);
        assert_eq!(client.take_realtime(), vec![vec![0xFD]]);
        assert!(client.request_input().unwrap().is_empty());

        drop(client);
        server.join().unwrap().unwrap();
    }

    #[test]
    fn test_device_loss_ends_session() {
        let (client, hardware, server) = start();
        drop(hardware);
        let result = server.join().unwrap();
        assert!(matches!(result, Err(RelayError::Disconnected)));
        drop(client);
    }

    #[test]
    fn test_missing_device() {
        let mut options = RelayOptions::new("/nonexistent/midi", Transport::Listen("127.0.0.1:0".parse().unwrap()));
        options.unregister_stale = false;
        assert!(matches!(RelayDaemon::new(options).run(), Err(RelayError::Config(_))));
    }
}
