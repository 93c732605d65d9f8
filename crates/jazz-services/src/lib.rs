//! jazz-services: MIDI relay daemon and its client

pub mod classifier;
pub mod client;
pub mod daemon;
pub mod dispatch;
mod error;
pub mod reader;
pub mod rpc;
pub mod wire;

pub use classifier::{InputClassifier, RecordBuffer, Routed, FLUSH_CHUNK, FLUSH_MARKER};
pub use client::RelayClient;
pub use daemon::{RelayDaemon, RelayOptions, RelayService, Transport};
pub use dispatch::Dispatcher;
pub use error::{RelayError, Result};
pub use reader::InputReader;
pub use rpc::{RELAY_PROGRAM, RELAY_VERSION};
