//! jazz-core: Song model, clock arithmetic and playback merge for the jazz sequencer

pub mod bar_info;
mod error;
pub mod event;
mod merge;
mod metronome;
mod smf;
pub mod song;
pub mod stream;
pub mod sysex;
pub mod track;

pub use bar_info::BarInfo;
pub use error::{JazzError, Result};
pub use event::{status, Clock, DeviceId, Event, EventKind};
pub use event::{ChannelPressure, Control, JazzMeta, KeyOff, KeyOn, KeyPressure, KeySignature, Pitch, PlayTrack, Program, SetTempo, TimeSignature};
pub use merge::MAX_PLAY_TRACK_DEPTH;
pub use metronome::MetronomeInfo;
pub use song::Song;
pub use stream::{EventSink, EventSource, Frame, FrameReader, FrameWriter, SongHeader};
pub use sysex::{SysexId, SysexService};
pub use track::{Track, TrackState};
