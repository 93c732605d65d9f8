//! MIDI and meta events
//!
//! Every event carries a clock, an output device tag and a closed [`EventKind`].
//! Behaviour that used to live on per-class overrides (payload encoding, pitch
//! accessors, bar-info effects) is a single `match` over the kind here.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use crate::error::{JazzError, Result};
use crate::stream::{EventSink, Frame};
use crate::sysex;
use crate::track::TrackState;

/// Tick position within a song
pub type Clock = i32;

/// Status byte values
pub mod status {
    pub const KEY_OFF: u8 = 0x80;
    pub const KEY_ON: u8 = 0x90;
    pub const KEY_PRESSURE: u8 = 0xA0;
    pub const CONTROL: u8 = 0xB0;
    pub const PROGRAM: u8 = 0xC0;
    pub const CHANNEL_PRESSURE: u8 = 0xD0;
    pub const PITCH: u8 = 0xE0;
    pub const SYSEX: u8 = 0xF0;
    pub const SONG_POINTER: u8 = 0xF2;
    pub const SYSEX_END: u8 = 0xF7;
    pub const MIDI_CLOCK: u8 = 0xF8;
    pub const START_PLAY: u8 = 0xFA;
    pub const CONTINUE_PLAY: u8 = 0xFB;
    pub const STOP_PLAY: u8 = 0xFC;
    pub const CLOCK_TO_HOST: u8 = 0xFD;
    pub const RESET: u8 = 0xFF;

    pub const TEXT: u8 = 0x01;
    pub const COPYRIGHT: u8 = 0x02;
    pub const TRACK_NAME: u8 = 0x03;
    pub const MARKER: u8 = 0x06;
    pub const END_OF_TRACK: u8 = 0x2F;
    pub const SET_TEMPO: u8 = 0x51;
    pub const MTC_OFFSET: u8 = 0x54;
    pub const TIME_SIGNATURE: u8 = 0x58;
    pub const KEY_SIGNATURE: u8 = 0x59;
    pub const PLAY_TRACK: u8 = 0x7E;
    pub const JAZZ_META: u8 = 0x7F;

    /// Channel voice status (upper nibble 0x8..0xE)
    pub fn is_channel(status: u8) -> bool {
        (KEY_OFF..SYSEX).contains(&status)
    }
}

/// Output routing tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub i32);

impl DeviceId {
    pub const BROADCAST: Self = Self(-1);
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::BROADCAST
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyOn {
    pub channel: u8,
    pub key: u8,
    pub velocity: u8,
    /// Note length in ticks
    pub length: i32,
    pub off_velocity: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyOff {
    pub channel: u8,
    pub key: u8,
    pub off_velocity: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPressure {
    pub channel: u8,
    pub key: u8,
    pub value: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control {
    pub channel: u8,
    pub controller: u8,
    pub value: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Program {
    pub channel: u8,
    pub program: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPressure {
    pub channel: u8,
    pub value: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pitch {
    pub channel: u8,
    /// Signed 14-bit bend, -8192..=8191
    pub value: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetTempo {
    pub us_per_quarter: u32,
}

impl SetTempo {
    pub fn from_bpm(bpm: i32) -> Self {
        Self {
            us_per_quarter: (60_000_000 / bpm.max(1) as u32).max(1),
        }
    }

    pub fn bpm(&self) -> i32 {
        (60_000_000 / self.us_per_quarter.max(1)) as i32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: u8,
    /// Denominator as a power of two (2 = quarter)
    pub denominator_power: u8,
    pub clocks_per_click: u8,
    /// Notated 32nd notes per quarter
    pub quarter_fraction: u8,
}

impl TimeSignature {
    pub fn new(numerator: u8, denominator_power: u8) -> Result<Self> {
        if numerator == 0 || denominator_power > 6 {
            return Err(JazzError::InvalidMeter);
        }
        Ok(Self {
            numerator,
            denominator_power,
            clocks_per_click: 24,
            quarter_fraction: 8,
        })
    }

    pub fn ticks_per_bar(&self, ticks_per_quarter: i32) -> i32 {
        (4 * ticks_per_quarter * self.numerator as i32) >> self.denominator_power
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySignature {
    /// Negative for flats
    pub sharps: i8,
    pub minor: bool,
}

/// Reference to another track, tiled into the composition at render time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayTrack {
    pub track: i32,
    pub transpose: i32,
    /// Duration the referenced track is looped over
    pub length: i32,
}

/// Track header persisted ahead of a track's events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JazzMeta {
    pub audio_mode: bool,
    pub state: TrackState,
    pub device: DeviceId,
    pub intro_length: u8,
    pub channel: u8,
    pub patch: Option<u8>,
    pub bank: Option<u16>,
}

impl JazzMeta {
    pub const LEN: usize = 20;
    const TAG: &'static [u8; 4] = b"JZ01";

    fn encode(&self) -> Vec<u8> {
        let mut data = vec![0u8; Self::LEN];
        data[0..4].copy_from_slice(Self::TAG);
        data[4] = self.audio_mode as u8;
        data[5] = self.state as u8;
        BigEndian::write_i32(&mut data[6..10], self.device.0);
        data[10] = self.intro_length;
        data[11] = self.channel;
        data[12] = self.patch.unwrap_or(0xFF);
        BigEndian::write_u16(&mut data[13..15], self.bank.unwrap_or(0xFFFF));
        data
    }

    fn decode(data: &[u8]) -> Option<Self> {
        if data.len() != Self::LEN || &data[0..4] != Self::TAG {
            return None;
        }
        let bank = BigEndian::read_u16(&data[13..15]);
        Some(Self {
            audio_mode: data[4] != 0,
            state: TrackState::from_u8(data[5]),
            device: DeviceId(BigEndian::read_i32(&data[6..10])),
            intro_length: data[10],
            channel: data[11] & 0x0F,
            patch: (data[12] != 0xFF).then_some(data[12]),
            bank: (bank != 0xFFFF).then_some(bank),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    KeyOn(KeyOn),
    KeyOff(KeyOff),
    KeyPressure(KeyPressure),
    Control(Control),
    Program(Program),
    ChannelPressure(ChannelPressure),
    Pitch(Pitch),
    SysEx(Vec<u8>),
    SongPointer(Vec<u8>),
    MidiClock,
    StartPlay,
    ContinuePlay,
    StopPlay,
    Text(Vec<u8>),
    Copyright(Vec<u8>),
    TrackName(Vec<u8>),
    Marker(Vec<u8>),
    MtcOffset(Vec<u8>),
    JazzMeta(JazzMeta),
    PlayTrack(PlayTrack),
    SetTempo(SetTempo),
    TimeSignature(TimeSignature),
    KeySignature(KeySignature),
    EndOfTrack,
}

/// A timed event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    clock: Clock,
    killed: bool,
    pub device: DeviceId,
    pub kind: EventKind,
}

impl Event {
    pub fn new(clock: Clock, kind: EventKind) -> Self {
        Self {
            clock,
            killed: false,
            device: DeviceId::BROADCAST,
            kind,
        }
    }

    pub fn key_on(clock: Clock, channel: u8, key: u8, velocity: u8, length: i32) -> Self {
        Self::new(
            clock,
            EventKind::KeyOn(KeyOn {
                channel: channel & 0x0F,
                key: key & 0x7F,
                velocity: velocity & 0x7F,
                length,
                off_velocity: 0,
            }),
        )
    }

    pub fn control(clock: Clock, channel: u8, controller: u8, value: u8) -> Self {
        Self::new(
            clock,
            EventKind::Control(Control {
                channel: channel & 0x0F,
                controller: controller & 0x7F,
                value: value & 0x7F,
            }),
        )
    }

    pub fn program(clock: Clock, channel: u8, program: u8) -> Self {
        Self::new(
            clock,
            EventKind::Program(Program {
                channel: channel & 0x0F,
                program: program & 0x7F,
            }),
        )
    }

    pub fn tempo(clock: Clock, bpm: i32) -> Self {
        Self::new(clock, EventKind::SetTempo(SetTempo::from_bpm(bpm)))
    }

    pub fn time_signature(clock: Clock, numerator: u8, denominator_power: u8) -> Result<Self> {
        let meter = TimeSignature::new(numerator, denominator_power)?;
        Ok(Self::new(clock, EventKind::TimeSignature(meter)))
    }

    pub fn play_track(clock: Clock, track: i32, transpose: i32, length: i32) -> Self {
        Self::new(
            clock,
            EventKind::PlayTrack(PlayTrack {
                track,
                transpose,
                length,
            }),
        )
    }

    pub fn track_name(clock: Clock, name: &str) -> Self {
        Self::new(clock, EventKind::TrackName(name.as_bytes().to_vec()))
    }

    pub fn end_of_track(clock: Clock) -> Self {
        Self::new(clock, EventKind::EndOfTrack)
    }

    /// System exclusive message; Roland data-set/request blocks get their
    /// checksum recomputed before they are handed out.
    pub fn sysex(clock: Clock, data: Vec<u8>) -> Self {
        let mut event = Self::new(clock, EventKind::SysEx(data));
        if event.as_sysex().is_some_and(sysex::is_roland_block) {
            event.fix_checksum();
        }
        event
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn set_clock(&mut self, clock: Clock) {
        self.clock = clock;
    }

    pub fn kill(&mut self) {
        self.killed = true;
    }

    pub fn unkill(&mut self) {
        self.killed = false;
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    pub fn status(&self) -> u8 {
        use EventKind::*;
        match &self.kind {
            KeyOn(_) => status::KEY_ON,
            KeyOff(_) => status::KEY_OFF,
            KeyPressure(_) => status::KEY_PRESSURE,
            Control(_) => status::CONTROL,
            Program(_) => status::PROGRAM,
            ChannelPressure(_) => status::CHANNEL_PRESSURE,
            Pitch(_) => status::PITCH,
            SysEx(_) => status::SYSEX,
            SongPointer(_) => status::SONG_POINTER,
            MidiClock => status::MIDI_CLOCK,
            StartPlay => status::START_PLAY,
            ContinuePlay => status::CONTINUE_PLAY,
            StopPlay => status::STOP_PLAY,
            Text(_) => status::TEXT,
            Copyright(_) => status::COPYRIGHT,
            TrackName(_) => status::TRACK_NAME,
            Marker(_) => status::MARKER,
            MtcOffset(_) => status::MTC_OFFSET,
            JazzMeta(_) => status::JAZZ_META,
            PlayTrack(_) => status::PLAY_TRACK,
            SetTempo(_) => status::SET_TEMPO,
            TimeSignature(_) => status::TIME_SIGNATURE,
            KeySignature(_) => status::KEY_SIGNATURE,
            EndOfTrack => status::END_OF_TRACK,
        }
    }

    pub fn channel(&self) -> Option<u8> {
        use EventKind::*;
        match &self.kind {
            KeyOn(e) => Some(e.channel),
            KeyOff(e) => Some(e.channel),
            KeyPressure(e) => Some(e.channel),
            Control(e) => Some(e.channel),
            Program(e) => Some(e.channel),
            ChannelPressure(e) => Some(e.channel),
            Pitch(e) => Some(e.channel),
            _ => None,
        }
    }

    pub fn is_channel_event(&self) -> bool {
        self.channel().is_some()
    }

    /// Variable-length payload events that carry no channel
    pub fn is_meta(&self) -> bool {
        use EventKind::*;
        matches!(
            self.kind,
            SysEx(_)
                | SongPointer(_)
                | Text(_)
                | Copyright(_)
                | TrackName(_)
                | Marker(_)
                | MtcOffset(_)
                | JazzMeta(_)
                | PlayTrack(_)
        )
    }

    pub fn is_end_of_track(&self) -> bool {
        matches!(self.kind, EventKind::EndOfTrack)
    }

    pub fn as_key_on(&self) -> Option<&KeyOn> {
        match &self.kind {
            EventKind::KeyOn(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_key_on_mut(&mut self) -> Option<&mut KeyOn> {
        match &mut self.kind {
            EventKind::KeyOn(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_key_off(&self) -> Option<&KeyOff> {
        match &self.kind {
            EventKind::KeyOff(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_control(&self) -> Option<&Control> {
        match &self.kind {
            EventKind::Control(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_program(&self) -> Option<&Program> {
        match &self.kind {
            EventKind::Program(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_pitch(&self) -> Option<&Pitch> {
        match &self.kind {
            EventKind::Pitch(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_tempo(&self) -> Option<&SetTempo> {
        match &self.kind {
            EventKind::SetTempo(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_time_signature(&self) -> Option<&TimeSignature> {
        match &self.kind {
            EventKind::TimeSignature(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_play_track(&self) -> Option<&PlayTrack> {
        match &self.kind {
            EventKind::PlayTrack(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_play_track_mut(&mut self) -> Option<&mut PlayTrack> {
        match &mut self.kind {
            EventKind::PlayTrack(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_jazz_meta(&self) -> Option<&JazzMeta> {
        match &self.kind {
            EventKind::JazzMeta(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_sysex(&self) -> Option<&[u8]> {
        match &self.kind {
            EventKind::SysEx(data) => Some(data),
            _ => None,
        }
    }

    /// Text content of text-like meta events
    pub fn text(&self) -> Option<String> {
        use EventKind::*;
        match &self.kind {
            Text(data) | Copyright(data) | TrackName(data) | Marker(data) => {
                Some(String::from_utf8_lossy(data).into_owned())
            }
            _ => None,
        }
    }

    /// Value shown in the editors' value column
    pub fn value(&self) -> i32 {
        use EventKind::*;
        match &self.kind {
            KeyOn(e) => e.velocity as i32,
            KeyOff(e) => e.off_velocity as i32,
            KeyPressure(e) => e.value as i32,
            Control(e) => e.value as i32,
            Program(e) => e.program as i32,
            ChannelPressure(e) => e.value as i32,
            Pitch(e) => e.value as i32,
            SetTempo(e) => e.bpm(),
            _ => 0,
        }
    }

    /// Vertical position used for display and sorting
    pub fn pitch(&self) -> i32 {
        use EventKind::*;
        match &self.kind {
            KeyOn(e) => e.key as i32,
            KeyOff(e) => e.key as i32,
            KeyPressure(e) => e.key as i32,
            Control(e) => e.controller as i32,
            Program(e) => e.program as i32,
            ChannelPressure(e) => e.value as i32,
            SetTempo(e) => e.bpm() / 2,
            _ => 0,
        }
    }

    pub fn set_pitch(&mut self, pitch: i32) {
        use EventKind::*;
        let seven_bit = pitch.clamp(0, 127) as u8;
        match &mut self.kind {
            KeyOn(e) => e.key = seven_bit,
            KeyOff(e) => e.key = seven_bit,
            KeyPressure(e) => e.key = seven_bit,
            Control(e) => e.controller = seven_bit,
            Program(e) => e.program = seven_bit,
            ChannelPressure(e) => e.value = seven_bit,
            SetTempo(e) => *e = self::SetTempo::from_bpm(pitch.saturating_mul(2)),
            _ => {}
        }
    }

    /// New `(ticks_per_bar, counts_per_bar)` if this event changes the meter
    pub fn bar_effect(&self, ticks_per_quarter: i32) -> Option<(i32, i32)> {
        let meter = self.as_time_signature()?;
        Some((meter.ticks_per_bar(ticks_per_quarter), meter.numerator as i32))
    }

    pub fn fix_checksum(&mut self) {
        if let EventKind::SysEx(data) = &mut self.kind {
            sysex::fix_checksum(data);
        }
    }

    /// Bytes following the status (and channel) in a frame
    pub fn payload(&self) -> Vec<u8> {
        use EventKind::*;
        match &self.kind {
            KeyOn(e) => {
                let mut data = vec![e.key, e.velocity, 0, 0, 0, 0, e.off_velocity];
                BigEndian::write_i32(&mut data[2..6], e.length);
                data
            }
            KeyOff(e) => vec![e.key, e.off_velocity],
            KeyPressure(e) => vec![e.key, e.value],
            Control(e) => vec![e.controller, e.value],
            Program(e) => vec![e.program],
            ChannelPressure(e) => vec![e.value],
            Pitch(e) => {
                let raw = (e.value as i32 + 8192).clamp(0, 0x3FFF) as u16;
                vec![(raw & 0x7F) as u8, (raw >> 7) as u8]
            }
            SysEx(data) | SongPointer(data) | Text(data) | Copyright(data) | TrackName(data)
            | Marker(data) | MtcOffset(data) => data.clone(),
            MidiClock | StartPlay | ContinuePlay | StopPlay | EndOfTrack => Vec::new(),
            JazzMeta(meta) => meta.encode(),
            PlayTrack(e) => {
                let mut data = vec![0u8; 12];
                BigEndian::write_i32(&mut data[0..4], e.track);
                BigEndian::write_i32(&mut data[4..8], e.transpose);
                BigEndian::write_i32(&mut data[8..12], e.length);
                data
            }
            SetTempo(e) => {
                let mut data = vec![0u8; 3];
                BigEndian::write_u24(&mut data, e.us_per_quarter.min(0xFF_FFFF));
                data
            }
            TimeSignature(e) => vec![
                e.numerator,
                e.denominator_power,
                e.clocks_per_click,
                e.quarter_fraction,
            ],
            KeySignature(e) => vec![e.sharps as u8, e.minor as u8],
        }
    }

    pub fn write<S: EventSink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        sink.write_frame(self.clock(), self.status(), self.channel(), &self.payload())
    }

    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let data = frame.payload.as_slice();
        let status = frame.status;
        let bad = || JazzError::BadPayload {
            status,
            len: data.len(),
        };
        let expect = |len: usize| if data.len() == len { Ok(()) } else { Err(bad()) };
        let channel = frame.channel.unwrap_or(0) & 0x0F;

        let kind = match status {
            status::KEY_ON => {
                expect(7)?;
                EventKind::KeyOn(KeyOn {
                    channel,
                    key: data[0],
                    velocity: data[1],
                    length: BigEndian::read_i32(&data[2..6]),
                    off_velocity: data[6],
                })
            }
            status::KEY_OFF => {
                expect(2)?;
                EventKind::KeyOff(KeyOff {
                    channel,
                    key: data[0],
                    off_velocity: data[1],
                })
            }
            status::KEY_PRESSURE => {
                expect(2)?;
                EventKind::KeyPressure(KeyPressure {
                    channel,
                    key: data[0],
                    value: data[1],
                })
            }
            status::CONTROL => {
                expect(2)?;
                EventKind::Control(Control {
                    channel,
                    controller: data[0],
                    value: data[1],
                })
            }
            status::PROGRAM => {
                expect(1)?;
                EventKind::Program(Program {
                    channel,
                    program: data[0],
                })
            }
            status::CHANNEL_PRESSURE => {
                expect(1)?;
                EventKind::ChannelPressure(ChannelPressure {
                    channel,
                    value: data[0],
                })
            }
            status::PITCH => {
                expect(2)?;
                let raw = ((data[1] as i32 & 0x7F) << 7) | (data[0] as i32 & 0x7F);
                EventKind::Pitch(Pitch {
                    channel,
                    value: (raw - 8192) as i16,
                })
            }
            status::SYSEX => EventKind::SysEx(data.to_vec()),
            status::SONG_POINTER => EventKind::SongPointer(data.to_vec()),
            status::MIDI_CLOCK => EventKind::MidiClock,
            status::START_PLAY => EventKind::StartPlay,
            status::CONTINUE_PLAY => EventKind::ContinuePlay,
            status::STOP_PLAY => EventKind::StopPlay,
            status::TEXT => EventKind::Text(data.to_vec()),
            status::COPYRIGHT => EventKind::Copyright(data.to_vec()),
            status::TRACK_NAME => EventKind::TrackName(data.to_vec()),
            status::MARKER => EventKind::Marker(data.to_vec()),
            status::MTC_OFFSET => EventKind::MtcOffset(data.to_vec()),
            status::END_OF_TRACK => EventKind::EndOfTrack,
            status::SET_TEMPO => {
                expect(3)?;
                EventKind::SetTempo(SetTempo {
                    us_per_quarter: BigEndian::read_u24(data),
                })
            }
            status::TIME_SIGNATURE => {
                expect(4)?;
                let mut meter = TimeSignature::new(data[0], data[1])?;
                meter.clocks_per_click = data[2];
                meter.quarter_fraction = data[3];
                EventKind::TimeSignature(meter)
            }
            status::KEY_SIGNATURE => {
                expect(2)?;
                EventKind::KeySignature(KeySignature {
                    sharps: data[0] as i8,
                    minor: data[1] != 0,
                })
            }
            status::PLAY_TRACK => {
                expect(12)?;
                EventKind::PlayTrack(PlayTrack {
                    track: BigEndian::read_i32(&data[0..4]),
                    transpose: BigEndian::read_i32(&data[4..8]),
                    length: BigEndian::read_i32(&data[8..12]),
                })
            }
            status::JAZZ_META => EventKind::JazzMeta(JazzMeta::decode(data).ok_or_else(bad)?),
            other => return Err(JazzError::UnknownStatus(other)),
        };

        Ok(Self::new(frame.clock, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reframe(event: &Event) -> Event {
        let mut frames: Vec<Frame> = Vec::new();
        event.write(&mut frames).unwrap();
        Event::from_frame(&frames[0]).unwrap()
    }

    #[test]
    fn test_kill_keeps_clock() {
        let mut event = Event::key_on(480, 0, 60, 100, 120);
        event.kill();
        assert!(event.is_killed());
        assert_eq!(event.clock(), 480);
        event.set_clock(960);
        assert!(event.is_killed());
        event.unkill();
        assert_eq!(event.clock(), 960);
        assert!(!event.is_killed());
    }

    #[test]
    fn test_copy_is_independent() {
        let original = Event::sysex(0, vec![0x43, 0x10, 0x4C, 0x00, 0x00, 0x7E, 0x00, 0xF7]);
        let mut copy = original.clone();
        if let EventKind::SysEx(data) = &mut copy.kind {
            data[0] = 0x41;
        }
        assert_eq!(original.as_sysex().unwrap()[0], 0x43);
    }

    #[test]
    fn test_frames_preserve_payloads() {
        let mut note = Event::key_on(10, 3, 64, 90, 240);
        note.as_key_on_mut().unwrap().off_velocity = 40;
        let events = [
            note,
            Event::new(5, EventKind::Pitch(Pitch { channel: 1, value: -8192 })),
            Event::new(5, EventKind::Pitch(Pitch { channel: 1, value: 8191 })),
            Event::tempo(0, 100),
            Event::time_signature(0, 6, 3).unwrap(),
            Event::new(0, EventKind::KeySignature(KeySignature { sharps: -3, minor: true })),
            Event::play_track(960, 4, -12, 1920),
            Event::new(
                0,
                EventKind::JazzMeta(JazzMeta {
                    audio_mode: true,
                    state: TrackState::Solo,
                    device: DeviceId(2),
                    intro_length: 1,
                    channel: 9,
                    patch: Some(12),
                    bank: None,
                }),
            ),
            Event::track_name(0, "Bass"),
            Event::end_of_track(1920),
        ];
        for event in &events {
            assert_eq!(&reframe(event), event);
        }
    }

    #[test]
    fn test_play_track_payload_is_three_integers() {
        let event = Event::play_track(0, 2, 5, 960);
        assert_eq!(event.payload(), vec![0, 0, 0, 2, 0, 0, 0, 5, 0, 0, 3, 192]);
        assert!(event.is_meta());
    }

    #[test]
    fn test_zero_numerator_rejected() {
        assert!(matches!(Event::time_signature(0, 0, 2), Err(JazzError::InvalidMeter)));
        let frame = Frame {
            clock: 0,
            status: status::TIME_SIGNATURE,
            channel: None,
            payload: vec![0, 2, 24, 8],
        };
        assert!(Event::from_frame(&frame).is_err());
    }

    #[test]
    fn test_pitch_accessors() {
        let tempo = Event::tempo(0, 120);
        assert_eq!(tempo.value(), 120);
        assert_eq!(tempo.pitch(), 60);

        let mut control = Event::control(0, 0, 7, 100);
        assert_eq!(control.pitch(), 7);
        control.set_pitch(10);
        assert_eq!(control.as_control().unwrap().controller, 10);

        let mut note = Event::key_on(0, 0, 60, 100, 10);
        note.set_pitch(200);
        assert_eq!(note.pitch(), 127);
    }

    #[test]
    fn test_tempo_pitch_saturates() {
        let mut tempo = Event::tempo(0, 120);
        tempo.set_pitch(i32::MAX);
        assert_eq!(tempo.as_tempo().unwrap().us_per_quarter, 1);
        tempo.set_pitch(-5);
        assert_eq!(tempo.as_tempo().unwrap().bpm(), 1);
    }

    #[test]
    fn test_time_signature_bar_effect() {
        let event = Event::time_signature(0, 3, 3).unwrap();
        assert_eq!(event.bar_effect(120), Some((180, 3)));
        assert_eq!(Event::tempo(0, 120).bar_effect(120), None);
    }

    #[test]
    fn test_unknown_status() {
        let frame = Frame {
            clock: 0,
            status: 0x33,
            channel: None,
            payload: Vec::new(),
        };
        assert!(matches!(Event::from_frame(&frame), Err(JazzError::UnknownStatus(0x33))));
    }
}
