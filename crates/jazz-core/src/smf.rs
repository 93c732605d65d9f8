//! Standard MIDI file import and export
//!
//! Notes are stored as a single KeyOn with a length; in a MIDI file they
//! become note-on/note-off pairs. PlayTrack, track headers and realtime
//! events have no MIDI file representation and are left out.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};

use midly::num::{u14, u15, u24, u28, u4, u7};
use midly::{
    Format, Fps, Header, MetaMessage, MidiMessage, PitchBend, Smf, SmpteTime, Timing, TrackEvent,
    TrackEventKind,
};
use tracing::{debug, info, warn};

use crate::error::{JazzError, Result};
use crate::event::{
    status, Clock, ChannelPressure, Control, Event, EventKind, KeyOff, KeyPressure, KeySignature,
    Pitch, Program, SetTempo, TimeSignature,
};
use crate::song::Song;
use crate::track::Track;

fn channel_message(channel: u8, message: MidiMessage) -> TrackEventKind<'static> {
    TrackEventKind::Midi {
        channel: u4::from_int_lossy(channel),
        message,
    }
}

/// Messages of one track in file order. Note-offs sort ahead of other
/// messages at the same clock.
fn track_messages(track: &Track) -> Vec<(Clock, TrackEventKind<'_>)> {
    let mut messages: Vec<(Clock, u8, TrackEventKind<'_>)> = Vec::new();
    for event in track.events().iter().filter(|e| !e.is_killed()) {
        let clock = event.clock().max(0);
        let kind = match &event.kind {
            EventKind::KeyOn(note) => {
                let Some(off) = clock.checked_add(note.length.max(0)) else {
                    warn!(clock, length = note.length, "Note ends out of range, skipping");
                    continue;
                };
                let key = u7::from_int_lossy(note.key);
                let vel = u7::from_int_lossy(note.off_velocity);
                messages.push((off, 0, channel_message(note.channel, MidiMessage::NoteOff { key, vel })));
                let vel = u7::from_int_lossy(note.velocity);
                channel_message(note.channel, MidiMessage::NoteOn { key, vel })
            }
            EventKind::KeyOff(e) => channel_message(
                e.channel,
                MidiMessage::NoteOff {
                    key: u7::from_int_lossy(e.key),
                    vel: u7::from_int_lossy(e.off_velocity),
                },
            ),
            EventKind::KeyPressure(e) => channel_message(
                e.channel,
                MidiMessage::Aftertouch {
                    key: u7::from_int_lossy(e.key),
                    vel: u7::from_int_lossy(e.value),
                },
            ),
            EventKind::Control(e) => channel_message(
                e.channel,
                MidiMessage::Controller {
                    controller: u7::from_int_lossy(e.controller),
                    value: u7::from_int_lossy(e.value),
                },
            ),
            EventKind::Program(e) => channel_message(
                e.channel,
                MidiMessage::ProgramChange {
                    program: u7::from_int_lossy(e.program),
                },
            ),
            EventKind::ChannelPressure(e) => channel_message(
                e.channel,
                MidiMessage::ChannelAftertouch {
                    vel: u7::from_int_lossy(e.value),
                },
            ),
            EventKind::Pitch(e) => {
                let raw = (e.value as i32 + 8192).clamp(0, 0x3FFF) as u16;
                channel_message(
                    e.channel,
                    MidiMessage::PitchBend {
                        bend: PitchBend(u14::from_int_lossy(raw)),
                    },
                )
            }
            EventKind::SysEx(data) => TrackEventKind::SysEx(data),
            EventKind::Text(text) => TrackEventKind::Meta(MetaMessage::Text(text)),
            EventKind::Copyright(text) => TrackEventKind::Meta(MetaMessage::Copyright(text)),
            EventKind::TrackName(text) => TrackEventKind::Meta(MetaMessage::TrackName(text)),
            EventKind::Marker(text) => TrackEventKind::Meta(MetaMessage::Marker(text)),
            EventKind::MtcOffset(data) => {
                TrackEventKind::Meta(MetaMessage::Unknown(status::MTC_OFFSET, data))
            }
            EventKind::SetTempo(tempo) => TrackEventKind::Meta(MetaMessage::Tempo(
                u24::from_int_lossy(tempo.us_per_quarter.min(0xFF_FFFF)),
            )),
            EventKind::TimeSignature(meter) => TrackEventKind::Meta(MetaMessage::TimeSignature(
                meter.numerator,
                meter.denominator_power,
                meter.clocks_per_click,
                meter.quarter_fraction,
            )),
            EventKind::KeySignature(key) => {
                TrackEventKind::Meta(MetaMessage::KeySignature(key.sharps, key.minor))
            }
            _ => continue,
        };
        messages.push((clock, 1, kind));
    }
    messages.sort_by_key(|(clock, rank, _)| (*clock, *rank));
    messages.into_iter().map(|(clock, _, kind)| (clock, kind)).collect()
}

fn delta(from: Clock, to: Clock) -> Result<u28> {
    u32::try_from(to - from)
        .ok()
        .filter(|&ticks| ticks <= 0x0FFF_FFFF)
        .map(u28::from_int_lossy)
        .ok_or(JazzError::OutOfRange("event clock"))
}

fn smpte_bytes(time: &SmpteTime) -> Vec<u8> {
    let rate = match time.fps() {
        Fps::Fps24 => 0,
        Fps::Fps25 => 1,
        Fps::Fps29 => 2,
        Fps::Fps30 => 3,
    };
    vec![
        time.hour() | rate << 5,
        time.minute(),
        time.second(),
        time.frame(),
        time.subframe(),
    ]
}

fn meta_kind(message: &MetaMessage<'_>) -> Option<EventKind> {
    let kind = match *message {
        MetaMessage::Text(text) => EventKind::Text(text.to_vec()),
        MetaMessage::Copyright(text) => EventKind::Copyright(text.to_vec()),
        MetaMessage::TrackName(text) => EventKind::TrackName(text.to_vec()),
        MetaMessage::Marker(text) => EventKind::Marker(text.to_vec()),
        MetaMessage::SmpteOffset(time) => EventKind::MtcOffset(smpte_bytes(&time)),
        MetaMessage::Unknown(status::MTC_OFFSET, data) => EventKind::MtcOffset(data.to_vec()),
        MetaMessage::Tempo(tempo) => EventKind::SetTempo(SetTempo {
            us_per_quarter: tempo.as_int(),
        }),
        MetaMessage::TimeSignature(numerator, power, clocks_per_click, quarter_fraction) => {
            match TimeSignature::new(numerator, power) {
                Ok(meter) => EventKind::TimeSignature(TimeSignature {
                    clocks_per_click,
                    quarter_fraction,
                    ..meter
                }),
                Err(e) => {
                    debug!(numerator, power, "Ignoring time signature: {}", e);
                    return None;
                }
            }
        }
        MetaMessage::KeySignature(sharps, minor) => {
            EventKind::KeySignature(KeySignature { sharps, minor })
        }
        _ => return None,
    };
    Some(kind)
}

fn channel_kind(channel: u8, message: MidiMessage) -> EventKind {
    match message {
        MidiMessage::Aftertouch { key, vel } => EventKind::KeyPressure(KeyPressure {
            channel,
            key: key.as_int(),
            value: vel.as_int(),
        }),
        MidiMessage::Controller { controller, value } => EventKind::Control(Control {
            channel,
            controller: controller.as_int(),
            value: value.as_int(),
        }),
        MidiMessage::ProgramChange { program } => EventKind::Program(Program {
            channel,
            program: program.as_int(),
        }),
        MidiMessage::ChannelAftertouch { vel } => EventKind::ChannelPressure(ChannelPressure {
            channel,
            value: vel.as_int(),
        }),
        MidiMessage::PitchBend { bend } => EventKind::Pitch(Pitch {
            channel,
            value: bend.0.as_int() as i16 - 8192,
        }),
        MidiMessage::NoteOn { key, vel } | MidiMessage::NoteOff { key, vel } => {
            EventKind::KeyOff(KeyOff {
                channel,
                key: key.as_int(),
                off_velocity: vel.as_int(),
            })
        }
    }
}

/// Pairs note-ons with the note-offs that end them
#[derive(Default)]
struct NotePairing {
    events: Vec<Event>,
    pending: HashMap<(u8, u8), VecDeque<usize>>,
}

impl NotePairing {
    fn note_on(&mut self, clock: Clock, channel: u8, key: u8, velocity: u8) {
        self.pending.entry((channel, key)).or_default().push_back(self.events.len());
        self.events.push(Event::key_on(clock, channel, key, velocity, 0));
    }

    /// Close the oldest open note on `key`; an unmatched note-off is kept
    /// as a KeyOff event
    fn note_off(&mut self, clock: Clock, channel: u8, key: u8, off_velocity: u8) {
        let started = self.pending.get_mut(&(channel, key)).and_then(VecDeque::pop_front);
        let note = started
            .and_then(|index| self.events.get_mut(index))
            .and_then(|on| {
                let start = on.clock();
                on.as_key_on_mut().map(|note| (start, note))
            });
        match note {
            Some((start, note)) => {
                note.length = clock - start;
                note.off_velocity = off_velocity;
            }
            None => self.events.push(Event::new(
                clock,
                EventKind::KeyOff(KeyOff {
                    channel,
                    key,
                    off_velocity,
                }),
            )),
        }
    }

    /// Notes never switched off last until `end`
    fn finish(mut self, end: Clock) -> Vec<Event> {
        for index in self.pending.into_values().flatten() {
            if let Some(on) = self.events.get_mut(index) {
                let start = on.clock();
                if let Some(note) = on.as_key_on_mut() {
                    note.length = end - start;
                }
            }
        }
        self.events
    }
}

fn read_track(events: &[TrackEvent<'_>]) -> Track {
    let mut notes = NotePairing::default();
    let mut clock: Clock = 0;

    for event in events {
        clock = clock.saturating_add(event.delta.as_int() as Clock);
        match event.kind {
            TrackEventKind::Midi { channel, message } => {
                let channel = channel.as_int();
                match message {
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        notes.note_on(clock, channel, key.as_int(), vel.as_int());
                    }
                    MidiMessage::NoteOn { key, .. } => notes.note_off(clock, channel, key.as_int(), 0),
                    MidiMessage::NoteOff { key, vel } => {
                        notes.note_off(clock, channel, key.as_int(), vel.as_int());
                    }
                    other => notes.events.push(Event::new(clock, channel_kind(channel, other))),
                }
            }
            TrackEventKind::SysEx(data) | TrackEventKind::Escape(data) => {
                notes.events.push(Event::new(clock, EventKind::SysEx(data.to_vec())));
            }
            TrackEventKind::Meta(MetaMessage::EndOfTrack) => break,
            TrackEventKind::Meta(message) => match meta_kind(&message) {
                Some(kind) => notes.events.push(Event::new(clock, kind)),
                None => debug!(?message, "Ignoring meta event"),
            },
        }
    }

    let events = notes.finish(clock);
    let mut track = Track::new();
    if let Some(channel) = events.iter().find_map(Event::channel) {
        track.channel = channel;
    }
    for event in events {
        track.put(event);
    }
    track.put(Event::end_of_track(clock));
    track
}

impl Song {
    /// Write a format 1 Standard MIDI file; empty tracks after the master
    /// track are left out
    pub fn export_smf<W: Write>(&self, mut writer: W) -> Result<()> {
        let ticks_per_quarter = u16::try_from(self.ticks_per_quarter())
            .ok()
            .filter(|&tpq| tpq <= 0x7FFF)
            .ok_or(JazzError::OutOfRange("ticks per quarter"))?;
        let tracks: Vec<&Track> = self
            .tracks()
            .iter()
            .enumerate()
            .filter(|(i, t)| *i == 0 || !t.is_empty())
            .map(|(_, t)| t)
            .collect();
        if tracks.len() > u16::MAX as usize {
            return Err(JazzError::OutOfRange("track count"));
        }

        let mut smf = Smf::new(Header::new(
            Format::Parallel,
            Timing::Metrical(u15::from_int_lossy(ticks_per_quarter)),
        ));
        for track in &tracks {
            let mut events = Vec::new();
            let mut last = 0;
            for (clock, kind) in track_messages(track) {
                events.push(TrackEvent {
                    delta: delta(last, clock)?,
                    kind,
                });
                last = clock;
            }
            events.push(TrackEvent {
                delta: delta(last, track.last_clock().max(last))?,
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            });
            smf.tracks.push(events);
        }
        smf.write_std(&mut writer)?;
        info!(tracks = tracks.len(), "Exported standard MIDI file");
        Ok(())
    }

    /// Read a format 0 or 1 Standard MIDI file with metrical time division.
    /// Overlapping notes on the same key are paired first-on, first-off.
    pub fn import_smf<R: Read>(mut reader: R) -> Result<Song> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        let smf = Smf::parse(&data).map_err(|e| JazzError::Smf(e.to_string()))?;

        if smf.header.format == Format::Sequential {
            return Err(JazzError::Smf("sequential (format 2) files are not supported".into()));
        }
        let division = match smf.header.timing {
            Timing::Metrical(ticks) if ticks.as_int() > 0 => ticks.as_int(),
            _ => return Err(JazzError::Smf("SMPTE time division is not supported".into())),
        };

        let mut song = Song::new(smf.tracks.len().max(Song::DEFAULT_TRACKS));
        for (index, events) in smf.tracks.iter().enumerate() {
            if let Some(slot) = song.track_mut(index) {
                *slot = read_track(events);
            }
        }
        // Clocks were read in file ticks, so adopt the file's division as is
        song.set_time_base(division as i32);
        info!(tracks = smf.tracks.len(), ticks_per_quarter = division, "Imported standard MIDI file");
        Ok(song)
    }
}
