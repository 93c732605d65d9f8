//! Track representation

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{JazzError, Result};
use crate::event::{Clock, DeviceId, Event, EventKind, JazzMeta};
use crate::stream::{EventSink, EventSource};

/// Playback participation of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackState {
    #[default]
    Play,
    Mute,
    Solo,
}

impl TrackState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Mute,
            2 => Self::Solo,
            _ => Self::Play,
        }
    }
}

/// A clock-sorted list of events with snapshot undo
#[derive(Debug, Clone, Default)]
pub struct Track {
    events: Vec<Event>,
    /// Default MIDI channel (0-15)
    pub channel: u8,
    pub patch: Option<u8>,
    pub bank: Option<u16>,
    /// Track plays through the audio engine instead of MIDI out
    pub audio_mode: bool,
    pub device: DeviceId,
    pub state: TrackState,
    /// Pre-roll bars; only meaningful on the master track
    pub intro_length: u8,
    undo: VecDeque<Vec<Event>>,
    redo: Vec<Vec<Event>>,
}

impl Track {
    /// Snapshots kept per direction
    pub const MAX_UNDO: usize = 20;

    pub fn new() -> Self {
        Self::default()
    }

    /// All stored events, killed ones included
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Mutable access to a stored event. Call [`Track::cleanup`] after
    /// moving clocks so the track is sorted again.
    pub fn event_mut(&mut self, index: usize) -> Option<&mut Event> {
        self.events.get_mut(index)
    }

    /// Number of live events
    pub fn len(&self) -> usize {
        self.events.iter().filter(|e| !e.is_killed()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert keeping clock order; lands after events with the same clock
    pub fn put(&mut self, event: Event) {
        let clock = event.clock();
        let pos = self.events.partition_point(|e| e.clock() <= clock);
        self.events.insert(pos, event);
    }

    pub fn kill_at(&mut self, index: usize) -> bool {
        let Some(event) = self.events.get_mut(index) else {
            return false;
        };
        event.kill();
        true
    }

    /// Kill every live event in `[from, to)` accepted by `filter`
    pub fn kill_range<F>(&mut self, from: Clock, to: Clock, filter: F) -> usize
    where
        F: Fn(&Event) -> bool,
    {
        let start = self.events.partition_point(|e| e.clock() < from);
        let mut killed = 0;
        for event in self.events[start..].iter_mut() {
            if event.clock() >= to {
                break;
            }
            if !event.is_killed() && filter(event) {
                event.kill();
                killed += 1;
            }
        }
        killed
    }

    /// Drop killed events and restore clock order
    pub fn cleanup(&mut self) {
        self.events.retain(|e| !e.is_killed());
        self.events.sort_by_key(|e| e.clock());
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Live events with clock in `[from, to)`, in order
    pub fn range(&self, from: Clock, to: Clock) -> impl Iterator<Item = &Event> + '_ {
        let start = self.events.partition_point(|e| e.clock() < from);
        self.events[start..]
            .iter()
            .take_while(move |e| e.clock() < to)
            .filter(|e| !e.is_killed())
    }

    pub fn last_clock(&self) -> Clock {
        self.events
            .iter()
            .rev()
            .find(|e| !e.is_killed())
            .map_or(0, Event::clock)
    }

    /// Loop period when this track is played by reference
    pub fn loop_length(&self) -> Clock {
        self.events
            .iter()
            .rev()
            .find(|e| !e.is_killed() && e.is_end_of_track())
            .map_or_else(|| self.last_clock(), Event::clock)
    }

    pub fn name(&self) -> Option<String> {
        self.events
            .iter()
            .find(|e| !e.is_killed() && matches!(e.kind, EventKind::TrackName(_)))
            .and_then(Event::text)
    }

    pub fn set_name(&mut self, name: &str) {
        let existing = self
            .events
            .iter_mut()
            .find(|e| !e.is_killed() && matches!(e.kind, EventKind::TrackName(_)));
        match existing {
            Some(event) => event.kind = EventKind::TrackName(name.as_bytes().to_vec()),
            None => self.put(Event::track_name(0, name)),
        }
    }

    /// Push a snapshot of the current events onto the undo stack
    pub fn new_undo_buffer(&mut self) {
        if self.undo.len() == Self::MAX_UNDO {
            self.undo.pop_front();
        }
        self.undo.push_back(self.events.clone());
        self.redo.clear();
    }

    pub fn undo(&mut self) -> bool {
        let Some(snapshot) = self.undo.pop_back() else {
            return false;
        };
        let current = std::mem::replace(&mut self.events, snapshot);
        self.redo.push(current);
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(snapshot) = self.redo.pop() else {
            return false;
        };
        let current = std::mem::replace(&mut self.events, snapshot);
        if self.undo.len() == Self::MAX_UNDO {
            self.undo.pop_front();
        }
        self.undo.push_back(current);
        true
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn jazz_meta(&self) -> JazzMeta {
        JazzMeta {
            audio_mode: self.audio_mode,
            state: self.state,
            device: self.device,
            intro_length: self.intro_length,
            channel: self.channel,
            patch: self.patch,
            bank: self.bank,
        }
    }

    fn apply_jazz_meta(&mut self, meta: &JazzMeta) {
        self.audio_mode = meta.audio_mode;
        self.state = meta.state;
        self.device = meta.device;
        self.intro_length = meta.intro_length;
        self.channel = meta.channel;
        self.patch = meta.patch;
        self.bank = meta.bank;
    }

    /// Apply `scale` to every clock and duration
    pub(crate) fn rescale<F>(&mut self, scale: F)
    where
        F: Fn(i32) -> i32,
    {
        let all = self
            .events
            .iter_mut()
            .chain(self.undo.iter_mut().flatten())
            .chain(self.redo.iter_mut().flatten());
        for event in all {
            event.set_clock(scale(event.clock()));
            match &mut event.kind {
                EventKind::KeyOn(note) => note.length = scale(note.length),
                EventKind::PlayTrack(play) => play.length = scale(play.length),
                _ => {}
            }
        }
    }

    /// Header, live events, then a single end-of-track marker
    pub fn write<S: EventSink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        Event::new(0, EventKind::JazzMeta(self.jazz_meta())).write(sink)?;

        let mut end = 0;
        for event in self.events.iter().filter(|e| !e.is_killed()) {
            end = end.max(event.clock());
            match event.kind {
                EventKind::EndOfTrack | EventKind::JazzMeta(_) => continue,
                _ => event.write(sink)?,
            }
        }
        Event::end_of_track(end).write(sink)
    }

    /// Replace contents with the next track from `source`. On error the
    /// track is left as it was.
    pub fn read<S: EventSource + ?Sized>(&mut self, source: &mut S) -> Result<()> {
        let mut scratch = Track::new();
        loop {
            let Some(frame) = source.read_frame()? else {
                return Err(JazzError::UnexpectedEof);
            };
            let event = match Event::from_frame(&frame) {
                Ok(event) => event,
                Err(e) => {
                    warn!(clock = frame.clock, status = frame.status, "Skipping event: {}", e);
                    continue;
                }
            };
            if let Some(meta) = event.as_jazz_meta() {
                scratch.apply_jazz_meta(meta);
                continue;
            }
            let done = event.is_end_of_track();
            scratch.put(event);
            if done {
                break;
            }
        }
        debug!(events = scratch.events.len(), "Read track");
        *self = scratch;
        Ok(())
    }
}
