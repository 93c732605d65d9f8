//! Song: the fixed set of tracks plus its time base

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::bar_info::BarInfo;
use crate::error::{JazzError, Result};
use crate::event::{Clock, Event, EventKind, SetTempo};
use crate::stream::{FrameReader, FrameWriter, SongHeader};
use crate::track::Track;

/// Tracks in a song. Track 0 holds tempo and meter.
#[derive(Debug, Clone)]
pub struct Song {
    tracks: Vec<Track>,
    ticks_per_quarter: i32,
    /// Song length in quarter notes
    pub max_quarters: i32,
}

impl Default for Song {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TRACKS)
    }
}

impl Song {
    pub const DEFAULT_TRACKS: usize = 64;
    pub const DEFAULT_TICKS_PER_QUARTER: i32 = 120;
    pub const DEFAULT_BPM: i32 = 120;
    /// Largest time base a song or MIDI file header can hold
    pub const MAX_TICKS_PER_QUARTER: i32 = 0x7FFF;

    pub fn new(track_count: usize) -> Self {
        Self {
            tracks: (0..track_count.max(1)).map(|_| Track::new()).collect(),
            ticks_per_quarter: Self::DEFAULT_TICKS_PER_QUARTER,
            max_quarters: 400,
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn track_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.tracks.get_mut(index)
    }

    /// Master track (tempo and meter)
    pub fn master(&self) -> &Track {
        &self.tracks[0]
    }

    pub fn master_mut(&mut self) -> &mut Track {
        &mut self.tracks[0]
    }

    pub fn ticks_per_quarter(&self) -> i32 {
        self.ticks_per_quarter
    }

    /// Change the time base, rescaling every clock and note length. Values
    /// outside `1..=MAX_TICKS_PER_QUARTER` are refused.
    pub fn set_ticks_per_quarter(&mut self, ticks_per_quarter: i32) {
        let old = self.ticks_per_quarter as i64;
        let new = ticks_per_quarter as i64;
        if !(1..=Self::MAX_TICKS_PER_QUARTER).contains(&ticks_per_quarter) {
            warn!(ticks_per_quarter, "Time base out of range, keeping {}", old);
            return;
        }
        if new == old {
            return;
        }
        let scale = |clock: i32| {
            (2 * clock as i64 * new + old)
                .div_euclid(2 * old)
                .clamp(i32::MIN as i64, i32::MAX as i64) as i32
        };
        for track in self.tracks.iter_mut() {
            track.rescale(scale);
        }
        self.ticks_per_quarter = ticks_per_quarter;
        info!(from = old, to = new, "Rescaled song time base");
    }

    /// Adopt a time base without touching any clock
    pub(crate) fn set_time_base(&mut self, ticks_per_quarter: i32) {
        self.ticks_per_quarter = ticks_per_quarter.clamp(1, Self::MAX_TICKS_PER_QUARTER);
    }

    pub fn intro_length(&self) -> i32 {
        self.master().intro_length as i32
    }

    pub fn set_intro_length(&mut self, bars: u8) {
        self.master_mut().intro_length = bars;
    }

    pub fn last_clock(&self) -> Clock {
        self.tracks.iter().map(Track::last_clock).max().unwrap_or(0)
    }

    pub fn clear(&mut self) {
        for track in self.tracks.iter_mut() {
            *track = Track::new();
        }
    }

    pub fn bar_info(&self) -> BarInfo<'_> {
        BarInfo::new(self.master(), self.ticks_per_quarter)
    }

    /// Render as `bar:beat:tick`, bar shifted by the intro length
    pub fn clock_to_string(&self, clock: Clock) -> String {
        let mut bar = self.bar_info();
        bar.set_clock(clock);
        let ticks_per_count = bar.ticks_per_count();
        let offset = clock - bar.clock();
        format!(
            "{:3}:{}:{:03}",
            bar.bar_index() + 1 - self.intro_length(),
            offset / ticks_per_count + 1,
            offset % ticks_per_count
        )
    }

    /// Parse `bar:beat:tick`; anything unparseable yields clock 0
    pub fn string_to_clock(&self, text: &str) -> Clock {
        let fields: Vec<Option<i32>> = text.split(':').map(|f| f.trim().parse().ok()).collect();
        let [Some(bar_number), Some(count), Some(tick)] = fields[..] else {
            warn!(input = text, "Cannot parse position, using 0");
            return 0;
        };
        let mut bar = self.bar_info();
        let clock = bar_number
            .checked_sub(1)
            .and_then(|b| b.checked_add(self.intro_length()))
            .filter(|&b| bar.set_bar(b))
            .and_then(|_| count.checked_sub(1))
            .and_then(|c| c.checked_mul(bar.ticks_per_count()))
            .and_then(|offset| offset.checked_add(tick))
            .and_then(|offset| bar.clock().checked_add(offset));
        clock.unwrap_or_else(|| {
            warn!(input = text, "Position out of range, using 0");
            0
        })
    }

    /// Tempo of the first tempo event on the master track
    pub fn tempo_bpm(&self) -> i32 {
        self.master()
            .events()
            .iter()
            .filter(|e| !e.is_killed())
            .find_map(Event::as_tempo)
            .map_or(Self::DEFAULT_BPM, SetTempo::bpm)
    }

    pub fn set_tempo_bpm(&mut self, bpm: i32) {
        let master = self.master_mut();
        let existing = master.events().iter().position(|e| {
            !e.is_killed() && e.clock() == 0 && e.as_tempo().is_some()
        });
        let tempo = SetTempo::from_bpm(bpm);
        match existing {
            Some(index) => {
                if let Some(event) = master.event_mut(index) {
                    event.kind = EventKind::SetTempo(tempo);
                }
            }
            None => master.put(Event::new(0, EventKind::SetTempo(tempo))),
        }
    }

    /// Put a meter change at the start of `bar`, replacing one already there
    pub fn set_meter_change(&mut self, bar: i32, numerator: u8, denominator_power: u8) -> Result<()> {
        let clock = {
            let mut info = self.bar_info();
            if !info.set_bar(bar) {
                return Err(JazzError::OutOfRange("bar"));
            }
            info.clock()
        };
        let meter = Event::time_signature(clock, numerator, denominator_power)?;
        let master = self.master_mut();
        master.kill_range(clock, clock.saturating_add(1), |e| e.as_time_signature().is_some());
        master.put(meter);
        master.cleanup();
        Ok(())
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut frames = FrameWriter::new(writer);
        let header = SongHeader {
            ticks_per_quarter: u16::try_from(self.ticks_per_quarter)
                .map_err(|_| JazzError::OutOfRange("ticks per quarter"))?,
            max_quarters: u32::try_from(self.max_quarters)
                .map_err(|_| JazzError::OutOfRange("song length"))?,
            track_count: u16::try_from(self.tracks.len())
                .map_err(|_| JazzError::OutOfRange("track count"))?,
        };
        frames.write_header(&header)?;
        for track in &self.tracks {
            track.write(&mut frames)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let mut frames = FrameReader::new(reader);
        let header = frames.read_header()?;
        let mut song = Song::new(header.track_count as usize);
        song.set_time_base(header.ticks_per_quarter as i32);
        song.max_quarters = header.max_quarters as i32;
        for track in song.tracks.iter_mut() {
            track.read(&mut frames)?;
        }
        Ok(song)
    }

    /// Save through a temporary file so a failed write never truncates `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        fs::write(&tmp, &bytes)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(JazzError::Io(e));
        }
        info!(path = %path.display(), bytes = bytes.len(), "Saved song");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let song = Self::read_from(bytes.as_slice())?;
        debug!(path = %path.display(), tracks = song.track_count(), "Loaded song");
        Ok(song)
    }
}
