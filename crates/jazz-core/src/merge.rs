//! Playback composition: merging tracks, PlayTrack expansion, metronome

use tracing::{debug, trace, warn};

use crate::event::{Clock, Event};
use crate::metronome::MetronomeInfo;
use crate::song::Song;
use crate::track::TrackState;

/// Nesting limit for PlayTrack expansion
pub const MAX_PLAY_TRACK_DEPTH: u32 = 100;

impl Song {
    /// Append every event playing in `[from, to)` to `destination`, shifted
    /// by `delta`. Only tracks whose audio mode equals `audio_mode` take
    /// part; if any track is soloed only solo tracks play.
    pub fn merge_tracks(
        &self,
        from: Clock,
        to: Clock,
        destination: &mut Vec<Event>,
        metronome: &MetronomeInfo,
        delta: Clock,
        audio_mode: bool,
    ) {
        if from >= to {
            return;
        }
        if metronome.is_on {
            self.make_metronome(from, to, destination, metronome, delta);
        }

        let solo = self.tracks().iter().any(|t| t.state == TrackState::Solo);
        let wanted = if solo { TrackState::Solo } else { TrackState::Play };

        for (index, track) in self.tracks().iter().enumerate() {
            if track.audio_mode != audio_mode || track.state != wanted {
                continue;
            }
            for event in track.range(from, to) {
                let Some(clock) = event.clock().checked_add(delta) else {
                    warn!(clock = event.clock(), delta, "Shifted event out of range, skipping");
                    continue;
                };
                let mut copy = event.clone();
                copy.set_clock(clock);
                copy.device = track.device;
                if copy.as_play_track().is_some() {
                    let mut expanding = vec![index];
                    self.expand_play_track(&copy, destination, 0, &mut expanding);
                } else {
                    destination.push(copy);
                }
            }
        }
    }

    /// Tile the track referenced by `play_event` over the event's length.
    /// Events take the PlayTrack's clock and device; notes are transposed.
    pub fn merge_play_track_event(&self, play_event: &Event, destination: &mut Vec<Event>, depth: u32) {
        self.expand_play_track(play_event, destination, depth, &mut Vec::new());
    }

    fn expand_play_track(
        &self,
        play_event: &Event,
        destination: &mut Vec<Event>,
        depth: u32,
        expanding: &mut Vec<usize>,
    ) {
        if depth > MAX_PLAY_TRACK_DEPTH {
            trace!(depth, "PlayTrack nesting limit reached");
            return;
        }
        let Some(play) = play_event.as_play_track() else {
            return;
        };
        let Some((index, track)) = usize::try_from(play.track)
            .ok()
            .and_then(|i| self.track(i).map(|t| (i, t)))
        else {
            warn!(track = play.track, "PlayTrack references a missing track");
            return;
        };
        if expanding.contains(&index) {
            debug!(track = index, "Skipping recursive PlayTrack");
            return;
        }

        expanding.push(index);
        let loop_length = track.loop_length();
        let mut loop_offset = 0;
        while loop_offset < play.length {
            let Some(base) = play_event.clock().checked_add(loop_offset) else {
                warn!(track = index, "PlayTrack runs past the clock range");
                break;
            };
            for event in track.range(0, play.length - loop_offset) {
                if event.is_end_of_track() {
                    continue;
                }
                let Some(clock) = event.clock().checked_add(base) else {
                    warn!(clock = event.clock(), track = index, "Tiled event out of range, skipping");
                    continue;
                };
                let mut copy = event.clone();
                copy.set_clock(clock);
                copy.device = play_event.device;
                if let Some(note) = copy.as_key_on_mut() {
                    note.key = (note.key as i32 + play.transpose).clamp(0, 127) as u8;
                }
                if copy.as_play_track().is_some() {
                    self.expand_play_track(&copy, destination, depth + 1, expanding);
                } else {
                    destination.push(copy);
                }
            }
            if loop_length <= 0 {
                break;
            }
            let Some(next) = loop_offset.checked_add(loop_length) else {
                break;
            };
            loop_offset = next;
        }
        expanding.pop();
    }

    /// Metronome clicks for every beat in `[from, to)`, plus an accented
    /// click on each bar start when accenting is enabled
    pub fn make_metronome(
        &self,
        from: Clock,
        to: Clock,
        destination: &mut Vec<Event>,
        metronome: &MetronomeInfo,
        delta: Clock,
    ) {
        let mut bar = self.bar_info();
        bar.set_clock(from);
        while bar.clock() < to {
            let ticks_per_count = bar.ticks_per_count();
            for count in 0..bar.counts_per_bar() {
                let Some(clock) = bar.clock().checked_add(count * ticks_per_count) else {
                    break;
                };
                if clock >= to {
                    break;
                }
                if clock < from {
                    continue;
                }
                let Some(shifted) = clock.checked_add(delta) else {
                    warn!(clock, delta, "Metronome click out of range, skipping");
                    continue;
                };
                if count == 0 && metronome.is_accented {
                    destination.push(metronome.click(shifted, true, ticks_per_count));
                }
                destination.push(metronome.click(shifted, false, ticks_per_count));
            }
            if !bar.next() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DeviceId;

    fn song_with_notes() -> Song {
        let mut song = Song::new(4);
        song.master_mut().put(Event::time_signature(0, 4, 2).unwrap());
        let piano = song.track_mut(1).unwrap();
        piano.device = DeviceId(1);
        piano.put(Event::key_on(0, 0, 60, 100, 100));
        piano.put(Event::key_on(240, 0, 64, 100, 100));
        piano.put(Event::key_on(480, 0, 67, 100, 100));
        let bass = song.track_mut(2).unwrap();
        bass.device = DeviceId(2);
        bass.put(Event::key_on(120, 1, 36, 100, 100));
        song
    }

    fn metronome_off() -> MetronomeInfo {
        MetronomeInfo::default()
    }

    #[test]
    fn test_merge_window_and_delta() {
        let song = song_with_notes();
        let mut out = Vec::new();
        song.merge_tracks(0, 480, &mut out, &metronome_off(), 1000, false);
        let mut got: Vec<_> = out
            .iter()
            .filter(|e| e.as_key_on().is_some())
            .map(|e| (e.clock(), e.pitch(), e.device))
            .collect();
        got.sort_by_key(|&(clock, _, _)| clock);
        assert_eq!(
            got,
            vec![
                (1000, 60, DeviceId(1)),
                (1120, 36, DeviceId(2)),
                (1240, 64, DeviceId(1)),
            ]
        );
    }

    #[test]
    fn test_empty_window() {
        let song = song_with_notes();
        let mut out = Vec::new();
        let mut metronome = metronome_off();
        metronome.is_on = true;
        song.merge_tracks(480, 480, &mut out, &metronome, 0, false);
        assert!(out.is_empty());
    }

    #[test]
    fn test_merge_is_deterministic() {
        let song = song_with_notes();
        let mut first = Vec::new();
        let mut second = Vec::new();
        song.merge_tracks(0, 960, &mut first, &metronome_off(), 0, false);
        song.merge_tracks(0, 960, &mut second, &metronome_off(), 0, false);
        assert_eq!(first, second);
    }

    #[test]
    fn test_solo_and_mute() {
        let mut song = song_with_notes();
        song.track_mut(1).unwrap().state = TrackState::Mute;
        let mut out = Vec::new();
        song.merge_tracks(0, 960, &mut out, &metronome_off(), 0, false);
        assert!(out.iter().all(|e| e.device != DeviceId(1)));

        song.track_mut(1).unwrap().state = TrackState::Play;
        song.track_mut(2).unwrap().state = TrackState::Solo;
        out.clear();
        song.merge_tracks(0, 960, &mut out, &metronome_off(), 0, false);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].device, DeviceId(2));
    }

    #[test]
    fn test_audio_mode_filter() {
        let mut song = song_with_notes();
        song.track_mut(2).unwrap().audio_mode = true;
        let mut out = Vec::new();
        song.merge_tracks(0, 960, &mut out, &metronome_off(), 0, true);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pitch(), 36);
    }

    #[test]
    fn test_play_track_tiles_and_transposes() {
        let mut song = Song::new(4);
        let pattern = song.track_mut(2).unwrap();
        pattern.state = TrackState::Mute;
        pattern.put(Event::key_on(0, 0, 60, 100, 60));
        pattern.put(Event::key_on(120, 0, 62, 100, 60));
        pattern.put(Event::end_of_track(240));
        let arrangement = song.track_mut(1).unwrap();
        arrangement.device = DeviceId(3);
        arrangement.put(Event::play_track(480, 2, 12, 600));

        let mut out = Vec::new();
        song.merge_tracks(0, 960, &mut out, &metronome_off(), 0, false);
        let got: Vec<_> = out.iter().map(|e| (e.clock(), e.pitch())).collect();
        assert_eq!(
            got,
            vec![(480, 72), (600, 74), (720, 72), (840, 74), (960, 72)]
        );
        assert!(out.iter().all(|e| e.device == DeviceId(3)));
        assert!(out.iter().all(|e| e.as_play_track().is_none()));
    }

    #[test]
    fn test_nested_play_track() {
        let mut song = Song::new(4);
        song.track_mut(3).unwrap().put(Event::key_on(10, 0, 50, 100, 10));
        song.track_mut(3).unwrap().put(Event::end_of_track(100));
        song.track_mut(2).unwrap().put(Event::play_track(100, 3, 2, 50));
        song.track_mut(2).unwrap().put(Event::end_of_track(1000));

        let mut out = Vec::new();
        let outer = Event::play_track(1000, 2, 5, 500);
        song.merge_play_track_event(&outer, &mut out, 0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].clock(), 1000 + 100 + 10);
        // Inner transpose only; the outer one applies to the outer track's notes
        assert_eq!(out[0].pitch(), 52);
    }

    #[test]
    fn test_self_reference_terminates() {
        let mut song = Song::new(3);
        let track = song.track_mut(1).unwrap();
        track.put(Event::key_on(0, 0, 60, 100, 10));
        track.put(Event::play_track(0, 1, 0, 960));
        track.put(Event::end_of_track(240));

        let mut out = Vec::new();
        song.merge_tracks(0, 480, &mut out, &metronome_off(), 0, false);
        assert!(out.len() < 100);
        assert_eq!(out.iter().filter(|e| e.as_key_on().is_some()).count(), 1);

        out.clear();
        let direct = Event::play_track(0, 1, 0, 960);
        song.merge_play_track_event(&direct, &mut out, 0);
        assert_eq!(out.iter().filter(|e| e.as_key_on().is_some()).count(), 4);
    }

    #[test]
    fn test_depth_limit() {
        let mut song = Song::new(2);
        song.track_mut(1).unwrap().put(Event::key_on(0, 0, 60, 100, 10));
        let mut out = Vec::new();
        let play = Event::play_track(0, 1, 0, 10);
        song.merge_play_track_event(&play, &mut out, MAX_PLAY_TRACK_DEPTH + 1);
        assert!(out.is_empty());
        song.merge_play_track_event(&play, &mut out, MAX_PLAY_TRACK_DEPTH);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_missing_track_reference() {
        let song = Song::new(2);
        let mut out = Vec::new();
        song.merge_play_track_event(&Event::play_track(0, 40, 0, 10), &mut out, 0);
        song.merge_play_track_event(&Event::play_track(0, -1, 0, 10), &mut out, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_events_shifted_out_of_range_are_skipped() {
        let song = song_with_notes();
        let mut out = Vec::new();
        song.merge_tracks(0, 960, &mut out, &metronome_off(), Clock::MAX - 200, false);
        let clocks: Vec<_> = out
            .iter()
            .filter(|e| e.as_key_on().is_some())
            .map(Event::clock)
            .collect();
        assert_eq!(clocks, vec![Clock::MAX - 200, Clock::MAX - 80]);
    }

    #[test]
    fn test_tiling_stops_at_clock_limit() {
        let mut song = Song::new(3);
        let pattern = song.track_mut(2).unwrap();
        pattern.put(Event::key_on(0, 0, 60, 100, 10));
        pattern.put(Event::end_of_track(240));
        let mut out = Vec::new();
        let play = Event::play_track(Clock::MAX - 500, 2, 0, Clock::MAX);
        song.merge_play_track_event(&play, &mut out, 0);
        let clocks: Vec<_> = out.iter().map(Event::clock).collect();
        assert_eq!(clocks, vec![Clock::MAX - 500, Clock::MAX - 260, Clock::MAX - 20]);
    }

    #[test]
    fn test_metronome_at_clock_limit() {
        let song = Song::new(1);
        let mut metronome = MetronomeInfo::default();
        metronome.is_on = true;
        metronome.is_accented = false;
        let mut out = Vec::new();
        song.make_metronome(Clock::MAX - 200, Clock::MAX, &mut out, &metronome, 0);
        assert!(out.iter().all(|e| e.clock() >= Clock::MAX - 200));
        out.clear();
        song.make_metronome(0, 240, &mut out, &metronome, Clock::MAX - 100);
        assert_eq!(out.iter().map(Event::clock).collect::<Vec<_>>(), vec![Clock::MAX - 100]);
    }

    #[test]
    fn test_metronome_bar() {
        let song = song_with_notes();
        let mut metronome = MetronomeInfo::default();
        metronome.is_on = true;
        let mut out = Vec::new();
        song.make_metronome(0, 480, &mut out, &metronome, 0);

        let normal: Vec<_> = out
            .iter()
            .filter(|e| e.pitch() == metronome.key_normal as i32)
            .map(Event::clock)
            .collect();
        let accented: Vec<_> = out
            .iter()
            .filter(|e| e.pitch() == metronome.key_accented as i32)
            .map(Event::clock)
            .collect();
        assert_eq!(normal, vec![0, 120, 240, 360]);
        assert_eq!(accented, vec![0]);
    }

    #[test]
    fn test_metronome_partial_window() {
        let song = song_with_notes();
        let mut metronome = MetronomeInfo::default();
        metronome.is_on = true;
        metronome.is_accented = false;
        let mut out = Vec::new();
        song.make_metronome(300, 600, &mut out, &metronome, 10);
        let clocks: Vec<_> = out.iter().map(Event::clock).collect();
        assert_eq!(clocks, vec![370, 490]);
    }
}
