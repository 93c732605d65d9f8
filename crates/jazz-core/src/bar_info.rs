//! Bar/clock cursor over the master track's meter changes

use crate::event::Clock;
use crate::track::Track;

/// Position of a bar start, derived by replaying meter events from clock 0.
///
/// Seeking always rescans from the beginning, so every meter change before
/// the target is honoured. A meter event that does not sit on a bar start
/// takes effect from the next bar.
#[derive(Debug, Clone)]
pub struct BarInfo<'a> {
    meter_track: &'a Track,
    ticks_per_quarter: i32,
    bar_index: i32,
    clock: Clock,
    counts_per_bar: i32,
    ticks_per_bar: i32,
    cursor: usize,
}

impl<'a> BarInfo<'a> {
    pub fn new(meter_track: &'a Track, ticks_per_quarter: i32) -> Self {
        let mut info = Self {
            meter_track,
            ticks_per_quarter: ticks_per_quarter.max(1),
            bar_index: 0,
            clock: 0,
            counts_per_bar: 4,
            ticks_per_bar: 4,
            cursor: 0,
        };
        info.rewind();
        info
    }

    fn rewind(&mut self) {
        self.bar_index = 0;
        self.clock = 0;
        self.counts_per_bar = 4;
        self.ticks_per_bar = 4 * self.ticks_per_quarter;
        self.cursor = 0;
        self.apply_through(0);
    }

    fn apply_through(&mut self, clock: Clock) {
        let events = self.meter_track.events();
        while let Some(event) = events.get(self.cursor) {
            if event.clock() > clock {
                break;
            }
            if !event.is_killed() {
                if let Some((ticks_per_bar, counts_per_bar)) = event.bar_effect(self.ticks_per_quarter) {
                    self.ticks_per_bar = ticks_per_bar.max(1);
                    self.counts_per_bar = counts_per_bar.max(1);
                }
            }
            self.cursor += 1;
        }
    }

    /// Advance to the start of the next bar; false once the clock cannot
    /// move any further
    pub fn next(&mut self) -> bool {
        let Some(clock) = self.clock.checked_add(self.ticks_per_bar) else {
            return false;
        };
        self.clock = clock;
        self.bar_index += 1;
        self.apply_through(clock);
        true
    }

    fn meters_exhausted(&self) -> bool {
        self.cursor >= self.meter_track.events().len()
    }

    /// Seek to the start of bar `bar` (0-based). Returns false, leaving the
    /// cursor on the last reachable bar, if that bar starts beyond `Clock::MAX`.
    pub fn set_bar(&mut self, bar: i32) -> bool {
        self.rewind();
        while self.bar_index < bar {
            if self.meters_exhausted() {
                // Bars after the last meter change are all the same length
                let clock = (bar - self.bar_index)
                    .checked_mul(self.ticks_per_bar)
                    .and_then(|span| self.clock.checked_add(span));
                let Some(clock) = clock else {
                    return false;
                };
                self.clock = clock;
                self.bar_index = bar;
                break;
            }
            if !self.next() {
                return false;
            }
        }
        true
    }

    /// Seek to the bar containing `clock`
    pub fn set_clock(&mut self, clock: Clock) {
        self.rewind();
        while let Some(end) = self.clock.checked_add(self.ticks_per_bar) {
            if end > clock {
                break;
            }
            if self.meters_exhausted() {
                let bars = (clock - self.clock) / self.ticks_per_bar;
                self.clock += bars * self.ticks_per_bar;
                self.bar_index += bars;
                break;
            }
            self.next();
        }
    }

    pub fn bar_index(&self) -> i32 {
        self.bar_index
    }

    /// Clock of the current bar start
    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn counts_per_bar(&self) -> i32 {
        self.counts_per_bar
    }

    pub fn ticks_per_bar(&self) -> i32 {
        self.ticks_per_bar
    }

    pub fn ticks_per_quarter(&self) -> i32 {
        self.ticks_per_quarter
    }

    /// Ticks per beat of the current meter
    pub fn ticks_per_count(&self) -> i32 {
        (self.ticks_per_bar / self.counts_per_bar).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    fn meter_track(changes: &[(Clock, u8, u8)]) -> Track {
        let mut track = Track::new();
        for &(clock, num, pow) in changes {
            track.put(Event::time_signature(clock, num, pow).unwrap());
        }
        track
    }

    #[test]
    fn test_default_four_four() {
        let track = Track::new();
        let mut info = BarInfo::new(&track, 120);
        assert_eq!(info.ticks_per_bar(), 480);
        assert_eq!(info.counts_per_bar(), 4);
        info.set_clock(600);
        assert_eq!(info.bar_index(), 1);
        assert_eq!(info.clock(), 480);
        info.set_clock(479);
        assert_eq!(info.bar_index(), 0);
    }

    #[test]
    fn test_meter_change_mid_song() {
        let track = meter_track(&[(0, 4, 2), (960, 3, 2)]);
        let mut info = BarInfo::new(&track, 120);
        info.set_bar(3);
        assert_eq!(info.clock(), 960 + 360);
        assert_eq!(info.ticks_per_bar(), 360);
        assert_eq!(info.counts_per_bar(), 3);

        info.set_clock(1400);
        assert_eq!(info.bar_index(), 3);
        info.set_clock(900);
        assert_eq!(info.bar_index(), 1);
        assert_eq!(info.ticks_per_bar(), 480);
    }

    #[test]
    fn test_compound_meter() {
        let track = meter_track(&[(0, 6, 3)]);
        let info = BarInfo::new(&track, 120);
        assert_eq!(info.ticks_per_bar(), 360);
        assert_eq!(info.counts_per_bar(), 6);
        assert_eq!(info.ticks_per_count(), 60);
    }

    #[test]
    fn test_off_bar_meter_waits_for_next_bar() {
        let track = meter_track(&[(100, 3, 2)]);
        let mut info = BarInfo::new(&track, 120);
        assert_eq!(info.ticks_per_bar(), 480);
        info.next();
        assert_eq!(info.clock(), 480);
        assert_eq!(info.ticks_per_bar(), 360);
        info.next();
        assert_eq!(info.clock(), 840);
    }

    #[test]
    fn test_seek_far_past_last_meter() {
        let track = meter_track(&[(0, 4, 2), (960, 3, 2)]);
        let mut info = BarInfo::new(&track, 120);
        assert!(info.set_bar(1000));
        assert_eq!(info.clock(), 960 + 998 * 360);
        info.set_clock(960 + 998 * 360 + 359);
        assert_eq!(info.bar_index(), 1000);
        info.set_clock(Clock::MAX);
        assert_eq!(info.bar_index(), 2 + (Clock::MAX - 960) / 360);
    }

    #[test]
    fn test_bar_beyond_clock_range() {
        let track = Track::new();
        let mut info = BarInfo::new(&track, 120);
        assert!(!info.set_bar(9_999_998));
        assert!(info.set_bar(10));
        info.set_clock(Clock::MAX - 100);
        let last = info.clock();
        assert!(!info.next());
        assert_eq!(info.clock(), last);
    }
}
