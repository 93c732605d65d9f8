//! Metronome settings

use serde::{Deserialize, Serialize};

use crate::event::{Clock, Event};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeInfo {
    /// Drum key for ordinary beats
    pub key_normal: u8,
    /// Drum key for the first beat of a bar
    pub key_accented: u8,
    pub velocity: u8,
    pub channel: u8,
    pub is_on: bool,
    pub is_accented: bool,
}

impl Default for MetronomeInfo {
    fn default() -> Self {
        Self {
            key_normal: 37,
            key_accented: 36,
            velocity: 127,
            channel: 9,
            is_on: false,
            is_accented: true,
        }
    }
}

impl MetronomeInfo {
    /// One click; its length is a quarter of the beat
    pub fn click(&self, clock: Clock, accented: bool, ticks_per_count: i32) -> Event {
        let key = if accented { self.key_accented } else { self.key_normal };
        Event::key_on(clock, self.channel, key, self.velocity, (ticks_per_count / 4).max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click() {
        let info = MetronomeInfo::default();
        let click = info.click(480, true, 120);
        let note = click.as_key_on().unwrap();
        assert_eq!(note.key, 36);
        assert_eq!(note.channel, 9);
        assert_eq!(note.length, 30);
        assert_eq!(click.clock(), 480);
    }
}
