//! Routing of bytes read from the MIDI device
//!
//! Transport bytes the host must see at once are forwarded as they arrive;
//! everything else is held in the record buffer until the client asks.

use byteorder::{BigEndian, ByteOrder};
use jazz_core::status;

/// First byte of a buffered-input reply
pub const FLUSH_MARKER: u8 = 0x7E;
/// Buffered input goes out in writes of at most this size
pub const FLUSH_CHUNK: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Append to the record buffer
    Record(u8),
    /// Send to the host immediately as one message
    Forward(Vec<u8>),
    /// Consumed without output
    Nothing,
}

/// Byte classifier with song-position state kept across reads
#[derive(Debug, Default)]
pub struct InputClassifier {
    song_pointer: Option<Vec<u8>>,
}

impl InputClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&mut self, byte: u8) -> Routed {
        match byte {
            status::START_PLAY..=status::CLOCK_TO_HOST => Routed::Forward(vec![byte]),
            status::RESET => Routed::Nothing,
            status::MIDI_CLOCK => Routed::Record(byte),
            status::SONG_POINTER => {
                self.song_pointer = Some(vec![byte]);
                Routed::Nothing
            }
            _ => match self.song_pointer.take() {
                Some(mut message) if byte < 0x80 => {
                    message.push(byte);
                    if message.len() == 3 {
                        Routed::Forward(message)
                    } else {
                        self.song_pointer = Some(message);
                        Routed::Nothing
                    }
                }
                // A status byte cuts an unfinished song position short
                _ => Routed::Record(byte),
            },
        }
    }

    /// True while a song position message is only partly received
    pub fn is_pending(&self) -> bool {
        self.song_pointer.is_some()
    }
}

/// Device input waiting for the client's doorbell
#[derive(Debug, Default)]
pub struct RecordBuffer {
    data: Vec<u8>,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, byte: u8) {
        self.data.push(byte);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// `[FLUSH_MARKER][u32 BE length]` for the current contents
    pub fn frame_header(&self) -> [u8; 5] {
        let mut header = [FLUSH_MARKER, 0, 0, 0, 0];
        BigEndian::write_u32(&mut header[1..], self.data.len() as u32);
        header
    }

    /// Contents split into flush-sized writes
    pub fn chunks(&self) -> std::slice::Chunks<'_, u8> {
        self.data.chunks(FLUSH_CHUNK)
    }

    pub fn reset(&mut self) {
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(classifier: &mut InputClassifier, buffer: &mut RecordBuffer, input: &[u8]) -> Vec<Vec<u8>> {
        let mut forwarded = Vec::new();
        for &byte in input {
            match classifier.classify(byte) {
                Routed::Record(b) => buffer.push(b),
                Routed::Forward(message) => forwarded.push(message),
                Routed::Nothing => {}
            }
        }
        forwarded
    }

    #[test]
    fn test_realtime_bypasses_buffer() {
        let mut classifier = InputClassifier::new();
        let mut buffer = RecordBuffer::new();
        let forwarded = run(&mut classifier, &mut buffer, &[0x90, 0x3C, 0x40, 0xFD, 0x41]);
        assert_eq!(forwarded, vec![vec![0xFD]]);
        assert_eq!(buffer.as_slice(), &[0x90, 0x3C, 0x40, 0x41]);
    }

    #[test]
    fn test_clock_and_reset() {
        let mut classifier = InputClassifier::new();
        let mut buffer = RecordBuffer::new();
        let forwarded = run(&mut classifier, &mut buffer, &[0xF8, 0xFF, 0xFA, 0xFB, 0xFC]);
        assert_eq!(forwarded, vec![vec![0xFA], vec![0xFB], vec![0xFC]]);
        assert_eq!(buffer.as_slice(), &[0xF8]);
    }

    #[test]
    fn test_song_pointer_across_reads() {
        let mut classifier = InputClassifier::new();
        let mut buffer = RecordBuffer::new();
        assert!(run(&mut classifier, &mut buffer, &[0x80, 0x3C, 0x00, 0xF2, 0x10]).is_empty());
        assert!(classifier.is_pending());
        let forwarded = run(&mut classifier, &mut buffer, &[0x02, 0x90]);
        assert_eq!(forwarded, vec![vec![0xF2, 0x10, 0x02]]);
        assert!(!classifier.is_pending());
        assert_eq!(buffer.as_slice(), &[0x80, 0x3C, 0x00, 0x90]);
    }

    #[test]
    fn test_realtime_inside_song_pointer() {
        let mut classifier = InputClassifier::new();
        let mut buffer = RecordBuffer::new();
        let forwarded = run(&mut classifier, &mut buffer, &[0xF2, 0x01, 0xFC, 0x02]);
        assert_eq!(forwarded, vec![vec![0xFC], vec![0xF2, 0x01, 0x02]]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_frame_header_and_chunks() {
        let mut buffer = RecordBuffer::new();
        for i in 0..2500u32 {
            buffer.push(i as u8);
        }
        assert_eq!(buffer.frame_header(), [0x7E, 0, 0, 0x09, 0xC4]);
        let sizes: Vec<_> = buffer.chunks().map(<[u8]>::len).collect();
        assert_eq!(sizes, vec![1024, 1024, 452]);
        buffer.reset();
        assert_eq!(buffer.frame_header(), [0x7E, 0, 0, 0, 0]);
    }
}
