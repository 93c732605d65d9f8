//! System exclusive helpers
//!
//! SysEx payloads are stored without the leading `0xF0` and with the
//! trailing `0xF7`, so a Roland block looks like
//! `41 dev model cmd addr.. data.. checksum F7`.

const ROLAND_ID: u8 = 0x41;
const ROLAND_RQ1: u8 = 0x11;
const ROLAND_DT1: u8 = 0x12;

/// Identifier of a known SysEx message, as resolved by a synthesizer table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SysexId(pub u32);

/// Synthesizer SysEx table lookup, provided by the host application
pub trait SysexService {
    /// Identify a SysEx payload, if the table knows it
    fn sysex_id(&self, data: &[u8]) -> Option<SysexId>;

    fn fix_checksum(&self, data: &mut [u8]) {
        fix_checksum(data);
    }
}

/// Roland data set (DT1) or data request (RQ1) block
pub fn is_roland_block(data: &[u8]) -> bool {
    data.len() >= 6 && data[0] == ROLAND_ID && matches!(data[3], ROLAND_RQ1 | ROLAND_DT1)
}

/// Recompute the Roland checksum over address and data bytes.
pub fn fix_checksum(data: &mut [u8]) {
    let len = data.len();
    if len < 6 {
        return;
    }
    let sum = data[4..len - 2]
        .iter()
        .fold(0u32, |acc, &b| acc.wrapping_add(b as u32));
    data[len - 2] = (0x80u32.wrapping_sub(sum) & 0x7F) as u8;
    data[len - 1] = 0xF7;
}
