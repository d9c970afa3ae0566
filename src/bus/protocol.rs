//! Burst bus protocol types.
//!
//! The bus is a two-phase protocol: an address phase announcing a burst
//! (start address, length, type) and a data phase carrying one beat per
//! word. Write beats carry a byte-enable mask; read beats carry a
//! per-beat response code. A request is *outstanding* between its address
//! phase being accepted and its data phase completing.

/// Bytes per bus word (and per data beat).
pub const WORD_BYTES: u64 = 8;

/// How consecutive beats of a burst map to addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstType {
    /// Every beat targets the burst's start address.
    Fixed,
    /// Beat `i` targets `address + i * WORD_BYTES`.
    Incr,
}

/// Response code returned on the data phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusResponse {
    /// Request completed normally.
    Okay,
    /// The target accepted the address but could not complete the data
    /// phase coherently (e.g. a malformed burst).
    SlaveError,
    /// No target claims the address range.
    DecodeError,
}

impl BusResponse {
    /// True for [`BusResponse::Okay`].
    pub fn is_ok(self) -> bool {
        matches!(self, BusResponse::Okay)
    }
}

/// Address-phase request describing one burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRequest {
    /// Address of the first beat.
    pub address: u64,
    /// Number of beats in the burst (1-based).
    pub beats: u32,
    /// Address progression across beats.
    pub burst_type: BurstType,
}

impl AddressRequest {
    /// An incrementing burst starting at `address` with `beats` beats.
    pub fn incr(address: u64, beats: u32) -> Self {
        Self {
            address,
            beats,
            burst_type: BurstType::Incr,
        }
    }

    /// Bytes covered by the burst (for [`BurstType::Incr`]).
    pub fn span(&self) -> u64 {
        u64::from(self.beats) * WORD_BYTES
    }
}

/// One write data beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteBeat {
    /// Data word.
    pub data: u64,
    /// Set on the final beat of the burst.
    pub last: bool,
    /// Per-byte write enable, bit `i` gating byte `i` of the word.
    pub byte_enable: u8,
}

impl WriteBeat {
    /// A full-word beat with every byte enabled.
    pub fn full(data: u64, last: bool) -> Self {
        Self {
            data,
            last,
            byte_enable: 0xFF,
        }
    }
}

/// One read data beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBeat {
    /// Data word; undefined when `resp` is not OK.
    pub data: u64,
    /// Set on the final beat of the burst.
    pub last: bool,
    /// Completion status for this beat.
    pub resp: BusResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_span() {
        let req = AddressRequest::incr(0x1000, 16);
        assert_eq!(req.span(), 128);
        assert_eq!(req.burst_type, BurstType::Incr);
    }

    #[test]
    fn test_full_beat_enables_every_byte() {
        let beat = WriteBeat::full(0xDEAD_BEEF, true);
        assert_eq!(beat.byte_enable, 0xFF);
        assert!(beat.last);
    }
}
