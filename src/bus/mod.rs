//! The addressable memory side of the engine: the burst bus protocol and
//! the arena that serves it in-process.

pub mod arena;
pub mod protocol;

pub use arena::{Arena, ArenaBus};
pub use protocol::{AddressRequest, BurstType, BusResponse, ReadBeat, WriteBeat, WORD_BYTES};
