//! Width adapters: repack a stream between two payload widths.
//!
//! [`Gearbox`] handles arbitrary width pairs (including non-integer
//! ratios) with a bit-level accumulator; [`SimpleGearbox`] is the cheaper
//! variant restricted to output widths that are proper divisors of the
//! input width. Both keep packet boundary markers attached to the data
//! bits that carried them, so a single input-side `last` survives any
//! conversion ratio and reappears on the output word that retires its
//! originating bit.

use crate::error::{Result, StoreError};
use crate::stream::flow::{Item, Sink, Source};

/// Widest supported payload, in bits.
pub const MAX_WIDTH: u32 = 64;

/// Accumulator capacity in bits: one maximal input word plus one maximal
/// output word in flight at once.
const ACC_BITS: u32 = 128;

fn low_mask(bits: u32) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

/// Bit-level width adapter for arbitrary (including non-integer) ratios.
///
/// Input words are absorbed into a shift-register-style accumulator at the
/// current fill offset; whenever the fill reaches `output_width`, an
/// output word becomes available and its bits are retired. `last` markers
/// ride on the most significant bit of their input word and `first`
/// markers on the least significant bit, tracked in parallel accumulators
/// of the same width; an output asserts a marker exactly when the retired
/// bit span contains it.
#[derive(Debug)]
pub struct Gearbox {
    input_width: u32,
    output_width: u32,
    acc: u128,
    last_bits: u128,
    first_bits: u128,
    fill: u32,
}

impl Gearbox {
    /// Create a gearbox converting `input_width`-bit payloads to
    /// `output_width`-bit payloads.
    pub fn new(input_width: u32, output_width: u32) -> Result<Self> {
        for width in [input_width, output_width] {
            if width == 0 || width > MAX_WIDTH {
                return Err(StoreError::UnsupportedWidth {
                    width,
                    max: MAX_WIDTH,
                });
            }
        }
        Ok(Self {
            input_width,
            output_width,
            acc: 0,
            last_bits: 0,
            first_bits: 0,
            fill: 0,
        })
    }

    /// Bits currently held in the accumulator.
    pub fn fill(&self) -> u32 {
        self.fill
    }
}

impl Sink<u64> for Gearbox {
    fn ready(&self) -> bool {
        self.fill + self.input_width <= ACC_BITS
    }

    fn accept(&mut self, item: Item<u64>) -> Result<(), Item<u64>> {
        if !self.ready() {
            return Err(item);
        }
        let payload = (item.payload as u128) & low_mask(self.input_width);
        self.acc |= payload << self.fill;
        if item.last {
            self.last_bits |= 1u128 << (self.fill + self.input_width - 1);
        }
        if item.first {
            self.first_bits |= 1u128 << self.fill;
        }
        self.fill += self.input_width;
        Ok(())
    }
}

impl Source<u64> for Gearbox {
    fn valid(&self) -> bool {
        self.fill >= self.output_width
    }

    fn take(&mut self) -> Option<Item<u64>> {
        if !self.valid() {
            return None;
        }
        let mask = low_mask(self.output_width);
        let item = Item {
            payload: (self.acc & mask) as u64,
            first: self.first_bits & mask != 0,
            last: self.last_bits & mask != 0,
        };
        self.acc >>= self.output_width;
        self.last_bits >>= self.output_width;
        self.first_bits >>= self.output_width;
        self.fill -= self.output_width;
        Some(item)
    }
}

/// Width adapter restricted to exact integer division ratios.
///
/// Holds one input word and deals it out as `input_width / output_width`
/// sub-words, low bits first. `first` is asserted on the first sub-word of
/// a marked word, `last` on the final sub-word. Cheaper than [`Gearbox`]
/// when the ratio allows it.
#[derive(Debug)]
pub struct SimpleGearbox {
    output_width: u32,
    factor: u32,
    current: Option<Item<u64>>,
    sub: u32,
}

impl SimpleGearbox {
    /// Create a down-converting gearbox; `output_width` must be a proper
    /// divisor of `input_width`.
    pub fn new(input_width: u32, output_width: u32) -> Result<Self> {
        for width in [input_width, output_width] {
            if width == 0 || width > MAX_WIDTH {
                return Err(StoreError::UnsupportedWidth {
                    width,
                    max: MAX_WIDTH,
                });
            }
        }
        if output_width >= input_width || input_width % output_width != 0 {
            return Err(StoreError::NonIntegerRatio {
                input_width,
                output_width,
            });
        }
        Ok(Self {
            output_width,
            factor: input_width / output_width,
            current: None,
            sub: 0,
        })
    }
}

impl Sink<u64> for SimpleGearbox {
    fn ready(&self) -> bool {
        self.current.is_none()
    }

    fn accept(&mut self, item: Item<u64>) -> Result<(), Item<u64>> {
        if self.current.is_some() {
            return Err(item);
        }
        self.current = Some(item);
        self.sub = 0;
        Ok(())
    }
}

impl Source<u64> for SimpleGearbox {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn take(&mut self) -> Option<Item<u64>> {
        let word = self.current.as_ref()?;
        let shift = self.sub * self.output_width;
        let out = Item {
            payload: (word.payload >> shift) & low_mask(self.output_width) as u64,
            first: word.first && self.sub == 0,
            last: word.last && self.sub == self.factor - 1,
        };
        self.sub += 1;
        if self.sub == self.factor {
            self.current = None;
        }
        Some(out)
    }
}
