//! The transfer handshake.
//!
//! One step moves at most one item, and only when both sides agree:
//! the producer has an item to offer (`valid`) and the consumer can take
//! it (`ready`). In software the two control bits become return values,
//! [`Source::valid`] and [`Sink::ready`], and stability falls out of move
//! semantics: a producer surrenders an item only on a completed transfer,
//! so there is no window in which an offered value can be retracted or
//! mutated. The handshake cannot fail; it can only stall, bounded by
//! whatever backpressure the downstream applies.

/// One unit of data moved per transfer step.
///
/// The payload is a fixed-width value; `first`/`last` mark packet
/// boundaries and travel with the payload through every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Item<P> {
    /// The payload word.
    pub payload: P,
    /// Set on the first item of a packet.
    pub first: bool,
    /// Set on the final item of a packet.
    pub last: bool,
}

impl<P> Item<P> {
    /// An item with no boundary markers.
    pub fn new(payload: P) -> Self {
        Self {
            payload,
            first: false,
            last: false,
        }
    }

    /// An item marking the end of a packet.
    pub fn last(payload: P) -> Self {
        Self {
            payload,
            first: false,
            last: true,
        }
    }

    /// An item marking the start of a packet.
    pub fn first(payload: P) -> Self {
        Self {
            payload,
            first: true,
            last: false,
        }
    }

    /// Map the payload, keeping the boundary markers.
    pub fn map<Q>(self, f: impl FnOnce(P) -> Q) -> Item<Q> {
        Item {
            payload: f(self.payload),
            first: self.first,
            last: self.last,
        }
    }
}

/// Producer side of the handshake.
pub trait Source<P> {
    /// True when an item is currently offered (`valid`).
    fn valid(&self) -> bool;

    /// Consume and return the offered item, or `None` when idle.
    ///
    /// Callers must treat a returned item as transferred: it has been
    /// delivered exactly once and will not be offered again.
    fn take(&mut self) -> Option<Item<P>>;
}

/// Consumer side of the handshake.
pub trait Sink<P> {
    /// True when the next [`Sink::accept`] call will succeed (`ready`).
    ///
    /// A sink may flip to not-ready between steps at will, but between a
    /// `ready()` returning true and the immediately following `accept` on
    /// the same exclusive borrow there is no step boundary, so the accept
    /// must succeed.
    fn ready(&self) -> bool;

    /// Accept an item. On refusal the item is handed back unchanged, so a
    /// declined transfer never loses data.
    fn accept(&mut self, item: Item<P>) -> Result<(), Item<P>>;
}

/// Complete at most one transfer between `source` and `sink`.
///
/// Returns `true` iff an item moved. This is the only place in the crate
/// where an item changes hands between two stages; stages themselves only
/// implement the two trait halves.
pub fn transfer<P, S, K>(source: &mut S, sink: &mut K) -> bool
where
    S: Source<P> + ?Sized,
    K: Sink<P> + ?Sized,
{
    if !sink.ready() || !source.valid() {
        return false;
    }
    let Some(item) = source.take() else {
        return false;
    };
    match sink.accept(item) {
        Ok(()) => true,
        Err(_) => {
            // A sink that reported ready must accept on the same borrow.
            debug_assert!(false, "sink refused an item after reporting ready");
            false
        }
    }
}
