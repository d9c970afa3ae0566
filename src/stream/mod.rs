//! Stream primitives: the transfer handshake and the stages built on it.
//!
//! Everything in this module moves [`Item`]s one at a time under the
//! handshake contract of [`flow`]: a transfer happens only when the
//! producer offers an item and the consumer accepts it in the same step,
//! so arbitrary stalling on either side can never lose or duplicate data.

pub mod fifo;
pub mod flow;
pub mod gearbox;
pub mod tee;

pub use fifo::{cross_domain, ElasticBuffer, FifoConsumer, FifoProducer};
pub use flow::{transfer, Item, Sink, Source};
pub use gearbox::{Gearbox, SimpleGearbox};
pub use tee::{Combiner, Tee};
