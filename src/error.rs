//! Error types for the storage engine.
//!
//! Only conditions that stop a caller's current operation are errors:
//! configuration rejection, an expired bounded wait, arena I/O failure.
//! Conditions the pipeline is designed to survive (packet overflow, bus
//! errors, flush timeouts, lane desynchronization) are *faults*: they are
//! counted in [`crate::telemetry::FaultCounters`] and never propagate as
//! `Err`. See the error handling notes in the crate docs.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the engine error type.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Primary error type for the storage engine.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Configuration values parsed but failed semantic validation
    /// (e.g. a segment capacity that is not a whole number of bus words).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration file could not be parsed as TOML.
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A bounded wait expired before its condition became true.
    ///
    /// Every suspension point in the engine takes a caller-supplied budget;
    /// a consumer is handed this error rather than ever hanging.
    #[error("Timed out after {timeout:?} waiting for {what}")]
    Timeout {
        /// What the caller was waiting for.
        what: &'static str,
        /// The budget that expired.
        timeout: Duration,
    },

    /// Arena file or mapping I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A segment index outside the ring was requested.
    #[error("Segment index {index} out of range (ring has {count} segments)")]
    SegmentOutOfRange {
        /// The offending index.
        index: usize,
        /// Number of segments in the ring.
        count: usize,
    },

    /// The ring's single writer handle has already been handed out.
    ///
    /// The engine assumes exactly one producer per ring; a second
    /// `writer()` call is a wiring mistake, not a recoverable race.
    #[error("Ring writer already taken (exactly one producer per ring)")]
    WriterTaken,

    /// A stream stage was constructed with an unsupported payload width.
    #[error("Unsupported width {width} (supported range 1..={max})")]
    UnsupportedWidth {
        /// The requested width in bits.
        width: u32,
        /// The largest supported width.
        max: u32,
    },

    /// The simple gearbox requires the output width to be a proper divisor
    /// of the input width.
    #[error("Width {output_width} is not a proper divisor of {input_width}")]
    NonIntegerRatio {
        /// Input width in bits.
        input_width: u32,
        /// Output width in bits.
        output_width: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::Timeout {
            what: "next completed segment",
            timeout: Duration::from_millis(20),
        };
        assert!(err.to_string().contains("next completed segment"));

        let err = StoreError::SegmentOutOfRange { index: 7, count: 4 };
        assert_eq!(
            err.to_string(),
            "Segment index 7 out of range (ring has 4 segments)"
        );
    }

    #[test]
    fn test_io_conversion() {
        fn fails() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(StoreError::Io(_))));
    }
}
