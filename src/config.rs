//! Engine configuration.
//!
//! All knobs live in one explicitly-passed [`EngineConfig`]; there is no
//! ambient global state. Values deserialize from TOML and are checked by
//! [`EngineConfig::validate`] before an engine is built, so a config that
//! parses but is logically inconsistent is rejected up front with a
//! [`StoreError::Configuration`] instead of misbehaving at runtime.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::bus::protocol::WORD_BYTES;
use crate::error::{Result, StoreError};

/// Configuration for one packet ring engine instance.
///
/// # Example
///
/// ```
/// use framestore::EngineConfig;
///
/// let config: EngineConfig = toml::from_str(
///     r#"
///     segment_capacity = 800
///     segment_count = 4
///     flush_timeout = "50ms"
///     "#,
/// )
/// .unwrap();
/// config.validate().unwrap();
/// assert_eq!(config.segment_count, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Bytes per ring segment. Must be a non-zero multiple of the bus word
    /// size; one segment holds exactly one packet.
    pub segment_capacity: u64,

    /// Number of segments in the ring.
    pub segment_count: usize,

    /// Address at which the arena appears on the memory bus. Segment `i`
    /// occupies `[base + i * segment_capacity, base + (i + 1) * segment_capacity)`.
    pub arena_base_address: u64,

    /// Upper bound on burst requests whose address phase has been accepted
    /// but whose data phase has not completed. The engine throttles its
    /// input at this level.
    pub max_outstanding: u32,

    /// Budget for draining outstanding requests before segment rotation.
    /// An expired flush force-resets the ledger and is counted as a fault.
    #[serde(with = "humantime_serde")]
    pub flush_timeout: Duration,

    /// Longest burst the engine will build, in beats.
    pub max_burst_length: u32,

    /// Steps a partially built burst may sit idle before it is closed and
    /// issued anyway.
    pub burst_idle_timeout: u32,

    /// Steps between a request's address phase completing and its data
    /// phase becoming available on the in-process bus.
    pub bus_response_latency: u32,

    /// Largest lag, in whole segments, a latest-policy reader is expected
    /// to accumulate. The skip-ahead policy is only sound while the writer
    /// cannot lap a reader past the segment it is consuming, so this must
    /// leave headroom: `max_reader_lag_segments <= segment_count - 2`.
    pub max_reader_lag_segments: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            segment_capacity: 8 * 1024 * 1024,
            segment_count: 4,
            arena_base_address: 0x0f80_0000,
            max_outstanding: 8,
            flush_timeout: Duration::from_millis(50),
            max_burst_length: 16,
            burst_idle_timeout: 31,
            bus_response_latency: 2,
            max_reader_lag_segments: 1,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from a TOML document. Missing keys fall back
    /// to defaults; unknown keys are rejected.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Check semantic consistency of the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.segment_capacity == 0 {
            return Err(StoreError::Configuration(
                "segment_capacity must be non-zero".into(),
            ));
        }
        if self.segment_capacity % WORD_BYTES != 0 {
            return Err(StoreError::Configuration(format!(
                "segment_capacity {} is not a multiple of the {}-byte bus word",
                self.segment_capacity, WORD_BYTES
            )));
        }
        if self.segment_count < 2 {
            return Err(StoreError::Configuration(
                "segment_count must be at least 2 (one being written, one complete)".into(),
            ));
        }
        if self.max_outstanding == 0 {
            return Err(StoreError::Configuration(
                "max_outstanding must be at least 1".into(),
            ));
        }
        if self.max_burst_length == 0 || self.max_burst_length > 256 {
            return Err(StoreError::Configuration(format!(
                "max_burst_length {} outside supported range 1..=256",
                self.max_burst_length
            )));
        }
        if self.flush_timeout.is_zero() {
            return Err(StoreError::Configuration(
                "flush_timeout must be non-zero".into(),
            ));
        }
        // The latest reader serves (write_index - 1) with no lap protection;
        // the ring must be deep enough that the expected reader lag cannot
        // reach back into the segment being written.
        if self.max_reader_lag_segments > self.segment_count - 2 {
            return Err(StoreError::Configuration(format!(
                "max_reader_lag_segments {} needs segment_count >= {} (have {})",
                self.max_reader_lag_segments,
                self.max_reader_lag_segments + 2,
                self.segment_count
            )));
        }
        Ok(())
    }

    /// Total arena size in bytes.
    pub fn arena_len(&self) -> u64 {
        self.segment_capacity * self.segment_count as u64
    }

    /// Bus address of segment `index`'s first byte.
    pub fn segment_base(&self, index: usize) -> u64 {
        self.arena_base_address + self.segment_capacity * index as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_unaligned_capacity() {
        let config = EngineConfig {
            segment_capacity: 801,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StoreError::Configuration(_))
        ));
    }

    #[test]
    fn test_rejects_shallow_ring() {
        let config = EngineConfig {
            segment_count: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_excess_reader_lag() {
        let config = EngineConfig {
            segment_count: 3,
            max_reader_lag_segments: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            segment_count: 4,
            max_reader_lag_segments: 2,
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_toml_roundtrip_with_durations() {
        let config = EngineConfig::from_toml_str(
            r#"
            segment_capacity = 1600
            segment_count = 8
            flush_timeout = "250ms"
            "#,
        )
        .unwrap();
        assert_eq!(config.segment_capacity, 1600);
        assert_eq!(config.segment_count, 8);
        assert_eq!(config.flush_timeout, Duration::from_millis(250));
        // Unspecified keys keep their defaults.
        assert_eq!(config.max_burst_length, 16);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(EngineConfig::from_toml_str("segment_capcity = 800").is_err());
    }

    #[test]
    fn test_segment_base_layout() {
        let config = EngineConfig {
            segment_capacity: 800,
            segment_count: 4,
            arena_base_address: 0x1000,
            ..Default::default()
        };
        assert_eq!(config.segment_base(0), 0x1000);
        assert_eq!(config.segment_base(3), 0x1000 + 2400);
        assert_eq!(config.arena_len(), 3200);
    }
}
