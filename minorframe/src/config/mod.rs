/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Scheduler constants: loading, defaults and validation.
//!
//! Every value here is fixed at deploy time.  The file is read once at
//! startup and the resulting [`SchedulerConfig`] is shared read-only
//! (`Arc<SchedulerConfig>`) by the engine, the scheduler and the table store.
//!
//! The expected YAML structure is flat; every key is optional:
//! ```yaml
//! total_slots: 100
//! entries_per_slot: 5
//! max_messages: 128
//! max_lag_count: 50
//! max_slots_per_wakeup: 5
//! micros_per_major_frame: 1000000
//! sync_slot_drift_window: 5000
//! max_noisy_majorf: 2
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

// ── Defaults ──────────────────────────────────────────────────────────────────

/// Nominal number of minor frames in one major frame (100 Hz wakeup rate).
pub const DEFAULT_TOTAL_SLOTS: u16 = 100;

/// Nominal major frame length in microseconds (1 Hz tone).
pub const DEFAULT_MICROS_PER_MAJOR_FRAME: u32 = 1_000_000;

/// Highest message id accepted by the message bus.
pub const DEFAULT_MAX_MSG_ID: u16 = 0x1FFF;

/// Smallest legal message: a bare 8-byte command header, in 16-bit words.
pub const DEFAULT_MIN_MSG_WORDS: u16 = 4;

// ── Errors ────────────────────────────────────────────────────────────────────

/// A constant (or combination of constants) the scheduler cannot run with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("total_slots must be between 2 and 65535, got {0}")]
    TotalSlotsOutOfRange(u32),

    #[error("entries_per_slot must be at least 1")]
    NoEntriesPerSlot,

    #[error("max_messages must be at least 1")]
    NoMessages,

    #[error("max_msg_id {max:#06X} is below min_msg_id {min:#06X}")]
    MessageIdRange { min: u16, max: u16 },

    #[error("max_msg_id {0:#06X} leaves no room for the unused message id")]
    NoUnusedMessageId(u16),

    #[error("min_msg_words {min} exceeds max_msg_words {max}")]
    MessageWordRange { min: u16, max: u16 },

    #[error("max_lag_count must be between 1 and total_slots ({total_slots}), got {value}")]
    LagCountOutOfRange { value: u32, total_slots: u16 },

    #[error("max_slots_per_wakeup must be at least 1")]
    NoSlotsPerWakeup,

    #[error("micros_per_major_frame ({micros}) must be at least total_slots ({total_slots})")]
    MajorFrameTooShort { micros: u32, total_slots: u16 },

    #[error("startup_period_us ({startup}) must be at least one major frame ({major})")]
    StartupPeriodTooShort { startup: u32, major: u32 },

    #[error("sync_slot_drift_window ({window}us) must be less than one slot period ({slot}us)")]
    DriftWindowTooLarge { window: u32, slot: u32 },

    #[error("max_noisy_majorf must be at least 2, got {0}")]
    NoisyThresholdTooLow(u32),
}

// ── SchedulerConfig ───────────────────────────────────────────────────────────

/// Deploy-time scheduler constants.
///
/// Values that are derived from others (slot periods, time-sync slot, sync
/// attempt limit) are methods rather than fields so they can never drift out
/// of step with their inputs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Minor frames (slots) per major frame.
    pub total_slots: u16,

    /// Activity entries in every slot.
    pub entries_per_slot: u16,

    /// Size of the message table.  Index 0 is reserved.
    pub max_messages: u16,

    /// A wakeup that would need more slots than this skips ahead instead.
    /// `None` means half of `total_slots`.
    pub max_lag_count: Option<u32>,

    /// Upper bound on slots executed during a single wakeup.
    pub max_slots_per_wakeup: u32,

    pub micros_per_major_frame: u32,

    /// Extra time granted to the last slot so the tone can arrive, in µs.
    pub sync_slot_drift_window: u32,

    /// Initial timer delay before giving up on the tone and syncing to MET.
    /// `None` means five major frames.
    pub startup_period_us: Option<u32>,

    /// Consecutive noisy tones tolerated before the tone is ignored.
    pub max_noisy_majorf: u32,

    pub min_msg_id: u16,
    pub max_msg_id: u16,

    pub min_msg_words: u16,
    pub max_msg_words: u16,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            total_slots: DEFAULT_TOTAL_SLOTS,
            entries_per_slot: 5,
            max_messages: 128,
            max_lag_count: None,
            max_slots_per_wakeup: 5,
            micros_per_major_frame: DEFAULT_MICROS_PER_MAJOR_FRAME,
            sync_slot_drift_window: 5_000,
            startup_period_us: None,
            max_noisy_majorf: 2,
            min_msg_id: 0,
            max_msg_id: DEFAULT_MAX_MSG_ID,
            min_msg_words: DEFAULT_MIN_MSG_WORDS,
            max_msg_words: 64,
        }
    }
}

impl SchedulerConfig {
    /// Parses `path` and validates the result.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the YAML is malformed or
    /// contains unknown keys, or any constant fails [`validate`](Self::validate).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading scheduler configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let config: SchedulerConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid scheduler configuration in {}", path.display()))?;

        debug!(
            total_slots = config.total_slots,
            entries_per_slot = config.entries_per_slot,
            max_messages = config.max_messages,
            max_lag_count = config.max_lag_count(),
            slot_period_us = config.normal_slot_period_us(),
            "Scheduler configuration loaded"
        );

        Ok(config)
    }

    /// Checks every constraint the scheduler relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total_slots < 2 {
            return Err(ConfigError::TotalSlotsOutOfRange(self.total_slots.into()));
        }
        if self.entries_per_slot < 1 {
            return Err(ConfigError::NoEntriesPerSlot);
        }
        if self.max_messages < 1 {
            return Err(ConfigError::NoMessages);
        }
        if self.max_msg_id < self.min_msg_id {
            return Err(ConfigError::MessageIdRange {
                min: self.min_msg_id,
                max: self.max_msg_id,
            });
        }
        if self.max_msg_id == u16::MAX {
            return Err(ConfigError::NoUnusedMessageId(self.max_msg_id));
        }
        if self.min_msg_words > self.max_msg_words {
            return Err(ConfigError::MessageWordRange {
                min: self.min_msg_words,
                max: self.max_msg_words,
            });
        }

        let lag = self.max_lag_count();
        if lag < 1 || lag > u32::from(self.total_slots) {
            return Err(ConfigError::LagCountOutOfRange {
                value: lag,
                total_slots: self.total_slots,
            });
        }
        if self.max_slots_per_wakeup < 1 {
            return Err(ConfigError::NoSlotsPerWakeup);
        }
        if self.micros_per_major_frame < u32::from(self.total_slots) {
            return Err(ConfigError::MajorFrameTooShort {
                micros: self.micros_per_major_frame,
                total_slots: self.total_slots,
            });
        }
        if self.startup_period_us() < self.micros_per_major_frame {
            return Err(ConfigError::StartupPeriodTooShort {
                startup: self.startup_period_us(),
                major: self.micros_per_major_frame,
            });
        }
        if self.sync_slot_drift_window >= self.normal_slot_period_us() {
            return Err(ConfigError::DriftWindowTooLarge {
                window: self.sync_slot_drift_window,
                slot: self.normal_slot_period_us(),
            });
        }
        if self.max_noisy_majorf < 2 {
            return Err(ConfigError::NoisyThresholdTooLow(self.max_noisy_majorf));
        }
        Ok(())
    }

    // ── Derived values ────────────────────────────────────────────────────────

    /// Total schedule entries: `total_slots * entries_per_slot`.
    pub fn table_entries(&self) -> usize {
        usize::from(self.total_slots) * usize::from(self.entries_per_slot)
    }

    /// The last slot; reserved for deferred command processing and the slot
    /// in which the tone is expected.
    pub fn time_sync_slot(&self) -> u16 {
        self.total_slots - 1
    }

    pub fn max_lag_count(&self) -> u32 {
        self.max_lag_count
            .unwrap_or(u32::from(self.total_slots) / 2)
    }

    pub fn startup_period_us(&self) -> u32 {
        self.startup_period_us
            .unwrap_or_else(|| self.micros_per_major_frame.saturating_mul(5))
    }

    /// Nominal minor frame length in µs.
    pub fn normal_slot_period_us(&self) -> u32 {
        self.micros_per_major_frame / u32::from(self.total_slots)
    }

    /// Extended period armed for the time-sync slot.
    pub fn sync_slot_period_us(&self) -> u32 {
        self.normal_slot_period_us() + self.sync_slot_drift_window
    }

    /// Compensating period armed after the local timer wraps without a tone.
    pub fn short_slot_period_us(&self) -> u32 {
        self.normal_slot_period_us() - self.sync_slot_drift_window
    }

    /// Coarsest timer resolution that still keeps the free-running slot
    /// counter from slipping a slot per major frame.
    pub fn worst_clock_accuracy_us(&self) -> u32 {
        self.normal_slot_period_us() / u32::from(self.total_slots - 1)
    }

    /// Ticks spent searching for the MET zero crossing before giving up.
    pub fn max_sync_attempts(&self) -> u16 {
        self.total_slots.saturating_mul(3)
    }

    /// Message id marking an unused message table entry.
    pub fn unused_msg_id(&self) -> u16 {
        self.max_msg_id + 1
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper: write a YAML string to a temp file and return it.
    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    // ── Defaults / derived values ─────────────────────────────────────────────

    #[test]
    fn default_config_is_valid() {
        assert_eq!(SchedulerConfig::default().validate(), Ok(()));
    }

    #[test]
    fn derived_values_match_nominal_timing() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.table_entries(), 500);
        assert_eq!(cfg.time_sync_slot(), 99);
        assert_eq!(cfg.max_lag_count(), 50);
        assert_eq!(cfg.normal_slot_period_us(), 10_000);
        assert_eq!(cfg.sync_slot_period_us(), 15_000);
        assert_eq!(cfg.short_slot_period_us(), 5_000);
        assert_eq!(cfg.worst_clock_accuracy_us(), 101);
        assert_eq!(cfg.max_sync_attempts(), 300);
        assert_eq!(cfg.startup_period_us(), 5_000_000);
        assert_eq!(cfg.unused_msg_id(), 0x2000);
    }

    #[test]
    fn explicit_lag_count_overrides_default() {
        let cfg = SchedulerConfig {
            max_lag_count: Some(10),
            ..Default::default()
        };
        assert_eq!(cfg.max_lag_count(), 10);
    }

    // ── validate ──────────────────────────────────────────────────────────────

    #[test]
    fn single_slot_is_rejected() {
        let cfg = SchedulerConfig {
            total_slots: 1,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::TotalSlotsOutOfRange(1)));
    }

    #[test]
    fn lag_count_above_total_slots_is_rejected() {
        let cfg = SchedulerConfig {
            max_lag_count: Some(101),
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::LagCountOutOfRange { value: 101, .. })
        ));
    }

    #[test]
    fn drift_window_must_fit_in_a_slot() {
        let cfg = SchedulerConfig {
            sync_slot_drift_window: 10_000,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::DriftWindowTooLarge { .. })
        ));
    }

    #[test]
    fn noisy_threshold_of_one_is_rejected() {
        let cfg = SchedulerConfig {
            max_noisy_majorf: 1,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::NoisyThresholdTooLow(1)));
    }

    #[test]
    fn short_startup_period_is_rejected() {
        let cfg = SchedulerConfig {
            startup_period_us: Some(500_000),
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::StartupPeriodTooShort { .. })
        ));
    }

    #[test]
    fn inverted_message_id_range_is_rejected() {
        let cfg = SchedulerConfig {
            min_msg_id: 0x100,
            max_msg_id: 0x0FF,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::MessageIdRange { .. })
        ));
    }

    // ── load_from_file ────────────────────────────────────────────────────────

    #[test]
    fn load_partial_yaml_keeps_defaults() {
        let f = yaml_tempfile("total_slots: 50\nmax_noisy_majorf: 3\n");
        let cfg = SchedulerConfig::load_from_file(f.path()).unwrap();

        assert_eq!(cfg.total_slots, 50);
        assert_eq!(cfg.max_noisy_majorf, 3);
        assert_eq!(cfg.entries_per_slot, 5);
        assert_eq!(cfg.max_lag_count(), 25);
        assert_eq!(cfg.normal_slot_period_us(), 20_000);
    }

    #[test]
    fn unknown_key_returns_error() {
        let f = yaml_tempfile("total_slot: 50\n");
        assert!(SchedulerConfig::load_from_file(f.path()).is_err());
    }

    #[test]
    fn invalid_constants_return_error() {
        let f = yaml_tempfile("max_slots_per_wakeup: 0\n");
        let err = SchedulerConfig::load_from_file(f.path()).unwrap_err();
        assert!(format!("{err:#}").contains("max_slots_per_wakeup"));
    }

    #[test]
    fn missing_file_returns_error() {
        let result = SchedulerConfig::load_from_file(Path::new("/nonexistent/path/sch.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn malformed_yaml_returns_error() {
        let f = yaml_tempfile("this is: not: valid: yaml: content:::");
        assert!(SchedulerConfig::load_from_file(f.path()).is_err());
    }
}
