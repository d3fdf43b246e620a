/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! YAML table images.
//!
//! An image lists only the entries that are in use; every other position is
//! filled with the unused sentinel when the image is expanded to full-size
//! candidate tables.
//!
//! ```yaml
//! schedule:
//!   - { slot: 0, entry: 0, frequency: 1, message_index: 1 }
//!   - { slot: 50, entry: 2, frequency: 4, remainder: 3, message_index: 2,
//!       enable_state: 2, group_data: 0x01000001 }
//! messages:
//!   - { index: 1, words: [0x1880, 0xC000, 0x0001, 0x0000] }
//! ```
//!
//! Raw `enable_state` / `activity_type` values are accepted as-is so that a
//! bad image is caught by the validator with a precise fault rather than by
//! the YAML parser.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::SchedulerConfig;
use crate::events::EventSink;

use super::{
    ActivityType, EnableState, GroupData, MessageEntry, MessageTable, ScheduleEntry,
    ScheduleTable, TableStore,
};

// ── Errors ────────────────────────────────────────────────────────────────────

/// An image that cannot be expanded into tables of the configured shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("schedule position slot={slot}, entry={entry} is outside the table")]
    ScheduleOutOfRange { slot: u16, entry: u16 },

    #[error("schedule position slot={slot}, entry={entry} is listed twice")]
    DuplicateSchedule { slot: u16, entry: u16 },

    #[error("message index {index} is outside the table (max {max})")]
    MessageOutOfRange { index: u16, max: u16 },

    #[error("message index {index} is listed twice")]
    DuplicateMessage { index: u16 },

    #[error("message index {index} has {words} words, buffer holds {capacity}")]
    MessageTooLong {
        index: u16,
        words: usize,
        capacity: u16,
    },
}

// ── Image types ───────────────────────────────────────────────────────────────

fn enabled() -> EnableState {
    EnableState::Enabled
}

fn send_message() -> ActivityType {
    ActivityType::SendMessage
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleImageEntry {
    pub slot: u16,
    pub entry: u16,
    #[serde(default = "enabled")]
    pub enable_state: EnableState,
    #[serde(default = "send_message")]
    pub activity_type: ActivityType,
    pub frequency: u16,
    #[serde(default)]
    pub remainder: u16,
    pub message_index: u16,
    #[serde(default)]
    pub group_data: GroupData,
}

impl ScheduleImageEntry {
    fn to_entry(&self) -> ScheduleEntry {
        ScheduleEntry {
            enable_state: self.enable_state,
            activity_type: self.activity_type,
            frequency: self.frequency,
            remainder: self.remainder,
            message_index: self.message_index,
            group_data: self.group_data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MessageImageEntry {
    pub index: u16,
    pub words: Vec<u16>,
}

/// Sparse on-disk form of a schedule/message table pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TableImage {
    #[serde(default)]
    pub schedule: Vec<ScheduleImageEntry>,
    #[serde(default)]
    pub messages: Vec<MessageImageEntry>,
}

impl TableImage {
    /// Reads and parses an image file.  Shape checks happen in
    /// [`into_tables`](Self::into_tables).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading table image from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open table image: {}", path.display()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))
    }

    /// Expands the image into full-size candidate tables.
    pub fn into_tables(
        self,
        config: &SchedulerConfig,
    ) -> Result<(ScheduleTable, MessageTable), ImageError> {
        let mut schedule = ScheduleTable::unused(config);
        let mut seen = BTreeSet::new();
        for item in &self.schedule {
            let (slot, entry) = (item.slot, item.entry);
            if slot >= config.total_slots || entry >= config.entries_per_slot {
                return Err(ImageError::ScheduleOutOfRange { slot, entry });
            }
            if !seen.insert((slot, entry)) {
                return Err(ImageError::DuplicateSchedule { slot, entry });
            }
            let index = usize::from(slot) * usize::from(config.entries_per_slot) + usize::from(entry);
            schedule.entries_mut()[index] = item.to_entry();
        }

        let mut messages = MessageTable::unused(config);
        let mut seen = BTreeSet::new();
        for item in self.messages {
            let index = item.index;
            if index >= config.max_messages {
                return Err(ImageError::MessageOutOfRange {
                    index,
                    max: config.max_messages,
                });
            }
            if !seen.insert(index) {
                return Err(ImageError::DuplicateMessage { index });
            }
            let message = MessageEntry::from_words(&item.words, config).ok_or(
                ImageError::MessageTooLong {
                    index,
                    words: item.words.len(),
                    capacity: config.max_msg_words,
                },
            )?;
            messages.entries_mut()[usize::from(index)] = message;
        }

        Ok((schedule, messages))
    }

    /// Expands the image and activates both tables in `store`.
    ///
    /// The message table is activated first so that a rejected message table
    /// never leaves a new schedule pointing at stale messages.
    pub fn install(
        self,
        store: &mut TableStore,
        events: &mut dyn EventSink,
    ) -> Result<()> {
        let (schedule, messages) = self
            .into_tables(store.config())
            .context("Table image does not fit the configured table shape")?;

        store
            .activate_messages(messages, events)
            .context("Message table failed verification")?;
        store
            .activate_schedule(schedule, events)
            .context("Schedule table failed verification")?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    const SAMPLE: &str = r#"
schedule:
  - { slot: 0, entry: 0, frequency: 1, message_index: 1 }
  - { slot: 50, entry: 2, frequency: 4, remainder: 3, message_index: 2, enable_state: 2, group_data: 0x01000001 }
messages:
  - { index: 1, words: [0x1880, 0xC000, 0x0001, 0x0000] }
  - { index: 2, words: [0x1881, 0xC000, 0x0001, 0x0000] }
"#;

    #[test]
    fn sample_image_expands_to_full_tables() {
        let cfg = SchedulerConfig::default();
        let f = yaml_tempfile(SAMPLE);
        let image = TableImage::load_from_file(f.path()).unwrap();
        let (schedule, messages) = image.into_tables(&cfg).unwrap();

        assert_eq!(schedule.len(), 500);
        assert_eq!(schedule.entries()[0], ScheduleEntry::send_message(1, 1, 0));

        let e = schedule.entries()[252];
        assert_eq!(e.enable_state, EnableState::Disabled);
        assert_eq!(e.group_data.group_number(), 1);
        assert_eq!(e.remainder, 3);

        assert_eq!(messages.len(), 128);
        assert_eq!(messages.get(2).unwrap().message_id(), 0x1881);
        assert_eq!(messages.get(3), Some(&MessageEntry::unused(&cfg)));
    }

    #[test]
    fn install_activates_both_tables() {
        let cfg = Arc::new(SchedulerConfig::default());
        let mut store = TableStore::new(Arc::clone(&cfg));
        let mut events: Vec<Event> = Vec::new();

        let image: TableImage = serde_yaml::from_str(SAMPLE).unwrap();
        image.install(&mut store, &mut events).unwrap();

        assert_eq!(store.schedule_entry(0, 0).unwrap().message_index, 1);
        assert_eq!(store.counters().verify_success, 2);
    }

    #[test]
    fn invalid_image_content_is_rejected_by_verification() {
        let cfg = Arc::new(SchedulerConfig::default());
        let mut store = TableStore::new(Arc::clone(&cfg));
        let image: TableImage =
            serde_yaml::from_str("schedule:\n  - { slot: 3, entry: 0, frequency: 2, remainder: 2, message_index: 1 }\n")
                .unwrap();

        let err = image.install(&mut store, &mut Vec::<Event>::new()).unwrap_err();
        assert!(format!("{err:#}").contains("Schedule table failed verification"));
        assert_eq!(store.schedule_entry(3, 0), Some(&ScheduleEntry::UNUSED));
    }

    #[test]
    fn out_of_range_and_duplicate_positions() {
        let cfg = SchedulerConfig::default();
        let out: TableImage =
            serde_yaml::from_str("schedule:\n  - { slot: 100, entry: 0, frequency: 1, message_index: 1 }\n")
                .unwrap();
        assert_eq!(
            out.into_tables(&cfg),
            Err(ImageError::ScheduleOutOfRange { slot: 100, entry: 0 })
        );

        let dup: TableImage = serde_yaml::from_str(
            "messages:\n  - { index: 4, words: [1] }\n  - { index: 4, words: [2] }\n",
        )
        .unwrap();
        assert_eq!(dup.into_tables(&cfg), Err(ImageError::DuplicateMessage { index: 4 }));
    }

    #[test]
    fn over_long_message_is_rejected() {
        let cfg = SchedulerConfig {
            max_msg_words: 4,
            ..Default::default()
        };
        let image = TableImage {
            schedule: vec![],
            messages: vec![MessageImageEntry {
                index: 1,
                words: vec![0; 5],
            }],
        };
        assert!(matches!(
            image.into_tables(&cfg),
            Err(ImageError::MessageTooLong { index: 1, words: 5, .. })
        ));
    }

    #[test]
    fn unknown_field_is_a_parse_error() {
        let f = yaml_tempfile("schedule:\n  - { slot: 0, entry: 0, freq: 1, message_index: 1 }\n");
        assert!(TableImage::load_from_file(f.path()).is_err());
    }

    #[test]
    fn shipped_table_image_installs() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("conf");
        let cfg = Arc::new(SchedulerConfig::load_from_file(&dir.join("scheduler.yaml")).unwrap());
        let mut store = TableStore::new(cfg);
        let mut events: Vec<Event> = Vec::new();

        TableImage::load_from_file(&dir.join("sch_tables.yaml"))
            .unwrap()
            .install(&mut store, &mut events)
            .unwrap();

        assert_eq!(
            events.last(),
            Some(&Event::ScheduleTableVerified {
                good: 5,
                bad: 0,
                unused: 495
            })
        );
    }
}
