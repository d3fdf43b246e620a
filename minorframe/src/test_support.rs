/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Test doubles for the scheduler's collaborators.

use std::cell::Cell;
use std::sync::Arc;

use crate::bus::MessageBus;
use crate::commands::DeferredCommands;
use crate::config::SchedulerConfig;
use crate::events::Event;
use crate::scheduler::{BusError, CommandError};
use crate::table::{MessageEntry, MessageTable, TableStore};
use crate::timing::{MinorFrameTimer, TimeSource};

/// MET clock whose sub-seconds are microseconds.
#[derive(Debug, Default)]
pub(crate) struct FakeClock {
    micros: Cell<u32>,
    flywheel: Cell<bool>,
}

impl FakeClock {
    pub fn at_micros(micros: u32) -> Self {
        let clock = Self::default();
        clock.set_micros(micros);
        clock
    }

    pub fn set_micros(&self, micros: u32) {
        self.micros.set(micros);
    }

    pub fn set_flywheel(&self, flywheel: bool) {
        self.flywheel.set(flywheel);
    }
}

impl TimeSource for FakeClock {
    fn met_subseconds(&self) -> u32 {
        self.micros.get()
    }

    fn subseconds_to_micros(&self, subseconds: u32) -> u32 {
        subseconds
    }

    fn is_flywheeling(&self) -> bool {
        self.flywheel.get()
    }
}

/// Timer that records every `(start_delay_us, period_us)` it is armed with.
#[derive(Debug, Default)]
pub(crate) struct RecordingTimer {
    pub arms: Vec<(u32, u32)>,
    pub accuracy_us: u32,
}

impl MinorFrameTimer for RecordingTimer {
    fn rearm(&mut self, start_delay_us: u32, period_us: u32) {
        self.arms.push((start_delay_us, period_us));
    }

    fn accuracy_us(&self) -> u32 {
        self.accuracy_us
    }
}

/// Bus that keeps every message; ids in `reject` fail with `QueueFull`.
#[derive(Debug, Default)]
pub(crate) struct RecordingBus {
    pub sent: Vec<Vec<u16>>,
    pub reject: Vec<u16>,
}

impl MessageBus for RecordingBus {
    fn send(&mut self, message: &[u16]) -> Result<(), BusError> {
        let message_id = message.first().copied().unwrap_or_default();
        if self.reject.contains(&message_id) {
            return Err(BusError::QueueFull { message_id });
        }
        self.sent.push(message.to_vec());
        Ok(())
    }
}

/// Command source that counts invocations and optionally fails.
#[derive(Debug, Default)]
pub(crate) struct CountingCommands {
    pub calls: u32,
    pub fail: bool,
}

impl DeferredCommands for CountingCommands {
    fn process_pending(&mut self, _tables: &mut TableStore) -> Result<(), CommandError> {
        self.calls += 1;
        if self.fail {
            Err(CommandError::SourceFailed("injected".into()))
        } else {
            Ok(())
        }
    }
}

/// Default config and a store whose message table holds ids
/// `0x1801..=0x1804` at indices 1..=4; the schedule is all unused.
pub(crate) fn message_store() -> (Arc<SchedulerConfig>, TableStore) {
    let config = Arc::new(SchedulerConfig::default());
    let mut messages = MessageTable::unused(&config).entries().to_vec();
    for index in 1..=4u16 {
        messages[usize::from(index)] =
            MessageEntry::from_words(&[0x1800 + index, 0xC000, 0x0001, 0x0000], &config).unwrap();
    }

    let mut store = TableStore::new(Arc::clone(&config));
    store
        .activate_messages(MessageTable::from_entries(messages), &mut Vec::<Event>::new())
        .unwrap();
    (config, store)
}
