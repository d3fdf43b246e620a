/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! One owner for everything the three actors touch.
//!
//! The tone handler, the minor-frame timer handler and the main loop all
//! mutate the same [`TimingState`].  [`SchedulerContext`] bundles the engine,
//! the slot scheduler and their collaborators so that exclusive `&mut`
//! access (a mutex in the runtime, plain ownership in tests) serialises them.
//!
//! ```text
//!   tone ──► on_major_frame_tone ─┐
//!                                 ├──► Wakeup ──► run_once ──► SlotScheduler
//!   timer ─► on_minor_frame_tick ─┘
//! ```

use std::sync::Arc;

use serde::Serialize;
use tracing::trace;

use crate::bus::MessageBus;
use crate::commands::{CommandCounters, DeferredCommands};
use crate::config::SchedulerConfig;
use crate::events::{Event, EventSink};
use crate::scheduler::{DispatchCounters, SchedulerCounters, SchedulerError, SlotScheduler};
use crate::table::TableCounters;
use crate::timing::{FrameSyncEngine, MinorFrameTimer, SyncCounters, TimeSource, TimingState};
use crate::wakeup::Wakeup;

/// Point-in-time copy of every counter and timing field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Housekeeping {
    pub timing: TimingState,
    pub sync: SyncCounters,
    pub scheduler: SchedulerCounters,
    pub dispatch: DispatchCounters,
    pub tables: TableCounters,
    pub commands: CommandCounters,
    pub table_modified: bool,
    pub processing_enabled: bool,
    pub processing_disabled_count: u32,
    pub wakeups_released: u64,
    pub wakeups_coalesced: u64,
}

pub struct SchedulerContext<B, C, E, T, M> {
    engine: FrameSyncEngine,
    scheduler: SlotScheduler<B, C, E>,
    clock: T,
    timer: M,
    wakeup: Arc<Wakeup>,
    noisy_reported: bool,
    processing_disabled_count: u32,
}

impl<B, C, E, T, M> SchedulerContext<B, C, E, T, M>
where
    B: MessageBus,
    C: DeferredCommands,
    E: EventSink,
    T: TimeSource,
    M: MinorFrameTimer,
{
    /// The engine is sized for `timer`'s reported accuracy.
    pub fn new(config: Arc<SchedulerConfig>, scheduler: SlotScheduler<B, C, E>, clock: T, timer: M) -> Self {
        let engine = FrameSyncEngine::new(config, timer.accuracy_us());
        Self {
            engine,
            scheduler,
            clock,
            timer,
            wakeup: Arc::new(Wakeup::new()),
            noisy_reported: false,
            processing_disabled_count: 0,
        }
    }

    /// Arms the startup window.  Call once before any tick can fire.
    pub fn start(&mut self) {
        self.engine.start(&mut self.timer);
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn engine(&self) -> &FrameSyncEngine {
        &self.engine
    }

    pub fn scheduler(&self) -> &SlotScheduler<B, C, E> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut SlotScheduler<B, C, E> {
        &mut self.scheduler
    }

    pub fn clock(&self) -> &T {
        &self.clock
    }

    pub fn timer(&self) -> &M {
        &self.timer
    }

    pub fn wakeup(&self) -> &Arc<Wakeup> {
        &self.wakeup
    }

    // ── Actors ────────────────────────────────────────────────────────────────

    pub fn on_major_frame_tone(&mut self) {
        self.engine
            .on_major_frame_tone(&self.clock, &mut self.timer, &self.wakeup);
    }

    pub fn on_minor_frame_tick(&mut self) {
        self.engine
            .on_minor_frame_tick(&self.clock, &mut self.timer, &self.wakeup);
    }

    /// Work for one consumed wakeup.
    ///
    /// While processing is disabled only the noisy-tone report runs; the
    /// slots that come due meanwhile are caught up (or skipped) afterwards.
    ///
    /// # Errors
    /// Propagates [`SchedulerError`] after reporting it as
    /// [`Event::SchedulerStopped`]; the caller must stop scheduling.
    pub fn run_once(&mut self) -> Result<(), SchedulerError> {
        self.report_noisy_major_frame();
        if !self.processing_enabled() {
            trace!(
                disabled_count = self.processing_disabled_count,
                "Slot processing disabled"
            );
            return Ok(());
        }

        let result = self
            .scheduler
            .process_schedule_table(&mut self.engine, &self.clock);
        if let Err(e) = &result {
            self.scheduler.events_mut().send(Event::SchedulerStopped {
                reason: e.to_string(),
            });
        }
        result
    }

    fn report_noisy_major_frame(&mut self) {
        let state = self.engine.state();
        if !state.ignore_major_frame {
            self.noisy_reported = false;
        } else if !self.noisy_reported {
            self.noisy_reported = true;
            self.scheduler.events_mut().send(Event::NoisyMajorFrame {
                minor_frames_since_tone: state.minor_frames_since_tone,
            });
        }
    }

    pub fn enable_major_frame_sync(&mut self) {
        self.engine.enable_major_frame_sync();
    }

    // ── Processing gate ───────────────────────────────────────────────────────

    /// Pauses slot processing.  Calls nest: each one needs a matching
    /// [`enable_processing`](Self::enable_processing).
    pub fn disable_processing(&mut self) {
        self.processing_disabled_count = self.processing_disabled_count.saturating_add(1);
    }

    pub fn enable_processing(&mut self) {
        self.processing_disabled_count = self.processing_disabled_count.saturating_sub(1);
    }

    pub fn processing_enabled(&self) -> bool {
        self.processing_disabled_count == 0
    }

    // ── Housekeeping ──────────────────────────────────────────────────────────

    pub fn housekeeping(&self) -> Housekeeping {
        let tables = self.scheduler.tables();
        Housekeeping {
            timing: self.engine.state().clone(),
            sync: self.engine.counters(),
            scheduler: self.scheduler.counters(),
            dispatch: self.scheduler.dispatcher().counters(),
            tables: tables.counters(),
            commands: self.scheduler.commands().counters(),
            table_modified: tables.table_modified(),
            processing_enabled: self.processing_enabled(),
            processing_disabled_count: self.processing_disabled_count,
            wakeups_released: self.wakeup.released(),
            wakeups_coalesced: self.wakeup.coalesced(),
        }
    }

    /// Zeroes every counter.  Timing state is left alone.
    pub fn reset_counters(&mut self) {
        self.engine.reset_counters();
        self.scheduler.reset_counters();
        self.scheduler.commands_mut().reset_counters();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
