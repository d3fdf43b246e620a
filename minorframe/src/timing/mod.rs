/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Frame synchronisation: reconciles the external major-frame tone and the
//! local minor-frame timer into one authoritative slot number.
//!
//! # Sources of time
//!
//! | Source | Role |
//! |---|---|
//! | Major-frame tone | Authoritative slot-0 marker while trusted |
//! | Minor-frame timer | Advances the slot counter; fallback when the tone is missing or noisy |
//! | MET ([`TimeSource`]) | Slot reference when the local timer is too coarse, or when no tone ever arrived |
//!
//! The two signal handlers ([`FrameSyncEngine::on_major_frame_tone`] and
//! [`FrameSyncEngine::on_minor_frame_tick`]) only update [`TimingState`] and
//! post a [`Wakeup`]; all slot processing happens later on the main loop.
//!
//! # Tone filtering
//!
//! A tone is *expected* when it arrives where the slot counter says slot 0
//! should start.  Out-of-window tones are *noisy*; `max_noisy_majorf`
//! consecutive noisy tones make the engine ignore the tone until
//! [`FrameSyncEngine::enable_major_frame_sync`] is called.

pub mod met;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};

use crate::config::SchedulerConfig;
use crate::wakeup::Wakeup;

use met::{met_slot_number, offset_slot};

// ── Collaborator traits ───────────────────────────────────────────────────────

/// Mission-elapsed-time clock.
pub trait TimeSource {
    /// Sub-second part of MET, in the clock's native units.
    fn met_subseconds(&self) -> u32;

    fn subseconds_to_micros(&self, subseconds: u32) -> u32;

    /// `true` while the clock is coasting without its own reference; tones
    /// received in this state are meaningless.
    fn is_flywheeling(&self) -> bool;
}

/// Periodic minor-frame timer.
pub trait MinorFrameTimer {
    /// Restarts the timer: first expiry after `start_delay_us`, then every
    /// `period_us`.  A period of 0 means one-shot.
    fn rearm(&mut self, start_delay_us: u32, period_us: u32);

    /// Resolution the timer can actually deliver, in µs.
    fn accuracy_us(&self) -> u32;
}

// ── SyncFlags ─────────────────────────────────────────────────────────────────

/// MET synchronisation bits.
///
/// `MINOR_SYNCHRONIZED` may combine with at most one of
/// `PENDING_MAJOR_SYNC` / `MAJOR_SYNCHRONIZED`; the two major bits are never
/// set together.
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct SyncFlags(u8);

impl SyncFlags {
    pub const NOT_SYNCHRONIZED: SyncFlags = SyncFlags(0);
    /// The local timer is too coarse; slots are read from MET.
    pub const MINOR_SYNCHRONIZED: SyncFlags = SyncFlags(0b001);
    /// Searching for the MET second boundary.
    pub const PENDING_MAJOR_SYNC: SyncFlags = SyncFlags(0b010);
    /// Slot 0 is aligned to the MET second boundary instead of a tone.
    pub const MAJOR_SYNCHRONIZED: SyncFlags = SyncFlags(0b100);

    const MAJOR_BITS: u8 = 0b110;

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: SyncFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Any MET synchronisation at all.
    pub fn is_synchronized(self) -> bool {
        self.0 != 0
    }

    pub fn insert(&mut self, other: SyncFlags) {
        self.0 |= other.0;
        self.debug_check();
    }

    pub fn remove(&mut self, other: SyncFlags) {
        self.0 &= !other.0;
    }

    /// Clears both major-frame bits, keeping `MINOR_SYNCHRONIZED`.
    pub fn clear_major(&mut self) {
        self.0 &= !Self::MAJOR_BITS;
    }

    /// Moves from "pending" to "synchronized" in one step.
    pub fn complete_major_sync(&mut self) {
        self.remove(Self::PENDING_MAJOR_SYNC);
        self.insert(Self::MAJOR_SYNCHRONIZED);
    }

    fn debug_check(self) {
        debug_assert!(
            self.0 & Self::MAJOR_BITS != Self::MAJOR_BITS,
            "pending and synchronized major-frame bits set together"
        );
    }
}

impl fmt::Debug for SyncFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("NOT_SYNCHRONIZED");
        }
        let names = [
            (Self::MINOR_SYNCHRONIZED, "MINOR_SYNCHRONIZED"),
            (Self::PENDING_MAJOR_SYNC, "PENDING_MAJOR_SYNC"),
            (Self::MAJOR_SYNCHRONIZED, "MAJOR_SYNCHRONIZED"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&set.join(" | "))
    }
}

// ── TimingState ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MajorFrameSource {
    None,
    MinorFrameTimer,
    ExternalTone,
}

/// Shared timing state.  Written by the signal handlers and the scheduler,
/// never concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimingState {
    /// Next slot the scheduler has not yet executed.  Always `< total_slots`.
    pub next_slot_number: u16,
    /// Free-running slot counter driven by the local timer.
    pub minor_frames_since_tone: u16,
    /// MET slot at the last tone; phase offset for MET-derived slots.
    pub last_sync_met_slot: u16,
    pub sync_to_met: SyncFlags,
    pub major_frame_source: MajorFrameSource,
    pub ignore_major_frame: bool,
    /// The most recent tone was out of window.
    pub unexpected_major_frame: bool,
    pub consecutive_noisy_frame_count: u32,
    /// Completed traversals of the schedule table; phase base for
    /// frequency/remainder matching.
    pub table_pass_count: u32,
    /// Hysteresis memory from the previous wakeup.
    pub last_process_count: u32,
    pub sync_attempts_left: u16,
    pub worst_case_slots_per_minor_frame: u32,
    pub clock_accuracy_us: u32,
}

/// Major-frame statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounters {
    pub valid_major_frame_count: u32,
    pub missed_major_frame_count: u32,
    pub unexpected_major_frame_count: u32,
}

// ── FrameSyncEngine ───────────────────────────────────────────────────────────

pub struct FrameSyncEngine {
    config: Arc<SchedulerConfig>,
    state: TimingState,
    counters: SyncCounters,
}

impl FrameSyncEngine {
    /// Initial timing state for a timer of the given resolution.
    ///
    /// The slot counter starts at the time-sync slot so that a tone arriving
    /// during the startup window is treated as expected.
    pub fn new(config: Arc<SchedulerConfig>, clock_accuracy_us: u32) -> Self {
        let mut state = TimingState {
            next_slot_number: 0,
            minor_frames_since_tone: config.time_sync_slot(),
            last_sync_met_slot: 0,
            sync_to_met: SyncFlags::NOT_SYNCHRONIZED,
            major_frame_source: MajorFrameSource::None,
            ignore_major_frame: false,
            unexpected_major_frame: false,
            consecutive_noisy_frame_count: 0,
            table_pass_count: 0,
            last_process_count: 0,
            sync_attempts_left: 0,
            worst_case_slots_per_minor_frame: 1,
            clock_accuracy_us,
        };

        if clock_accuracy_us > config.worst_clock_accuracy_us() {
            state.sync_to_met = SyncFlags::MINOR_SYNCHRONIZED;
            // A timer coarser than a whole major frame cannot lag more than
            // one full pass behind.
            let slots = (u64::from(clock_accuracy_us) * 2)
                / u64::from(config.normal_slot_period_us())
                + 1;
            state.worst_case_slots_per_minor_frame =
                slots.min(u64::from(config.total_slots)) as u32;
            debug!(
                clock_accuracy_us,
                required_us = config.worst_clock_accuracy_us(),
                worst_case_slots = state.worst_case_slots_per_minor_frame,
                "Timer too coarse; minor frames follow MET"
            );
        }

        Self {
            config,
            state,
            counters: SyncCounters::default(),
        }
    }

    /// Arms the one-shot startup delay during which the first tone may
    /// arrive.  If it expires first, the engine self-synchronises to MET.
    pub fn start(&self, timer: &mut dyn MinorFrameTimer) {
        timer.rearm(self.config.startup_period_us(), 0);
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn state(&self) -> &TimingState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut TimingState {
        &mut self.state
    }

    pub fn counters(&self) -> SyncCounters {
        self.counters
    }

    pub fn reset_counters(&mut self) {
        self.counters = SyncCounters::default();
    }

    pub fn met_slot_number(&self, clock: &dyn TimeSource) -> u16 {
        let micros = clock.subseconds_to_micros(clock.met_subseconds());
        met_slot_number(
            micros,
            self.config.normal_slot_period_us(),
            self.config.total_slots,
        )
    }

    /// The slot the scheduler should be executing now.
    pub fn current_slot_number(&self, clock: &dyn TimeSource) -> u16 {
        if self.state.sync_to_met.is_synchronized() {
            offset_slot(
                self.met_slot_number(clock),
                self.state.last_sync_met_slot,
                self.config.total_slots,
            )
        } else {
            self.state.minor_frames_since_tone
        }
    }

    // ── Tone handler ──────────────────────────────────────────────────────────

    fn is_noisy_tone(&self) -> bool {
        let state = &self.state;
        if state.sync_to_met == SyncFlags::NOT_SYNCHRONIZED {
            state.minor_frames_since_tone != self.config.time_sync_slot()
        } else if state.sync_to_met == SyncFlags::MINOR_SYNCHRONIZED {
            let window_start = u32::from(self.config.total_slots)
                .saturating_sub(state.worst_case_slots_per_minor_frame)
                .saturating_sub(1);
            state.next_slot_number != 0 && u32::from(state.next_slot_number) < window_start
        } else {
            false
        }
    }

    /// Major-frame tone handler.
    pub fn on_major_frame_tone(
        &mut self,
        clock: &dyn TimeSource,
        timer: &mut dyn MinorFrameTimer,
        wakeup: &Wakeup,
    ) {
        if clock.is_flywheeling() {
            trace!("Tone ignored while clock is flywheeling");
            return;
        }

        if self.is_noisy_tone() {
            self.state.unexpected_major_frame = true;
            self.counters.unexpected_major_frame_count += 1;

            if !self.state.ignore_major_frame {
                self.state.consecutive_noisy_frame_count += 1;
                if self.state.consecutive_noisy_frame_count >= self.config.max_noisy_majorf {
                    self.state.ignore_major_frame = true;
                    debug!(
                        slot = self.state.minor_frames_since_tone,
                        "Tone too noisy; ignoring it"
                    );
                }
            }
        } else {
            self.state.unexpected_major_frame = false;
            self.state.consecutive_noisy_frame_count = 0;
        }

        if !self.state.ignore_major_frame {
            let normal = self.config.normal_slot_period_us();
            timer.rearm(normal, normal);

            self.counters.valid_major_frame_count += 1;
            self.state.minor_frames_since_tone = 0;
            self.state.major_frame_source = MajorFrameSource::ExternalTone;
            self.state.sync_to_met.clear_major();

            wakeup.signal();
        }

        // The next tone is assumed to land in the same MET slot as this one.
        self.state.last_sync_met_slot = self.met_slot_number(clock);
    }

    // ── Timer handler ─────────────────────────────────────────────────────────

    /// Minor-frame timer handler.
    pub fn on_minor_frame_tick(
        &mut self,
        clock: &dyn TimeSource,
        timer: &mut dyn MinorFrameTimer,
        wakeup: &Wakeup,
    ) {
        let normal = self.config.normal_slot_period_us();

        // First expiry with no tone seen: the startup window timed out.
        if self.state.major_frame_source == MajorFrameSource::None {
            self.state.major_frame_source = MajorFrameSource::MinorFrameTimer;
            self.state.sync_to_met.insert(SyncFlags::PENDING_MAJOR_SYNC);
            self.state.sync_attempts_left = self.config.max_sync_attempts();
            self.state.last_sync_met_slot = 0;
            debug!("No tone during startup; synchronising to MET");
        }

        if self.state.sync_to_met.contains(SyncFlags::PENDING_MAJOR_SYNC)
            && self.state.major_frame_source == MajorFrameSource::MinorFrameTimer
        {
            timer.rearm(normal, normal);
            self.state.sync_attempts_left = self.state.sync_attempts_left.saturating_sub(1);

            let met_slot = self.met_slot_number(clock);
            if met_slot != 0 && self.state.sync_attempts_left > 0 {
                return;
            }

            // Found the MET second boundary, or gave up looking.
            self.state.sync_to_met.complete_major_sync();
            self.state.minor_frames_since_tone = met_slot;
            self.state.last_sync_met_slot = 0;
            debug!(slot = met_slot, "Major frame synchronised to MET");
        } else {
            self.state.minor_frames_since_tone += 1;
        }

        if self.state.minor_frames_since_tone >= self.config.total_slots {
            // The long slot ran out with no tone: compensate with a short one.
            timer.rearm(self.config.short_slot_period_us(), normal);
            self.state.minor_frames_since_tone = 0;
            self.counters.missed_major_frame_count += 1;
        }

        if self.state.minor_frames_since_tone == self.config.time_sync_slot() {
            timer.rearm(self.config.sync_slot_period_us(), 0);
        }

        wakeup.signal();
    }

    /// Trusts the tone again after it was disabled as noisy.
    pub fn enable_major_frame_sync(&mut self) {
        self.state.ignore_major_frame = false;
        self.state.unexpected_major_frame = false;
        self.state.consecutive_noisy_frame_count = 0;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
