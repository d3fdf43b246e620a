//! Slot scheduler: decides how many slots to run on each wakeup.
//!
//! [`SlotScheduler::process_schedule_table`] is called once per wakeup.  It
//! compares the engine's current slot with the next unexecuted slot and runs
//! the difference through the [`EntryDispatcher`], subject to:
//!
//! | Condition | Policy |
//! |---|---|
//! | counter did not move (`count == total_slots`) | "same slot" event, run nothing |
//! | `count > max_lag_count` | "skipped slots" event, jump to the current slot, run it alone |
//! | `count > max_slots_per_wakeup` | clamp; the rest is picked up next wakeup |
//! | `count > 1` | "multiple slots" event, only when unexpected for the timer |
//!
//! A one-slot jitter either side of a wakeup is absorbed by a small
//! hysteresis on the previous wakeup's count, so a late wakeup followed by an
//! early one settles instead of producing a multi-slot/same-slot event pair.
//!
//! # Example
//! ```rust,ignore
//! let mut scheduler = SlotScheduler::new(config, tables, TracingBus::new(), queue, sink);
//! scheduler.process_schedule_table(&mut engine, &clock)?;
//! ```

pub mod dispatch;
pub mod error;

pub use dispatch::{DispatchCounters, EntryDispatcher};
pub use error::{BusError, CommandError, SchedulerError};

use std::sync::Arc;

use serde::Serialize;
use tracing::trace;

use crate::bus::MessageBus;
use crate::commands::DeferredCommands;
use crate::config::SchedulerConfig;
use crate::events::{Event, EventSink};
use crate::table::TableStore;
use crate::timing::{FrameSyncEngine, SyncFlags, TimeSource, TimingState};

/// Timing anomaly statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerCounters {
    pub slots_processed_count: u32,
    pub same_slot_count: u32,
    pub multiple_slots_count: u32,
    pub skipped_slots_count: u32,
}

pub struct SlotScheduler<B, C, E> {
    config: Arc<SchedulerConfig>,
    tables: TableStore,
    dispatcher: EntryDispatcher<B>,
    commands: C,
    events: E,
    counters: SchedulerCounters,
}

impl<B, C, E> SlotScheduler<B, C, E>
where
    B: MessageBus,
    C: DeferredCommands,
    E: EventSink,
{
    pub fn new(config: Arc<SchedulerConfig>, tables: TableStore, bus: B, commands: C, events: E) -> Self {
        let dispatcher = EntryDispatcher::new(Arc::clone(&config), bus);
        Self {
            config,
            tables,
            dispatcher,
            commands,
            events,
            counters: SchedulerCounters::default(),
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn tables(&self) -> &TableStore {
        &self.tables
    }

    pub fn tables_mut(&mut self) -> &mut TableStore {
        &mut self.tables
    }

    pub fn dispatcher(&self) -> &EntryDispatcher<B> {
        &self.dispatcher
    }

    pub fn commands(&self) -> &C {
        &self.commands
    }

    pub fn commands_mut(&mut self) -> &mut C {
        &mut self.commands
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut E {
        &mut self.events
    }

    pub fn counters(&self) -> SchedulerCounters {
        self.counters
    }

    pub fn reset_counters(&mut self) {
        self.counters = SchedulerCounters::default();
        self.dispatcher.reset_counters();
        self.tables.reset_counters();
    }

    // ── Wakeup processing ─────────────────────────────────────────────────────

    /// Runs the slots due since the previous wakeup.
    ///
    /// # Errors
    /// [`SchedulerError::DeferredCommands`] if command processing fails,
    /// either at the time-sync slot or while skipping over it.  Remaining
    /// slots for this wakeup are not run; the caller should stop scheduling.
    pub fn process_schedule_table(
        &mut self,
        engine: &mut FrameSyncEngine,
        clock: &dyn TimeSource,
    ) -> Result<(), SchedulerError> {
        let current = engine.current_slot_number(clock);
        let total = u32::from(self.config.total_slots);
        let state = engine.state_mut();
        let next = state.next_slot_number;

        let mut count = if current < next {
            total - u32::from(next) + u32::from(current) + 1
        } else {
            u32::from(current - next) + 1
        };

        // One late wakeup followed by one early wakeup (or the reverse)
        // should settle without reporting anything.
        if count == 2 {
            if state.last_process_count == 1 {
                count = 1;
            }
            state.last_process_count = 2;
        } else if count == total {
            if state.last_process_count != total {
                count = 1;
            }
            state.last_process_count = total;
        } else {
            state.last_process_count = count;
        }

        if count == total {
            self.counters.same_slot_count += 1;
            self.events.send(Event::SameSlot { slot: current });
            count = 0;
        }

        if count > self.config.max_lag_count() {
            self.counters.skipped_slots_count += 1;
            self.events.send(Event::SkippedSlots {
                slot: next,
                count: count - 1,
            });

            if current < next {
                state.table_pass_count = state.table_pass_count.wrapping_add(1);
            }

            // Commands are otherwise only applied in the time-sync slot,
            // which this jump is about to pass over.
            let skipped_commands = if u32::from(next) + count > u32::from(self.config.time_sync_slot()) {
                self.commands.process_pending(&mut self.tables)
            } else {
                Ok(())
            };

            state.next_slot_number = current;
            skipped_commands?;
            count = 1;
        }

        count = count.min(self.config.max_slots_per_wakeup);

        if count > 1 {
            self.counters.multiple_slots_count += 1;
            if count > state.worst_case_slots_per_minor_frame
                || state.sync_to_met == SyncFlags::NOT_SYNCHRONIZED
            {
                self.events.send(Event::MultipleSlots {
                    slot: state.next_slot_number,
                    count,
                });
            }
        }

        trace!(current, next = state.next_slot_number, count, "Processing slots");

        for _ in 0..count {
            self.process_next_slot(state)?;
        }
        Ok(())
    }

    /// Executes exactly one slot.
    pub fn process_next_slot(&mut self, timing: &mut TimingState) -> Result<(), SchedulerError> {
        let result = self.dispatcher.process_next_slot(
            timing,
            &mut self.tables,
            &mut self.commands,
            &mut self.events,
        );
        self.counters.slots_processed_count += 1;
        result
    }

    /// Dispatches a single entry of `slot` against `timing`.
    pub fn process_entry(&mut self, timing: &TimingState, slot: u16, entry_number: u16) {
        self.dispatcher
            .process_entry(timing, &mut self.tables, &mut self.events, slot, entry_number);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{EnableState, ScheduleEntry};
    use crate::test_support::{message_store, CountingCommands, FakeClock, RecordingBus};

    type TestScheduler = SlotScheduler<RecordingBus, CountingCommands, Vec<Event>>;

    struct Rig {
        engine: FrameSyncEngine,
        scheduler: TestScheduler,
        clock: FakeClock,
    }

    impl Rig {
        /// Accurate timer: the current slot is `minor_frames_since_tone`.
        fn new() -> Self {
            Self::with_accuracy(10)
        }

        fn with_accuracy(accuracy_us: u32) -> Self {
            let (config, tables) = message_store();
            Self {
                engine: FrameSyncEngine::new(Arc::clone(&config), accuracy_us),
                scheduler: SlotScheduler::new(
                    config,
                    tables,
                    RecordingBus::default(),
                    CountingCommands::default(),
                    Vec::new(),
                ),
                clock: FakeClock::at_micros(0),
            }
        }

        fn place(&mut self, slot: u16, entry: u16, value: ScheduleEntry) {
            self.scheduler.tables_mut().poke_schedule_entry(slot, entry, value);
        }

        /// Positions the scheduler at `next` and the timer at `current`.
        fn at(&mut self, next: u16, current: u16) -> &mut Self {
            let state = self.engine.state_mut();
            state.next_slot_number = next;
            state.minor_frames_since_tone = current;
            self
        }

        fn wake_at_current(&mut self, current: u16) {
            self.engine.state_mut().minor_frames_since_tone = current;
            self.wake().unwrap();
        }

        fn wake(&mut self) -> Result<(), SchedulerError> {
            self.scheduler
                .process_schedule_table(&mut self.engine, &self.clock)
        }

        fn events(&self) -> &[Event] {
            self.scheduler.events()
        }

        fn state(&self) -> &TimingState {
            self.engine.state()
        }
    }

    fn count_events(events: &[Event], pred: impl Fn(&Event) -> bool) -> usize {
        events.iter().filter(|e| pred(e)).count()
    }

    // ── Steady state ──────────────────────────────────────────────────────────

    #[test]
    fn one_slot_per_wakeup_in_steady_state() {
        let mut rig = Rig::new();
        for slot in 0..10 {
            rig.at(slot, slot).wake().unwrap();
        }
        assert_eq!(rig.state().next_slot_number, 10);
        assert_eq!(rig.scheduler.counters().slots_processed_count, 10);
        assert!(rig.events().is_empty());
    }

    #[test]
    fn wraparound_is_one_slot() {
        let mut rig = Rig::new();
        rig.at(99, 99).wake().unwrap();
        assert_eq!(rig.state().next_slot_number, 0);
        assert_eq!(rig.state().table_pass_count, 1);
        rig.wake_at_current(0);
        assert_eq!(rig.state().next_slot_number, 1);
        assert!(rig.events().is_empty());
    }

    // ── Catch-up / skip ───────────────────────────────────────────────────────

    #[test]
    fn lag_beyond_limit_skips_to_current_slot() {
        let mut rig = Rig::new();
        let current = 5 + 50 + 1;
        rig.place(current, 0, ScheduleEntry::send_message(1, 1, 0));
        rig.place(5, 0, ScheduleEntry::send_message(2, 1, 0));

        rig.at(5, current).wake().unwrap();

        assert_eq!(
            rig.events(),
            &[Event::SkippedSlots { slot: 5, count: 51 }]
        );
        assert_eq!(rig.scheduler.counters().skipped_slots_count, 1);
        // Exactly one slot ran, and it was the current one.
        assert_eq!(rig.scheduler.counters().slots_processed_count, 1);
        assert_eq!(rig.scheduler.dispatcher().bus().sent.len(), 1);
        assert_eq!(rig.scheduler.dispatcher().bus().sent[0][0], 0x1801);
        // `next_slot_number` was set to the current slot, which then ran.
        assert_eq!(rig.state().next_slot_number, current + 1);
        assert_eq!(rig.scheduler.commands().calls, 0);
    }

    #[test]
    fn skip_across_rollover_bumps_pass_and_runs_commands() {
        let mut rig = Rig::new();
        rig.at(80, 30).wake().unwrap();

        assert_eq!(rig.events(), &[Event::SkippedSlots { slot: 80, count: 50 }]);
        assert_eq!(rig.state().table_pass_count, 1);
        assert_eq!(rig.scheduler.commands().calls, 1);
        assert_eq!(rig.state().next_slot_number, 31);
    }

    #[test]
    fn skip_into_sync_slot_runs_commands() {
        let mut rig = Rig::new();
        rig.at(45, 99).wake().unwrap();

        // Once for the skip, once for executing the time-sync slot itself.
        assert_eq!(rig.scheduler.commands().calls, 2);
        assert_eq!(rig.state().next_slot_number, 0);
    }

    #[test]
    fn lag_at_limit_is_clamped_not_skipped() {
        let mut rig = Rig::new();
        rig.at(0, 49).wake().unwrap();

        assert_eq!(rig.scheduler.counters().skipped_slots_count, 0);
        assert_eq!(rig.scheduler.counters().slots_processed_count, 5);
        assert_eq!(rig.state().next_slot_number, 5);
        assert_eq!(rig.events(), &[Event::MultipleSlots { slot: 0, count: 5 }]);
    }

    // ── Hysteresis ────────────────────────────────────────────────────────────

    #[test]
    fn late_then_early_wakeup_settles_without_events() {
        let mut rig = Rig::new();

        // count = 1
        rig.at(0, 0).wake().unwrap();
        // count = 2 after a good wakeup: treat as late, run one
        rig.wake_at_current(2);
        assert_eq!(rig.state().next_slot_number, 2);
        // count = TOTAL after a "2": treat as early, run one
        rig.wake_at_current(1);
        assert_eq!(rig.state().next_slot_number, 3);

        let same = count_events(rig.events(), |e| matches!(e, Event::SameSlot { .. }));
        let multi = count_events(rig.events(), |e| matches!(e, Event::MultipleSlots { .. }));
        assert_eq!((same, multi), (0, 0));
        assert_eq!(rig.scheduler.counters().slots_processed_count, 3);
    }

    #[test]
    fn repeated_same_slot_is_reported() {
        let mut rig = Rig::new();
        rig.at(10, 9);
        rig.engine.state_mut().last_process_count = 100;

        rig.wake().unwrap();

        assert_eq!(rig.events(), &[Event::SameSlot { slot: 9 }]);
        assert_eq!(rig.scheduler.counters().same_slot_count, 1);
        assert_eq!(rig.scheduler.counters().slots_processed_count, 0);
        assert_eq!(rig.state().next_slot_number, 10);
    }

    #[test]
    fn repeated_two_slot_lag_is_reported() {
        let mut rig = Rig::new();
        rig.at(10, 11);
        rig.engine.state_mut().last_process_count = 2;

        rig.wake().unwrap();

        assert_eq!(rig.events(), &[Event::MultipleSlots { slot: 10, count: 2 }]);
        assert_eq!(rig.state().next_slot_number, 12);
    }

    #[test]
    fn expected_bursts_are_counted_but_not_reported_with_coarse_timer() {
        // accuracy 6000 µs → two slots per tick is normal.
        let mut rig = Rig::with_accuracy(6_000);
        rig.clock.set_micros(110_000);
        rig.engine.state_mut().next_slot_number = 10;
        rig.engine.state_mut().last_process_count = 2;

        rig.wake().unwrap();

        assert_eq!(rig.scheduler.counters().multiple_slots_count, 1);
        assert!(rig.events().is_empty());
        assert_eq!(rig.state().next_slot_number, 12);
    }

    // ── Dispatch semantics over many slots ────────────────────────────────────

    #[test]
    fn every_pass_entry_fires_once_per_pass() {
        let mut rig = Rig::new();
        rig.place(0, 0, ScheduleEntry::send_message(1, 1, 0));
        let mut timing = rig.engine.state().clone();

        for _ in 0..250 {
            rig.scheduler.process_next_slot(&mut timing).unwrap();
        }

        // Passes 0, 1 and 2 each start at slot 0.
        assert_eq!(rig.scheduler.dispatcher().bus().sent.len(), 250 / 100 + 1);
        assert_eq!(timing.table_pass_count, 2);
        assert_eq!(timing.next_slot_number, 50);
    }

    #[test]
    fn frequency_and_remainder_select_one_pass_in_each_period() {
        for frequency in 1..=5u16 {
            for remainder in 0..frequency {
                let mut rig = Rig::new();
                rig.place(3, 2, ScheduleEntry::send_message(1, frequency, remainder));
                let mut timing = rig.engine.state().clone();

                let mut fired_on = Vec::new();
                for _ in 0..frequency {
                    let before = rig.scheduler.dispatcher().bus().sent.len();
                    let pass = timing.table_pass_count;
                    for _ in 0..100 {
                        rig.scheduler.process_next_slot(&mut timing).unwrap();
                    }
                    if rig.scheduler.dispatcher().bus().sent.len() > before {
                        fired_on.push(pass);
                    }
                }

                assert_eq!(fired_on, vec![u32::from(remainder)], "f={frequency} r={remainder}");
            }
        }
    }

    #[test]
    fn process_entry_heals_corruption() {
        let mut rig = Rig::new();
        rig.place(0, 0, ScheduleEntry::send_message(128, 1, 0));
        let timing = rig.engine.state().clone();

        rig.scheduler.process_entry(&timing, 0, 0);

        assert_eq!(
            rig.scheduler.tables().schedule_entry(0, 0).unwrap().enable_state,
            EnableState::Disabled
        );
        assert!(rig.scheduler.dispatcher().bus().sent.is_empty());
        assert_eq!(rig.events().len(), 2);
    }

    // ── Fatal path ────────────────────────────────────────────────────────────

    #[test]
    fn command_failure_at_sync_slot_aborts_wakeup() {
        let mut rig = Rig::new();
        rig.scheduler.commands_mut().fail = true;
        // Catch up from 97 to 99 (three slots); failure at 99 is the last.
        rig.at(97, 99);
        rig.engine.state_mut().last_process_count = 3;
        let err = rig.wake().unwrap_err();
        assert!(matches!(err, SchedulerError::DeferredCommands(_)));
        assert_eq!(rig.scheduler.counters().slots_processed_count, 3);

        // Failure mid-burst stops the remaining slots.
        let mut rig = Rig::new();
        rig.scheduler.commands_mut().fail = true;
        rig.at(98, 1);
        rig.engine.state_mut().last_process_count = 4;
        assert!(rig.wake().is_err());
        assert_eq!(rig.scheduler.counters().slots_processed_count, 2);
        assert_eq!(rig.state().next_slot_number, 0);
    }

    #[test]
    fn command_failure_while_skipping_runs_no_slots() {
        let mut rig = Rig::new();
        rig.scheduler.commands_mut().fail = true;
        rig.at(45, 99);

        let err = rig.wake().unwrap_err();

        assert_eq!(
            err,
            SchedulerError::DeferredCommands(CommandError::SourceFailed("injected".into()))
        );
        assert_eq!(rig.scheduler.counters().slots_processed_count, 0);
        assert_eq!(rig.state().next_slot_number, 99);
    }

    #[test]
    fn reset_counters_clears_all_layers() {
        let mut rig = Rig::new();
        rig.place(0, 0, ScheduleEntry::send_message(1, 1, 0));
        rig.at(0, 3).wake().unwrap();
        assert_ne!(rig.scheduler.counters(), SchedulerCounters::default());

        rig.scheduler.reset_counters();

        assert_eq!(rig.scheduler.counters(), SchedulerCounters::default());
        assert_eq!(rig.scheduler.dispatcher().counters(), DispatchCounters::default());
    }
}
