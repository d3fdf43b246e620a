/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! tokio driver for a [`SchedulerContext`].
//!
//! | Task | Drives |
//! |---|---|
//! | minor-frame timer | `sleep_until` on the current [`TimerSetting`]; re-armed through a `watch` channel |
//! | major-frame tone | `interval_at(offset, micros_per_major_frame)`; optional |
//! | main loop | waits on the [`Wakeup`], runs [`SchedulerContext::run_once`], applies [`ControlRequest`]s, logs housekeeping |
//!
//! All three lock the same `tokio::sync::Mutex`, so handler bodies and slot
//! processing never interleave.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::bus::TracingBus;
use crate::commands::{CommandQueue, CommandSender};
use crate::config::SchedulerConfig;
use crate::context::{Housekeeping, SchedulerContext};
use crate::control::{ControlRequest, RuntimeHandle};
use crate::events::TracingEventSink;
use crate::scheduler::SlotScheduler;
use crate::table::TableStore;
use crate::timing::{MinorFrameTimer, TimeSource};
use crate::wakeup::Wakeup;

pub type RuntimeContext =
    SchedulerContext<TracingBus, CommandQueue, TracingEventSink, SystemClock, TokioMinorTimer>;

pub type SharedContext = Arc<Mutex<RuntimeContext>>;

// ── SystemClock ───────────────────────────────────────────────────────────────

/// MET counted from process start; sub-seconds are 2^-32 s units.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemClock {
    fn met_subseconds(&self) -> u32 {
        let nanos = u64::from(self.epoch.elapsed().subsec_nanos());
        ((nanos << 32) / 1_000_000_000) as u32
    }

    fn subseconds_to_micros(&self, subseconds: u32) -> u32 {
        ((u64::from(subseconds) * 1_000_000) >> 32) as u32
    }

    fn is_flywheeling(&self) -> bool {
        false
    }
}

// ── TokioMinorTimer ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSetting {
    pub start_delay_us: u32,
    /// `0` for a one-shot.
    pub period_us: u32,
}

/// Timer handle held by the engine.  Re-arming publishes a new setting; the
/// timer task picks it up and restarts from "now".
#[derive(Debug)]
pub struct TokioMinorTimer {
    tx: watch::Sender<Option<TimerSetting>>,
    accuracy_us: u32,
}

impl TokioMinorTimer {
    /// Returns the handle and the receiver for [`drive_minor_frame_timer`].
    pub fn new(accuracy_us: u32) -> (Self, watch::Receiver<Option<TimerSetting>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx, accuracy_us }, rx)
    }
}

impl MinorFrameTimer for TokioMinorTimer {
    fn rearm(&mut self, start_delay_us: u32, period_us: u32) {
        // send_replace bumps the version even for an identical setting.
        self.tx.send_replace(Some(TimerSetting {
            start_delay_us,
            period_us,
        }));
    }

    fn accuracy_us(&self) -> u32 {
        self.accuracy_us
    }
}

fn micros(us: u32) -> Duration {
    Duration::from_micros(u64::from(us))
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

/// Fires `on_minor_frame_tick` per the latest [`TimerSetting`].
pub async fn drive_minor_frame_timer(
    context: SharedContext,
    mut settings: watch::Receiver<Option<TimerSetting>>,
) {
    loop {
        let current = *settings.borrow_and_update();
        let Some(setting) = current else {
            if settings.changed().await.is_err() {
                return;
            }
            continue;
        };

        let mut deadline = Instant::now() + micros(setting.start_delay_us);
        loop {
            tokio::select! {
                biased;

                changed = settings.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                _ = time::sleep_until(deadline) => {
                    context.lock().await.on_minor_frame_tick();
                    if setting.period_us == 0 {
                        // One-shot: idle until re-armed.
                        if settings.changed().await.is_err() {
                            return;
                        }
                        break;
                    }
                    deadline += micros(setting.period_us);
                }
            }
        }
    }
}

/// Simulated external tone, one per major frame.
pub async fn drive_major_frame_tone(context: SharedContext, period: Duration, offset: Duration) {
    let mut interval = time::interval_at(Instant::now() + offset, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        context.lock().await.on_major_frame_tone();
    }
}

// ── Runtime ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub timer_accuracy_us: u32,
    /// Delay of the first simulated tone; `None` runs without a tone.
    pub tone_offset: Option<Duration>,
    /// Stop after this long; `None` runs until ctrl-c.
    pub run_for: Option<Duration>,
    pub hk_interval: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            timer_accuracy_us: 1_000,
            tone_offset: Some(Duration::ZERO),
            run_for: None,
            hk_interval: Duration::from_secs(10),
        }
    }
}

/// A scheduler ready to run.  Requests sent through the paired
/// [`RuntimeHandle`] before [`Runtime::run`] are applied first.
pub struct Runtime {
    config: Arc<SchedulerConfig>,
    context: RuntimeContext,
    timer_rx: watch::Receiver<Option<TimerSetting>>,
    // The queue reports a broken source once every sender is gone, so one is
    // held for the whole run.
    command_tx: CommandSender,
    control_rx: mpsc::UnboundedReceiver<ControlRequest>,
    options: RuntimeOptions,
}

impl Runtime {
    pub fn new(
        config: Arc<SchedulerConfig>,
        tables: TableStore,
        options: RuntimeOptions,
    ) -> (Self, RuntimeHandle) {
        let (command_tx, commands) = CommandQueue::new();
        let (timer, timer_rx) = TokioMinorTimer::new(options.timer_accuracy_us);
        let (handle, control_rx) = RuntimeHandle::new();

        let scheduler = SlotScheduler::new(
            Arc::clone(&config),
            tables,
            TracingBus::new(),
            commands,
            TracingEventSink::new(),
        );
        let context = SchedulerContext::new(Arc::clone(&config), scheduler, SystemClock::new(), timer);

        let runtime = Self {
            config,
            context,
            timer_rx,
            command_tx,
            control_rx,
            options,
        };
        (runtime, handle)
    }

    /// Runs until shutdown and returns the final housekeeping.
    ///
    /// # Errors
    /// A fatal scheduling error, or failure to install the ctrl-c handler.
    pub async fn run(self) -> Result<Housekeeping> {
        let Self {
            config,
            mut context,
            timer_rx,
            command_tx,
            mut control_rx,
            options,
        } = self;

        context.start();
        let wakeup = Arc::clone(context.wakeup());
        let context = Arc::new(Mutex::new(context));

        let mut tasks: Vec<JoinHandle<()>> = vec![tokio::spawn(drive_minor_frame_timer(
            Arc::clone(&context),
            timer_rx,
        ))];
        match options.tone_offset {
            Some(offset) => {
                info!(offset_us = offset.as_micros() as u64, "Simulated major-frame tone enabled");
                tasks.push(tokio::spawn(drive_major_frame_tone(
                    Arc::clone(&context),
                    micros(config.micros_per_major_frame),
                    offset,
                )));
            }
            None => info!("No major-frame tone; minor frames will synchronise to MET"),
        }

        let result = main_loop(&context, &wakeup, &command_tx, &mut control_rx, &options).await;

        for task in &tasks {
            task.abort();
        }
        drop(command_tx);
        result?;

        let hk = context.lock().await.housekeeping();
        Ok(hk)
    }
}

/// Runs a scheduler nobody sends requests to.
///
/// # Errors
/// As [`Runtime::run`].
pub async fn run(
    config: Arc<SchedulerConfig>,
    tables: TableStore,
    options: RuntimeOptions,
) -> Result<Housekeeping> {
    let (runtime, _handle) = Runtime::new(config, tables, options);
    runtime.run().await
}

async fn main_loop(
    context: &SharedContext,
    wakeup: &Wakeup,
    commands: &CommandSender,
    control: &mut mpsc::UnboundedReceiver<ControlRequest>,
    options: &RuntimeOptions,
) -> Result<()> {
    let run_for = options.run_for;
    let stop = async move {
        match run_for {
            Some(duration) => time::sleep(duration).await,
            None => future::pending::<()>().await,
        }
    };
    tokio::pin!(stop);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut hk_timer = time::interval_at(Instant::now() + options.hk_interval, options.hk_interval);

    loop {
        tokio::select! {
            biased;

            Some(request) = control.recv() => {
                apply_request(&mut *context.lock().await, commands, request)?;
            }
            _ = wakeup.wait() => {
                context
                    .lock()
                    .await
                    .run_once()
                    .context("Slot scheduling stopped")?;
            }
            _ = hk_timer.tick() => report_housekeeping(&mut *context.lock().await),
            _ = &mut stop => {
                info!("Run time elapsed, shutting down");
                return Ok(());
            }
            signal = &mut ctrl_c => {
                signal.context("Failed to listen for ctrl-c")?;
                info!("Interrupted, shutting down");
                return Ok(());
            }
        }
    }
}

/// Table requests are queued for the time-sync slot; the rest act at once.
fn apply_request(
    context: &mut RuntimeContext,
    commands: &CommandSender,
    request: ControlRequest,
) -> Result<()> {
    if let Some(command) = request.table_command() {
        debug!(?command, "Table command queued");
        return commands
            .send(command)
            .context("Failed to queue table command");
    }

    match request {
        ControlRequest::EnableMajorFrameSync => context.enable_major_frame_sync(),
        ControlRequest::EnableProcessing => context.enable_processing(),
        ControlRequest::DisableProcessing => context.disable_processing(),
        ControlRequest::ResetCounters => context.reset_counters(),
        ControlRequest::Enable { .. }
        | ControlRequest::Disable { .. }
        | ControlRequest::EnableGroup { .. }
        | ControlRequest::DisableGroup { .. } => {}
    }
    info!(
        ?request,
        processing_enabled = context.processing_enabled(),
        "Control request applied"
    );
    Ok(())
}

/// Logs a snapshot, then re-opens the event filters.
fn report_housekeeping(context: &mut RuntimeContext) {
    let hk = context.housekeeping();
    info!(
        next_slot = hk.timing.next_slot_number,
        pass = hk.timing.table_pass_count,
        sync = ?hk.timing.sync_to_met,
        source = ?hk.timing.major_frame_source,
        processing = hk.processing_enabled,
        slots = hk.scheduler.slots_processed_count,
        same = hk.scheduler.same_slot_count,
        multi = hk.scheduler.multiple_slots_count,
        skipped = hk.scheduler.skipped_slots_count,
        sent = hk.dispatch.activity_success_count,
        failed = hk.dispatch.activity_failure_count,
        valid_mf = hk.sync.valid_major_frame_count,
        missed_mf = hk.sync.missed_major_frame_count,
        unexpected_mf = hk.sync.unexpected_major_frame_count,
        "Housekeeping"
    );

    let scheduler = context.scheduler_mut();
    debug!(
        suppressed = scheduler.events().suppressed(),
        "Event filters re-opened"
    );
    scheduler.events_mut().reset_filters();
    if scheduler.tables_mut().take_modified() {
        info!("Schedule table modified since last report");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::MajorFrameSource;

    /// Ten 20 ms slots per 200 ms major frame.
    fn fast_config() -> Arc<SchedulerConfig> {
        let config = SchedulerConfig {
            total_slots: 10,
            micros_per_major_frame: 200_000,
            startup_period_us: Some(200_000),
            ..Default::default()
        };
        config.validate().unwrap();
        Arc::new(config)
    }

    #[test]
    fn system_clock_converts_binary_subseconds() {
        let clock = SystemClock::new();
        assert_eq!(clock.subseconds_to_micros(0), 0);
        assert_eq!(clock.subseconds_to_micros(1 << 31), 500_000);
        assert_eq!(clock.subseconds_to_micros(u32::MAX), 999_999);
        assert!(!clock.is_flywheeling());
    }

    #[test]
    fn rearm_publishes_setting() {
        let (mut timer, rx) = TokioMinorTimer::new(1_000);
        assert_eq!(*rx.borrow(), None);

        timer.rearm(15_000, 0);

        assert_eq!(
            *rx.borrow(),
            Some(TimerSetting {
                start_delay_us: 15_000,
                period_us: 0
            })
        );
        assert_eq!(timer.accuracy_us(), 1_000);
    }

    #[tokio::test]
    async fn tone_driven_run_processes_slots() {
        let config = fast_config();
        let options = RuntimeOptions {
            run_for: Some(Duration::from_millis(700)),
            ..Default::default()
        };

        let hk = run(Arc::clone(&config), TableStore::new(config), options)
            .await
            .unwrap();

        assert!(hk.sync.valid_major_frame_count >= 1);
        assert!(hk.scheduler.slots_processed_count >= 10);
        assert_eq!(hk.timing.major_frame_source, MajorFrameSource::ExternalTone);
    }

    #[tokio::test]
    async fn run_without_tone_synchronises_to_met() {
        let config = fast_config();
        let options = RuntimeOptions {
            tone_offset: None,
            run_for: Some(Duration::from_millis(600)),
            ..Default::default()
        };

        let hk = run(Arc::clone(&config), TableStore::new(config), options)
            .await
            .unwrap();

        assert_eq!(hk.sync.valid_major_frame_count, 0);
        assert_eq!(hk.timing.major_frame_source, MajorFrameSource::MinorFrameTimer);
        assert!(hk.scheduler.slots_processed_count > 0);
    }

    #[tokio::test]
    async fn disabled_processing_holds_every_slot() {
        let config = fast_config();
        let options = RuntimeOptions {
            run_for: Some(Duration::from_millis(400)),
            ..Default::default()
        };
        let (runtime, handle) = Runtime::new(Arc::clone(&config), TableStore::new(config), options);
        handle.send(ControlRequest::DisableProcessing).unwrap();

        let hk = runtime.run().await.unwrap();

        assert!(!hk.processing_enabled);
        assert_eq!(hk.scheduler.slots_processed_count, 0);
        assert!(hk.wakeups_released > 0);
    }

    #[tokio::test]
    async fn table_request_is_applied_at_time_sync_slot() {
        let config = fast_config();
        let options = RuntimeOptions {
            run_for: Some(Duration::from_millis(700)),
            ..Default::default()
        };
        let (runtime, handle) = Runtime::new(Arc::clone(&config), TableStore::new(config), options);
        // Every entry is unused, so the request reaches the table and is refused.
        handle
            .send(ControlRequest::Disable { slot: 0, entry: 0 })
            .unwrap();

        let hk = runtime.run().await.unwrap();

        assert_eq!(hk.commands.command_count, 0);
        assert_eq!(hk.commands.command_error_count, 1);
    }

    #[tokio::test]
    async fn handle_reports_stopped_scheduler() {
        let config = fast_config();
        let options = RuntimeOptions {
            run_for: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let (runtime, handle) = Runtime::new(Arc::clone(&config), TableStore::new(config), options);

        runtime.run().await.unwrap();

        assert!(handle.send(ControlRequest::ResetCounters).is_err());
    }
}
