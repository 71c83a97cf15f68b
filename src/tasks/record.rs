// MicDuty — Record Task (duty-cycle controller)
//
// One pass per boot: classify the wake, record a window unless an external
// pin woke us, stamp the sleep start into RTC memory, power down and sleep.
// There is no loop: deep sleep ends this task and the next pass starts from
// the boot path.  If sleep cannot be armed cleanly the device restarts, at
// most `max_sleep_restarts` times in a row, then sleeps with the fault.

use std::thread;

use crate::capture::CaptureSession;
use crate::config::*;
use crate::drivers::board::Board;
use crate::drivers::mic::Microphone;
use crate::error::{DutyError, DutyResult};
use crate::events::{CaptureOutcome, CycleState, WakeCause};
use crate::retained::RetainedStore;
use crate::runtime::Runtime;
use crate::sleep::{self, SleepArmed};
use crate::watchdog::Watchdog;

/// What one pass did, up to the point of sleeping.
#[derive(Debug)]
pub struct CycleReport {
    pub wake_cause: WakeCause,
    pub capture: CaptureOutcome,
    /// Value written to the retained timestamp.
    pub sleep_start_us: u64,
    /// States entered, in order.
    pub path: Vec<CycleState>,
    pub sleep: DutyResult<SleepArmed>,
}

/// What to do after a cycle failed to arm sleep.
#[derive(Debug, PartialEq, Eq)]
pub enum Recovery {
    /// Reboot and run the whole cycle again.
    Restart { attempt: u32 },
    /// Restarts did not clear the fault; sleep with it.
    SleepAnyway(SleepArmed),
}

pub struct DutyCycle<B, M, W, R, S> {
    config: DutyCycleConfig,
    board: B,
    mic: M,
    watchdog: W,
    runtime: R,
    store: S,
    state: CycleState,
    path: Vec<CycleState>,
}

impl<B, M, W, R, S> DutyCycle<B, M, W, R, S>
where
    B: Board,
    M: Microphone,
    W: Watchdog,
    R: Runtime,
    S: RetainedStore,
{
    pub fn new(config: DutyCycleConfig, board: B, mic: M, watchdog: W, runtime: R, store: S) -> Self {
        Self {
            config,
            board,
            mic,
            watchdog,
            runtime,
            store,
            state: CycleState::Starting,
            path: vec![CycleState::Starting],
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Run one duty cycle and hand the device to deep sleep.  Never returns.
    pub fn run(mut self) -> ! {
        let report = self.run_cycle();
        let armed = match report.sleep {
            Ok(armed) => armed,
            Err(e) => match self.recover(&e) {
                Recovery::SleepAnyway(armed) => armed,
                Recovery::Restart { .. } => self.runtime.restart(),
            },
        };
        self.enter(CycleState::Sleeping);
        sleep::enter_sleep(&self.runtime, armed)
    }

    /// Decide between another restart and sleeping with the fault.  The
    /// restart count lives in retained memory so it spans reboots.
    pub fn recover(&mut self, error: &DutyError) -> Recovery {
        let limit = self.config.max_sleep_restarts;
        let attempt = self.store.failed_sleeps().saturating_add(1);
        if attempt <= limit {
            log::error!("Cannot sleep ({}), restart {}/{}", error, attempt, limit);
            self.store.set_failed_sleeps(attempt);
            return Recovery::Restart { attempt };
        }

        log::error!("Cannot sleep ({}) after {} restarts, sleeping anyway", error, limit);
        self.store.set_failed_sleeps(0);
        match sleep::force_sleep(&mut self.board, &self.runtime, self.config.sleep_duration) {
            Ok(armed) => Recovery::SleepAnyway(armed),
            Err(e) => {
                // Deep sleep without a wake source would never end.
                log::error!("No wake source ({}), restarting", e);
                Recovery::Restart { attempt }
            }
        }
    }

    /// Everything up to, but not including, entering deep sleep.
    pub fn run_cycle(&mut self) -> CycleReport {
        self.state = CycleState::Starting;
        self.path = vec![CycleState::Starting];

        match self.watchdog.register_current_task() {
            Ok(true) => {}
            Ok(false) => log::debug!("Record task already subscribed to watchdog"),
            Err(e) => log::error!("{}", e),
        }

        let wake_cause = self.runtime.wake_cause();
        log::info!(
            "Wake cause: {} (previous sleep began at {} us)",
            wake_cause.display_name(),
            self.store.last_sleep_start()
        );

        let capture = if wake_cause.permits_capture() {
            self.enter(CycleState::Capturing);
            self.capture()
        } else {
            log::info!("External pin wake, skipping capture");
            CaptureOutcome::Skipped
        };

        self.enter(CycleState::PreparingSleep);
        self.watchdog.signal();
        self.runtime.delay(self.config.settle_delay);

        let sleep_start_us = self.runtime.now_us();
        self.store.record_sleep_start(sleep_start_us);

        let sleep = sleep::prepare_sleep(&mut self.board, &self.runtime, self.config.sleep_duration);
        if sleep.is_ok() && self.store.failed_sleeps() != 0 {
            self.store.set_failed_sleeps(0);
        }

        let report = CycleReport {
            wake_cause,
            capture,
            sleep_start_us,
            path: self.path.clone(),
            sleep,
        };
        log::info!(
            "Cycle done: wake={} capture={:?} sleep_start={} us",
            report.wake_cause.display_name(),
            report.capture,
            report.sleep_start_us
        );
        report
    }

    fn capture(&mut self) -> CaptureOutcome {
        let mut session = match CaptureSession::open(
            &mut self.mic,
            &mut self.board,
            &mut self.watchdog,
            &self.runtime,
            &self.config,
        ) {
            Ok(session) => session,
            Err(e) => {
                log::error!("Capture skipped: {}", e);
                return CaptureOutcome::Degraded(e);
            }
        };

        let stats = session.run(
            &mut self.watchdog,
            &self.runtime,
            self.config.record_duration,
            self.config.poll_interval,
        );
        session.close();
        CaptureOutcome::Completed(stats)
    }

    fn enter(&mut self, next: CycleState) {
        log::debug!("State: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.path.push(next);
    }
}

/// Spawn the record task pinned to core 0.
#[cfg(target_os = "espidf")]
pub fn spawn<F>(body: F) -> anyhow::Result<()>
where
    F: FnOnce() + Send + 'static,
{
    use esp_idf_hal::cpu::Core;
    use esp_idf_hal::task::thread::ThreadSpawnConfiguration;

    ThreadSpawnConfiguration {
        name: Some(&b"record\0"[..]),
        stack_size: STACK_RECORD,
        priority: RECORD_TASK_PRIORITY,
        pin_to_core: Some(Core::Core0),
        ..Default::default()
    }
    .set()?;

    let spawned = thread::Builder::new()
        .name(RECORD_TASK_NAME.into())
        .stack_size(STACK_RECORD)
        .spawn(body);

    // Later std threads should not inherit the pinning.
    ThreadSpawnConfiguration::default().set()?;
    spawned?;
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn spawn<F>(body: F) -> anyhow::Result<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(RECORD_TASK_NAME.into())
        .stack_size(STACK_RECORD)
        .spawn(body)?;
    Ok(())
}
