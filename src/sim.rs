// MicDuty — Host Simulation
//
// A fake device for host builds: virtual microsecond clock, scripted
// microphone, injectable failures and an ordered journal of everything the
// firmware did to the hardware.  All handles share one state, so a test can
// hand them to the duty cycle and inspect the device afterwards.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::config::WatchdogConfig;
use crate::drivers::board::{BatterySettings, Board};
use crate::drivers::mic::Microphone;
use crate::error::{DutyError, DutyResult};
use crate::events::WakeCause;
use crate::retained::RetainedStore;
use crate::runtime::{alloc_samples, Runtime};
use crate::watchdog::Watchdog;

/// Samples per read when no script is given: 10 ms at 16 kHz.
const DEFAULT_STEADY_READ: usize = 160;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    BoardInit,
    BatteryConfigured(BatterySettings),
    PeripheralPower(bool),
    VoltageRail(bool),
    RailsHeld,
    RailsReleased,
    Alloc { samples: usize, ok: bool },
    MicInit { ok: bool },
    MicRead { requested: usize, returned: usize },
    MicDeinit,
    WatchdogConfigured(WatchdogConfig),
    WatchdogRegistered,
    WatchdogSignal { at_us: u64 },
    Delay { us: u64 },
    TimestampWritten { value: u64, at_us: u64 },
    FailedSleeps(u32),
    TimerArmed { us: u64 },
    DeepSleep { at_us: u64 },
    Restart,
}

#[derive(Debug)]
struct SimState {
    now_us: u64,
    wake_cause: WakeCause,

    read_script: VecDeque<usize>,
    steady_read: usize,
    read_cost_us: u64,
    sample_counter: i16,

    alloc_failures: u32,
    mic_init_failures: u32,
    board_init_fails: bool,
    timer_arm_fails: bool,
    stuck_peripheral_power: bool,

    peripheral_power: bool,
    voltage_rail: bool,
    // Pads keep their level through `wake` while held.
    rails_held: bool,
    mic_open: bool,
    registered: HashSet<ThreadId>,

    // Survive `wake`, like RTC memory.
    sleep_start_us: u64,
    failed_sleeps: u32,

    events: Vec<SimEvent>,
}

impl SimState {
    fn record(&mut self, event: SimEvent) {
        self.events.push(event);
    }
}

/// Handle to a simulated device.  Clones share the same device.
#[derive(Debug, Clone)]
pub struct SimDevice {
    state: Arc<Mutex<SimState>>,
}

impl SimDevice {
    pub fn new(wake_cause: WakeCause) -> Self {
        let state = SimState {
            now_us: 0,
            wake_cause,
            read_script: VecDeque::new(),
            steady_read: DEFAULT_STEADY_READ,
            read_cost_us: 0,
            sample_counter: 0,
            alloc_failures: 0,
            mic_init_failures: 0,
            board_init_fails: false,
            timer_arm_fails: false,
            stuck_peripheral_power: false,
            peripheral_power: false,
            voltage_rail: true,
            rails_held: false,
            mic_open: false,
            registered: HashSet::new(),
            sleep_start_us: 0,
            failed_sleeps: 0,
            events: Vec::new(),
        };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ---- Scenario setup -------------------------------------------------

    /// Sizes returned by successive reads, verbatim.  A size larger than the
    /// request models a misbehaving driver.
    pub fn with_reads(self, sizes: impl IntoIterator<Item = usize>) -> Self {
        self.lock().read_script.extend(sizes);
        self
    }

    /// Size returned once the script runs out.
    pub fn with_steady_read(self, samples: usize) -> Self {
        self.lock().steady_read = samples;
        self
    }

    /// Virtual time consumed by every read.
    pub fn with_read_cost(self, us: u64) -> Self {
        self.lock().read_cost_us = us;
        self
    }

    pub fn fail_allocations(self, count: u32) -> Self {
        self.lock().alloc_failures = count;
        self
    }

    pub fn fail_mic_init(self, count: u32) -> Self {
        self.lock().mic_init_failures = count;
        self
    }

    pub fn fail_board_init(self) -> Self {
        self.lock().board_init_fails = true;
        self
    }

    pub fn fail_timer_arm(self) -> Self {
        self.lock().timer_arm_fails = true;
        self
    }

    /// The microphone supply is on and ignores every request to change.
    pub fn stick_peripheral_power_on(self) -> Self {
        {
            let mut state = self.lock();
            state.peripheral_power = true;
            state.stuck_peripheral_power = true;
        }
        self
    }

    /// Come back from deep sleep or a restart: volatile state and the clock
    /// reset, retained values, held pad levels and the journal are kept.
    pub fn wake(&self, cause: WakeCause) {
        let mut state = self.lock();
        state.now_us = 0;
        state.wake_cause = cause;
        if !state.rails_held {
            state.peripheral_power = state.stuck_peripheral_power;
            state.voltage_rail = true;
        }
        state.mic_open = false;
        state.registered.clear();
    }

    // ---- Handles --------------------------------------------------------

    pub fn board(&self) -> SimBoard {
        SimBoard { device: self.clone() }
    }

    pub fn mic(&self) -> SimMicrophone {
        SimMicrophone { device: self.clone() }
    }

    pub fn watchdog(&self) -> SimWatchdog {
        SimWatchdog { device: self.clone() }
    }

    pub fn runtime(&self) -> SimRuntime {
        SimRuntime { device: self.clone() }
    }

    pub fn store(&self) -> SimRetainedStore {
        SimRetainedStore { device: self.clone() }
    }

    // ---- Inspection -----------------------------------------------------

    pub fn events(&self) -> Vec<SimEvent> {
        self.lock().events.clone()
    }

    pub fn now_us(&self) -> u64 {
        self.lock().now_us
    }

    pub fn peripheral_power(&self) -> bool {
        self.lock().peripheral_power
    }

    pub fn voltage_rail(&self) -> bool {
        self.lock().voltage_rail
    }

    pub fn mic_open(&self) -> bool {
        self.lock().mic_open
    }

    pub fn registrations(&self) -> usize {
        self.lock().registered.len()
    }

    pub fn rails_held(&self) -> bool {
        self.lock().rails_held
    }

    pub fn last_sleep_start(&self) -> u64 {
        self.lock().sleep_start_us
    }

    pub fn failed_sleeps(&self) -> u32 {
        self.lock().failed_sleeps
    }

    pub fn restarts(&self) -> usize {
        self.lock().events.iter().filter(|e| **e == SimEvent::Restart).count()
    }

    pub fn signal_times(&self) -> Vec<u64> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                SimEvent::WatchdogSignal { at_us } => Some(*at_us),
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------
#[derive(Debug, Clone)]
pub struct SimBoard {
    device: SimDevice,
}

impl Board for SimBoard {
    fn init(&mut self) -> DutyResult<()> {
        let mut state = self.device.lock();
        state.record(SimEvent::BoardInit);
        if state.rails_held {
            state.rails_held = false;
            state.record(SimEvent::RailsReleased);
        }
        if state.board_init_fails {
            return Err(DutyError::peripheral("board", "no response from PMIC"));
        }
        Ok(())
    }

    fn set_peripheral_power(&mut self, enabled: bool) -> DutyResult<()> {
        let mut state = self.device.lock();
        state.record(SimEvent::PeripheralPower(enabled));
        if !state.stuck_peripheral_power && !state.rails_held {
            state.peripheral_power = enabled;
        }
        Ok(())
    }

    fn enable_voltage_rail(&mut self, enabled: bool) -> DutyResult<()> {
        let mut state = self.device.lock();
        state.record(SimEvent::VoltageRail(enabled));
        if !state.rails_held {
            state.voltage_rail = enabled;
        }
        Ok(())
    }

    fn configure_battery(&mut self, settings: BatterySettings) -> DutyResult<()> {
        self.device.lock().record(SimEvent::BatteryConfigured(settings));
        Ok(())
    }

    fn peripheral_power_enabled(&self) -> bool {
        self.device.lock().peripheral_power
    }

    fn hold_rails(&mut self) -> DutyResult<()> {
        let mut state = self.device.lock();
        state.rails_held = true;
        state.record(SimEvent::RailsHeld);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------
#[derive(Debug, Clone)]
pub struct SimMicrophone {
    device: SimDevice,
}

impl Microphone for SimMicrophone {
    fn init(&mut self) -> DutyResult<()> {
        let mut state = self.device.lock();
        if state.mic_init_failures > 0 {
            state.mic_init_failures -= 1;
            state.record(SimEvent::MicInit { ok: false });
            return Err(DutyError::peripheral("microphone", "i2s channel unavailable"));
        }
        if !state.peripheral_power {
            state.record(SimEvent::MicInit { ok: false });
            return Err(DutyError::peripheral("microphone", "no supply on EN rail"));
        }
        state.mic_open = true;
        state.record(SimEvent::MicInit { ok: true });
        Ok(())
    }

    fn read(&mut self, buffer: &mut [i16]) -> usize {
        let mut guard = self.device.lock();
        let state = &mut *guard;
        let returned = state.read_script.pop_front().unwrap_or(state.steady_read);
        let written = returned.min(buffer.len());
        for slot in &mut buffer[..written] {
            *slot = state.sample_counter;
            state.sample_counter = state.sample_counter.wrapping_add(1);
        }
        state.now_us += state.read_cost_us;
        state.record(SimEvent::MicRead { requested: buffer.len(), returned });
        returned
    }

    fn deinit(&mut self) {
        let mut state = self.device.lock();
        state.mic_open = false;
        state.record(SimEvent::MicDeinit);
    }
}

// ---------------------------------------------------------------------------
// Watchdog
// ---------------------------------------------------------------------------
#[derive(Debug, Clone)]
pub struct SimWatchdog {
    device: SimDevice,
}

impl Watchdog for SimWatchdog {
    fn configure(&mut self, config: &WatchdogConfig) -> DutyResult<()> {
        self.device.lock().record(SimEvent::WatchdogConfigured(*config));
        Ok(())
    }

    fn register_current_task(&mut self) -> DutyResult<bool> {
        let mut state = self.device.lock();
        let fresh = state.registered.insert(thread::current().id());
        if fresh {
            state.record(SimEvent::WatchdogRegistered);
        }
        Ok(fresh)
    }

    fn signal(&mut self) {
        let mut state = self.device.lock();
        let at_us = state.now_us;
        state.record(SimEvent::WatchdogSignal { at_us });
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------
#[derive(Debug, Clone)]
pub struct SimRuntime {
    device: SimDevice,
}

impl Runtime for SimRuntime {
    fn now_us(&self) -> u64 {
        self.device.lock().now_us
    }

    fn delay(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        let mut state = self.device.lock();
        state.now_us += us;
        state.record(SimEvent::Delay { us });
    }

    fn wake_cause(&self) -> WakeCause {
        self.device.lock().wake_cause
    }

    fn try_alloc_samples(&self, capacity: usize) -> Option<Vec<i16>> {
        let mut state = self.device.lock();
        if state.alloc_failures > 0 {
            state.alloc_failures -= 1;
            state.record(SimEvent::Alloc { samples: capacity, ok: false });
            return None;
        }
        let buffer = alloc_samples(capacity);
        state.record(SimEvent::Alloc { samples: capacity, ok: buffer.is_some() });
        buffer
    }

    fn arm_timer_wakeup(&self, duration: Duration) -> DutyResult<()> {
        let mut state = self.device.lock();
        if state.timer_arm_fails {
            return Err(DutyError::SleepConfig("timer wakeup rejected".into()));
        }
        state.record(SimEvent::TimerArmed { us: duration.as_micros() as u64 });
        Ok(())
    }

    fn deep_sleep(&self) -> ! {
        let at_us = {
            let mut state = self.device.lock();
            let at_us = state.now_us;
            state.record(SimEvent::DeepSleep { at_us });
            at_us
        };
        log::info!("[sim] deep sleep at {} us, exiting", at_us);
        std::process::exit(0)
    }

    fn restart(&self) -> ! {
        self.device.lock().record(SimEvent::Restart);
        log::warn!("[sim] restart requested, exiting");
        std::process::exit(1)
    }
}

// ---------------------------------------------------------------------------
// Retained state
// ---------------------------------------------------------------------------
#[derive(Debug, Clone)]
pub struct SimRetainedStore {
    device: SimDevice,
}

impl RetainedStore for SimRetainedStore {
    fn record_sleep_start(&mut self, now_us: u64) {
        let mut state = self.device.lock();
        let at_us = state.now_us;
        state.sleep_start_us = now_us;
        state.record(SimEvent::TimestampWritten { value: now_us, at_us });
    }

    fn last_sleep_start(&self) -> u64 {
        self.device.lock().sleep_start_us
    }

    fn failed_sleeps(&self) -> u32 {
        self.device.lock().failed_sleeps
    }

    fn set_failed_sleeps(&mut self, count: u32) {
        let mut state = self.device.lock();
        state.failed_sleeps = count;
        state.record(SimEvent::FailedSleeps(count));
    }
}
