use std::time::Duration;

use micduty::config::DutyCycleConfig;
use micduty::error::DutyError;
use micduty::events::{CaptureOutcome, CycleState, WakeCause};
use micduty::sim::{SimBoard, SimDevice, SimEvent, SimMicrophone, SimRuntime, SimRetainedStore, SimWatchdog};
use micduty::startup;
use micduty::tasks::record::{CycleReport, DutyCycle, Recovery};

type SimCycle = DutyCycle<SimBoard, SimMicrophone, SimWatchdog, SimRuntime, SimRetainedStore>;

fn cycle_on(device: &SimDevice) -> SimCycle {
    DutyCycle::new(
        DutyCycleConfig::DEFAULT,
        device.board(),
        device.mic(),
        device.watchdog(),
        device.runtime(),
        device.store(),
    )
}

fn boot(device: &SimDevice) -> CycleReport {
    startup::bring_up(&mut device.board(), &mut device.watchdog(), &DutyCycleConfig::DEFAULT);
    cycle_on(device).run_cycle()
}

fn position(events: &[SimEvent], pred: impl Fn(&SimEvent) -> bool) -> usize {
    events.iter().position(pred).expect("event not in journal")
}

/// The last microphone-rail change before the timer was armed switched it off.
fn rail_off_before_arming(device: &SimDevice) -> bool {
    let events = device.events();
    let armed = position(&events, |e| matches!(e, SimEvent::TimerArmed { .. }));
    let last_power = events[..armed]
        .iter()
        .rev()
        .find_map(|e| match e {
            SimEvent::PeripheralPower(on) => Some(*on),
            _ => None,
        });
    last_power == Some(false) && !device.peripheral_power()
}

#[test]
fn every_cause_but_external_pin_captures() {
    for cause in [WakeCause::ColdBoot, WakeCause::TimerWake, WakeCause::OtherWake] {
        let report = boot(&SimDevice::new(cause));
        assert!(report.path.contains(&CycleState::Capturing), "{:?}", cause);
        assert!(report.capture.ran(), "{:?}", cause);
    }

    let device = SimDevice::new(WakeCause::ExternalPinWake);
    let report = boot(&device);
    assert!(!report.path.contains(&CycleState::Capturing));
    assert_eq!(report.capture, CaptureOutcome::Skipped);
    assert!(!device.events().iter().any(|e| matches!(e, SimEvent::MicRead { .. })));
}

#[test]
fn default_window_fills_the_full_buffer() {
    let report = boot(&SimDevice::new(WakeCause::TimerWake));
    let CaptureOutcome::Completed(stats) = report.capture else {
        panic!("capture did not run");
    };

    assert_eq!(stats.capacity, 48_000);
    assert_eq!(stats.total_samples, 48_000);
    assert_eq!(stats.reads, 300);
    assert!(stats.elapsed_us >= 3_000_000);
    assert!(stats.elapsed_us <= 3_000_000 + 10_000);
}

#[test]
fn reads_stay_inside_the_buffer_for_any_read_pattern() {
    let device = SimDevice::new(WakeCause::TimerWake)
        .with_reads([0, 0, 7, 50_000, 1, 0])
        .with_steady_read(333);
    let report = boot(&device);

    let CaptureOutcome::Completed(stats) = report.capture else {
        panic!("capture did not run");
    };
    assert_eq!(stats.total_samples, stats.capacity);

    let mut free = stats.capacity;
    for event in device.events() {
        if let SimEvent::MicRead { requested, returned } = event {
            assert_eq!(requested, free);
            assert!(requested > 0);
            free -= returned.min(requested);
        }
    }
    assert_eq!(free, 0);
}

#[test]
fn watchdog_is_signalled_every_poll_interval() {
    let device = SimDevice::new(WakeCause::TimerWake);
    boot(&device);

    let signals = device.signal_times();
    let in_window = signals.iter().filter(|&&t| t < 3_000_000).count();
    assert!(in_window >= 300, "only {} signals during capture", in_window);

    let max_gap = signals.windows(2).map(|w| w[1] - w[0]).max().unwrap();
    assert!(max_gap <= 10_000, "gap of {} us", max_gap);
}

#[test]
fn timestamp_is_written_once_right_before_arming() {
    let device = SimDevice::new(WakeCause::ColdBoot);
    let report = boot(&device);
    let events = device.events();

    let writes: Vec<(u64, u64)> = events
        .iter()
        .filter_map(|e| match e {
            SimEvent::TimestampWritten { value, at_us } => Some((*value, *at_us)),
            _ => None,
        })
        .collect();
    assert_eq!(writes.len(), 1);

    let (value, at_us) = writes[0];
    assert_eq!(value, at_us);
    // 3 s window plus the 100 ms settle delay.
    assert_eq!(value, 3_100_000);
    assert_eq!(report.sleep_start_us, value);
    assert_eq!(device.last_sleep_start(), value);

    let written = position(&events, |e| matches!(e, SimEvent::TimestampWritten { .. }));
    let armed = position(&events, |e| matches!(e, SimEvent::TimerArmed { .. }));
    assert!(written < armed);
    assert_eq!(events[armed], SimEvent::TimerArmed { us: 15_000_000 });
}

#[test]
fn rail_is_off_before_sleep_on_every_path() {
    let scenarios = [
        SimDevice::new(WakeCause::TimerWake),
        SimDevice::new(WakeCause::ExternalPinWake),
        SimDevice::new(WakeCause::ColdBoot).fail_allocations(u32::MAX),
        SimDevice::new(WakeCause::ColdBoot).fail_mic_init(1),
        SimDevice::new(WakeCause::ColdBoot).fail_board_init(),
    ];

    for device in scenarios {
        let report = boot(&device);
        assert!(report.sleep.is_ok(), "{:?}", report.capture);
        assert!(rail_off_before_arming(&device), "{:?}", report.capture);
        assert!(!device.voltage_rail());
        assert!(!device.mic_open());
    }
}

#[test]
fn allocation_failure_skips_capture_and_still_sleeps() {
    let device = SimDevice::new(WakeCause::TimerWake).fail_allocations(u32::MAX);
    let report = boot(&device);

    assert_eq!(
        report.capture,
        CaptureOutcome::Degraded(DutyError::AllocationFailure { attempts: 5, samples: 48_000 })
    );
    assert_eq!(report.path, vec![CycleState::Starting, CycleState::Capturing, CycleState::PreparingSleep]);
    // 4 retry delays, then the settle delay.
    assert_eq!(report.sleep_start_us, 40_000 + 100_000);
    assert!(report.sleep.is_ok());
}

#[test]
fn repeated_startup_does_not_duplicate_registration() {
    let device = SimDevice::new(WakeCause::TimerWake);
    let config = DutyCycleConfig::DEFAULT;

    let first = startup::bring_up(&mut device.board(), &mut device.watchdog(), &config);
    let second = startup::bring_up(&mut device.board(), &mut device.watchdog(), &config);
    assert_eq!(first, second);

    let mut cycle = cycle_on(&device);
    cycle.run_cycle();
    cycle_on(&device).run_cycle();

    assert_eq!(device.registrations(), 1);
    let registered = device.events().iter().filter(|e| **e == SimEvent::WatchdogRegistered).count();
    assert_eq!(registered, 1);
    assert!(!device.mic_open());
}

#[test]
fn timestamp_survives_a_wake_and_nothing_else_does() {
    let device = SimDevice::new(WakeCause::ColdBoot);
    let first = boot(&device);

    device.wake(WakeCause::TimerWake);
    assert_eq!(device.registrations(), 0);
    assert_eq!(device.last_sleep_start(), first.sleep_start_us);

    let second = boot(&device);
    assert_eq!(second.wake_cause, WakeCause::TimerWake);
    assert!(second.capture.ran());
    assert_eq!(device.registrations(), 1);
}

#[test]
fn timer_arm_failure_is_reported_to_the_caller() {
    let device = SimDevice::new(WakeCause::TimerWake).fail_timer_arm();
    let report = boot(&device);

    assert!(matches!(report.sleep, Err(DutyError::SleepConfig(_))));
    assert!(!device.peripheral_power());
}

#[test]
fn stuck_rail_restarts_a_bounded_number_of_times_then_sleeps() {
    let device = SimDevice::new(WakeCause::ColdBoot).stick_peripheral_power_on();
    let limit = DutyCycleConfig::DEFAULT.max_sleep_restarts;

    for attempt in 1..=limit {
        startup::bring_up(&mut device.board(), &mut device.watchdog(), &DutyCycleConfig::DEFAULT);
        let mut cycle = cycle_on(&device);
        let error = cycle.run_cycle().sleep.unwrap_err();
        assert_eq!(cycle.recover(&error), Recovery::Restart { attempt });
        assert_eq!(device.failed_sleeps(), attempt);
        // A software restart keeps RTC memory, like a wake.
        device.wake(WakeCause::ColdBoot);
    }

    startup::bring_up(&mut device.board(), &mut device.watchdog(), &DutyCycleConfig::DEFAULT);
    let mut cycle = cycle_on(&device);
    let error = cycle.run_cycle().sleep.unwrap_err();
    let Recovery::SleepAnyway(armed) = cycle.recover(&error) else {
        panic!("still restarting after {} attempts", limit);
    };

    assert_eq!(armed.duration(), Duration::from_secs(15));
    assert_eq!(device.failed_sleeps(), 0);
    assert!(device.rails_held());
    assert!(!device.voltage_rail());
}

#[test]
fn rails_stay_held_through_sleep_and_are_released_on_boot() {
    let device = SimDevice::new(WakeCause::ColdBoot);
    boot(&device);
    assert!(device.rails_held());

    device.wake(WakeCause::TimerWake);
    assert!(device.rails_held());
    assert!(!device.peripheral_power());
    assert!(!device.voltage_rail());

    let before = device.events().len();
    let second = boot(&device);
    assert!(second.capture.ran());

    let events = &device.events()[before..];
    let released = position(events, |e| *e == SimEvent::RailsReleased);
    let powered = position(events, |e| *e == SimEvent::PeripheralPower(true));
    let held = position(events, |e| *e == SimEvent::RailsHeld);
    assert!(released < powered);
    assert!(powered < held);
}
