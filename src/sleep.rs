// MicDuty — Sleep / Power Coordinator
//
// Everything the chip needs before deep sleep: rails off and held, timer
// wake armed.  `SleepArmed` normally comes from `prepare_sleep`, which will
// not hand one out while the microphone rail reads back on.  The only other
// source is `force_sleep`, the way out after repeated restarts failed to
// clear the fault.

use std::time::Duration;

use crate::drivers::board::Board;
use crate::error::{DutyError, DutyResult};
use crate::runtime::Runtime;

/// Proof that a wake source is armed and the rails were dealt with.
#[derive(Debug, PartialEq, Eq)]
pub struct SleepArmed {
    duration: Duration,
}

impl SleepArmed {
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Switch off and hold the microphone and auxiliary rails, then arm the
/// timer wakeup.
pub fn prepare_sleep<B, R>(board: &mut B, runtime: &R, duration: Duration) -> DutyResult<SleepArmed>
where
    B: Board,
    R: Runtime,
{
    if !rails_off(board) {
        return Err(DutyError::SleepConfig("microphone rail would not switch off".into()));
    }
    arm(board, runtime, duration)
}

/// Like `prepare_sleep`, but arms the timer even if the microphone rail
/// reads back on.  Still fails if the timer itself cannot be armed.
pub fn force_sleep<B, R>(board: &mut B, runtime: &R, duration: Duration) -> DutyResult<SleepArmed>
where
    B: Board,
    R: Runtime,
{
    if !rails_off(board) {
        log::error!("Sleeping with the microphone rail still on");
    }
    arm(board, runtime, duration)
}

/// Request both rails off; true once the microphone rail reads back off.
fn rails_off<B: Board>(board: &mut B) -> bool {
    if let Err(e) = board.set_peripheral_power(false) {
        log::warn!("Microphone power off failed: {}", e);
    }
    if let Err(e) = board.enable_voltage_rail(false) {
        log::warn!("Voltage rail off failed: {}", e);
    }

    if board.peripheral_power_enabled() {
        log::warn!("Microphone rail still on, retrying");
        // The read-back below is the check; this result adds nothing.
        let _ = board.set_peripheral_power(false);
        return !board.peripheral_power_enabled();
    }
    true
}

fn arm<B: Board, R: Runtime>(board: &mut B, runtime: &R, duration: Duration) -> DutyResult<SleepArmed> {
    if let Err(e) = board.hold_rails() {
        log::warn!("Rail hold failed, levels may drift during sleep: {}", e);
    }
    runtime.arm_timer_wakeup(duration)?;
    log::info!("Sleep armed: timer wakeup in {:?}", duration);
    Ok(SleepArmed { duration })
}

/// Enter deep sleep.  The next thing that runs is the boot path.
pub fn enter_sleep<R: Runtime>(runtime: &R, armed: SleepArmed) -> ! {
    log::info!("Entering deep sleep for {:?}", armed.duration);
    runtime.deep_sleep()
}
