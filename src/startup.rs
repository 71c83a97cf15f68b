// MicDuty — Boot Path
//
// Runs on every boot, cold or not.  Deep sleep wipes any "already
// initialised" flag along with the rest of SRAM, so nothing here is guarded:
// each step is simply safe to repeat.

use crate::config::DutyCycleConfig;
use crate::drivers::board::{BatterySettings, Board};
use crate::watchdog::Watchdog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupReport {
    pub board_ready: bool,
    pub watchdog_configured: bool,
}

/// Bring up the board and configure the task watchdog.
///
/// Failures are logged and reported, never fatal: the record task still runs
/// and the device still goes back to sleep.
pub fn bring_up<B, W>(board: &mut B, watchdog: &mut W, config: &DutyCycleConfig) -> StartupReport
where
    B: Board,
    W: Watchdog,
{
    let board_ready = match board.init() {
        Ok(()) => {
            if let Err(e) = board.configure_battery(BatterySettings::ALL_DISABLED) {
                log::warn!("Battery management setup failed: {}", e);
            }
            log::info!("board init success");
            true
        }
        Err(e) => {
            log::error!("Board init failed: {}", e);
            false
        }
    };

    let watchdog_configured = match watchdog.configure(&config.watchdog) {
        Ok(()) => true,
        Err(e) => {
            log::error!("{}", e);
            false
        }
    };

    StartupReport { board_ready, watchdog_configured }
}
