// MicDuty — Task Watchdog Binding
//
// The TWDT resets the chip if a subscribed task goes `timeout_ms` without
// signalling.  The record loop signals on every poll, so a reset here always
// means a timing bug, never a control-flow path.

use crate::config::WatchdogConfig;
use crate::error::DutyResult;

pub trait Watchdog {
    /// Apply the timeout settings.  Safe to call on every boot.
    fn configure(&mut self, config: &WatchdogConfig) -> DutyResult<()>;

    /// Subscribe the calling task.  Returns `true` only for a fresh
    /// subscription; an already-subscribed task is left alone.
    fn register_current_task(&mut self) -> DutyResult<bool>;

    /// Reset the countdown for the calling task.
    fn signal(&mut self);
}

#[cfg(target_os = "espidf")]
pub use esp::TaskWatchdog;

#[cfg(target_os = "espidf")]
mod esp {
    use esp_idf_sys::*;

    use super::Watchdog;
    use crate::config::WatchdogConfig;
    use crate::error::{DutyError, DutyResult};

    #[derive(Debug, Default)]
    pub struct TaskWatchdog {
        subscribed: bool,
    }

    impl TaskWatchdog {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Watchdog for TaskWatchdog {
        fn configure(&mut self, config: &WatchdogConfig) -> DutyResult<()> {
            let cfg = esp_task_wdt_config_t {
                timeout_ms: config.timeout_ms,
                idle_core_mask: config.idle_core_mask,
                trigger_panic: config.trigger_panic,
            };

            // The IDF starts the TWDT itself on every boot, so init usually
            // reports INVALID_STATE and the settings go through reconfigure.
            let ret = unsafe { esp_task_wdt_init(&cfg) };
            let ret = if ret == ESP_ERR_INVALID_STATE {
                unsafe { esp_task_wdt_reconfigure(&cfg) }
            } else {
                ret
            };

            if ret != ESP_OK {
                return Err(DutyError::Watchdog(format!("configure failed ({})", ret)));
            }
            log::info!(
                "Watchdog: {} ms timeout, idle mask {:#04b}, panic={}",
                config.timeout_ms,
                config.idle_core_mask,
                config.trigger_panic
            );
            Ok(())
        }

        fn register_current_task(&mut self) -> DutyResult<bool> {
            // ESP_OK means the task is already subscribed.
            let status = unsafe { esp_task_wdt_status(core::ptr::null_mut()) };
            if status == ESP_OK {
                self.subscribed = true;
                return Ok(false);
            }

            let ret = unsafe { esp_task_wdt_add(core::ptr::null_mut()) };
            if ret != ESP_OK {
                return Err(DutyError::Watchdog(format!("subscribe failed ({})", ret)));
            }
            self.subscribed = true;
            log::info!("Watchdog: record task subscribed");
            Ok(true)
        }

        fn signal(&mut self) {
            if self.subscribed {
                unsafe {
                    esp_task_wdt_reset();
                }
            }
        }
    }
}
