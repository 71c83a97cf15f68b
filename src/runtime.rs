// MicDuty — OS / Runtime Seam
//
// Clock, scheduler delay, heap, wakeup source and sleep entry.  The firmware
// uses `EspRuntime`; host builds use the simulator in `crate::sim`.

use std::time::Duration;

use crate::error::DutyResult;
use crate::events::WakeCause;

pub trait Runtime {
    /// Monotonic microseconds since boot.
    fn now_us(&self) -> u64;

    /// Block the calling task, letting the scheduler run others.
    fn delay(&self, duration: Duration);

    fn wake_cause(&self) -> WakeCause;

    /// Fallible allocation of a zeroed sample buffer.
    fn try_alloc_samples(&self, capacity: usize) -> Option<Vec<i16>> {
        alloc_samples(capacity)
    }

    fn arm_timer_wakeup(&self, duration: Duration) -> DutyResult<()>;

    /// Enter deep sleep.  Execution resumes at the boot entry point.
    fn deep_sleep(&self) -> !;

    fn restart(&self) -> !;
}

/// Heap allocation that reports failure instead of aborting.
pub fn alloc_samples(capacity: usize) -> Option<Vec<i16>> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(capacity).ok()?;
    buffer.resize(capacity, 0);
    Some(buffer)
}

// ---------------------------------------------------------------------------
// ESP-IDF implementation
// ---------------------------------------------------------------------------
#[cfg(target_os = "espidf")]
pub use esp::EspRuntime;

#[cfg(target_os = "espidf")]
mod esp {
    use std::time::Duration;

    use esp_idf_hal::delay::FreeRtos;

    use super::Runtime;
    use crate::error::{esp_check, DutyError, DutyResult};
    use crate::events::WakeCause;

    #[derive(Debug, Default)]
    pub struct EspRuntime;

    impl Runtime for EspRuntime {
        fn now_us(&self) -> u64 {
            unsafe { esp_idf_sys::esp_timer_get_time() as u64 }
        }

        fn delay(&self, duration: Duration) {
            FreeRtos::delay_ms(duration.as_millis().min(u32::MAX as u128) as u32);
        }

        fn wake_cause(&self) -> WakeCause {
            crate::wake::current()
        }

        fn arm_timer_wakeup(&self, duration: Duration) -> DutyResult<()> {
            let us = duration.as_micros().min(u64::MAX as u128) as u64;
            esp_check(unsafe { esp_idf_sys::esp_sleep_enable_timer_wakeup(us) })
                .map_err(|e| DutyError::SleepConfig(format!("timer wakeup ({} us): {}", us, e)))
        }

        fn deep_sleep(&self) -> ! {
            unsafe { esp_idf_sys::esp_deep_sleep_start() }
        }

        fn restart(&self) -> ! {
            unsafe { esp_idf_sys::esp_restart() }
        }
    }
}
