// MicDuty — Sleep-Retained State
//
// Deep sleep powers down main SRAM.  Anything that must survive it lives in
// RTC slow memory (`.rtc.data`), which keeps its contents across deep sleep
// and is reloaded from the image on a cold boot.  Only values wrapped in
// `Retained` are placed there; everything else is lost on every sleep.

use core::cell::UnsafeCell;

/// A value stored in sleep-retained memory.
///
/// Reads and writes are volatile so the compiler cannot cache the value
/// across the sleep boundary.
#[repr(transparent)]
pub struct Retained<T: Copy>(UnsafeCell<T>);

// SAFETY: the retained region is only touched by the record task, which is
// the single logical owner of cross-sleep state.
unsafe impl<T: Copy + Send> Sync for Retained<T> {}

impl<T: Copy> Retained<T> {
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    pub fn get(&self) -> T {
        unsafe { core::ptr::read_volatile(self.0.get()) }
    }

    pub fn set(&self, value: T) {
        unsafe { core::ptr::write_volatile(self.0.get(), value) }
    }
}

/// Microseconds on the monotonic clock at which the last sleep began.
/// Zero after a cold boot.
#[cfg_attr(target_os = "espidf", link_section = ".rtc.data")]
static SLEEP_START_US: Retained<u64> = Retained::new(0);

/// Restarts in a row taken because sleep could not be armed cleanly.
/// Cleared whenever a cycle reaches deep sleep.
#[cfg_attr(target_os = "espidf", link_section = ".rtc.data")]
static FAILED_SLEEPS: Retained<u32> = Retained::new(0);

/// State the duty cycle carries from one boot to the next.
///
/// RTC memory survives deep sleep and a software restart, but not a power
/// cycle.
pub trait RetainedStore {
    /// Diagnostic only; nothing feeds it back into timing decisions.
    fn record_sleep_start(&mut self, now_us: u64);
    fn last_sleep_start(&self) -> u64;

    fn failed_sleeps(&self) -> u32;
    fn set_failed_sleeps(&mut self, count: u32);
}

/// Store backed by the RTC-retained static.
#[derive(Debug, Default)]
pub struct RtcStore;

impl RetainedStore for RtcStore {
    fn record_sleep_start(&mut self, now_us: u64) {
        SLEEP_START_US.set(now_us);
    }

    fn last_sleep_start(&self) -> u64 {
        SLEEP_START_US.get()
    }

    fn failed_sleeps(&self) -> u32 {
        FAILED_SLEEPS.get()
    }

    fn set_failed_sleeps(&mut self, count: u32) {
        FAILED_SLEEPS.set(count);
    }
}
