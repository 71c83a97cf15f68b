// MicDuty — Hardware & System Configuration
// Target: PowerFeather (ESP32-S3) with an I2S MEMS microphone on the EN rail

use std::time::Duration;

use crate::error::{DutyError, DutyResult};

// ---------------------------------------------------------------------------
// GPIO Pin Definitions (PowerFeather mainboard)
// ---------------------------------------------------------------------------
// EN (GPIO13) and VSQT (GPIO14) are taken as `PinDriver`s in main.rs.
pub const PIN_MIC_BCLK: i32 = 5;    // I2S bit clock
pub const PIN_MIC_WS: i32 = 6;      // I2S word select (LRCLK)
pub const PIN_MIC_DIN: i32 = 7;     // I2S data from microphone

// ---------------------------------------------------------------------------
// Record Task
// ---------------------------------------------------------------------------
pub const RECORD_TASK_NAME: &str = "record";
pub const STACK_RECORD: usize = 8192;   // bytes; Rust formatting needs more than 4 KiB
pub const RECORD_TASK_PRIORITY: u8 = 1;
pub const RECORD_TASK_CORE: u8 = 0;

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------
pub const SAMPLE_RATE_HZ: u32 = 16_000;
pub const MIC_READ_TIMEOUT_TICKS: u32 = 0;     // reads never block the record loop
pub const I2S_DMA_DESC_NUM: u32 = 6;
pub const I2S_DMA_FRAME_NUM: u32 = 240;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------
pub const RECORD_DURATION_S: u64 = 3;
pub const SLEEP_DURATION_S: u64 = 15;
pub const RECORD_POLL_INTERVAL_MS: u64 = 10;   // delay between mic reads
pub const SETTLE_DELAY_MS: u64 = 100;          // after capture, before sleep setup
pub const ALLOC_RETRY_ATTEMPTS: u32 = 5;
pub const ALLOC_RETRY_DELAY_MS: u64 = 10;
pub const MAX_SLEEP_RESTARTS: u32 = 3;         // restarts before sleeping with a fault

// ---------------------------------------------------------------------------
// Task Watchdog
// ---------------------------------------------------------------------------
pub const WDT_TIMEOUT_MS: u32 = 30_000;
pub const WDT_IDLE_CORE_MASK: u32 = (1 << 0) | (1 << 1);
pub const WDT_TRIGGER_PANIC: bool = true;

/// Task watchdog settings applied on every boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub timeout_ms: u32,
    pub idle_core_mask: u32,
    pub trigger_panic: bool,
}

/// Bounded retry for the sample buffer allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Longest time the retry loop can keep the task busy.
    pub fn worst_case(&self) -> Duration {
        self.delay * self.attempts.saturating_sub(1)
    }
}

/// Everything the duty cycle needs to know, fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DutyCycleConfig {
    pub sample_rate_hz: u32,
    pub record_duration: Duration,
    pub sleep_duration: Duration,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub alloc_retry: RetryPolicy,
    /// Consecutive restarts allowed when sleep cannot be armed cleanly.
    pub max_sleep_restarts: u32,
    pub watchdog: WatchdogConfig,
}

impl DutyCycleConfig {
    pub const DEFAULT: Self = Self {
        sample_rate_hz: SAMPLE_RATE_HZ,
        record_duration: Duration::from_secs(RECORD_DURATION_S),
        sleep_duration: Duration::from_secs(SLEEP_DURATION_S),
        poll_interval: Duration::from_millis(RECORD_POLL_INTERVAL_MS),
        settle_delay: Duration::from_millis(SETTLE_DELAY_MS),
        alloc_retry: RetryPolicy {
            attempts: ALLOC_RETRY_ATTEMPTS,
            delay: Duration::from_millis(ALLOC_RETRY_DELAY_MS),
        },
        max_sleep_restarts: MAX_SLEEP_RESTARTS,
        watchdog: WatchdogConfig {
            timeout_ms: WDT_TIMEOUT_MS,
            idle_core_mask: WDT_IDLE_CORE_MASK,
            trigger_panic: WDT_TRIGGER_PANIC,
        },
    };

    /// Sample buffer size: the whole record window, not just one second.
    pub fn buffer_capacity(&self) -> usize {
        let samples = self.sample_rate_hz as u128 * self.record_duration.as_millis() / 1000;
        samples as usize
    }

    pub fn validate(&self) -> DutyResult<()> {
        if self.sample_rate_hz == 0 {
            return Err(DutyError::InvalidConfig("sample rate must be non-zero".into()));
        }
        if self.record_duration.is_zero() {
            return Err(DutyError::InvalidConfig("record duration must be non-zero".into()));
        }
        if self.sleep_duration.is_zero() {
            return Err(DutyError::InvalidConfig("sleep duration must be non-zero".into()));
        }
        if self.alloc_retry.attempts == 0 {
            return Err(DutyError::InvalidConfig("at least one allocation attempt is required".into()));
        }

        let timeout = Duration::from_millis(self.watchdog.timeout_ms as u64);
        if self.poll_interval >= timeout || self.settle_delay >= timeout {
            return Err(DutyError::InvalidConfig(format!(
                "poll ({:?}) and settle ({:?}) delays must be shorter than the watchdog timeout ({:?})",
                self.poll_interval, self.settle_delay, timeout
            )));
        }
        // A failed allocation goes straight to the settle delay; both must
        // fit in one watchdog period.
        let retry_and_settle = self.alloc_retry.worst_case() + self.settle_delay;
        if retry_and_settle >= timeout {
            return Err(DutyError::InvalidConfig(format!(
                "allocation retries ({:?}) plus settle delay ({:?}) exceed watchdog timeout {:?}",
                self.alloc_retry.worst_case(),
                self.settle_delay,
                timeout
            )));
        }
        Ok(())
    }
}

impl Default for DutyCycleConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DutyCycleConfig::DEFAULT.validate().is_ok());
    }

    #[test]
    fn buffer_covers_full_record_window() {
        assert_eq!(DutyCycleConfig::DEFAULT.buffer_capacity(), 48_000);
    }

    #[test]
    fn zero_windows_are_rejected() {
        let mut cfg = DutyCycleConfig::DEFAULT;
        cfg.record_duration = Duration::ZERO;
        assert!(matches!(cfg.validate(), Err(DutyError::InvalidConfig(_))));

        let mut cfg = DutyCycleConfig::DEFAULT;
        cfg.sleep_duration = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn poll_interval_must_undercut_watchdog() {
        let mut cfg = DutyCycleConfig::DEFAULT;
        cfg.poll_interval = Duration::from_secs(30);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn retry_worst_case_counts_gaps_between_attempts() {
        let policy = RetryPolicy { attempts: 5, delay: Duration::from_millis(10) };
        assert_eq!(policy.worst_case(), Duration::from_millis(40));
    }

    #[test]
    fn retry_budget_plus_settle_must_undercut_watchdog() {
        let mut cfg = DutyCycleConfig::DEFAULT;
        // 29 gaps of 1 s plus 100 ms settle: 29.1 s, still inside 30 s.
        cfg.alloc_retry = RetryPolicy { attempts: 30, delay: Duration::from_secs(1) };
        assert!(cfg.validate().is_ok());

        // One more attempt pushes it to 30.1 s.
        cfg.alloc_retry.attempts = 31;
        assert!(matches!(cfg.validate(), Err(DutyError::InvalidConfig(_))));

        // Each delay alone is fine; only the sum trips the check.
        cfg.alloc_retry.attempts = 30;
        cfg.settle_delay = Duration::from_secs(1);
        assert!(cfg.validate().is_err());
    }
}
