// MicDuty — Error Types
//
// Every variant here is recoverable: the duty cycle degrades and still
// reaches deep sleep.  A task watchdog timeout is not represented because it
// is a hardware reset, not a value software ever sees.

use thiserror::Error;

pub type DutyResult<T> = Result<T, DutyError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DutyError {
    /// The sample buffer could not be obtained within the retry budget.
    #[error("sample buffer allocation failed after {attempts} attempts ({samples} samples)")]
    AllocationFailure { attempts: u32, samples: usize },

    /// Microphone or board bring-up failed.
    #[error("{device} init failed: {reason}")]
    PeripheralInit { device: &'static str, reason: String },

    #[error("watchdog error: {0}")]
    Watchdog(String),

    /// Wake source could not be armed or a rail could not be switched off.
    #[error("sleep configuration failed: {0}")]
    SleepConfig(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DutyError {
    pub fn peripheral(device: &'static str, reason: impl ToString) -> Self {
        Self::PeripheralInit { device, reason: reason.to_string() }
    }
}

#[cfg(target_os = "espidf")]
pub(crate) fn esp_check(ret: esp_idf_sys::esp_err_t) -> Result<(), esp_idf_sys::EspError> {
    esp_idf_sys::EspError::convert(ret)
}
