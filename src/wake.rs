// MicDuty — Wake-Cause Classifier
//
// Maps the raw ESP-IDF wakeup source onto the four causes the duty cycle
// cares about.

use crate::events::WakeCause;

/// Raw wakeup source as reported by `esp_sleep_get_wakeup_cause()`.
pub type RawWakeSource = u32;

#[cfg(target_os = "espidf")]
pub mod source {
    use super::RawWakeSource;
    use esp_idf_sys as sys;

    pub const UNDEFINED: RawWakeSource = sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_UNDEFINED;
    pub const EXT0: RawWakeSource = sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT0;
    pub const EXT1: RawWakeSource = sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT1;
    pub const TIMER: RawWakeSource = sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER;
    pub const GPIO: RawWakeSource = sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_GPIO;
}

// Same numbering as `esp_sleep_source_t` so host runs classify identically.
#[cfg(not(target_os = "espidf"))]
pub mod source {
    use super::RawWakeSource;

    pub const UNDEFINED: RawWakeSource = 0;
    pub const EXT0: RawWakeSource = 2;
    pub const EXT1: RawWakeSource = 3;
    pub const TIMER: RawWakeSource = 4;
    pub const GPIO: RawWakeSource = 7;
}

/// Classify a raw wakeup source.
///
/// Only EXT0 counts as the external trigger; EXT1 and GPIO wakeups are never
/// armed by this firmware and fall into [`WakeCause::OtherWake`].
pub fn classify(raw: RawWakeSource) -> WakeCause {
    match raw {
        source::UNDEFINED => WakeCause::ColdBoot,
        source::TIMER => WakeCause::TimerWake,
        source::EXT0 => WakeCause::ExternalPinWake,
        _ => WakeCause::OtherWake,
    }
}

/// Query the chip for why it is running.
#[cfg(target_os = "espidf")]
pub fn current() -> WakeCause {
    classify(unsafe { esp_idf_sys::esp_sleep_get_wakeup_cause() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_source_is_cold_boot() {
        assert_eq!(classify(source::UNDEFINED), WakeCause::ColdBoot);
    }

    #[test]
    fn timer_and_ext0_map_to_their_causes() {
        assert_eq!(classify(source::TIMER), WakeCause::TimerWake);
        assert_eq!(classify(source::EXT0), WakeCause::ExternalPinWake);
    }

    #[test]
    fn unarmed_sources_are_other() {
        assert_eq!(classify(source::EXT1), WakeCause::OtherWake);
        assert_eq!(classify(source::GPIO), WakeCause::OtherWake);
        assert_eq!(classify(99), WakeCause::OtherWake);
    }
}
