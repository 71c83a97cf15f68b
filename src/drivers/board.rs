// MicDuty — Board Power Driver
//
// The microphone hangs off the switched EN supply; the VSQT rail feeds the
// rest of the external headers.  Both are GPIO enables.  A driven level is
// not kept once the chip enters deep sleep, so the sleep path latches both
// pads with a hold and every boot releases it again.

use crate::error::DutyResult;

/// Battery-management toggles applied once per boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatterySettings {
    pub charging: bool,
    pub fuel_gauge: bool,
    pub temp_sense: bool,
}

impl BatterySettings {
    pub const ALL_DISABLED: Self = Self { charging: false, fuel_gauge: false, temp_sense: false };
}

pub trait Board {
    /// Boot-time setup.  Releases any pad hold left over from the last sleep.
    fn init(&mut self) -> DutyResult<()>;

    /// Switch the microphone supply.
    fn set_peripheral_power(&mut self, enabled: bool) -> DutyResult<()>;

    /// Switch the auxiliary voltage rail.
    fn enable_voltage_rail(&mut self, enabled: bool) -> DutyResult<()>;

    fn configure_battery(&mut self, settings: BatterySettings) -> DutyResult<()>;

    /// Read back the microphone supply state.
    fn peripheral_power_enabled(&self) -> bool;

    /// Latch both rail enables at their current level through deep sleep.
    /// Level changes are ignored until the next `init`.
    fn hold_rails(&mut self) -> DutyResult<()>;
}

#[cfg(target_os = "espidf")]
pub use esp::{PowerFeatherBoard, RailPin};

#[cfg(target_os = "espidf")]
mod esp {
    use esp_idf_hal::gpio::{AnyIOPin, InputOutput, PinDriver};
    use esp_idf_sys::{gpio_hold_dis, gpio_hold_en, EspError};

    use super::{BatterySettings, Board};
    use crate::error::{esp_check, DutyError, DutyResult};

    pub type RailPin = PinDriver<'static, AnyIOPin, InputOutput>;

    /// EN and VSQT enables, driven in input/output mode so the level can be
    /// read back.
    pub struct PowerFeatherBoard {
        en: RailPin,
        vsqt: RailPin,
    }

    impl PowerFeatherBoard {
        pub fn new(en: RailPin, vsqt: RailPin) -> Self {
            Self { en, vsqt }
        }

        fn drive(pin: &mut RailPin, rail: &str, high: bool) -> DutyResult<()> {
            let gpio = pin.pin();
            let result = if high { pin.set_high() } else { pin.set_low() };
            result.map_err(|e| rail_error(rail, gpio, "level", e))
        }

        // GPIO13/14 are RTC pads, so a hold on them lasts through deep sleep.
        fn hold(pin: &RailPin, rail: &str, held: bool) -> DutyResult<()> {
            let gpio = pin.pin();
            let ret = unsafe {
                if held {
                    gpio_hold_en(gpio)
                } else {
                    gpio_hold_dis(gpio)
                }
            };
            esp_check(ret).map_err(|e| rail_error(rail, gpio, "hold", e))
        }
    }

    fn rail_error(rail: &str, gpio: i32, what: &str, e: EspError) -> DutyError {
        DutyError::peripheral("board", format!("{} (GPIO{}) {}: {}", rail, gpio, what, e))
    }

    impl Board for PowerFeatherBoard {
        fn init(&mut self) -> DutyResult<()> {
            Self::hold(&self.en, "EN", false)?;
            Self::hold(&self.vsqt, "VSQT", false)?;
            log::debug!("Rail holds released");
            Ok(())
        }

        fn set_peripheral_power(&mut self, enabled: bool) -> DutyResult<()> {
            Self::drive(&mut self.en, "EN", enabled)
        }

        fn enable_voltage_rail(&mut self, enabled: bool) -> DutyResult<()> {
            Self::drive(&mut self.vsqt, "VSQT", enabled)
        }

        fn configure_battery(&mut self, settings: BatterySettings) -> DutyResult<()> {
            // Charger and fuel gauge stay at their reset defaults (charging
            // off without a battery profile).
            log::debug!(
                "Battery: charging={} fuel_gauge={} temp_sense={}",
                settings.charging,
                settings.fuel_gauge,
                settings.temp_sense
            );
            Ok(())
        }

        fn peripheral_power_enabled(&self) -> bool {
            self.en.is_set_high()
        }

        fn hold_rails(&mut self) -> DutyResult<()> {
            Self::hold(&self.en, "EN", true)?;
            Self::hold(&self.vsqt, "VSQT", true)
        }
    }
}
