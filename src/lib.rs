// MicDuty — duty-cycled microphone sampler
//
// Wake, record a few seconds of audio, power everything down, deep sleep,
// repeat.  Hardware sits behind the traits in `drivers`, `runtime`,
// `watchdog` and `retained`; host builds swap in `sim`.

pub mod capture;
pub mod config;
pub mod drivers;
pub mod error;
pub mod events;
pub mod retained;
pub mod runtime;
pub mod sleep;
pub mod startup;
pub mod tasks;
pub mod wake;
pub mod watchdog;

#[cfg(not(target_os = "espidf"))]
pub mod sim;
