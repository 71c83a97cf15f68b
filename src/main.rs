// MicDuty — Firmware Entry Point
//
// Boot sequence (every boot: power-on and every wake from deep sleep):
//   1. Initialise logging.
//   2. Board bring-up (release rail holds, battery management) and task
//      watchdog setup.
//      Both are repeated on every boot; deep sleep forgets they ever ran.
//   3. Spawn the record task pinned to core 0 and hand it the board and
//      watchdog.  If the task cannot be created the cycle runs on the main
//      task instead.
//   4. The record task runs one duty cycle and puts the chip into deep sleep.
//
// Host builds run the same sequence once against a simulated device.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use micduty::config::DutyCycleConfig;
use micduty::startup;
use micduty::tasks::record::{self, DutyCycle};

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use esp_idf_hal::gpio::{IOPin, PinDriver};
    use esp_idf_hal::peripherals::Peripherals;
    use micduty::drivers::board::PowerFeatherBoard;
    use micduty::drivers::mic::I2sMicrophone;
    use micduty::retained::RtcStore;
    use micduty::runtime::EspRuntime;
    use micduty::watchdog::TaskWatchdog;

    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    log::info!("MicDuty firmware starting…");

    let config = DutyCycleConfig::DEFAULT;
    config.validate()?;

    let peripherals = Peripherals::take()?;
    // GPIO13 = EN (microphone supply), GPIO14 = VSQT (auxiliary rail).
    let en = PinDriver::input_output(peripherals.pins.gpio13.downgrade())?;
    let vsqt = PinDriver::input_output(peripherals.pins.gpio14.downgrade())?;

    let mut board = PowerFeatherBoard::new(en, vsqt);
    let mut watchdog = TaskWatchdog::new();
    startup::bring_up(&mut board, &mut watchdog, &config);

    let (tx, rx) = mpsc::sync_channel(1);
    match record::spawn(move || {
        if let Ok((board, watchdog)) = rx.recv() {
            // The I2S handle is a raw pointer, so the driver is built on the task.
            DutyCycle::new(config, board, I2sMicrophone::new(), watchdog, EspRuntime, RtcStore).run()
        }
    }) {
        Ok(()) => log::info!("task created"),
        Err(e) => log::error!("task creation failed: {}", e),
    }

    // A failed spawn drops the receiver and hands the parts straight back.
    if let Err(mpsc::SendError((board, watchdog))) = tx.send((board, watchdog)) {
        log::warn!("Running the duty cycle on the main task");
        DutyCycle::new(config, board, I2sMicrophone::new(), watchdog, EspRuntime, RtcStore).run()
    }

    // Main task has nothing left to do; park it until the record task
    // puts the chip to sleep.
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    use micduty::events::WakeCause;
    use micduty::sim::SimDevice;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("MicDuty host simulation starting…");

    let config = DutyCycleConfig::DEFAULT;
    config.validate()?;

    let device = SimDevice::new(WakeCause::ColdBoot);
    let mut board = device.board();
    let mut watchdog = device.watchdog();
    startup::bring_up(&mut board, &mut watchdog, &config);

    let (tx, rx) = mpsc::sync_channel(1);
    let (mic, runtime, store) = (device.mic(), device.runtime(), device.store());
    record::spawn(move || {
        if let Ok((board, watchdog)) = rx.recv() {
            DutyCycle::new(config, board, mic, watchdog, runtime, store).run()
        }
    })?;
    log::info!("task created");
    tx.send((board, watchdog))?;

    // The simulated deep sleep exits the process.
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}
