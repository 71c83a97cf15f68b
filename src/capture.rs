// MicDuty — Audio Capture Session
//
// One session per record window: power the microphone, get a buffer, poll
// the microphone until the window's wall-clock budget is spent, tear down.
// Samples are discarded with the buffer.

use std::time::Duration;

use crate::config::{DutyCycleConfig, RetryPolicy};
use crate::drivers::board::Board;
use crate::drivers::mic::Microphone;
use crate::error::{DutyError, DutyResult};
use crate::events::CaptureStats;
use crate::runtime::Runtime;
use crate::watchdog::Watchdog;

pub struct CaptureSession<'m, M: Microphone> {
    mic: &'m mut M,
    buffer: Vec<i16>,
    total_samples: usize,
    closed: bool,
}

impl<'m, M: Microphone> CaptureSession<'m, M> {
    /// Power the microphone, allocate the buffer and start the transport.
    ///
    /// Switching the supply back off is left to the sleep path, which turns
    /// every rail off regardless of how the window went.
    pub fn open<B, W, R>(
        mic: &'m mut M,
        board: &mut B,
        watchdog: &mut W,
        runtime: &R,
        config: &DutyCycleConfig,
    ) -> DutyResult<Self>
    where
        B: Board,
        W: Watchdog,
        R: Runtime,
    {
        if let Err(e) = board.set_peripheral_power(true) {
            log::warn!("Microphone power on failed: {}", e);
        }

        let capacity = config.buffer_capacity();
        let buffer = match allocate_with_retry(runtime, watchdog, capacity, &config.alloc_retry) {
            Ok(buffer) => buffer,
            Err(e) => {
                mic.deinit();
                return Err(e);
            }
        };

        let mut session = Self { mic, buffer, total_samples: 0, closed: false };
        // On failure `session` drops here and its teardown deinits the mic.
        session.mic.init()?;
        Ok(session)
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn samples(&self) -> &[i16] {
        &self.buffer[..self.total_samples]
    }

    /// Poll the microphone until `duration` of wall-clock time has passed.
    ///
    /// Each pass asks for the free tail of the buffer, signals the watchdog
    /// and sleeps for `poll`.  A full buffer turns reads into no-ops; the
    /// loop still runs to the end of the window.
    pub fn run<W, R>(&mut self, watchdog: &mut W, runtime: &R, duration: Duration, poll: Duration) -> CaptureStats
    where
        W: Watchdog,
        R: Runtime,
    {
        let budget_us = duration.as_micros().min(u64::MAX as u128) as u64;
        let start = runtime.now_us();
        let mut stats = CaptureStats { capacity: self.capacity(), ..Default::default() };

        log::info!("started recording...");
        while runtime.now_us().saturating_sub(start) < budget_us {
            let free = &mut self.buffer[self.total_samples..];
            let read = if free.is_empty() {
                0
            } else {
                // Never trust the driver to stay inside the slice it was given.
                let requested = free.len();
                self.mic.read(free).min(requested)
            };

            self.total_samples += read;
            stats.reads += 1;
            if read == 0 {
                stats.empty_reads += 1;
            }
            log::debug!("mic_read: {} samples, total: {} samples", read, self.total_samples);

            watchdog.signal();
            runtime.delay(poll);
        }

        stats.total_samples = self.total_samples;
        stats.elapsed_us = runtime.now_us().saturating_sub(start);
        log::info!(
            "finished recording: {} / {} samples in {} reads ({} empty)",
            stats.total_samples,
            stats.capacity,
            stats.reads,
            stats.empty_reads
        );
        stats
    }

    /// Stop the transport and release the buffer.
    pub fn close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.mic.deinit();
        self.buffer = Vec::new();
        self.total_samples = 0;
        self.closed = true;
    }
}

impl<M: Microphone> Drop for CaptureSession<'_, M> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Bounded allocation retry, signalling the watchdog between attempts.
fn allocate_with_retry<W, R>(
    runtime: &R,
    watchdog: &mut W,
    capacity: usize,
    policy: &RetryPolicy,
) -> DutyResult<Vec<i16>>
where
    W: Watchdog,
    R: Runtime,
{
    for attempt in 1..=policy.attempts {
        if let Some(buffer) = runtime.try_alloc_samples(capacity) {
            if attempt > 1 {
                log::info!("Buffer allocated on attempt {}", attempt);
            }
            return Ok(buffer);
        }

        log::warn!(
            "buffer allocation failed ({} samples, attempt {}/{})",
            capacity,
            attempt,
            policy.attempts
        );
        watchdog.signal();
        if attempt < policy.attempts {
            runtime.delay(policy.delay);
        }
    }

    Err(DutyError::AllocationFailure { attempts: policy.attempts, samples: capacity })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::WakeCause;
    use crate::sim::{SimDevice, SimEvent};

    const POLL: Duration = Duration::from_millis(10);

    fn small_config(capacity_ms: u64) -> DutyCycleConfig {
        DutyCycleConfig {
            sample_rate_hz: 1_000,
            record_duration: Duration::from_millis(capacity_ms),
            ..DutyCycleConfig::DEFAULT
        }
    }

    #[test]
    fn partial_reads_accumulate() {
        let device = SimDevice::new(WakeCause::TimerWake).with_reads([3, 0, 5, 1]).with_steady_read(0);
        let (mut board, mut mic, mut wdt, rt) = (device.board(), device.mic(), device.watchdog(), device.runtime());
        let config = small_config(100);

        let mut session = CaptureSession::open(&mut mic, &mut board, &mut wdt, &rt, &config).unwrap();
        let stats = session.run(&mut wdt, &rt, Duration::from_millis(50), POLL);

        assert_eq!(stats.total_samples, 9);
        assert_eq!(stats.reads, 5);
        assert_eq!(stats.empty_reads, 2);
        assert_eq!(session.samples().len(), 9);
        session.close();
    }

    #[test]
    fn oversized_reads_never_pass_capacity() {
        // Driver claims more than it was asked for on every call.
        let device = SimDevice::new(WakeCause::TimerWake).with_steady_read(400);
        let (mut board, mut mic, mut wdt, rt) = (device.board(), device.mic(), device.watchdog(), device.runtime());
        let config = small_config(1_000); // 1000 samples

        let mut session = CaptureSession::open(&mut mic, &mut board, &mut wdt, &rt, &config).unwrap();
        let stats = session.run(&mut wdt, &rt, Duration::from_secs(1), POLL);

        assert_eq!(stats.capacity, 1_000);
        assert_eq!(stats.total_samples, 1_000);
        assert!(stats.buffer_full());

        let requested: Vec<usize> = device
            .events()
            .into_iter()
            .filter_map(|e| match e {
                SimEvent::MicRead { requested, .. } => Some(requested),
                _ => None,
            })
            .collect();
        assert_eq!(requested, vec![1_000, 600, 200]);
        session.close();
    }

    #[test]
    fn all_zero_reads_still_run_whole_window() {
        let device = SimDevice::new(WakeCause::TimerWake).with_steady_read(0);
        let (mut board, mut mic, mut wdt, rt) = (device.board(), device.mic(), device.watchdog(), device.runtime());
        let config = small_config(100);

        let mut session = CaptureSession::open(&mut mic, &mut board, &mut wdt, &rt, &config).unwrap();
        let stats = session.run(&mut wdt, &rt, Duration::from_millis(200), POLL);

        assert_eq!(stats.total_samples, 0);
        assert_eq!(stats.reads, 20);
        assert_eq!(stats.empty_reads, 20);
        session.close();
    }

    #[test]
    fn run_ends_within_one_poll_of_budget() {
        // Slow reads push each pass past the poll interval.
        let device = SimDevice::new(WakeCause::TimerWake).with_read_cost(3_000);
        let (mut board, mut mic, mut wdt, rt) = (device.board(), device.mic(), device.watchdog(), device.runtime());
        let config = small_config(1_000);

        let mut session = CaptureSession::open(&mut mic, &mut board, &mut wdt, &rt, &config).unwrap();
        let stats = session.run(&mut wdt, &rt, Duration::from_millis(995), POLL);

        assert!(stats.elapsed_us >= 995_000);
        assert!(stats.elapsed_us <= 995_000 + 10_000 + 3_000);
        session.close();
    }

    #[test]
    fn allocation_retries_then_succeeds() {
        let device = SimDevice::new(WakeCause::TimerWake).fail_allocations(2);
        let (mut board, mut mic, mut wdt, rt) = (device.board(), device.mic(), device.watchdog(), device.runtime());

        let session = CaptureSession::open(&mut mic, &mut board, &mut wdt, &rt, &small_config(100)).unwrap();
        assert_eq!(session.capacity(), 100);
        session.close();

        let attempts = device.events().iter().filter(|e| matches!(e, SimEvent::Alloc { .. })).count();
        assert_eq!(attempts, 3);
    }

    #[test]
    fn allocation_gives_up_after_policy_attempts() {
        let device = SimDevice::new(WakeCause::TimerWake).fail_allocations(u32::MAX);
        let (mut board, mut mic, mut wdt, rt) = (device.board(), device.mic(), device.watchdog(), device.runtime());
        let config = small_config(100);

        let err = CaptureSession::open(&mut mic, &mut board, &mut wdt, &rt, &config).err().unwrap();
        assert_eq!(err, DutyError::AllocationFailure { attempts: 5, samples: 100 });

        // Four gaps between five attempts, each bridged by a watchdog signal.
        assert_eq!(device.now_us(), 40_000);
        assert_eq!(device.signal_times().len(), 5);
        assert!(!device.mic_open());
    }

    #[test]
    fn mic_init_failure_tears_down_once() {
        let device = SimDevice::new(WakeCause::TimerWake).fail_mic_init(1);
        let (mut board, mut mic, mut wdt, rt) = (device.board(), device.mic(), device.watchdog(), device.runtime());

        let result = CaptureSession::open(&mut mic, &mut board, &mut wdt, &rt, &small_config(100));
        assert!(matches!(result, Err(DutyError::PeripheralInit { device: "microphone", .. })));

        let deinits = device.events().iter().filter(|e| matches!(e, SimEvent::MicDeinit)).count();
        assert_eq!(deinits, 1);
        assert!(!device.mic_open());
    }

    #[test]
    fn dropping_an_open_session_releases_the_mic() {
        let device = SimDevice::new(WakeCause::TimerWake);
        let (mut board, mut mic, mut wdt, rt) = (device.board(), device.mic(), device.watchdog(), device.runtime());

        {
            let _session = CaptureSession::open(&mut mic, &mut board, &mut wdt, &rt, &small_config(100)).unwrap();
            assert!(device.mic_open());
        }
        assert!(!device.mic_open());
    }
}
