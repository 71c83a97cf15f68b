// MicDuty — Cycle States & Data Types

use crate::error::DutyError;

// ---------------------------------------------------------------------------
// Wake Cause
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    /// Power-on or reset, not a wake from deep sleep.
    ColdBoot,
    TimerWake,
    /// Reserved for an out-of-band trigger; suppresses capture.
    ExternalPinWake,
    OtherWake,
}

impl WakeCause {
    /// Only an external-pin wake skips the capture window.
    pub fn permits_capture(&self) -> bool {
        !matches!(self, Self::ExternalPinWake)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ColdBoot        => "cold boot",
            Self::TimerWake       => "timer",
            Self::ExternalPinWake => "external pin",
            Self::OtherWake       => "other",
        }
    }
}

// ---------------------------------------------------------------------------
// Duty-cycle state machine
// ---------------------------------------------------------------------------
//
// Starting → Capturing → PreparingSleep → Sleeping
//     └───(external pin)───────┘
//
// Sleeping has no in-process successor: the next Starting is a fresh boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Starting,
    Capturing,
    PreparingSleep,
    Sleeping,
}

// ---------------------------------------------------------------------------
// Capture results
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub capacity: usize,
    pub total_samples: usize,
    pub reads: u32,
    pub empty_reads: u32,
    pub elapsed_us: u64,
}

impl CaptureStats {
    pub fn buffer_full(&self) -> bool {
        self.total_samples >= self.capacity
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Wake cause suppressed the window.
    Skipped,
    Completed(CaptureStats),
    /// The window could not run; the cycle went straight to sleep.
    Degraded(DutyError),
}

impl CaptureOutcome {
    pub fn ran(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}
