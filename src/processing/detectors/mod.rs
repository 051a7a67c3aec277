pub mod r_peak;

pub use r_peak::{PeakDetector, PeakDetectorConfig};

// DETECTOR COMPONENT ----------------------------------------------------------

/// A confirmed physiological event (R-peak or breath peak).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedEvent {
    /// Seconds on the acquisition clock.
    pub timestamp: f64,
    /// Peak z-score relative to the rolling baseline at confirmation time.
    pub amplitude: f64,
}

/// Signaled when no event was confirmed within the configured
/// physiologically plausible gap. Not an error: the scheduler decides how to
/// handle the slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MissedEvent {
    /// Seconds elapsed since the last confirmed event (or watchdog reset).
    pub elapsed: f64,
}

/// Per-sample detector output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectorOutput {
    Event(DetectedEvent),
    Missed(MissedEvent),
}
