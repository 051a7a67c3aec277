use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::acquisition::SampleSource;
use crate::audio::AudioPlayer;
use crate::config::{Config, MissedEventPolicy};
use crate::error::{AcquisitionError, SessionError};
use crate::processing::buffer::RingBuffer;
use crate::processing::detectors::{DetectorOutput, PeakDetector};
use crate::sequence::Sequence;
use crate::triggers::TriggerSink;
use crate::utils::log;
use crate::visualization::{publish_frame, FrameQueue, ViewerFrame};

// -----------------------------------------------------------------------------
// SCHEDULER / MAIN LOOP
// -----------------------------------------------------------------------------

/// Remaining wait below which a slot is skipped instead of delivered late.
/// Headroom to schedule, buffer and start the sound.
const SCHEDULING_HEADROOM: f64 = 0.015;

/// Start spinning this many seconds before the deadline; the bulk of the wait
/// is a coarse sleep.
const SPIN_SLICE: f64 = 0.003;

/// Minimum wall-clock interval between two viewer frames.
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every sequence slot was consumed.
    Completed,
    /// External stop request.
    Stopped,
}

/// Per-session bookkeeping, discarded at session end.
#[derive(Debug, Default)]
struct SessionState {
    detected: u64,
    delivered: u64,
    skipped_late: u64,
    missed: u64,
    peaks: Vec<f64>,
}

#[derive(Debug)]
pub struct SessionSummary {
    pub reason: StopReason,
    pub detected: u64,
    pub delivered: u64,
    pub skipped_late: u64,
    pub missed: u64,
    /// Timestamps of the confirmed events, on the acquisition clock.
    pub peaks: Vec<f64>,
}

enum SlotOutcome {
    Delivered,
    TooLate,
    Stopped,
}

/// The real-time control loop binding acquisition, detection, sequencing and
/// stimulus delivery together. Sole writer of the ring buffer and session
/// state; collaborators are passed in at construction and the configuration
/// is immutable for the session's lifetime.
pub struct Scheduler<S: SampleSource, A: AudioPlayer> {
    config: Config,
    source: S,
    buffer: RingBuffer,
    detector: PeakDetector,
    sequence: Sequence,
    trigger: Box<dyn TriggerSink>,
    audio: A,
    viewer_queue: Option<FrameQueue>,
    stop: Arc<AtomicBool>,
    state: SessionState,
}

impl<S: SampleSource, A: AudioPlayer> Scheduler<S, A> {
    pub fn new(
        config: Config,
        source: S,
        trigger: Box<dyn TriggerSink>,
        audio: A,
        viewer_queue: Option<FrameQueue>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let sequence = Sequence::generate(&config.sequence)?;
        let buffer = RingBuffer::new(config.session.buffer_capacity);
        // Each session gets a freshly constructed detector; no detection
        // state survives across sessions.
        let detector = PeakDetector::new(config.detector.clone(), source.sample_rate());
        Ok(Self {
            config,
            source,
            buffer,
            detector,
            sequence,
            trigger,
            audio,
            viewer_queue,
            stop,
            state: SessionState::default(),
        })
    }

    /// Runs the session to completion, stop request or fatal failure.
    pub fn run(&mut self) -> Result<SessionSummary, SessionError> {
        log::status(&format!(
            "starting block: {} slots, target delay {} ms",
            self.sequence.len(),
            self.config.session.target_delay * 1000.0
        ));
        self.trigger.send(self.config.triggers.codes.task_start)?;

        let mut last_sample_wall = Instant::now();
        let mut last_frame_wall = Instant::now();

        let reason = 'session: loop {
            // A stop request is honored within one acquisition period and
            // leaves no trigger asserted.
            if self.stop.load(Ordering::Relaxed) {
                break 'session StopReason::Stopped;
            }

            let samples = self.source.read()?;
            if samples.is_empty() {
                let stalled = last_sample_wall.elapsed().as_secs_f64();
                if stalled > self.config.session.stall_timeout {
                    log::error(&format!("acquisition stalled for {:.1} s, aborting", stalled));
                    return Err(AcquisitionError::Stall { elapsed: stalled }.into());
                }
            } else {
                last_sample_wall = Instant::now();
            }

            let mut outputs = Vec::new();
            for sample in samples {
                self.buffer.push(sample);
                if let Some(output) = self.detector.process_sample(sample) {
                    outputs.push(output);
                }
            }

            for output in outputs {
                match output {
                    DetectorOutput::Event(event) => {
                        self.state.detected += 1;
                        self.state.peaks.push(event.timestamp);
                        let target_time = event.timestamp + self.config.session.target_delay
                            - self.audio.latency_budget();
                        match self.deliver_slot(target_time)? {
                            SlotOutcome::Delivered => {}
                            SlotOutcome::TooLate => self.state.skipped_late += 1,
                            SlotOutcome::Stopped => break 'session StopReason::Stopped,
                        }
                    }
                    DetectorOutput::Missed(missed) => {
                        self.state.missed += 1;
                        log::warn(&format!(
                            "no event for {:.2} s (gap ceiling {:.2} s)",
                            missed.elapsed, self.config.detector.max_inter_event_gap
                        ));
                        match self.config.session.missed_event_policy {
                            MissedEventPolicy::Skip => {
                                // Consume the slot so the sequence cursor and
                                // the physiological event stream stay in
                                // registration.
                                let condition = self.sequence.next()?;
                                self.record_event("skipped", &format!("{:?}", condition), 0.0);
                            }
                            MissedEventPolicy::Fallback => {
                                let target_time = self.source.now()
                                    + self.config.session.target_delay
                                    - self.audio.latency_budget();
                                match self.deliver_slot(target_time)? {
                                    SlotOutcome::Delivered | SlotOutcome::TooLate => {}
                                    SlotOutcome::Stopped => break 'session StopReason::Stopped,
                                }
                            }
                        }
                    }
                }
                if self.sequence.cursor() >= self.sequence.len() {
                    break 'session StopReason::Completed;
                }
            }

            if last_frame_wall.elapsed() >= FRAME_INTERVAL {
                self.publish_viewer_frame();
                last_frame_wall = Instant::now();
            }
        };

        if reason == StopReason::Completed {
            // Let the last sound finish before the end marker.
            thread::sleep(Duration::from_secs_f64(1.1 * self.config.audio.duration));
        }
        self.trigger.send(self.config.triggers.codes.task_end)?;
        log::status(&format!(
            "block finished ({:?}): {} delivered, {} late, {} missed",
            reason, self.state.delivered, self.state.skipped_late, self.state.missed
        ));

        Ok(SessionSummary {
            reason,
            detected: self.state.detected,
            delivered: self.state.delivered,
            skipped_late: self.state.skipped_late,
            missed: self.state.missed,
            peaks: std::mem::take(&mut self.state.peaks),
        })
    }

    /// Delivers the next sequence slot at `target_time` on the acquisition
    /// clock. A slot whose remaining wait is below the scheduling headroom is
    /// left unconsumed: the next genuine event picks it up, as the original
    /// paradigm retries the same counter position.
    fn deliver_slot(&mut self, target_time: f64) -> Result<SlotOutcome, SessionError> {
        let wait = target_time - self.source.now();
        if wait <= SCHEDULING_HEADROOM {
            if wait <= 0.0 {
                log::warn(&format!(
                    "skipping stimulus, detection too late by {:.1} ms",
                    -wait * 1000.0
                ));
            } else {
                log::warn(&format!(
                    "skipping stimulus, {:.1} ms left is too short to schedule",
                    wait * 1000.0
                ));
            }
            return Ok(SlotOutcome::TooLate);
        }

        let condition = self.sequence.next()?;

        if !self.wait_until(target_time) {
            return Ok(SlotOutcome::Stopped);
        }

        // Audio first: the trigger write is cheap, the audio path carries the
        // physical latency the budget already accounts for.
        if let Some(sound_id) = condition.sound_id() {
            self.audio.play(sound_id)?;
        }
        self.trigger.send(self.config.triggers.codes.code(condition))?;

        self.state.delivered += 1;
        self.record_event("delivered", &format!("{:?}", condition), target_time);
        Ok(SlotOutcome::Delivered)
    }

    /// Coarse sleep for the bulk of the wait, then spin the final slice, so
    /// jitter stays sub-millisecond on a general-purpose OS scheduler.
    /// Returns false if a stop request interrupted the wait.
    fn wait_until(&self, deadline: f64) -> bool {
        loop {
            let remaining = deadline - self.source.now();
            if remaining <= 0.0 {
                return true;
            }
            if self.stop.load(Ordering::Relaxed) {
                return false;
            }
            if remaining > SPIN_SLICE {
                thread::sleep(Duration::from_secs_f64(remaining - SPIN_SLICE));
            } else {
                std::hint::spin_loop();
            }
        }
    }

    fn publish_viewer_frame(&mut self) {
        let Some(queue) = &self.viewer_queue else {
            return;
        };
        let tail_samples = (self.config.viewer.tail_seconds * self.source.sample_rate()) as usize;
        let n = tail_samples.min(self.buffer.len());
        if n == 0 {
            return;
        }
        // n is clamped to the buffer fill, so the window read cannot fail.
        let Ok(window) = self.buffer.window(n) else {
            return;
        };
        let window_start = window.first().map(|s| s.timestamp).unwrap_or(0.0);
        let frame = ViewerFrame {
            samples: window.iter().map(|s| (s.timestamp, s.value)).collect(),
            threshold: self.detector.threshold(),
            peaks: self
                .state
                .peaks
                .iter()
                .copied()
                .filter(|&p| p >= window_start)
                .collect(),
            missed_events: self.state.missed,
        };
        publish_frame(queue, frame);
    }

    fn record_event(&self, outcome: &str, condition: &str, target_time: f64) {
        if !self.config.session.record_events {
            return;
        }
        let now = self.source.now();
        if let Err(e) = log::log_csv(
            "session-events.csv",
            &["outcome", "condition", "target_time", "actual_time"],
            &[
                outcome,
                condition,
                &format!("{:.4}", target_time),
                &format!("{:.4}", now),
            ],
        ) {
            log::warn(&format!("failed to record event: {}", e));
        }
    }
}
