use serde::{Deserialize, Serialize};

use super::{DetectedEvent, DetectorOutput, MissedEvent};
use crate::acquisition::Sample;
use crate::processing::filters::{BandPassFilter, BandPassFilterConfig};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PeakDetectorConfig {
    /// Threshold multiplier: a sample crosses when it exceeds mean + k·σ.
    pub k: f64,
    /// Rolling baseline window W, in samples.
    pub baseline_window: usize,
    /// Samples to search for the local maximum after a crossing.
    pub lookahead: usize,
    /// Minimum time between two confirmed events, in seconds.
    pub refractory_period: f64,
    /// Gap after which a MissedEvent is signaled, in seconds.
    pub max_inter_event_gap: f64,
    /// Optional band-pass pre-conditioning of the raw channel.
    pub filter: Option<BandPassFilterConfig>,
}

// STATISTICS COMPONENT --------------------------------------------------------

/// Moving average and variance over the most recent W samples, so the
/// detection threshold adapts to drifting signal amplitude.
struct RollingBaseline {
    window: Vec<f64>,
    capacity: usize,
    next: usize,
    count: usize,
    sum: f64,
    sum_of_squares: f64,
}

impl RollingBaseline {
    fn new(capacity: usize) -> Self {
        Self {
            window: vec![0.0; capacity],
            capacity,
            next: 0,
            count: 0,
            sum: 0.0,
            sum_of_squares: 0.0,
        }
    }

    fn update(&mut self, value: f64) {
        if self.count == self.capacity {
            let evicted = self.window[self.next];
            self.sum -= evicted;
            self.sum_of_squares -= evicted * evicted;
        } else {
            self.count += 1;
        }
        self.window[self.next] = value;
        self.next = (self.next + 1) % self.capacity;
        self.sum += value;
        self.sum_of_squares += value * value;
    }

    fn is_warm(&self) -> bool {
        self.count == self.capacity
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    fn std_dev(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self.sum_of_squares / self.count as f64 - mean * mean;
        variance.max(0.0).sqrt()
    }
}

// PEAK DETECTOR ---------------------------------------------------------------

/// Detector state machine. The refractory wait is folded into the re-entry
/// guard on `Idle`, so `Confirmed` is an output, not a state.
enum DetectorState {
    Idle,
    CandidateRising {
        peak_value: f64,
        peak_timestamp: f64,
        peak_z_score: f64,
        remaining: usize,
    },
}

/// Online R-peak detector: band-pass conditioning, rolling k·σ threshold,
/// lookahead local-maximum candidate selection, refractory confirmation and
/// an inter-event gap watchdog. One freshly constructed detector per session.
pub struct PeakDetector {
    config: PeakDetectorConfig,
    filter: Option<BandPassFilter>,
    baseline: RollingBaseline,
    state: DetectorState,
    last_confirmed: Option<f64>,
    first_peak_consumed: bool,
    gap_anchor: Option<f64>,
    clipped_samples: u64,
}

impl PeakDetector {
    pub fn new(config: PeakDetectorConfig, sample_rate: f64) -> Self {
        let filter = config
            .filter
            .as_ref()
            .map(|fc| BandPassFilter::new(fc, sample_rate));
        let baseline = RollingBaseline::new(config.baseline_window);
        Self {
            config,
            filter,
            baseline,
            state: DetectorState::Idle,
            last_confirmed: None,
            first_peak_consumed: false,
            gap_anchor: None,
            clipped_samples: 0,
        }
    }

    /// Processes one freshly buffered sample. Returns a confirmed event, a
    /// missed-event signal, or nothing. Never fails: signal artifacts are
    /// absorbed and counted, not propagated.
    pub fn process_sample(&mut self, sample: Sample) -> Option<DetectorOutput> {
        if !sample.value.is_finite() {
            self.clipped_samples += 1;
            return None;
        }

        let filtered = match self.filter.as_mut() {
            Some(filter) => filter.process_sample(sample.value),
            None => sample.value,
        };
        self.baseline.update(filtered);

        // The watchdog and the threshold only engage once the baseline
        // window is full; before that every read is a warm-up read.
        if !self.baseline.is_warm() {
            return None;
        }
        if self.gap_anchor.is_none() {
            self.gap_anchor = Some(sample.timestamp);
        }

        let mean = self.baseline.mean();
        let std_dev = self.baseline.std_dev();
        let threshold = mean + self.config.k * std_dev;

        match std::mem::replace(&mut self.state, DetectorState::Idle) {
            DetectorState::Idle => {
                let refractory_clear = self.last_confirmed.map_or(true, |last| {
                    sample.timestamp - last >= self.config.refractory_period
                });
                if filtered > threshold && std_dev > 0.0 && refractory_clear {
                    self.state = DetectorState::CandidateRising {
                        peak_value: filtered,
                        peak_timestamp: sample.timestamp,
                        peak_z_score: (filtered - mean) / std_dev,
                        remaining: self.config.lookahead,
                    };
                    return None;
                }
                self.check_gap(sample.timestamp)
            }
            DetectorState::CandidateRising {
                mut peak_value,
                mut peak_timestamp,
                mut peak_z_score,
                remaining,
            } => {
                // Strictly-greater keeps the earlier of two equal maxima.
                if filtered > peak_value {
                    peak_value = filtered;
                    peak_timestamp = sample.timestamp;
                    peak_z_score = if std_dev > 0.0 {
                        (filtered - mean) / std_dev
                    } else {
                        0.0
                    };
                }
                if remaining > 0 {
                    self.state = DetectorState::CandidateRising {
                        peak_value,
                        peak_timestamp,
                        peak_z_score,
                        remaining: remaining - 1,
                    };
                    return None;
                }
                self.confirm(peak_timestamp, peak_z_score)
            }
        }
    }

    fn confirm(&mut self, timestamp: f64, amplitude: f64) -> Option<DetectorOutput> {
        if let Some(last) = self.last_confirmed {
            if timestamp - last < self.config.refractory_period {
                // False re-detection of the same physiological cycle.
                return None;
            }
        }
        self.last_confirmed = Some(timestamp);
        self.gap_anchor = Some(timestamp);

        // The first peak only anchors the refractory and gap clocks: it may
        // already be stale relative to the live stream, so it is not
        // delivered as a stimulus slot.
        if !self.first_peak_consumed {
            self.first_peak_consumed = true;
            return None;
        }
        Some(DetectorOutput::Event(DetectedEvent {
            timestamp,
            amplitude,
        }))
    }

    fn check_gap(&mut self, now: f64) -> Option<DetectorOutput> {
        let anchor = self.gap_anchor?;
        let elapsed = now - anchor;
        if elapsed > self.config.max_inter_event_gap {
            // Re-anchor so one gap signals exactly once.
            self.gap_anchor = Some(now);
            return Some(DetectorOutput::Missed(MissedEvent { elapsed }));
        }
        None
    }

    /// Current detection threshold (baseline mean + k·σ), for the viewer.
    pub fn threshold(&self) -> f64 {
        self.baseline.mean() + self.config.k * self.baseline.std_dev()
    }

    /// Number of non-finite samples dropped so far.
    pub fn clipped_samples(&self) -> u64 {
        self.clipped_samples
    }

    pub fn last_confirmed(&self) -> Option<f64> {
        self.last_confirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f64 = 512.0;

    fn detector(config_tweak: impl FnOnce(&mut PeakDetectorConfig)) -> PeakDetector {
        let mut config = PeakDetectorConfig {
            k: 3.0,
            baseline_window: 256,
            lookahead: 16,
            refractory_period: 0.3,
            max_inter_event_gap: 2.0,
            filter: None,
        };
        config_tweak(&mut config);
        PeakDetector::new(config, FS)
    }

    /// Deterministic pseudo-noise in (-0.5, 0.5), no rand dependency in tests.
    fn noise(i: usize) -> f64 {
        ((i as f64 * 12.9898).sin() * 43758.5453).fract() * 0.5
    }

    /// Periodic spike train with period `t` seconds over `duration` seconds.
    fn spike_train(period: f64, duration: f64) -> Vec<Sample> {
        let width = 0.04;
        (0..(duration * FS) as usize)
            .map(|i| {
                let timestamp = i as f64 / FS;
                let phase = (timestamp + period / 2.0) % period - period / 2.0;
                let spike = if phase.abs() <= width / 2.0 && timestamp > period / 2.0 {
                    10.0 * (1.0 + (std::f64::consts::PI * phase / (width / 2.0)).cos()) / 2.0
                } else {
                    0.0
                };
                Sample {
                    timestamp,
                    value: spike + 0.2 * noise(i),
                }
            })
            .collect()
    }

    fn run(detector: &mut PeakDetector, samples: &[Sample]) -> (Vec<DetectedEvent>, Vec<MissedEvent>) {
        let mut events = Vec::new();
        let mut missed = Vec::new();
        for &sample in samples {
            match detector.process_sample(sample) {
                Some(DetectorOutput::Event(e)) => events.push(e),
                Some(DetectorOutput::Missed(m)) => missed.push(m),
                None => {}
            }
        }
        (events, missed)
    }

    #[test]
    fn periodic_waveform_detected_at_known_period() {
        let period = 0.8;
        let mut det = detector(|_| {});
        let samples = spike_train(period, 10.0);
        let (events, missed) = run(&mut det, &samples);

        assert!(missed.is_empty());
        assert!(events.len() >= 8, "got {} events", events.len());
        for pair in events.windows(2) {
            let interval = pair[1].timestamp - pair[0].timestamp;
            assert!(
                (interval - period).abs() < 0.08,
                "interval {} deviates from period {}",
                interval,
                period
            );
            assert!(interval >= 0.3, "refractory violated: {}", interval);
        }
    }

    #[test]
    fn events_strictly_increase_and_respect_refractory() {
        let mut det = detector(|c| c.refractory_period = 0.5);
        let samples = spike_train(0.8, 8.0);
        let (events, _) = run(&mut det, &samples);
        for pair in events.windows(2) {
            assert!(pair[1].timestamp > pair[0].timestamp);
            assert!(pair[1].timestamp - pair[0].timestamp >= 0.5);
        }
    }

    #[test]
    fn silence_emits_exactly_one_missed_event_then_recovers() {
        let period = 0.8;
        let mut det = detector(|c| c.max_inter_event_gap = 2.0);

        // Beats until 3.6 s (last at 3.2 s), a flat stretch of 2.5 s, beats
        // again from 6.9 s. The watchdog fires once at 3.2 + 2.0 = 5.2 s; the
        // resumed peak confirms before the re-anchored watchdog would fire a
        // second time.
        let mut samples = spike_train(period, 3.6);
        let silence_start = samples.last().unwrap().timestamp;
        for i in 0..(2.5 * FS) as usize {
            let timestamp = silence_start + (i + 1) as f64 / FS;
            samples.push(Sample {
                timestamp,
                value: 0.2 * noise(i),
            });
        }
        let resume_start = samples.last().unwrap().timestamp;
        for mut s in spike_train(period, 4.0) {
            s.timestamp += resume_start;
            samples.push(s);
        }

        let (events, missed) = run(&mut det, &samples);
        assert_eq!(missed.len(), 1, "expected exactly one missed event");
        assert!(missed[0].elapsed > 1.99);
        // Detection continues after the gap without state corruption.
        let after_gap = events
            .iter()
            .filter(|e| e.timestamp > resume_start)
            .count();
        assert!(after_gap >= 2, "detector did not recover after gap");
    }

    #[test]
    fn equal_maxima_in_lookahead_pick_the_earlier() {
        let mut det = detector(|c| {
            c.baseline_window = 8;
            c.lookahead = 8;
            c.refractory_period = 0.0;
        });
        let mut samples: Vec<Sample> = (0..64)
            .map(|i| Sample {
                timestamp: i as f64 / FS,
                value: 0.01 * noise(i),
            })
            .collect();
        // Twin plateau: two equal maxima inside one lookahead window.
        samples[40].value = 5.0;
        samples[43].value = 5.0;

        let (events, _) = run(&mut det, &samples);
        // First confirmed peak is consumed as warm-up, so provoke a second.
        let mut tail: Vec<Sample> = (64..160)
            .map(|i| Sample {
                timestamp: i as f64 / FS,
                value: 0.01 * noise(i),
            })
            .collect();
        tail[20].value = 5.0;
        tail[23].value = 5.0;
        let (events2, _) = run(&mut det, &tail);

        assert!(events.is_empty());
        assert_eq!(events2.len(), 1);
        assert!((events2[0].timestamp - samples[0].timestamp - 84.0 / FS).abs() < 1e-9);
    }

    #[test]
    fn non_finite_samples_are_absorbed() {
        let mut det = detector(|_| {});
        let mut samples = spike_train(0.8, 6.0);
        for i in (100..3000).step_by(97) {
            samples[i].value = f64::NAN;
        }
        samples[500].value = f64::INFINITY;

        let (events, _) = run(&mut det, &samples);
        assert!(det.clipped_samples() > 0);
        assert!(!events.is_empty(), "artifacts must not stop detection");
        for pair in events.windows(2) {
            assert!(pair[1].timestamp - pair[0].timestamp >= 0.3);
        }
    }
}
