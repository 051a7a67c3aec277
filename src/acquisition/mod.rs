use std::error::Error;
use std::fs::File;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::AcquisitionError;

// -----------------------------------------------------------------------------
// SAMPLE SOURCE INTERFACE
// -----------------------------------------------------------------------------

/// A (timestamp, value) pair for one channel. Timestamps are seconds on the
/// acquisition clock, monotonic, not the consumer's wall clock.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sample {
    pub timestamp: f64,
    pub value: f64,
}

/// Pull-style acquisition boundary. `read` returns the samples that became
/// available since the previous call (possibly none) within a bounded wait;
/// `now` reads the same clock that stamps the samples.
pub trait SampleSource: Send {
    fn read(&mut self) -> Result<Vec<Sample>, AcquisitionError>;

    /// Current time in seconds on the acquisition clock.
    fn now(&self) -> f64;

    fn sample_rate(&self) -> f64;
}

// -----------------------------------------------------------------------------
// SIMULATED CARDIAC SIGNAL
// -----------------------------------------------------------------------------

const BASELINE_AMPLITUDE: f64 = 70.0;
const BACKGROUND_I_FREQ: f64 = 0.5;
const BACKGROUND_II_FREQ: f64 = 0.2;
const QRS_WIDTH: f64 = 0.04; // seconds
const QRS_AMPLITUDE: f64 = 600.0;

/// Synthetic ECG-like source: slow baseline sines plus uniform noise, with a
/// narrow raised-cosine spike once per cardiac cycle. Paced in real time
/// against an internal monotonic clock.
pub struct SimulatedSource {
    origin: Instant,
    sample_rate: f64,
    next_index: u64,
    cycle_period: f64,
    next_beat: f64,
}

impl SimulatedSource {
    pub fn new(sample_rate: f64, heart_rate_bpm: f64) -> Self {
        let cycle_period = 60.0 / heart_rate_bpm;
        Self {
            origin: Instant::now(),
            sample_rate,
            next_index: 0,
            cycle_period,
            next_beat: cycle_period,
        }
    }

    fn value_at(&mut self, t: f64) -> f64 {
        let mut rng = rand::thread_rng();
        let noise = rng.gen_range(-5.0..5.0);
        let background = 10.0 * (2.0 * std::f64::consts::PI * BACKGROUND_I_FREQ * t).sin()
            + BASELINE_AMPLITUDE / 2.0 * (2.0 * std::f64::consts::PI * BACKGROUND_II_FREQ * t).sin()
            + BASELINE_AMPLITUDE;

        // Advance the beat schedule once the previous spike has fully passed.
        while self.next_beat + QRS_WIDTH < t {
            let jitter = rng.gen_range(-0.02..0.02);
            self.next_beat += self.cycle_period + jitter;
        }

        let dt = t - self.next_beat;
        let spike = if dt.abs() <= QRS_WIDTH / 2.0 {
            let phase = std::f64::consts::PI * dt / (QRS_WIDTH / 2.0);
            QRS_AMPLITUDE * 0.5 * (1.0 + phase.cos())
        } else {
            0.0
        };

        background + spike + noise
    }
}

impl SampleSource for SimulatedSource {
    fn read(&mut self) -> Result<Vec<Sample>, AcquisitionError> {
        let dt = 1.0 / self.sample_rate;
        let due = self.now();
        let mut samples = Vec::new();
        while (self.next_index as f64) * dt <= due {
            let timestamp = (self.next_index as f64) * dt;
            let value = self.value_at(timestamp);
            samples.push(Sample { timestamp, value });
            self.next_index += 1;
        }
        if samples.is_empty() {
            // Bounded wait: pace the caller to roughly one sample period.
            thread::sleep(Duration::from_secs_f64(dt.min(0.001)));
        }
        Ok(samples)
    }

    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

// -----------------------------------------------------------------------------
// CSV FILE PLAYBACK
// -----------------------------------------------------------------------------

/// Replays one channel of a CSV recording, paced to the nominal sample rate.
/// Reaching the end of the file is reported as a fatal source error, which
/// ends the session the same way a device drop-out would.
pub struct CsvSource {
    data: Vec<f64>,
    origin: Instant,
    sample_rate: f64,
    next_index: usize,
}

impl CsvSource {
    pub fn open(path: &str, channel: usize, sample_rate: f64) -> Result<Self, AcquisitionError> {
        let data = read_channel_from_csv(path, channel)
            .map_err(|e| AcquisitionError::Source(format!("{}: {}", path, e)))?;
        if data.is_empty() {
            return Err(AcquisitionError::Source(format!(
                "{}: no samples in channel {}",
                path, channel
            )));
        }
        Ok(Self {
            data,
            origin: Instant::now(),
            sample_rate,
            next_index: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}

impl SampleSource for CsvSource {
    fn read(&mut self) -> Result<Vec<Sample>, AcquisitionError> {
        if self.next_index >= self.data.len() {
            return Err(AcquisitionError::Source(
                "end of CSV recording reached".to_string(),
            ));
        }
        let dt = 1.0 / self.sample_rate;
        let due = self.now();
        let mut samples = Vec::new();
        while self.next_index < self.data.len() && (self.next_index as f64) * dt <= due {
            samples.push(Sample {
                timestamp: (self.next_index as f64) * dt,
                value: self.data[self.next_index],
            });
            self.next_index += 1;
        }
        if samples.is_empty() {
            thread::sleep(Duration::from_secs_f64(dt.min(0.001)));
        }
        Ok(samples)
    }

    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

fn read_channel_from_csv(path: &str, channel: usize) -> Result<Vec<f64>, Box<dyn Error>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(File::open(path)?);
    let mut data = Vec::new();

    for result in rdr.records() {
        let record = result?;
        let field = record
            .get(channel)
            .ok_or_else(|| format!("row has no channel {}", channel))?;
        data.push(field.trim().parse()?);
    }

    Ok(data)
}
