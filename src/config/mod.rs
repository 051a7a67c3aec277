// src/config/mod.rs
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::audio::AudioConfig;
use crate::error::ConfigError;
use crate::processing::detectors::PeakDetectorConfig;
use crate::sequence::SequenceConfig;
use crate::triggers::TriggersConfig;
use crate::visualization::ViewerConfig;

/// Immutable parameter bundle for one session. Loaded once at startup and
/// passed into the scheduler at construction; nothing reads it ambiently.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub session: SessionConfig,
    pub acquisition: AcquisitionConfig,
    pub detector: PeakDetectorConfig,
    pub sequence: SequenceConfig,
    pub triggers: TriggersConfig,
    pub audio: AudioConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionConfig {
    /// Offset between a detected event and stimulus onset, in seconds.
    pub target_delay: f64,
    /// What to do with the stimulus slot of a missed event.
    pub missed_event_policy: MissedEventPolicy,
    /// Acquisition silence treated as a fatal stall, in seconds.
    pub stall_timeout: f64,
    /// Ring-buffer capacity in samples.
    pub buffer_capacity: usize,
    /// Append delivered/skipped slots to logs/session-events.csv.
    #[serde(default)]
    pub record_events: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MissedEventPolicy {
    /// Consume the sequence slot without delivering a stimulus.
    Skip,
    /// Deliver a fallback-timed stimulus at now + target_delay.
    Fallback,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AcquisitionConfig {
    /// One of "simulated" or "csv".
    pub source: String,
    pub sample_rate: f64,
    /// Channel carrying the cardiac signal in a CSV recording.
    pub channel: usize,
    pub csv_path: Option<String>,
    /// Cycle rate of the simulated source.
    pub heart_rate_bpm: f64,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let config_str = fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&config_str)?;
    config.validate()?;
    Ok(config)
}

pub fn save_config<P: AsRef<Path>>(config: &Config, path: P) -> Result<(), ConfigError> {
    let yaml = serde_yaml::to_string(config)?;
    fs::write(path, yaml)?;
    Ok(())
}

impl Config {
    /// Setup-time validation. Every failure names the offending field so the
    /// operator can correct the file.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, message: &str| {
            Err(ConfigError::InvalidValue {
                field: field.to_string(),
                message: message.to_string(),
            })
        };

        if self.session.target_delay <= 0.0 {
            return invalid("session.target_delay", "must be strictly positive");
        }
        if self.session.stall_timeout <= 0.0 {
            return invalid("session.stall_timeout", "must be strictly positive");
        }
        if self.session.buffer_capacity == 0 {
            return invalid("session.buffer_capacity", "must be non-zero");
        }
        if self.acquisition.sample_rate <= 0.0 {
            return invalid("acquisition.sample_rate", "must be strictly positive");
        }
        if self.acquisition.source == "csv" && self.acquisition.csv_path.is_none() {
            return invalid("acquisition.csv_path", "required for the csv source");
        }
        if self.detector.k <= 0.0 {
            return invalid("detector.k", "must be strictly positive");
        }
        if self.detector.baseline_window == 0 {
            return invalid("detector.baseline_window", "must be non-zero");
        }
        if self.detector.baseline_window > self.session.buffer_capacity {
            return invalid(
                "detector.baseline_window",
                "must not exceed session.buffer_capacity",
            );
        }
        if self.detector.refractory_period <= 0.0 {
            return invalid("detector.refractory_period", "must be strictly positive");
        }
        if self.detector.max_inter_event_gap <= self.detector.refractory_period {
            return invalid(
                "detector.max_inter_event_gap",
                "must exceed detector.refractory_period",
            );
        }
        if let Some(filter) = &self.detector.filter {
            if filter.f_low <= 0.0 || filter.f_high <= filter.f_low {
                return invalid("detector.filter", "corners must satisfy 0 < f_low < f_high");
            }
            if filter.f_high >= self.acquisition.sample_rate / 2.0 {
                return invalid("detector.filter.f_high", "must stay below Nyquist");
            }
        }
        if self.audio.frequencies.is_empty() {
            return invalid("audio.frequencies", "at least one tone is required");
        }
        if !(0.0..=1.0).contains(&self.audio.volume) {
            return invalid("audio.volume", "must be between 0 and 1");
        }
        if self.audio.duration <= 0.0 {
            return invalid("audio.duration", "must be strictly positive");
        }
        if self.audio.latency_budget >= self.session.target_delay {
            return invalid(
                "audio.latency_budget",
                "must be smaller than session.target_delay",
            );
        }
        Ok(())
    }
}

/// Baseline configuration used across the crate's tests.
#[cfg(test)]
pub(crate) fn test_config() -> Config {
    use crate::triggers::TriggerCodes;

    Config {
        session: SessionConfig {
            target_delay: 0.25,
            missed_event_policy: MissedEventPolicy::Skip,
            stall_timeout: 4.0,
            buffer_capacity: 2048,
            record_events: false,
        },
        acquisition: AcquisitionConfig {
            source: "simulated".to_string(),
            sample_rate: 512.0,
            channel: 0,
            csv_path: None,
            heart_rate_bpm: 60.0,
        },
        detector: PeakDetectorConfig {
            k: 3.0,
            baseline_window: 256,
            lookahead: 16,
            refractory_period: 0.25,
            max_inter_event_gap: 2.0,
            filter: None,
        },
        sequence: SequenceConfig {
            n_sound: 50,
            n_deviant: 0,
            n_omission: 10,
            omission_min_spacing: 2,
            deviant_min_spacing: 1,
            edge_percent: 10.0,
            max_iter: 500,
        },
        triggers: TriggersConfig {
            kind: "mock".to_string(),
            port: None,
            codes: TriggerCodes {
                sound: 1,
                deviant: 3,
                omission: 2,
                task_start: 8,
                task_end: 9,
            },
        },
        audio: AudioConfig {
            frequencies: vec![1000.0, 1200.0],
            duration: 0.2,
            volume: 0.8,
            latency_budget: 0.005,
        },
        viewer: ViewerConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::Condition;

    #[test]
    fn roundtrips_through_yaml() {
        let config = test_config();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.session.target_delay, 0.25);
        assert_eq!(parsed.triggers.codes.code(Condition::Omission), 2);
    }

    #[test]
    fn validation_names_the_offending_field() {
        let mut config = test_config();
        config.detector.max_inter_event_gap = 0.1;
        let err = config.validate().unwrap_err();
        match err {
            ConfigError::InvalidValue { field, .. } => {
                assert_eq!(field, "detector.max_inter_event_gap")
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn csv_source_requires_path() {
        let mut config = test_config();
        config.acquisition.source = "csv".to_string();
        assert!(config.validate().is_err());
    }
}
