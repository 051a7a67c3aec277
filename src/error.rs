//! Error types for the stimulation core.

use thiserror::Error;

/// Errors raised by the sample ring buffer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BufferError {
    #[error("insufficient data: requested {needed} samples, {available} available")]
    InsufficientData { needed: usize, available: usize },
}

/// Errors raised at sequence-generation time or by the read cursor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SequenceError {
    #[error("unsatisfiable sequence: {reason}")]
    Unsatisfiable { reason: String },

    #[error("sequence exhausted")]
    Exhausted,
}

/// Errors raised by an acquisition source.
#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("acquisition stalled: no samples for {elapsed:.3} s")]
    Stall { elapsed: f64 },

    #[error("acquisition source failed: {0}")]
    Source(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading or validating the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Errors raised by the audio player.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("no audio output device available")]
    NoDevice,

    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("unknown sound id: {0}")]
    UnknownSound(usize),
}

/// Errors raised by a trigger sink.
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("trigger port error: {0}")]
    Port(#[from] std::io::Error),
}

/// Umbrella error for a running session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
