use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use serde::{Deserialize, Serialize};

use crate::error::AudioError;

// -----------------------------------------------------------------------------
// AUDIO PLAYER INTERFACE
// -----------------------------------------------------------------------------

/// Playback boundary. `play` is fire-and-forget; audible onset is expected
/// within `latency_budget` seconds, which the scheduler subtracts from its
/// target wait.
pub trait AudioPlayer {
    fn play(&self, sound_id: usize) -> Result<(), AudioError>;

    /// Expected call-to-onset latency in seconds.
    fn latency_budget(&self) -> f64;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    /// Pure-tone frequency per sound id, in Hz.
    pub frequencies: Vec<f64>,
    /// Tone duration in seconds.
    pub duration: f64,
    /// Linear gain, 0.0 to 1.0.
    pub volume: f64,
    /// Documented call-to-onset latency of the output path, in seconds.
    pub latency_budget: f64,
}

// -----------------------------------------------------------------------------
// CPAL TONE PLAYER
// -----------------------------------------------------------------------------

/// State shared with the audio callback thread. The callback reads only
/// atomics and pre-rendered buffers: no locks, no allocation on that path.
struct PlaybackState {
    sound: AtomicUsize,
    position: AtomicUsize,
    playing: AtomicBool,
}

/// Holds a cpal output stream for the whole session. The stream renders
/// silence until `play` arms one of the pre-rendered Hann-windowed tones.
pub struct TonePlayer {
    _stream: cpal::Stream,
    state: Arc<PlaybackState>,
    n_sounds: usize,
    latency_budget: f64,
}

impl TonePlayer {
    pub fn new(config: &AudioConfig) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::NoDevice)?;
        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::Stream(e.to_string()))?;
        if supported.sample_format() != SampleFormat::F32 {
            return Err(AudioError::Stream(format!(
                "unsupported output sample format {:?}",
                supported.sample_format()
            )));
        }
        let stream_config: cpal::StreamConfig = supported.into();
        let sample_rate = stream_config.sample_rate.0 as f64;
        let channels = stream_config.channels as usize;

        let tones: Vec<Vec<f32>> = config
            .frequencies
            .iter()
            .map(|&f| render_tone(f, config.duration, config.volume, sample_rate))
            .collect();
        let n_sounds = tones.len();

        let state = Arc::new(PlaybackState {
            sound: AtomicUsize::new(0),
            position: AtomicUsize::new(0),
            playing: AtomicBool::new(false),
        });
        let callback_state = Arc::clone(&state);

        let err_fn = move |err: cpal::StreamError| eprintln!("output stream error: {}", err);
        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    write_frames(data, channels, &tones, &callback_state);
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::Stream(e.to_string()))?;
        stream
            .play()
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            state,
            n_sounds,
            latency_budget: config.latency_budget,
        })
    }
}

impl AudioPlayer for TonePlayer {
    fn play(&self, sound_id: usize) -> Result<(), AudioError> {
        if sound_id >= self.n_sounds {
            return Err(AudioError::UnknownSound(sound_id));
        }
        self.state.sound.store(sound_id, Ordering::Relaxed);
        self.state.position.store(0, Ordering::Relaxed);
        self.state.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn latency_budget(&self) -> f64 {
        self.latency_budget
    }
}

fn write_frames(
    data: &mut [f32],
    channels: usize,
    tones: &[Vec<f32>],
    state: &PlaybackState,
) {
    if !state.playing.load(Ordering::Acquire) {
        data.fill(0.0);
        return;
    }
    let tone = &tones[state.sound.load(Ordering::Relaxed)];
    let mut position = state.position.load(Ordering::Relaxed);

    for frame in data.chunks_mut(channels) {
        let value = if position < tone.len() {
            tone[position]
        } else {
            0.0
        };
        for sample in frame.iter_mut() {
            *sample = value;
        }
        position += 1;
    }

    if position >= tone.len() {
        state.playing.store(false, Ordering::Relaxed);
    }
    state.position.store(position, Ordering::Relaxed);
}

/// Pure tone with a Hann window over the full duration, so onset and offset
/// are click-free.
fn render_tone(frequency: f64, duration: f64, volume: f64, sample_rate: f64) -> Vec<f32> {
    let n = (duration * sample_rate).round() as usize;
    (0..n)
        .map(|i| {
            let t = i as f64 / sample_rate;
            let window = if n > 1 {
                0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / (n - 1) as f64).cos())
            } else {
                1.0
            };
            (volume * window * (2.0 * std::f64::consts::PI * frequency * t).sin()) as f32
        })
        .collect()
}

// -----------------------------------------------------------------------------
// MOCK PLAYER
// -----------------------------------------------------------------------------

/// Records play calls instead of opening a device. Used by tests and by the
/// latency-measurement path where audio is disabled.
pub struct MockPlayer {
    records: Arc<Mutex<Vec<(usize, Instant)>>>,
}

impl MockPlayer {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn records(&self) -> Arc<Mutex<Vec<(usize, Instant)>>> {
        Arc::clone(&self.records)
    }
}

impl Default for MockPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPlayer for MockPlayer {
    fn play(&self, sound_id: usize) -> Result<(), AudioError> {
        self.records
            .lock()
            .expect("mock player lock poisoned")
            .push((sound_id, Instant::now()));
        Ok(())
    }

    fn latency_budget(&self) -> f64 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_is_windowed_and_bounded() {
        let tone = render_tone(1000.0, 0.2, 0.8, 44100.0);
        assert_eq!(tone.len(), 8820);
        // Hann window: silent ends, energy in the middle, gain respected.
        assert_eq!(tone[0], 0.0);
        assert!(tone.last().unwrap().abs() < 1e-3);
        assert!(tone.iter().any(|s| s.abs() > 0.5));
        assert!(tone.iter().all(|s| s.abs() <= 0.8 + 1e-6));
    }

    #[test]
    fn mock_player_records_sound_ids() {
        let player = MockPlayer::new();
        let records = player.records();
        player.play(0).unwrap();
        player.play(1).unwrap();
        let ids: Vec<usize> = records.lock().unwrap().iter().map(|(i, _)| *i).collect();
        assert_eq!(ids, vec![0, 1]);
    }
}
