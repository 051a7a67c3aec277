use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use cardio_audio_stim::acquisition::{CsvSource, SampleSource, SimulatedSource};
use cardio_audio_stim::audio::{MockPlayer, TonePlayer};
use cardio_audio_stim::config::{self, Config};
use cardio_audio_stim::error::{ConfigError, SessionError};
use cardio_audio_stim::scheduler::Scheduler;
use cardio_audio_stim::sequence::{Condition, Sequence};
use cardio_audio_stim::triggers::{self, MockTrigger};
use cardio_audio_stim::utils::log;
use cardio_audio_stim::visualization::{create_frame_queue, window::spawn_viewer, FrameQueue};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        print_usage();
        return;
    }
    let no_viewer = args.iter().any(|a| a == "--no-viewer");

    let result = match args[1].as_str() {
        "run" => run_paradigm(&args[2], no_viewer, false),
        "test-detector" => run_paradigm(&args[2], no_viewer, true),
        "test-sequence" => test_sequence(&args[2]),
        _ => {
            print_usage();
            return;
        }
    };

    if let Err(e) = result {
        log::error(&e.to_string());
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("Usage: main <run|test-detector|test-sequence> <config.yaml> [--no-viewer]");
}

/// Full paradigm, or the detector in isolation with mock outputs.
fn run_paradigm(config_path: &str, no_viewer: bool, mock_outputs: bool) -> Result<(), SessionError> {
    let config = config::load_config(config_path)?;

    let viewer_queue = if config.viewer.enabled && !no_viewer {
        let queue = create_frame_queue(config.viewer.queue_depth);
        spawn_viewer(Arc::clone(&queue), config.viewer.clone());
        Some(queue)
    } else {
        None
    };

    match config.acquisition.source.as_str() {
        "csv" => {
            let path = config.acquisition.csv_path.clone().ok_or_else(|| {
                ConfigError::InvalidValue {
                    field: "acquisition.csv_path".to_string(),
                    message: "required for the csv source".to_string(),
                }
            })?;
            let source = CsvSource::open(
                &path,
                config.acquisition.channel,
                config.acquisition.sample_rate,
            )?;
            start_session(config, source, viewer_queue, mock_outputs)
        }
        _ => {
            let source = SimulatedSource::new(
                config.acquisition.sample_rate,
                config.acquisition.heart_rate_bpm,
            );
            start_session(config, source, viewer_queue, mock_outputs)
        }
    }
}

fn start_session<S: SampleSource>(
    config: Config,
    source: S,
    viewer_queue: Option<FrameQueue>,
    mock_outputs: bool,
) -> Result<(), SessionError> {
    let stop = Arc::new(AtomicBool::new(false));

    let summary = if mock_outputs {
        let mut scheduler = Scheduler::new(
            config,
            source,
            Box::new(MockTrigger::new()),
            MockPlayer::new(),
            viewer_queue,
            stop,
        )?;
        scheduler.run()?
    } else {
        let trigger = triggers::create_trigger(&config.triggers)?;
        let audio = TonePlayer::new(&config.audio)?;
        let mut scheduler = Scheduler::new(config, source, trigger, audio, viewer_queue, stop)?;
        scheduler.run()?
    };

    log::status(&format!(
        "{} peaks detected, {} stimuli delivered, {} missed",
        summary.detected, summary.delivered, summary.missed
    ));
    Ok(())
}

/// Generates one sequence from the configured counts and prints it.
fn test_sequence(config_path: &str) -> Result<(), SessionError> {
    let config = config::load_config(config_path)?;
    let sequence = Sequence::generate(&config.sequence)?;

    let line: String = sequence
        .conditions()
        .iter()
        .map(|c| match c {
            Condition::Sound => 's',
            Condition::Deviant => 'd',
            Condition::Omission => 'o',
        })
        .collect();
    log::status(&format!("sequence ({} slots): {}", sequence.len(), line));
    log::status(&format!(
        "sounds: {}, deviants: {}, omissions: {}",
        config.sequence.n_sound, config.sequence.n_deviant, config.sequence.n_omission
    ));
    Ok(())
}
