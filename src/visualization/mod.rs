// src/visualization/mod.rs

pub mod window;

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ViewerConfig {
    pub enabled: bool,
    pub queue_depth: usize,
    pub window_width: u32,
    pub window_height: u32,
    /// Seconds of signal tail shown in the plot.
    pub tail_seconds: f64,
    pub plot_height: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            queue_depth: 8,
            window_width: 1200,
            window_height: 600,
            tail_seconds: 4.0,
            plot_height: 300,
        }
    }
}

/// One snapshot published by the control loop. The viewer owns its copy;
/// nothing here aliases core state.
#[derive(Debug, Clone)]
pub struct ViewerFrame {
    /// (timestamp, value) tail of the ring buffer.
    pub samples: Vec<(f64, f64)>,
    /// Current detection threshold (baseline mean + k·σ).
    pub threshold: f64,
    /// Timestamps of recently confirmed events.
    pub peaks: Vec<f64>,
    pub missed_events: u64,
}

/// Bounded frame queue between the control loop (producer) and the viewer
/// window (consumer).
pub type FrameQueue = Arc<ArrayQueue<ViewerFrame>>;

pub fn create_frame_queue(depth: usize) -> FrameQueue {
    Arc::new(ArrayQueue::new(depth.max(1)))
}

/// Publishes a frame without ever blocking the control loop: when the viewer
/// lags, the oldest frame is dropped to make room.
pub fn publish_frame(queue: &FrameQueue, frame: ViewerFrame) {
    if let Err(frame) = queue.push(frame) {
        let _ = queue.pop();
        let _ = queue.push(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: f64) -> ViewerFrame {
        ViewerFrame {
            samples: vec![(tag, tag)],
            threshold: 0.0,
            peaks: Vec::new(),
            missed_events: 0,
        }
    }

    #[test]
    fn full_queue_drops_oldest_frame_never_blocks() {
        let queue = create_frame_queue(2);
        publish_frame(&queue, frame(1.0));
        publish_frame(&queue, frame(2.0));
        publish_frame(&queue, frame(3.0));

        assert_eq!(queue.len(), 2);
        let first = queue.pop().unwrap();
        assert_eq!(first.samples[0].0, 2.0);
        let second = queue.pop().unwrap();
        assert_eq!(second.samples[0].0, 3.0);
    }
}
