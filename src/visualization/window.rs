// src/visualization/window.rs

use super::{FrameQueue, ViewerConfig, ViewerFrame};
use eframe::egui;

/// Read-only debug viewer. Polls the bounded frame queue each repaint and
/// keeps only the newest frame; stale frames are discarded unseen, so the
/// viewer can never slow the control loop down.
pub struct ViewerWindow {
    queue: FrameQueue,
    config: ViewerConfig,
    latest: Option<ViewerFrame>,
    peak_markers: Vec<f64>,
}

impl ViewerWindow {
    pub fn new(queue: FrameQueue, config: ViewerConfig) -> Self {
        Self {
            queue,
            config,
            latest: None,
            peak_markers: Vec::new(),
        }
    }

    pub fn run(queue: FrameQueue, config: ViewerConfig) -> Result<(), eframe::Error> {
        let options = eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_inner_size([config.window_width as f32, config.window_height as f32])
                .with_title("cardio-audio-stim - Live Detection"),
            ..Default::default()
        };

        eframe::run_native(
            "cardio-audio-stim Viewer",
            options,
            Box::new(|_cc| Ok(Box::new(ViewerWindow::new(queue, config)))),
        )
    }

    fn drain_queue(&mut self) {
        // Keep only the newest snapshot; everything older is stale.
        while let Some(frame) = self.queue.pop() {
            for &peak in &frame.peaks {
                if self.peak_markers.last().map_or(true, |&p| peak > p) {
                    self.peak_markers.push(peak);
                }
            }
            self.latest = Some(frame);
        }
        // Prune markers that scrolled out of the visible tail.
        if let Some(frame) = &self.latest {
            if let Some(&(window_start, _)) = frame.samples.first() {
                self.peak_markers.retain(|&p| p >= window_start);
            }
        }
    }
}

impl eframe::App for ViewerWindow {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // Request continuous repainting for real-time updates
        ctx.request_repaint();
        self.drain_queue();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("Cardiac signal - live peak detection");
            ui.separator();

            let Some(frame) = self.latest.clone() else {
                ui.label("Waiting for data...");
                return;
            };

            ui.horizontal(|ui| {
                ui.label(format!("threshold: {:.2}", frame.threshold));
                ui.separator();
                ui.label(format!("peaks in view: {}", self.peak_markers.len()));
                ui.separator();
                ui.label(format!("missed events: {}", frame.missed_events));
            });

            self.plot_signal(ui, &frame);
        });
    }
}

impl ViewerWindow {
    fn plot_signal(&self, ui: &mut egui::Ui, frame: &ViewerFrame) {
        use egui_plot::{HLine, Line, Plot, PlotPoints, VLine};

        if frame.samples.is_empty() {
            return;
        }

        let points: PlotPoints = frame.samples.iter().map(|(t, v)| [*t, *v]).collect();
        let line = Line::new(points)
            .color(egui::Color32::LIGHT_BLUE)
            .width(1.5);

        Plot::new("cardiac_signal")
            .height(self.config.plot_height as f32)
            .show_axes([true, true])
            .show_grid([true, true])
            .allow_zoom(true)
            .allow_drag(true)
            .allow_scroll(true)
            .show(ui, |plot_ui| {
                plot_ui.line(line);
                plot_ui.hline(
                    HLine::new(frame.threshold)
                        .color(egui::Color32::GREEN)
                        .width(1.0),
                );
                for &peak in &self.peak_markers {
                    plot_ui.vline(VLine::new(peak).color(egui::Color32::RED).width(2.0));
                }
            });
    }
}

/// Spawns the viewer window on its own thread; the control loop keeps the
/// producer end of the queue.
pub fn spawn_viewer(queue: FrameQueue, config: ViewerConfig) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        if let Err(e) = ViewerWindow::run(queue, config) {
            eprintln!("viewer window error: {}", e);
        }
    })
}
