//! Progress indicator panel app
//!
//! Rendered while the e-paper refresh runs: a label with animated dots and
//! a percentage on the first row, a bar like `[###>      ]` on the second.
//! The fraction shown is fed in from outside via [`ProgressApp::set_progress`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::warn;

use super::{fit_line, PanelApp, TextPanel};

const TICK: Duration = Duration::from_millis(500);
const LABEL: &str = "Working";

#[derive(Debug, Default)]
struct ProgressState {
    progress: f32,
    dots: usize,
}

/// Percentage-and-bar app for the text panel
pub struct ProgressApp {
    panel: Arc<dyn TextPanel>,
    state: Arc<parking_lot::Mutex<ProgressState>>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ProgressApp {
    /// Progress indicator rendering onto `panel`
    #[must_use]
    pub fn new(panel: Arc<dyn TextPanel>) -> Self {
        Self {
            panel,
            state: Arc::new(parking_lot::Mutex::new(ProgressState::default())),
            task: parking_lot::Mutex::new(None),
        }
    }

    /// Update the fraction shown, clamped to `0.0..=1.0`
    pub fn set_progress(&self, progress: f32) {
        self.state.lock().progress = progress.clamp(0.0, 1.0);
    }

    /// The fraction currently shown
    #[must_use]
    pub fn progress(&self) -> f32 {
        self.state.lock().progress
    }
}

/// First row: label, animated dots, right-aligned percentage
fn render_status(label: &str, dots: usize, progress: f32, cols: usize) -> String {
    let pct = format!("{:>3}%", (progress * 100.0).round() as u32);
    let animated = format!("{label}{}", ".".repeat(dots));
    let mut line = fit_line(&animated, cols.saturating_sub(pct.len()));
    line.push_str(&pct);
    line
}

/// Second row: `[###>      ]` filling left to right
fn render_bar(progress: f32, cols: usize) -> String {
    let inner = cols.saturating_sub(2);
    let filled = (progress.clamp(0.0, 1.0) * inner as f32).floor() as usize;
    let mut bar = String::with_capacity(cols);
    bar.push('[');
    if filled >= inner {
        bar.push_str(&"#".repeat(inner));
    } else {
        bar.push_str(&"#".repeat(filled));
        bar.push('>');
        bar.push_str(&" ".repeat(inner - filled - 1));
    }
    bar.push(']');
    bar
}

fn render(panel: &dyn TextPanel, state: &parking_lot::Mutex<ProgressState>) {
    let cols = panel.cols();
    let (progress, dots) = {
        let mut s = state.lock();
        s.dots = (s.dots + 1) % 4;
        (s.progress, s.dots)
    };
    let rows = [
        (0, render_status(LABEL, dots, progress, cols)),
        (1, render_bar(progress, cols)),
    ];
    for (row, text) in rows {
        if let Err(e) = panel.write_line(row, &text) {
            warn!(row, err = %e, "progress write failed");
        }
    }
}

#[async_trait]
impl PanelApp for ProgressApp {
    async fn start(&self) {
        let panel = self.panel.clone();
        let state = self.state.clone();
        let handle = tokio::spawn(async move {
            loop {
                render(panel.as_ref(), &state);
                tokio::time::sleep(TICK).await;
            }
        });
        if let Some(old) = self.task.lock().replace(handle) {
            old.abort();
        }
    }

    async fn stop(&self, clear: bool) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        if clear {
            if let Err(e) = self.panel.clear() {
                warn!(err = %e, "progress clear failed");
            }
        }
    }

    async fn reset(&self) {
        *self.state.lock() = ProgressState::default();
    }
}

impl std::fmt::Debug for ProgressApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressApp")
            .field("progress", &self.state.lock().progress)
            .finish_non_exhaustive()
    }
}
