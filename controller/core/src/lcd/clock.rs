//! Clock panel app
//!
//! Shows the current time and date, one per row. Character LCDs burn in
//! when the same cells stay lit, so each row drifts horizontally, bouncing
//! between the margins.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::warn;

use super::{fit_line, PanelApp, TextPanel};

const TIME_TICK: Duration = Duration::from_secs(1);
const DATE_TICK: Duration = Duration::from_secs(10);

/// Horizontal drift position, walking between 0 and the row's slack
#[derive(Debug, Default, Clone, Copy)]
struct Bounce {
    pos: usize,
    backwards: bool,
}

impl Bounce {
    /// Current offset; advances one cell for the next call
    fn step(&mut self, slack: usize) -> usize {
        if self.pos > slack {
            self.pos = slack;
        }
        let offset = self.pos;
        if self.backwards {
            if self.pos == 0 {
                self.backwards = false;
                self.pos = usize::from(slack > 0);
            } else {
                self.pos -= 1;
            }
        } else if self.pos >= slack {
            self.backwards = true;
            self.pos = self.pos.saturating_sub(1);
        } else {
            self.pos += 1;
        }
        offset
    }
}

#[derive(Debug, Default)]
struct BounceState {
    time: Bounce,
    date: Bounce,
}

/// Time-and-date app for the text panel
///
/// The time row ticks every second, the date row on its own slower
/// interval.
pub struct ClockApp {
    panel: Arc<dyn TextPanel>,
    bounce: Arc<parking_lot::Mutex<BounceState>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl ClockApp {
    /// Clock rendering onto `panel`
    #[must_use]
    pub fn new(panel: Arc<dyn TextPanel>) -> Self {
        Self {
            panel,
            bounce: Arc::new(parking_lot::Mutex::new(BounceState::default())),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

fn render_row(panel: &dyn TextPanel, row: usize, text: &str, bounce: &mut Bounce) {
    let cols = panel.cols();
    let offset = bounce.step(cols.saturating_sub(text.chars().count()));
    let line = fit_line(&format!("{}{text}", " ".repeat(offset)), cols);
    if let Err(e) = panel.write_line(row, &line) {
        warn!(row, err = %e, "clock write failed");
    }
}

#[async_trait]
impl PanelApp for ClockApp {
    async fn start(&self) {
        let time_task = {
            let panel = self.panel.clone();
            let bounce = self.bounce.clone();
            tokio::spawn(async move {
                loop {
                    let time = chrono::Local::now().format("%H:%M:%S").to_string();
                    render_row(panel.as_ref(), 0, &time, &mut bounce.lock().time);
                    tokio::time::sleep(TIME_TICK).await;
                }
            })
        };
        let date_task = {
            let panel = self.panel.clone();
            let bounce = self.bounce.clone();
            tokio::spawn(async move {
                loop {
                    let date = chrono::Local::now().format("%a %d %b").to_string();
                    render_row(panel.as_ref(), 1, &date, &mut bounce.lock().date);
                    tokio::time::sleep(DATE_TICK).await;
                }
            })
        };

        let mut tasks = self.tasks.lock();
        for old in tasks.drain(..) {
            old.abort();
        }
        tasks.push(time_task);
        tasks.push(date_task);
    }

    async fn stop(&self, clear: bool) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if clear {
            if let Err(e) = self.panel.clear() {
                warn!(err = %e, "clock clear failed");
            }
        }
    }

    async fn reset(&self) {
        *self.bounce.lock() = BounceState::default();
    }
}

impl std::fmt::Debug for ClockApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockApp").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::lcd::testing::RecordingPanel;

    #[test]
    fn bounce_walks_both_directions() {
        let mut b = Bounce::default();
        let offsets: Vec<_> = (0..6).map(|_| b.step(2)).collect();
        assert_eq!(offsets, vec![0, 1, 2, 1, 0, 1]);
    }

    #[test]
    fn bounce_stays_put_without_slack() {
        let mut b = Bounce::default();
        assert_eq!(b.step(0), 0);
        assert_eq!(b.step(0), 0);
    }

    #[test]
    fn bounce_clamps_when_slack_shrinks() {
        let mut b = Bounce { pos: 5, backwards: false };
        assert!(b.step(2) <= 2);
    }

    #[tokio::test]
    async fn renders_both_rows_on_start() {
        let panel = Arc::new(RecordingPanel::default());
        let app = ClockApp::new(panel.clone());

        app.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        app.stop(true).await;

        let lines = panel.lines.lock();
        assert!(lines.iter().any(|(row, _)| *row == 0));
        assert!(lines.iter().any(|(row, _)| *row == 1));
        assert!(lines.iter().all(|(_, text)| text.chars().count() == 16));
        assert_eq!(panel.clears.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_without_clear_leaves_the_panel() {
        let panel = Arc::new(RecordingPanel::default());
        let app = ClockApp::new(panel.clone());

        app.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        app.stop(false).await;
        assert_eq!(panel.clears.load(Ordering::SeqCst), 0);
    }
}
