//! Simulated hardware
//!
//! Stand-ins for the panel drivers so the daemon runs on any host: the
//! e-paper becomes a logged delay, the character LCD becomes log lines.
//! Both implement the same core traits the real drivers do, so everything
//! above them is exercised unchanged.

use std::time::Duration;

use async_trait::async_trait;
use infopanel_core::display::artifacts::StateArtifacts;
use infopanel_core::{DisplayPanel, TextPanel};
use tracing::{debug, info};

/// E-paper panel that logs writes and sleeps for a configurable refresh
/// time
pub struct SimulatedEpaper {
    refresh: Duration,
}

impl SimulatedEpaper {
    pub fn new(refresh: Duration) -> Self {
        Self { refresh }
    }
}

#[async_trait]
impl DisplayPanel for SimulatedEpaper {
    async fn write(&self, artifacts: &StateArtifacts, clear_before: bool) -> anyhow::Result<()> {
        info!(
            black_bytes = artifacts.black.len(),
            red_bytes = artifacts.red.len(),
            clear_before,
            refresh_secs = self.refresh.as_secs_f64(),
            "simulated e-paper write"
        );
        tokio::time::sleep(self.refresh).await;
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        info!("simulated e-paper clear cycle");
        tokio::time::sleep(self.refresh).await;
        Ok(())
    }

    async fn sleep(&self) -> anyhow::Result<()> {
        debug!("simulated e-paper entering low-power state");
        Ok(())
    }
}

/// 16x2 character LCD rendered into the log
pub struct ConsoleLcd {
    rows: parking_lot::Mutex<Vec<String>>,
}

impl ConsoleLcd {
    const COLS: usize = 16;
    const ROWS: usize = 2;

    pub fn new() -> Self {
        Self {
            rows: parking_lot::Mutex::new(vec![String::new(); Self::ROWS]),
        }
    }
}

impl TextPanel for ConsoleLcd {
    fn write_line(&self, row: usize, text: &str) -> anyhow::Result<()> {
        let mut rows = self.rows.lock();
        if row >= rows.len() {
            anyhow::bail!("row {row} out of range");
        }
        rows[row] = text.to_string();
        debug!(row, "lcd |{text}|");
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        let mut rows = self.rows.lock();
        rows.iter_mut().for_each(String::clear);
        debug!("lcd cleared");
        Ok(())
    }

    fn cols(&self) -> usize {
        Self::COLS
    }

    fn rows(&self) -> usize {
        Self::ROWS
    }
}
