//! E-paper display finalizer
//!
//! The [`DisplayFinalizer`] is the transition engine's workhorse for the
//! e-paper panel: it takes the cross-process write lock, loads the
//! pre-rendered layer images for the target state, writes them to the panel
//! with bounded retries, and reports estimated progress on the engine's
//! event bus while the slow refresh runs.
//!
//! Refresh times are not observable from the panel, so progress is an
//! estimate: a rolling average of recent write durations per target state
//! (clearing and plain writes kept separate).

pub mod artifacts;
pub mod history;
pub mod lock;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::engine::table::TransitionKind;
use crate::engine::{FinalizeContext, Finalizer};
use artifacts::StateArtifacts;
use history::DurationHistory;
use lock::WriteLock;

/// Hardware-facing side of the finalizer
///
/// Implemented by the real panel driver and by simulations.
#[async_trait]
pub trait DisplayPanel: Send + Sync {
    /// Write both ink layers, optionally running a full clear cycle first
    async fn write(&self, artifacts: &StateArtifacts, clear_before: bool) -> anyhow::Result<()>;

    /// Run a full clear cycle without new content (e.g. at shutdown)
    async fn clear(&self) -> anyhow::Result<()>;

    /// Put the panel into its low-power state after a write
    async fn sleep(&self) -> anyhow::Result<()>;
}

/// Tunables for [`DisplayFinalizer`]
#[derive(Debug, Clone)]
pub struct DisplayOptions {
    /// Directory holding the pre-rendered artifacts and the write lock
    pub data_dir: PathBuf,
    /// Retries after a failed write (total attempts = retries + 1)
    pub retries: u32,
    /// Pause between write attempts
    pub retry_delay: Duration,
    /// Pause after a successful write before the panel is considered free
    pub cooldown: Duration,
    /// How long to wait for the cross-process write lock
    pub lock_timeout: Duration,
    /// Duration samples averaged per progress estimate
    pub history_window: usize,
    /// Progress estimate before any write has been observed
    pub default_estimate: Duration,
}

impl DisplayOptions {
    /// Defaults for a panel whose data directory is `data_dir`
    #[must_use]
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            retries: 2,
            retry_delay: Duration::from_secs(2),
            cooldown: Duration::from_secs(3),
            lock_timeout: Duration::from_secs(30),
            history_window: history::HISTORY_WINDOW,
            default_estimate: history::DEFAULT_ESTIMATE,
        }
    }
}

/// Finalizer writing pre-rendered state images to an e-paper panel
pub struct DisplayFinalizer {
    panel: Arc<dyn DisplayPanel>,
    opts: DisplayOptions,
    busy: AtomicBool,
    history: parking_lot::Mutex<DurationHistory>,
}

impl DisplayFinalizer {
    /// Finalizer driving `panel` with the given tunables
    #[must_use]
    pub fn new(panel: Arc<dyn DisplayPanel>, opts: DisplayOptions) -> Self {
        let history = DurationHistory::new(opts.history_window, opts.default_estimate);
        Self {
            panel,
            opts,
            busy: AtomicBool::new(false),
            history: parking_lot::Mutex::new(history),
        }
    }

    /// Whether a write (or its cooldown) is in flight right now
    #[must_use]
    pub fn busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    async fn run(&self, ctx: &FinalizeContext) -> anyhow::Result<()> {
        // Timer-fired transitions get a full clear cycle so ghosting from
        // the long-displayed previous image is flushed.
        let clear = ctx.kind == TransitionKind::Timer;

        let _lock = WriteLock::acquire(
            WriteLock::path_in(&self.opts.data_dir),
            self.opts.lock_timeout,
        )
        .await?;
        let artifacts = artifacts::load(&self.opts.data_dir, &ctx.to).await?;

        let estimate = self.history.lock().estimate(&ctx.to, clear);
        debug!(
            state = %ctx.to,
            clear,
            estimate_secs = estimate.as_secs_f64(),
            "writing panel"
        );

        let done = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let reporter = tokio::spawn(report_progress(
            ctx.clone(),
            estimate,
            done.clone(),
            wake.clone(),
        ));

        let mut attempt = 0;
        let result = loop {
            // Each attempt is timed on its own so retry delays and failed
            // attempts never inflate the rolling estimate.
            let started = Instant::now();
            match self.panel.write(&artifacts, clear).await {
                Ok(()) => break Ok(started.elapsed()),
                Err(e) if attempt < self.opts.retries => {
                    attempt += 1;
                    warn!(
                        state = %ctx.to,
                        attempt,
                        err = %e,
                        "panel write failed, retrying"
                    );
                    tokio::time::sleep(self.opts.retry_delay).await;
                }
                Err(e) => break Err(e),
            }
        };
        done.store(true, Ordering::SeqCst);
        wake.notify_waiters();
        let _ = reporter.await;

        // Terminal progress goes out even when the write failed, so
        // listeners driving progress bars are never left hanging.
        ctx.progress(1.0);
        let written = result?;

        self.history.lock().record(&ctx.to, clear, written);
        if let Err(e) = self.panel.sleep().await {
            warn!(state = %ctx.to, err = %e, "panel refused to sleep");
        }
        Ok(())
    }
}

/// Emit estimated progress about a hundred times over the expected write
/// duration, capped below 1.0 until the write finishes either way
async fn report_progress(
    ctx: FinalizeContext,
    estimate: Duration,
    done: Arc<AtomicBool>,
    wake: Arc<Notify>,
) {
    let tick = std::cmp::max(estimate / 100, Duration::from_millis(10));
    let started = Instant::now();
    loop {
        tokio::select! {
            () = wake.notified() => break,
            () = tokio::time::sleep(tick) => {}
        }
        if done.load(Ordering::SeqCst) {
            break;
        }
        let progress = (started.elapsed().as_secs_f32() / estimate.as_secs_f32()).min(0.99);
        ctx.progress(progress);
    }
}

#[async_trait]
impl Finalizer for DisplayFinalizer {
    async fn finalize(&self, ctx: FinalizeContext) -> anyhow::Result<()> {
        self.busy.store(true, Ordering::SeqCst);
        let result = self.run(&ctx).await;
        if result.is_ok() {
            // The panel needs a moment after a refresh before it can take
            // the next write.
            tokio::time::sleep(self.opts.cooldown).await;
        }
        self.busy.store(false, Ordering::SeqCst);
        result
    }
}

impl std::fmt::Debug for DisplayFinalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayFinalizer")
            .field("data_dir", &self.opts.data_dir)
            .field("busy", &self.busy())
            .finish_non_exhaustive()
    }
}
