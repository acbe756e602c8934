//! Character-LCD panel apps
//!
//! The secondary display is a small character LCD driven by little
//! self-contained "apps" (a clock, a progress indicator). Exactly one app
//! owns the panel at a time; the [`PanelAppSwitcher`] is the LCD engine's
//! finalizer and swaps apps as transitions are taken.

pub mod clock;
pub mod progress;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::engine::{FinalizeContext, Finalizer};

/// Character-cell text panel
///
/// Implemented by the hardware driver and by console stand-ins. Rendering
/// is line-oriented; rows are zero-based.
pub trait TextPanel: Send + Sync {
    /// Replace the contents of one row
    fn write_line(&self, row: usize, text: &str) -> anyhow::Result<()>;

    /// Blank the whole panel
    fn clear(&self) -> anyhow::Result<()>;

    /// Panel width in character cells
    fn cols(&self) -> usize;

    /// Panel height in rows
    fn rows(&self) -> usize;
}

/// A self-contained program for the text panel
#[async_trait]
pub trait PanelApp: Send + Sync {
    /// Take over the panel and start rendering
    async fn start(&self);

    /// Stop rendering; blank the panel when `clear` is set
    async fn stop(&self, clear: bool);

    /// Return internal state to its initial value without touching the
    /// panel
    async fn reset(&self);
}

/// Finalizer switching panel apps by transition name
///
/// On every transition all registered apps are stopped (clearing the
/// panel) and reset, then the app registered under the transition's name
/// is started. A name with no registered app leaves the panel blank.
pub struct PanelAppSwitcher {
    apps: HashMap<String, Arc<dyn PanelApp>>,
}

impl PanelAppSwitcher {
    /// Empty switcher
    #[must_use]
    pub fn new() -> Self {
        Self {
            apps: HashMap::new(),
        }
    }

    /// Register `app` to start when a transition named `name` is taken
    #[must_use]
    pub fn with_app(mut self, name: impl Into<String>, app: Arc<dyn PanelApp>) -> Self {
        self.apps.insert(name.into(), app);
        self
    }

    /// The app registered under `name`, if any
    #[must_use]
    pub fn app(&self, name: &str) -> Option<&Arc<dyn PanelApp>> {
        self.apps.get(name)
    }
}

impl Default for PanelAppSwitcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Finalizer for PanelAppSwitcher {
    async fn finalize(&self, ctx: FinalizeContext) -> anyhow::Result<()> {
        for app in self.apps.values() {
            app.stop(true).await;
            app.reset().await;
        }
        let Some(name) = ctx.name.as_deref() else {
            return Ok(());
        };
        if let Some(app) = self.apps.get(name) {
            debug!(app = name, "starting panel app");
            app.start().await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PanelAppSwitcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelAppSwitcher")
            .field("apps", &self.apps.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Pad or truncate `text` to exactly `cols` cells
pub(crate) fn fit_line(text: &str, cols: usize) -> String {
    let mut line: String = text.chars().take(cols).collect();
    while line.chars().count() < cols {
        line.push(' ');
    }
    line
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::table::{StateId, TransitionArgs, TransitionKind};
    use crate::events::EventBus;

    #[derive(Default)]
    struct RecordingApp {
        log: Arc<parking_lot::Mutex<Vec<String>>>,
        tag: &'static str,
    }

    #[async_trait]
    impl PanelApp for RecordingApp {
        async fn start(&self) {
            self.log.lock().push(format!("{}:start", self.tag));
        }
        async fn stop(&self, clear: bool) {
            self.log.lock().push(format!("{}:stop({clear})", self.tag));
        }
        async fn reset(&self) {
            self.log.lock().push(format!("{}:reset", self.tag));
        }
    }

    fn ctx(name: Option<&str>) -> FinalizeContext {
        FinalizeContext {
            from: None,
            to: StateId::from("lcd"),
            name: name.map(str::to_string),
            kind: TransitionKind::External,
            args: TransitionArgs::new(),
            events: EventBus::default(),
        }
    }

    #[tokio::test]
    async fn stops_everything_then_starts_the_named_app() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let clock = Arc::new(RecordingApp {
            log: log.clone(),
            tag: "clock",
        });
        let switcher = PanelAppSwitcher::new().with_app("show-clock", clock);

        switcher.finalize(ctx(Some("show-clock"))).await.unwrap();
        assert_eq!(
            *log.lock(),
            vec!["clock:stop(true)", "clock:reset", "clock:start"]
        );
    }

    #[tokio::test]
    async fn unknown_name_leaves_the_panel_blank() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let clock = Arc::new(RecordingApp {
            log: log.clone(),
            tag: "clock",
        });
        let switcher = PanelAppSwitcher::new().with_app("show-clock", clock);

        switcher.finalize(ctx(Some("show-progress"))).await.unwrap();
        assert_eq!(*log.lock(), vec!["clock:stop(true)", "clock:reset"]);
    }

    #[test]
    fn fit_line_pads_and_truncates() {
        assert_eq!(fit_line("hi", 4), "hi  ");
        assert_eq!(fit_line("overflowing", 4), "over");
    }
}
