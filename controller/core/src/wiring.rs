//! Cross-engine wiring
//!
//! The character LCD mirrors what the e-paper is doing: while a slow
//! refresh runs it shows the progress indicator, and once the refresh
//! lands it goes back to the clock. This module is a pure consumer of the
//! e-paper engine's event stream; it never reaches into either engine's
//! internals.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::table::TransitionArgs;
use crate::engine::TransitionEngine;
use crate::events::EngineEvent;
use crate::lcd::progress::ProgressApp;

/// LCD transition activated when an e-paper write begins
pub const SHOW_PROGRESS: &str = "show-progress";

/// LCD transition activated when an e-paper write lands
pub const SHOW_DATETIME: &str = "show-datetime";

/// Drive `lcd` from `epaper`'s lifecycle events.
///
/// The LCD engine rejecting a transition (e.g. its table lacks the
/// conventional names) is logged and tolerated. The returned task runs
/// until the e-paper engine is dropped.
pub fn follow_epaper(
    epaper: &TransitionEngine,
    lcd: TransitionEngine,
    progress: Arc<ProgressApp>,
) -> JoinHandle<()> {
    let mut events = epaper.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::BeforeInit { to, .. } => {
                    debug!(state = %to, "e-paper write starting, showing progress");
                    activate_lcd(&lcd, SHOW_PROGRESS).await;
                }
                EngineEvent::Progress { progress: p, .. } => {
                    progress.set_progress(p);
                }
                EngineEvent::AfterFinalize { to, .. } => {
                    debug!(state = %to, "e-paper write landed, showing clock");
                    activate_lcd(&lcd, SHOW_DATETIME).await;
                }
            }
        }
    })
}

async fn activate_lcd(lcd: &TransitionEngine, name: &str) {
    if let Err(e) = lcd.activate(Some(name), TransitionArgs::new()).await {
        warn!(engine = %lcd.name(), transition = name, err = %e, "lcd refused transition");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::TransitionSpec;
    use crate::engine::table::{TransitionKind, TransitionTable};
    use crate::engine::{FinalizeContext, Finalizer};
    use crate::lcd::testing::RecordingPanel;

    struct EmittingFinalizer;

    #[async_trait]
    impl Finalizer for EmittingFinalizer {
        async fn finalize(&self, ctx: FinalizeContext) -> anyhow::Result<()> {
            ctx.progress(0.5);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingFinalizer {
        names: parking_lot::Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl Finalizer for RecordingFinalizer {
        async fn finalize(&self, ctx: FinalizeContext) -> anyhow::Result<()> {
            self.names.lock().push(ctx.name.clone());
            Ok(())
        }
    }

    fn spec(from: Option<&str>, to: &str, name: Option<&str>, re_entrant: bool) -> TransitionSpec {
        TransitionSpec {
            from: from.map(str::to_string),
            to: to.to_string(),
            name: name.map(str::to_string),
            kind: TransitionKind::External,
            re_entrant,
            args: serde_json::Map::new(),
        }
    }

    fn lcd_table() -> TransitionTable {
        TransitionTable::from_specs(&[
            spec(None, "blank", None, false),
            spec(Some("*"), "progress", Some(SHOW_PROGRESS), true),
            spec(Some("*"), "clock", Some(SHOW_DATETIME), true),
        ])
        .unwrap()
    }

    fn epaper_table() -> TransitionTable {
        TransitionTable::from_specs(&[spec(None, "main", None, false)]).unwrap()
    }

    #[tokio::test]
    async fn lcd_follows_the_epaper_lifecycle() {
        let lcd_finalizer = Arc::new(RecordingFinalizer::default());
        let lcd = TransitionEngine::new("lcd", lcd_table(), lcd_finalizer.clone());
        lcd.init().await.unwrap();

        let epaper = TransitionEngine::new("epaper", epaper_table(), Arc::new(EmittingFinalizer));
        let progress = Arc::new(ProgressApp::new(Arc::new(RecordingPanel::default())));
        let _wiring = follow_epaper(&epaper, lcd.clone(), progress.clone());

        epaper.init().await.unwrap();

        // Event delivery is asynchronous; poll briefly.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        loop {
            let names = lcd_finalizer.names.lock().clone();
            let wired: Vec<_> = names.iter().flatten().cloned().collect();
            if wired == [SHOW_PROGRESS.to_string(), SHOW_DATETIME.to_string()] {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "lcd never followed, saw {names:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!((progress.progress() - 0.5).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn rejected_lcd_transitions_are_tolerated() {
        // The LCD table lacks the conventional transition names.
        let lcd_finalizer = Arc::new(RecordingFinalizer::default());
        let table = TransitionTable::from_specs(&[spec(None, "blank", None, false)]).unwrap();
        let lcd = TransitionEngine::new("lcd", table, lcd_finalizer.clone());
        lcd.init().await.unwrap();

        let epaper = TransitionEngine::new("epaper", epaper_table(), Arc::new(EmittingFinalizer));
        let progress = Arc::new(ProgressApp::new(Arc::new(RecordingPanel::default())));
        let _wiring = follow_epaper(&epaper, lcd, progress);

        epaper.init().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Only the LCD's own init reached its finalizer.
        assert_eq!(lcd_finalizer.names.lock().len(), 1);
    }
}
