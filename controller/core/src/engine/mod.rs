//! Declarative transition engine
//!
//! A [`TransitionEngine`] drives one hardware display through the states of
//! its [`TransitionTable`]. It owns mutual exclusion (one activation at a
//! time, callers block), timer arming/cancellation, and lifecycle events;
//! the actual work of a transition is delegated to an injected
//! [`Finalizer`] strategy.
//!
//! Activations are long (the e-paper finalizer runs for tens of seconds),
//! so blocking on the activation lock is the deliberate backpressure point
//! for callers.

pub mod table;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use table::{StateId, Transition, TransitionArgs, TransitionKind, TransitionTable};

/// Everything a finalizer needs to know about the transition being taken
#[derive(Clone, Debug)]
pub struct FinalizeContext {
    /// State the engine leaves (`None` during initialization)
    pub from: Option<StateId>,
    /// State the engine transitions into
    pub to: StateId,
    /// Activated transition name (`None` for the initial transition)
    pub name: Option<String>,
    /// Whether the transition was externally activated or timer-fired
    pub kind: TransitionKind,
    /// Configured arguments merged with call-site overrides
    pub args: TransitionArgs,
    /// Event bus of the owning engine, for progress reporting
    pub events: EventBus,
}

impl FinalizeContext {
    /// Emit a progress estimate for this activation
    pub fn progress(&self, progress: f32) {
        self.events.emit(EngineEvent::Progress {
            from: self.from.clone(),
            to: self.to.clone(),
            name: self.name.clone(),
            progress,
        });
    }
}

/// The pluggable unit of work executed when a transition is taken
///
/// Implementations produce the actual side effect (writing the e-paper,
/// switching a panel app). A failure propagates to the `activate()` caller
/// and leaves the engine state unchanged.
#[async_trait]
pub trait Finalizer: Send + Sync {
    /// Perform the side effect of the given transition
    async fn finalize(&self, ctx: FinalizeContext) -> anyhow::Result<()>;
}

#[derive(Default)]
struct TimerSlot {
    handle: Option<JoinHandle<()>>,
    /// Bumped on every arm and cancel; a woken timer task re-checks it so a
    /// cancelled deadline can never fire late.
    epoch: u64,
}

struct EngineShared {
    name: String,
    table: TransitionTable,
    finalizer: Arc<dyn Finalizer>,
    /// Serializes the whole init/activate path, finalizer included.
    activation: tokio::sync::Mutex<()>,
    state: parking_lot::RwLock<Option<StateId>>,
    timer: parking_lot::Mutex<TimerSlot>,
    events: EventBus,
}

/// Transition engine for one display
///
/// Cheap to clone; clones share the same engine.
#[derive(Clone)]
pub struct TransitionEngine {
    shared: Arc<EngineShared>,
}

impl TransitionEngine {
    /// Create an engine over `table`, delegating transitions to `finalizer`
    ///
    /// The engine's event bus spawns a dispatcher task on construction, so
    /// this must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(name: impl Into<String>, table: TransitionTable, finalizer: Arc<dyn Finalizer>) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                name: name.into(),
                table,
                finalizer,
                activation: tokio::sync::Mutex::new(()),
                state: parking_lot::RwLock::new(None),
                timer: parking_lot::Mutex::new(TimerSlot::default()),
                events: EventBus::default(),
            }),
        }
    }

    /// The engine's name, used in logs
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current state (`None` = uninitialized). Non-blocking.
    #[must_use]
    pub fn state(&self) -> Option<StateId> {
        self.shared.state.read().clone()
    }

    /// Subscribe to this engine's lifecycle events
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::mpsc::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    /// Transitions currently applicable, for feasibility checks before
    /// activating (e.g. by a button dispatcher)
    #[must_use]
    pub fn available_transitions(&self) -> Vec<Transition> {
        let current = self.shared.state.read().clone();
        self.shared
            .table
            .available_from(current.as_ref())
            .into_iter()
            .cloned()
            .collect()
    }

    /// Transition the engine from uninitialized into its configured initial
    /// state.
    ///
    /// # Errors
    ///
    /// [`EngineError::AlreadyInitialized`] when called twice, plus anything
    /// [`Self::activate`] can return.
    pub async fn init(&self) -> Result<(), EngineError> {
        self.activate(None, TransitionArgs::new()).await
    }

    /// Activate the transition named `name` out of the current state.
    ///
    /// Serialized: concurrent callers block until the in-flight activation
    /// (finalizer included) completes. `overrides` are layered over the
    /// transition's configured args; an override `duration` (seconds)
    /// replaces the configured timeout of the next armed timer.
    ///
    /// # Errors
    ///
    /// Resolution errors ([`EngineError::NoSuchTransition`],
    /// [`EngineError::AmbiguousTransition`], [`EngineError::AlreadyInitialized`])
    /// surface immediately. A finalizer failure surfaces as
    /// [`EngineError::FinalizerFailed`] with the state unchanged. A broken
    /// timer configuration surfaces as [`EngineError::Configuration`] when
    /// the engine would arm it, at which point the state has advanced.
    pub async fn activate(
        &self,
        name: Option<&str>,
        overrides: TransitionArgs,
    ) -> Result<(), EngineError> {
        self.activate_inner(name, overrides, None).await
    }

    /// Activation proper. `timer_epoch` is set only for timer-fired calls;
    /// a stale epoch means another activation superseded the timer while it
    /// waited for the lock, and the call becomes a no-op.
    async fn activate_inner(
        &self,
        name: Option<&str>,
        overrides: TransitionArgs,
        timer_epoch: Option<u64>,
    ) -> Result<(), EngineError> {
        let _guard = self.shared.activation.lock().await;

        if let Some(epoch) = timer_epoch {
            let mut slot = self.shared.timer.lock();
            if slot.epoch != epoch {
                debug!(engine = %self.shared.name, "timer superseded, skipping");
                return Ok(());
            }
            // This call runs inside the armed timer task; detach the
            // handle so cancelling below does not abort ourselves.
            slot.handle = None;
        }

        let current = self.shared.state.read().clone();
        if name.is_none() && current.is_some() {
            return Err(EngineError::AlreadyInitialized);
        }

        let transition = self.shared.table.resolve(current.as_ref(), name)?.clone();
        let merged = transition.args.merged(&overrides);

        // A pending auto-transition must never fire mid-update.
        self.cancel_timer();

        debug!(
            engine = %self.shared.name,
            from = ?current,
            to = %transition.to,
            transition = ?transition.name,
            "activating transition"
        );

        self.shared.events.emit(EngineEvent::BeforeInit {
            from: current.clone(),
            to: transition.to.clone(),
            name: transition.name.clone(),
            args: merged.clone(),
        });

        let ctx = FinalizeContext {
            from: current.clone(),
            to: transition.to.clone(),
            name: transition.name.clone(),
            kind: transition.kind,
            args: merged.clone(),
            events: self.shared.events.clone(),
        };
        self.shared
            .finalizer
            .finalize(ctx)
            .await
            .map_err(EngineError::FinalizerFailed)?;

        *self.shared.state.write() = Some(transition.to.clone());

        self.arm_timer(&transition.to, &merged)?;

        self.shared.events.emit(EngineEvent::AfterFinalize {
            from: current,
            to: transition.to,
            name: transition.name,
        });

        Ok(())
    }

    fn cancel_timer(&self) {
        let mut slot = self.shared.timer.lock();
        slot.epoch += 1;
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
    }

    /// Arm the at-most-one timer transition out of `state`
    fn arm_timer(&self, state: &StateId, merged: &TransitionArgs) -> Result<(), EngineError> {
        let timers = self.shared.table.timers_from(state);
        if timers.len() > 1 {
            return Err(EngineError::Configuration(format!(
                "state \"{state}\" defines {} timer transitions, at most one is allowed",
                timers.len()
            )));
        }
        let Some(timer) = timers.first() else {
            return Ok(());
        };

        // Caller-supplied `duration` overrides the configured timeout.
        let delay = merged.duration().or_else(|| timer.args.timeout()).ok_or_else(|| {
            EngineError::Configuration(format!(
                "timer transition {:?} out of state \"{state}\" has no timeout",
                timer.name
            ))
        })?;
        let Some(timer_name) = timer.name.clone() else {
            // Rejected at table build; kept as a guard.
            return Err(EngineError::Configuration(format!(
                "timer transition out of state \"{state}\" has no name"
            )));
        };

        debug!(
            engine = %self.shared.name,
            state = %state,
            transition = %timer_name,
            delay_secs = delay.as_secs_f64(),
            "arming timer transition"
        );

        let weak = Arc::downgrade(&self.shared);
        let mut slot = self.shared.timer.lock();
        slot.epoch += 1;
        let epoch = slot.epoch;
        slot.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = weak.upgrade() else { return };
            let engine = TransitionEngine { shared };
            debug!(engine = %engine.shared.name, transition = %timer_name, "timer fired");
            let result = engine
                .activate_inner(Some(&timer_name), TransitionArgs::new(), Some(epoch))
                .await;
            if let Err(e) = result {
                warn!(engine = %engine.shared.name, err = %e, "timer transition failed");
            }
        }));

        Ok(())
    }
}

impl std::fmt::Debug for TransitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionEngine")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::config::TransitionSpec;

    /// Finalizer double that records calls and can fail on demand
    #[derive(Default)]
    struct RecordingFinalizer {
        calls: parking_lot::Mutex<Vec<(Option<String>, String, Option<String>)>>,
        fail_remaining: AtomicUsize,
    }

    impl RecordingFinalizer {
        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl Finalizer for RecordingFinalizer {
        async fn finalize(&self, ctx: FinalizeContext) -> anyhow::Result<()> {
            self.calls.lock().push((
                ctx.from.map(|s| s.0),
                ctx.to.0.clone(),
                ctx.name.clone(),
            ));
            if self.fail_remaining.load(Ordering::SeqCst) > 0 {
                self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("injected fault");
            }
            Ok(())
        }
    }

    fn spec(
        from: Option<&str>,
        to: &str,
        name: Option<&str>,
        kind: TransitionKind,
        timeout: Option<f64>,
    ) -> TransitionSpec {
        let mut args = serde_json::Map::new();
        if let Some(t) = timeout {
            args.insert("timeout".to_string(), serde_json::json!(t));
        }
        TransitionSpec {
            from: from.map(str::to_string),
            to: to.to_string(),
            name: name.map(str::to_string),
            kind,
            re_entrant: false,
            args,
        }
    }

    fn engine_with(
        specs: &[TransitionSpec],
    ) -> (TransitionEngine, Arc<RecordingFinalizer>) {
        let table = TransitionTable::from_specs(specs).unwrap();
        let finalizer = Arc::new(RecordingFinalizer::default());
        let engine = TransitionEngine::new("test", table, finalizer.clone());
        (engine, finalizer)
    }

    fn basic_specs(timeout: f64) -> Vec<TransitionSpec> {
        vec![
            spec(None, "A", None, TransitionKind::External, None),
            spec(Some("A"), "B", Some("go"), TransitionKind::External, None),
            spec(Some("B"), "A", Some("timer"), TransitionKind::Timer, Some(timeout)),
            spec(Some("*"), "A", Some("home"), TransitionKind::External, None),
        ]
    }

    #[tokio::test]
    async fn init_reaches_initial_state_once() {
        let (engine, finalizer) = engine_with(&basic_specs(5.0));

        engine.init().await.unwrap();
        assert_eq!(engine.state(), Some(StateId::from("A")));
        assert_eq!(finalizer.call_count(), 1);

        let err = engine.init().await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyInitialized));
        assert_eq!(finalizer.call_count(), 1);
    }

    #[tokio::test]
    async fn activate_advances_state() {
        let (engine, _) = engine_with(&basic_specs(5.0));
        engine.init().await.unwrap();
        engine.activate(Some("go"), TransitionArgs::new()).await.unwrap();
        assert_eq!(engine.state(), Some(StateId::from("B")));
    }

    #[tokio::test]
    async fn unknown_transition_is_an_error() {
        let (engine, finalizer) = engine_with(&basic_specs(5.0));
        engine.init().await.unwrap();
        let err = engine
            .activate(Some("bogus"), TransitionArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoSuchTransition { .. }));
        assert_eq!(finalizer.call_count(), 1);
    }

    #[tokio::test]
    async fn finalizer_failure_leaves_state_unchanged() {
        let (engine, finalizer) = engine_with(&basic_specs(5.0));
        engine.init().await.unwrap();

        finalizer.fail_remaining.store(1, Ordering::SeqCst);
        let err = engine
            .activate(Some("go"), TransitionArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::FinalizerFailed(_)));
        assert_eq!(engine.state(), Some(StateId::from("A")));

        // The engine is not corrupted: the same activation now succeeds.
        engine.activate(Some("go"), TransitionArgs::new()).await.unwrap();
        assert_eq!(engine.state(), Some(StateId::from("B")));
    }

    #[tokio::test]
    async fn timer_auto_advances() {
        let (engine, _) = engine_with(&basic_specs(0.05));
        engine.init().await.unwrap();
        engine.activate(Some("go"), TransitionArgs::new()).await.unwrap();
        assert_eq!(engine.state(), Some(StateId::from("B")));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(engine.state(), Some(StateId::from("A")));
    }

    #[tokio::test]
    async fn new_activation_cancels_pending_timer() {
        let (engine, finalizer) = engine_with(&basic_specs(0.1));
        engine.init().await.unwrap();
        engine.activate(Some("go"), TransitionArgs::new()).await.unwrap();
        engine.activate(Some("home"), TransitionArgs::new()).await.unwrap();
        assert_eq!(engine.state(), Some(StateId::from("A")));
        let calls_before = finalizer.call_count();

        tokio::time::sleep(Duration::from_millis(300)).await;
        // The timer armed in B must not have fired after we left B.
        assert_eq!(finalizer.call_count(), calls_before);
        assert_eq!(engine.state(), Some(StateId::from("A")));
    }

    #[tokio::test]
    async fn duration_override_replaces_configured_timeout() {
        let (engine, _) = engine_with(&basic_specs(600.0));
        engine.init().await.unwrap();
        engine
            .activate(Some("go"), TransitionArgs::new().with("duration", 0.05))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(engine.state(), Some(StateId::from("A")));
    }

    #[tokio::test]
    async fn two_timers_from_one_state_is_a_configuration_error() {
        let mut specs = basic_specs(5.0);
        specs.push(spec(
            Some("B"),
            "A",
            Some("timer2"),
            TransitionKind::Timer,
            Some(7.0),
        ));
        let (engine, _) = engine_with(&specs);
        engine.init().await.unwrap();

        let err = engine
            .activate(Some("go"), TransitionArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        // The finalizer already ran; the state advanced before arming failed.
        assert_eq!(engine.state(), Some(StateId::from("B")));
    }

    #[tokio::test]
    async fn lifecycle_events_in_program_order() {
        let (engine, _) = engine_with(&basic_specs(5.0));
        let mut rx = engine.subscribe();

        engine.init().await.unwrap();
        engine.activate(Some("go"), TransitionArgs::new()).await.unwrap();

        let mut kinds = Vec::new();
        for _ in 0..4 {
            match rx.recv().await.unwrap() {
                EngineEvent::BeforeInit { to, .. } => kinds.push(format!("before:{to}")),
                EngineEvent::AfterFinalize { to, .. } => kinds.push(format!("after:{to}")),
                EngineEvent::Progress { .. } => {}
            }
        }
        assert_eq!(kinds, vec!["before:A", "after:A", "before:B", "after:B"]);
    }

    #[tokio::test]
    async fn available_transitions_track_state() {
        let (engine, _) = engine_with(&basic_specs(5.0));
        assert_eq!(engine.available_transitions().len(), 1);

        engine.init().await.unwrap();
        let names: Vec<_> = engine
            .available_transitions()
            .into_iter()
            .filter_map(|t| t.name)
            .collect();
        // "home" targets A and is a hidden self-loop here.
        assert_eq!(names, vec!["go".to_string()]);
    }
}
