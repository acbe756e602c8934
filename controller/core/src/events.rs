//! Engine lifecycle events
//!
//! Events flow from an engine (or its finalizer) to external subscribers:
//! LEDs, the text-panel wiring, logging. Delivery is always asynchronous;
//! emission never blocks the activation path. A single dispatcher task
//! drains a bounded queue and forwards to every subscriber channel, which
//! keeps the events of one activation in program order.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::engine::table::{StateId, TransitionArgs};

/// Default capacity of the dispatch queue and each subscriber channel
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Lifecycle event of a transition activation
#[derive(Clone, Debug)]
pub enum EngineEvent {
    /// Queued after the pending timer was cancelled, before the finalizer
    /// starts.
    BeforeInit {
        /// State the engine leaves (`None` during initialization)
        from: Option<StateId>,
        /// State the engine transitions into
        to: StateId,
        /// Activated transition name (`None` for the initial transition)
        name: Option<String>,
        /// Merged transition arguments
        args: TransitionArgs,
    },

    /// Queued after the finalizer returned successfully and the new state
    /// (plus any timer) is in place.
    AfterFinalize {
        /// State the engine left
        from: Option<StateId>,
        /// State the engine is now in
        to: StateId,
        /// Activated transition name
        name: Option<String>,
    },

    /// Estimated completion of the in-flight finalizer, in `[0, 1]`.
    /// Monotonically non-decreasing within one activation; the last
    /// progress event of an activation is always `1.0`.
    Progress {
        /// State the engine leaves
        from: Option<StateId>,
        /// State the engine transitions into
        to: StateId,
        /// Activated transition name
        name: Option<String>,
        /// Estimated fraction complete
        progress: f32,
    },
}

/// Fan-out bus for [`EngineEvent`]s
///
/// Cloning is cheap; all clones share the same dispatcher and subscriber
/// list. The bus tolerates zero subscribers and prunes closed ones.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<EngineEvent>,
    subscribers: Arc<parking_lot::Mutex<Vec<mpsc::Sender<EngineEvent>>>>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus and spawn its dispatcher task
    ///
    /// Spawns onto the current Tokio runtime, so this must be called from
    /// within one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<EngineEvent>(capacity);
        let subscribers: Arc<parking_lot::Mutex<Vec<mpsc::Sender<EngineEvent>>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));

        let subs = Arc::clone(&subscribers);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let targets: Vec<mpsc::Sender<EngineEvent>> = subs.lock().clone();
                for target in targets {
                    // A slow subscriber stalls dispatch, not the emitter;
                    // the bounded queue absorbs the burst.
                    if target.send(event.clone()).await.is_err() {
                        let mut subs = subs.lock();
                        subs.retain(|s| !s.same_channel(&target));
                    }
                }
            }
        });

        Self {
            tx,
            subscribers,
            capacity,
        }
    }

    /// Register a new subscriber and return its receiving end
    #[must_use]
    pub fn subscribe(&self) -> mpsc::Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Queue an event for delivery. Never blocks; a full queue drops the
    /// event with a warning.
    pub fn emit(&self, event: EngineEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::warn!(err = %e, "event queue full, dropping engine event");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_emission_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.emit(EngineEvent::Progress {
                from: None,
                to: StateId::from("A"),
                name: None,
                progress: i as f32 / 4.0,
            });
        }

        for i in 0..5 {
            match rx.recv().await.unwrap() {
                EngineEvent::Progress { progress, .. } => {
                    assert!((progress - i as f32 / 4.0).abs() < f32::EPSILON);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn zero_subscribers_tolerated() {
        let bus = EventBus::new(4);
        bus.emit(EngineEvent::AfterFinalize {
            from: None,
            to: StateId::from("A"),
            name: None,
        });
        // Nothing to assert beyond "emit did not panic or block".
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let bus = EventBus::new(4);
        let rx = bus.subscribe();
        drop(rx);
        let mut live = bus.subscribe();

        bus.emit(EngineEvent::AfterFinalize {
            from: None,
            to: StateId::from("B"),
            name: Some("go".to_string()),
        });

        let event = live.recv().await.unwrap();
        assert!(matches!(event, EngineEvent::AfterFinalize { .. }));
        assert_eq!(bus.subscribers.lock().len(), 1);
    }
}
