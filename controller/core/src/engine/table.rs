//! Declarative transition tables
//!
//! A [`TransitionTable`] is the pre-built, indexed form of the transition
//! list the controller is configured with. Resolution by `(state, name)` is
//! a map lookup, but the error semantics are exactly those of a linear scan:
//! zero matches and multiple matches are both reported, never silently
//! resolved.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::TransitionSpec;
use crate::error::EngineError;

/// Identifier of a display state (a "view": calendar, weather, ...)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateId(pub String);

impl StateId {
    /// Create a state ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How a transition is triggered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    /// Triggered by a caller (button handler, HTTP route, wiring)
    #[default]
    External,
    /// Armed automatically on entering the source state; fires after a
    /// timeout unless another activation cancels it first
    Timer,
}

/// Source of a transition
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TransitionFrom {
    /// The single initial transition out of the uninitialized engine
    Initial,
    /// Matches any current state
    Wildcard,
    /// Matches exactly one state
    State(StateId),
}

/// Free-form key/value arguments attached to a transition
///
/// Known keys: `timeout` (seconds, configures a timer transition's delay)
/// and `duration` (seconds, supplied at `activate()` time to override the
/// next armed timer).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionArgs(pub serde_json::Map<String, serde_json::Value>);

impl TransitionArgs {
    /// Empty argument set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no arguments are present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up a key as a duration in (fractional) seconds
    #[must_use]
    pub fn seconds(&self, key: &str) -> Option<Duration> {
        self.0
            .get(key)
            .and_then(serde_json::Value::as_f64)
            .filter(|s| *s >= 0.0)
            .map(Duration::from_secs_f64)
    }

    /// The configured timer delay (`timeout` key)
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.seconds("timeout")
    }

    /// The caller-supplied override for the next armed timer (`duration` key)
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.seconds("duration")
    }

    /// Builder-style insertion, mainly for call-site overrides
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// This argument set with `overrides` layered on top
    #[must_use]
    pub fn merged(&self, overrides: &TransitionArgs) -> TransitionArgs {
        let mut merged = self.0.clone();
        for (k, v) in &overrides.0 {
            merged.insert(k.clone(), v.clone());
        }
        TransitionArgs(merged)
    }
}

/// One allowed state change
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    /// Source state (or wildcard, or the initial pseudo-source)
    pub from: TransitionFrom,
    /// Target state
    pub to: StateId,
    /// Name the transition is activated by (`None` only for the initial one)
    pub name: Option<String>,
    /// External or timer
    pub kind: TransitionKind,
    /// Whether a self-loop (`to == current`) may be re-activated
    pub re_entrant: bool,
    /// Configured arguments, merged with call-site overrides on activation
    pub args: TransitionArgs,
}

/// Indexed, validated set of transitions
#[derive(Debug)]
pub struct TransitionTable {
    transitions: Vec<Transition>,
    /// `(from, name)` -> indices into `transitions`
    index: HashMap<(TransitionFrom, Option<String>), Vec<usize>>,
}

impl TransitionTable {
    /// Build a table from configured transition specs.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] when the list has no initial
    /// transition, more than one initial transition, or a timer transition
    /// without a name (timers re-enter through `activate` by name when they
    /// fire, so a nameless timer could never be resolved).
    pub fn from_specs(specs: &[TransitionSpec]) -> Result<Self, EngineError> {
        let mut transitions = Vec::with_capacity(specs.len());

        for spec in specs {
            let from = match spec.from.as_deref() {
                None => TransitionFrom::Initial,
                Some("*") => TransitionFrom::Wildcard,
                Some(s) => TransitionFrom::State(StateId::new(s)),
            };

            if spec.kind == TransitionKind::Timer && spec.name.is_none() {
                return Err(EngineError::Configuration(format!(
                    "timer transition into state \"{}\" has no name",
                    spec.to
                )));
            }
            if from == TransitionFrom::Initial && spec.name.is_some() {
                return Err(EngineError::Configuration(format!(
                    "initial transition into state \"{}\" must not be named",
                    spec.to
                )));
            }

            transitions.push(Transition {
                from,
                to: StateId::new(spec.to.as_str()),
                name: spec.name.clone(),
                kind: spec.kind,
                re_entrant: spec.re_entrant,
                args: TransitionArgs(spec.args.clone()),
            });
        }

        let initial_count = transitions
            .iter()
            .filter(|t| t.from == TransitionFrom::Initial)
            .count();
        if initial_count != 1 {
            return Err(EngineError::Configuration(format!(
                "expected exactly one initial transition, found {initial_count}"
            )));
        }

        let mut index: HashMap<(TransitionFrom, Option<String>), Vec<usize>> = HashMap::new();
        for (i, t) in transitions.iter().enumerate() {
            index
                .entry((t.from.clone(), t.name.clone()))
                .or_default()
                .push(i);
        }

        Ok(Self { transitions, index })
    }

    /// All transitions, in configuration order
    #[must_use]
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Every state reachable as a transition target, deduplicated, in
    /// configuration order
    #[must_use]
    pub fn states(&self) -> Vec<StateId> {
        let mut states: Vec<StateId> = Vec::new();
        for transition in &self.transitions {
            if !states.contains(&transition.to) {
                states.push(transition.to.clone());
            }
        }
        states
    }

    /// Transitions applicable from `current`: sources matching the state or
    /// the wildcard, excluding non-re-entrant self-loops.
    ///
    /// `current == None` yields only the initial transition.
    #[must_use]
    pub fn available_from(&self, current: Option<&StateId>) -> Vec<&Transition> {
        self.transitions
            .iter()
            .filter(|t| Self::applies(t, current))
            .collect()
    }

    /// Resolve the single transition activated by `name` from `current`.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoSuchTransition`] when nothing matches,
    /// [`EngineError::AmbiguousTransition`] when more than one does.
    pub fn resolve(
        &self,
        current: Option<&StateId>,
        name: Option<&str>,
    ) -> Result<&Transition, EngineError> {
        let mut candidates: Vec<&Transition> = Vec::new();

        let mut collect = |key: (TransitionFrom, Option<String>)| {
            if let Some(indices) = self.index.get(&key) {
                for &i in indices {
                    let t = &self.transitions[i];
                    if Self::applies(t, current) {
                        candidates.push(t);
                    }
                }
            }
        };

        let owned_name = name.map(str::to_string);
        match current {
            None => collect((TransitionFrom::Initial, owned_name.clone())),
            Some(state) => {
                collect((TransitionFrom::State(state.clone()), owned_name.clone()));
                collect((TransitionFrom::Wildcard, owned_name.clone()));
            }
        }

        match candidates.len() {
            0 => Err(EngineError::NoSuchTransition {
                state: current.cloned(),
                name: owned_name,
            }),
            1 => Ok(candidates[0]),
            count => Err(EngineError::AmbiguousTransition {
                state: current.cloned(),
                name: owned_name,
                count,
            }),
        }
    }

    /// Timer-kind transitions whose source matches `state` (wildcard
    /// included). The engine arms at most one; two or more is a
    /// configuration error reported at arming time.
    #[must_use]
    pub fn timers_from(&self, state: &StateId) -> Vec<&Transition> {
        self.transitions
            .iter()
            .filter(|t| t.kind == TransitionKind::Timer && Self::applies(t, Some(state)))
            .collect()
    }

    fn applies(t: &Transition, current: Option<&StateId>) -> bool {
        let source_matches = match current {
            None => t.from == TransitionFrom::Initial,
            Some(state) => match &t.from {
                TransitionFrom::Initial => false,
                TransitionFrom::Wildcard => true,
                TransitionFrom::State(s) => s == state,
            },
        };
        if !source_matches {
            return false;
        }
        // A self-loop is hidden unless explicitly marked re-entrant.
        match current {
            Some(state) if &t.to == state => t.re_entrant,
            _ => true,
        }
    }
}
