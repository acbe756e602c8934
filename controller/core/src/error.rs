//! Error taxonomies for the controller core
//!
//! Each subsystem owns a small `thiserror` enum. Configuration and protocol
//! violations surface immediately and are never retried; transient hardware
//! failures are retried inside the display finalizer and only exhaustion
//! reaches the caller.

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::table::StateId;

/// Errors produced by [`crate::engine::TransitionEngine`]
#[derive(Debug, Error)]
pub enum EngineError {
    /// `init()` (or `activate(None)`) was called on an engine that already
    /// holds a state.
    #[error("engine is already initialized")]
    AlreadyInitialized,

    /// No transition with the given name leads out of the current state.
    #[error("no transition {name:?} out of state {state:?}")]
    NoSuchTransition {
        /// State the engine was in at resolution time (`None` = uninitialized)
        state: Option<StateId>,
        /// Requested transition name (`None` = initial transition)
        name: Option<String>,
    },

    /// More than one transition matched the `(state, name)` pair.
    #[error("{count} transitions named {name:?} lead out of state {state:?}")]
    AmbiguousTransition {
        /// State the engine was in at resolution time
        state: Option<StateId>,
        /// Requested transition name
        name: Option<String>,
        /// Number of matching transitions
        count: usize,
    },

    /// The transition table is malformed (e.g. two timer transitions out of
    /// one state, or a timer transition without a timeout). Detected when
    /// the engine would have to act on the broken entry.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The finalizer failed after exhausting its local retries. Engine state
    /// was not advanced.
    #[error("finalizer failed")]
    FinalizerFailed(#[source] anyhow::Error),
}

/// Errors produced by [`crate::cache::TtlCache`]
#[derive(Debug, Error)]
pub enum CacheError {
    /// The value factory failed. The cache entry is left empty, so the next
    /// `get()` retries implicitly.
    #[error("value factory for cache {name:?} failed")]
    CreationFailed {
        /// Name of the cache whose factory failed
        name: String,
        /// Underlying factory error
        #[source]
        source: anyhow::Error,
    },
}

/// Checkout/return protocol violations on
/// [`crate::resource::ExclusiveResource`]
#[derive(Debug, Error)]
pub enum ResourceError {
    /// `recover()` was called without a prior `obtain()`.
    #[error("recover() called without a prior obtain()")]
    NotCheckedOut,

    /// `recover()` was handed a value other than the one checked out.
    #[error("recovered value is not the checked-out value")]
    ValueMismatch,

    /// The underlying cache failed to produce a value.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Failures reading the pre-rendered display artifacts
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The artifact file is absent or unreadable.
    #[error("cannot read display artifact {path:?}")]
    Missing {
        /// Path that was attempted
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The artifact file exists but is not a plausible raster image.
    #[error("display artifact {path:?} is corrupt")]
    Corrupt {
        /// Path of the corrupt artifact
        path: PathBuf,
    },
}

/// Errors loading the controller configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config file {path:?}")]
    Io {
        /// Path that was attempted
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML (or fails validation).
    #[error("cannot parse config file {path:?}")]
    Parse {
        /// Path of the invalid file
        path: PathBuf,
        /// Underlying TOML error
        #[source]
        source: toml::de::Error,
    },
}
