//! Infopanel Core - Headless Display Orchestration
//!
//! This crate is the controller core of a multi-display info panel: a slow
//! e-paper screen showing pre-rendered pages and a small character LCD for
//! ephemeral feedback. It is completely independent of drivers, renderers
//! and input hardware and can run against simulations for bring-up.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Input Surfaces                          │
//! │   ┌──────────┐  ┌──────────────┐  ┌─────────────────────┐    │
//! │   │ Buttons  │  │ stdin (dev)  │  │  other dispatchers  │    │
//! │   └────┬─────┘  └──────┬───────┘  └──────────┬──────────┘    │
//! │        └───────────────┴──────────────────────┘              │
//! │                        │ activate(name)                      │
//! └────────────────────────┼─────────────────────────────────────┘
//!                          │
//! ┌────────────────────────┼─────────────────────────────────────┐
//! │                 INFOPANEL CORE                               │
//! │  ┌──────────────────┐      events       ┌─────────────────┐  │
//! │  │ TransitionEngine ├──────────────────►│ TransitionEngine│  │
//! │  │    (e-paper)     │     (wiring)      │     (LCD)       │  │
//! │  └────────┬─────────┘                   └────────┬────────┘  │
//! │           │                                      │           │
//! │  ┌────────┴─────────┐                   ┌────────┴────────┐  │
//! │  │ DisplayFinalizer │                   │ PanelAppSwitcher│  │
//! │  │ lock·artifacts·  │                   │  clock/progress │  │
//! │  │ retry·progress   │                   │      apps       │  │
//! │  └────────┬─────────┘                   └────────┬────────┘  │
//! │      DisplayPanel                            TextPanel       │
//! └───────────┼──────────────────────────────────────┼───────────┘
//!             │  hardware traits, injected           │
//! ```
//!
//! # Key Types
//!
//! - [`TransitionEngine`]: declarative state machine driving one display
//! - [`Finalizer`]: strategy performing a transition's side effect
//! - [`DisplayFinalizer`]: the e-paper implementation (lock, artifacts,
//!   retries, progress estimation)
//! - [`PanelAppSwitcher`]: the LCD implementation, swapping panel apps
//! - [`TtlCache`] / [`ExclusiveResource`]: lifecycle management for
//!   expensive hardware handles
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use infopanel_core::{
//!     config, DisplayFinalizer, DisplayOptions, TransitionEngine,
//!     engine::table::{TransitionArgs, TransitionTable},
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cfg = config::load_config(&config::default_config_path().unwrap())?;
//!     let table = TransitionTable::from_specs(&cfg.epaper.transitions)?;
//!     let panel = Arc::new(MyPanelDriver::open()?);
//!     let finalizer = DisplayFinalizer::new(
//!         panel,
//!         DisplayOptions::new(cfg.general.data_dir.clone()),
//!     );
//!     let engine = TransitionEngine::new("epaper", table, Arc::new(finalizer));
//!
//!     engine.init().await?;
//!     engine.activate(Some("show-calendar"), TransitionArgs::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`engine`]: transition engine, tables and the [`Finalizer`] seam
//! - [`events`]: lifecycle event bus between engines and consumers
//! - [`cache`]: lazy self-expiring cache for hardware handles
//! - [`resource`]: exclusive checkout on top of the cache
//! - [`display`]: e-paper finalizer (lock, artifacts, history, retries)
//! - [`lcd`]: character-LCD panel apps and their switcher
//! - [`config`]: TOML configuration and env overrides
//! - [`wiring`]: LCD-follows-e-paper event plumbing
//! - [`error`]: per-subsystem error taxonomies
//!
//! # No Driver Dependencies
//!
//! This crate has **zero** dependencies on GPIO, SPI or vendor display
//! drivers. Hardware enters only through the [`display::DisplayPanel`] and
//! [`lcd::TextPanel`] traits.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod events;
pub mod lcd;
pub mod resource;
pub mod wiring;

// Re-exports for convenience
pub use cache::TtlCache;
pub use config::{load_config, default_config_path, ControllerConfig, MachineConfig, TransitionSpec};
pub use display::{DisplayFinalizer, DisplayOptions, DisplayPanel};
pub use engine::table::{StateId, Transition, TransitionArgs, TransitionKind, TransitionTable};
pub use engine::{FinalizeContext, Finalizer, TransitionEngine};
pub use error::{ArtifactError, CacheError, ConfigError, EngineError, ResourceError};
pub use events::{EngineEvent, EventBus};
pub use lcd::{clock::ClockApp, progress::ProgressApp, PanelApp, PanelAppSwitcher, TextPanel};
pub use resource::ExclusiveResource;
