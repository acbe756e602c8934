//! Controller configuration
//!
//! One TOML file describes the whole controller: the shared data directory
//! and, per display, its transition table and write tunables. The daemon
//! ships a commented sample.
//!
//! ```toml
//! [general]
//! data_dir = "/var/lib/infopanel"
//!
//! [epaper]
//! transitions = [
//!     { to = "main" },
//!     { from = "main", to = "calendar", name = "show-calendar" },
//!     { from = "calendar", to = "main", name = "back", type = "timer", args = { timeout = 300.0 } },
//! ]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::engine::table::TransitionKind;
use crate::error::ConfigError;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "INFOPANEL_CONFIG";

/// Environment variable overriding `general.data_dir`
pub const DATA_DIR_ENV: &str = "INFOPANEL_DATA_DIR";

/// One transition as written in the config file
///
/// This is the external table format; [`crate::engine::table::TransitionTable::from_specs`]
/// turns a list of these into the validated runtime table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionSpec {
    /// Source state; absent marks the initial transition, `"*"` matches any
    /// state
    #[serde(default)]
    pub from: Option<String>,
    /// Target state
    pub to: String,
    /// Activation name; absent only on the initial transition
    #[serde(default)]
    pub name: Option<String>,
    /// `"external"` (default) or `"timer"`
    #[serde(rename = "type", default)]
    pub kind: TransitionKind,
    /// Allow activating even when source and target are the current state
    #[serde(default)]
    pub re_entrant: bool,
    /// Free-form arguments; `timeout` (seconds) arms timer transitions
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

/// Settings shared by all displays
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Directory holding pre-rendered artifacts and the write lock
    pub data_dir: PathBuf,
}

/// Write retry tunables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after a failed write
    pub num: u32,
    /// Seconds between attempts
    pub delay_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            num: 2,
            delay_secs: 2.0,
        }
    }
}

impl RetryConfig {
    /// Pause between attempts
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_secs)
    }
}

fn default_cooldown_secs() -> f64 {
    3.0
}

/// Configuration of one display's state machine
#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    /// The transition table
    pub transitions: Vec<TransitionSpec>,
    /// Write retry tunables
    #[serde(default)]
    pub retries: RetryConfig,
    /// Seconds the display rests after a successful write
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f64,
}

impl MachineConfig {
    /// Post-write rest period
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_secs)
    }
}

/// Top-level controller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Settings shared by all displays
    pub general: GeneralConfig,
    /// The e-paper display's machine
    pub epaper: MachineConfig,
    /// The optional character LCD's machine
    #[serde(default)]
    pub textlcd: Option<MachineConfig>,
}

impl ControllerConfig {
    /// Fold environment overrides into a loaded configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            self.general.data_dir = PathBuf::from(dir);
        }
    }
}

/// Load and parse the config file at `path`.
///
/// # Errors
///
/// [`ConfigError::Io`] when the file cannot be read, [`ConfigError::Parse`]
/// when it is not valid TOML for [`ControllerConfig`].
pub fn load_config(path: &Path) -> Result<ControllerConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Default config file location: `$INFOPANEL_CONFIG`, else
/// `<config dir>/infopanel/config.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("infopanel").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SAMPLE: &str = r#"
        [general]
        data_dir = "/var/lib/infopanel"

        [epaper]
        cooldown_secs = 5.0
        retries = { num = 3, delay_secs = 1.0 }
        transitions = [
            { to = "main" },
            { from = "main", to = "calendar", name = "show-calendar" },
            { from = "calendar", to = "main", name = "back", type = "timer", args = { timeout = 300.0 } },
            { from = "*", to = "main", name = "home" },
        ]

        [textlcd]
        transitions = [
            { to = "blank" },
            { from = "*", to = "clock", name = "show-datetime", re_entrant = true },
            { from = "*", to = "progress", name = "show-progress", re_entrant = true },
        ]
    "#;

    #[test]
    fn parses_the_sample() {
        let config: ControllerConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.general.data_dir, PathBuf::from("/var/lib/infopanel"));
        assert_eq!(config.epaper.transitions.len(), 4);
        assert_eq!(config.epaper.retries.num, 3);
        assert_eq!(config.epaper.cooldown(), Duration::from_secs(5));

        let timer = &config.epaper.transitions[2];
        assert_eq!(timer.kind, TransitionKind::Timer);
        assert_eq!(timer.args.get("timeout"), Some(&serde_json::json!(300.0)));

        let lcd = config.textlcd.unwrap();
        assert!(lcd.transitions[1].re_entrant);
        // Untouched sections keep their defaults.
        assert_eq!(lcd.retries.num, 2);
        assert_eq!(lcd.cooldown(), Duration::from_secs(3));
    }

    #[test]
    fn loads_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.epaper.transitions.len(), 4);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_config(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[general]\ndata_dir = 42").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn unknown_transition_fields_are_rejected() {
        let result: Result<TransitionSpec, _> =
            toml::from_str(r#"to = "main"
typo = true"#);
        assert!(result.is_err());
    }
}
