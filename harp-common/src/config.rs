//! Installation configuration: note layout, timing, and file loading
//!
//! Configuration is loaded once at startup and is read-only afterwards.
//!
//! # Sources Priority
//!
//! 1. `--config` command-line argument
//! 2. `LASER_HARP_CONFIG` environment variable
//! 3. `~/.config/laser-harp/config.toml`
//! 4. `/etc/laser-harp/config.toml`
//! 5. Built-in defaults (the installation's three-beam layout)
//!
//! An explicitly named file (sources 1-2) must exist. A missing file in the
//! default locations only logs a warning and falls back to the defaults; a
//! malformed file is always fatal.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "LASER_HARP_CONFIG";

/// Directory name under the platform config dir and `/etc`
const CONFIG_DIR_NAME: &str = "laser-harp";
const CONFIG_FILE_NAME: &str = "config.toml";

/// GPIO line identifier (BCM numbering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(pub u8);

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

/// Electrical level of a digital line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    High,
    Low,
}

impl Level {
    pub fn as_bool(self) -> bool {
        matches!(self, Level::High)
    }
}

/// One beam: the note it plays and the pins that form it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteConfig {
    /// Note name fed to the sequence matcher (e.g. "do")
    pub symbol: String,
    /// Tone frequency in Hz
    pub frequency: f64,
    /// Laser emitter, driven high while the harp runs
    pub emitter_channel: Channel,
    /// Photo receiver, read with pull-up
    pub receiver_channel: Channel,
}

impl NoteConfig {
    pub fn new(
        symbol: impl Into<String>,
        frequency: f64,
        emitter_channel: u8,
        receiver_channel: u8,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            frequency,
            emitter_channel: Channel(emitter_channel),
            receiver_channel: Channel(receiver_channel),
        }
    }
}

/// Display geometry in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 128,
            height: 64,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Complete harp configuration
///
/// Every field has a built-in default, so a TOML file only needs to name
/// what differs from the installation's stock layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarpConfig {
    /// Beams in physical order, left to right
    pub notes: Vec<NoteConfig>,
    /// Speaker (PWM) pin
    pub output_channel: Channel,
    /// Note symbols that reveal the key when played in order
    pub target_sequence: Vec<String>,
    /// Value shown on the display once the sequence is found
    pub reveal_key: String,
    /// How long each tone sounds, in seconds
    pub note_duration_secs: f64,
    /// PWM duty cycle percent, in (0, 100]
    pub duty_cycle: f64,
    /// Minimum time a new receiver level must hold before it counts
    pub debounce_ms: u64,
    /// Control loop period
    pub poll_interval_ms: u64,
    /// Receiver level that means "beam blocked"
    pub beam_broken_level: Level,
    /// How long shutdown waits for the tone worker
    pub shutdown_grace_ms: u64,
    /// Scan failures in a row before the control loop gives up
    pub max_consecutive_scan_failures: u32,
    /// Loop the demo melody on the speaker while idle
    pub attract_mode: bool,
    pub display: DisplayConfig,
    pub logging: LoggingConfig,
}

impl Default for HarpConfig {
    fn default() -> Self {
        Self {
            notes: vec![
                NoteConfig::new("do", 261.63, 5, 12),
                NoteConfig::new("re", 293.66, 6, 16),
                NoteConfig::new("mi", 329.63, 13, 20),
            ],
            output_channel: Channel(17),
            target_sequence: ["mi", "re", "do", "re", "mi", "mi", "mi"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            reveal_key: "4925,12546".to_string(),
            note_duration_secs: 0.35,
            duty_cycle: 50.0,
            debounce_ms: 60,
            poll_interval_ms: 10,
            beam_broken_level: Level::High,
            shutdown_grace_ms: 1000,
            max_consecutive_scan_failures: 50,
            attract_mode: false,
            display: DisplayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl HarpConfig {
    /// Parse configuration from TOML text (no validation)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read, parse and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Locate and load the configuration, falling back to built-in defaults
    ///
    /// Returns the path actually used, if any.
    pub fn resolve_and_load(
        resolver: &ConfigResolver,
        cli_path: Option<&Path>,
    ) -> Result<(Self, Option<PathBuf>)> {
        match resolver.resolve(cli_path)? {
            Some(path) => {
                let config = Self::load(&path)?;
                Ok((config, Some(path)))
            }
            None => {
                warn!("No configuration file found, using built-in defaults");
                let config = Self::default();
                config.validate()?;
                Ok((config, None))
            }
        }
    }

    /// Check every structural invariant the controller relies on
    pub fn validate(&self) -> Result<()> {
        if self.notes.is_empty() {
            return Err(Error::Config("At least one note is required".to_string()));
        }

        let mut symbols = HashSet::new();
        let mut receivers = HashSet::new();
        let mut emitters = HashSet::new();
        for note in &self.notes {
            if note.symbol.is_empty() {
                return Err(Error::Config("Note symbol must not be empty".to_string()));
            }
            if !symbols.insert(note.symbol.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate note symbol '{}'",
                    note.symbol
                )));
            }
            if !receivers.insert(note.receiver_channel) {
                return Err(Error::Config(format!(
                    "Duplicate receiver channel {} (note '{}')",
                    note.receiver_channel, note.symbol
                )));
            }
            if !(note.frequency.is_finite() && note.frequency > 0.0) {
                return Err(Error::Config(format!(
                    "Note '{}' frequency must be positive, got {}",
                    note.symbol, note.frequency
                )));
            }
            emitters.insert(note.emitter_channel);
        }

        if let Some(shared) = receivers.intersection(&emitters).next() {
            return Err(Error::Config(format!(
                "{} is used as both emitter and receiver",
                shared
            )));
        }
        if receivers.contains(&self.output_channel) || emitters.contains(&self.output_channel) {
            return Err(Error::Config(format!(
                "Output channel {} collides with a beam channel",
                self.output_channel
            )));
        }

        if self.target_sequence.is_empty() {
            return Err(Error::Config("Target sequence must not be empty".to_string()));
        }
        if let Some(unknown) = self
            .target_sequence
            .iter()
            .find(|s| !symbols.contains(s.as_str()))
        {
            return Err(Error::Config(format!(
                "Target sequence references unknown note '{}'",
                unknown
            )));
        }

        if !(self.note_duration_secs.is_finite() && self.note_duration_secs > 0.0) {
            return Err(Error::Config(format!(
                "note_duration_secs must be positive, got {}",
                self.note_duration_secs
            )));
        }
        if Duration::try_from_secs_f64(self.note_duration_secs).is_err() {
            return Err(Error::Config(format!(
                "note_duration_secs {} is out of range",
                self.note_duration_secs
            )));
        }
        if !(self.duty_cycle > 0.0 && self.duty_cycle <= 100.0) {
            return Err(Error::Config(format!(
                "duty_cycle must be in (0, 100], got {}",
                self.duty_cycle
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".to_string()));
        }
        // Two 12 px lines of at least one 6 px glyph
        if self.display.height < 24 || self.display.width < 6 {
            return Err(Error::Config(format!(
                "Display {}x{} cannot show two lines of text",
                self.display.width, self.display.height
            )));
        }
        if self.max_consecutive_scan_failures == 0 {
            return Err(Error::Config(
                "max_consecutive_scan_failures must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn note_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.note_duration_secs).unwrap_or(Duration::ZERO)
    }

    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Look up a note by symbol
    pub fn note(&self, symbol: &str) -> Option<&NoteConfig> {
        self.notes.iter().find(|n| n.symbol == symbol)
    }
}

/// Finds the configuration file following the sources priority
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    env_var: String,
    search_paths: Vec<PathBuf>,
}

impl ConfigResolver {
    /// Resolver for the current platform's default locations
    pub fn new() -> Self {
        let mut search_paths = Vec::new();
        if let Some(dir) = dirs::config_dir() {
            search_paths.push(dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
        }
        if cfg!(unix) {
            search_paths.push(
                PathBuf::from("/etc")
                    .join(CONFIG_DIR_NAME)
                    .join(CONFIG_FILE_NAME),
            );
        }
        Self {
            env_var: CONFIG_ENV_VAR.to_string(),
            search_paths,
        }
    }

    /// Resolver with explicit fallback locations, searched in order
    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self {
            env_var: CONFIG_ENV_VAR.to_string(),
            search_paths,
        }
    }

    /// Pick the configuration file to load, if any
    ///
    /// Explicit paths (CLI or environment) that do not exist are an error.
    pub fn resolve(&self, cli_path: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = cli_path {
            return Self::require_exists(path.to_path_buf());
        }

        if let Ok(path) = std::env::var(&self.env_var) {
            if !path.is_empty() {
                return Self::require_exists(PathBuf::from(path));
            }
        }

        Ok(self.search_paths.iter().find(|p| p.exists()).cloned())
    }

    fn require_exists(path: PathBuf) -> Result<Option<PathBuf>> {
        if path.exists() {
            Ok(Some(path))
        } else {
            Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )))
        }
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expect_config_error(config: &HarpConfig, needle: &str) {
        match config.validate() {
            Err(Error::Config(msg)) => assert!(
                msg.contains(needle),
                "expected message containing '{}', got '{}'",
                needle,
                msg
            ),
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = HarpConfig::default();
        config.validate().unwrap();
        assert_eq!(config.notes.len(), 3);
        assert_eq!(config.target_sequence.len(), 7);
        assert_eq!(config.note_duration(), Duration::from_millis(350));
        assert_eq!(config.debounce_interval(), Duration::from_millis(60));
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
    }

    #[test]
    fn test_empty_notes_rejected() {
        let mut config = HarpConfig::default();
        config.notes.clear();
        expect_config_error(&config, "At least one note");
    }

    #[test]
    fn test_duplicate_receiver_rejected() {
        let mut config = HarpConfig::default();
        config.notes[1].receiver_channel = config.notes[0].receiver_channel;
        expect_config_error(&config, "Duplicate receiver");
    }

    #[test]
    fn test_duplicate_symbol_rejected() {
        let mut config = HarpConfig::default();
        config.notes[2].symbol = "do".to_string();
        expect_config_error(&config, "Duplicate note symbol");
    }

    #[test]
    fn test_empty_target_rejected() {
        let mut config = HarpConfig::default();
        config.target_sequence.clear();
        expect_config_error(&config, "Target sequence must not be empty");
    }

    #[test]
    fn test_unknown_target_symbol_rejected() {
        let mut config = HarpConfig::default();
        config.target_sequence.push("sol".to_string());
        expect_config_error(&config, "unknown note 'sol'");
    }

    #[test]
    fn test_channel_collisions_rejected() {
        let mut config = HarpConfig::default();
        config.notes[0].emitter_channel = config.notes[1].receiver_channel;
        expect_config_error(&config, "both emitter and receiver");

        let mut config = HarpConfig::default();
        config.output_channel = config.notes[0].emitter_channel;
        expect_config_error(&config, "Output channel");
    }

    #[test]
    fn test_timing_bounds() {
        let mut config = HarpConfig::default();
        config.note_duration_secs = 0.0;
        expect_config_error(&config, "note_duration_secs");

        // Finite but beyond what a Duration can hold
        let mut config = HarpConfig::default();
        config.note_duration_secs = 1e20;
        expect_config_error(&config, "out of range");

        let mut config = HarpConfig::default();
        config.duty_cycle = 0.0;
        expect_config_error(&config, "duty_cycle");

        let mut config = HarpConfig::default();
        config.duty_cycle = 100.0;
        config.validate().unwrap();

        let mut config = HarpConfig::default();
        config.poll_interval_ms = 0;
        expect_config_error(&config, "poll_interval_ms");

        // Zero debounce is allowed: every stable read is accepted immediately
        let mut config = HarpConfig::default();
        config.debounce_ms = 0;
        config.validate().unwrap();
    }

    #[test]
    fn test_tiny_display_rejected() {
        let mut config = HarpConfig::default();
        config.display.height = 16;
        expect_config_error(&config, "two lines");
    }

    #[test]
    fn test_non_positive_frequency_rejected() {
        let mut config = HarpConfig::default();
        config.notes[0].frequency = -1.0;
        expect_config_error(&config, "frequency must be positive");

        config.notes[0].frequency = f64::NAN;
        expect_config_error(&config, "frequency must be positive");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = HarpConfig::from_toml_str(
            r#"
            reveal_key = "8848"
            debounce_ms = 25
            beam_broken_level = "low"

            [display]
            height = 32
            "#,
        )
        .unwrap();

        assert_eq!(config.reveal_key, "8848");
        assert_eq!(config.debounce_ms, 25);
        assert_eq!(config.beam_broken_level, Level::Low);
        assert_eq!(config.display.height, 32);
        assert_eq!(config.display.width, 128);
        assert_eq!(config.notes, HarpConfig::default().notes);
    }

    #[test]
    fn test_full_note_table_from_toml() {
        let config = HarpConfig::from_toml_str(
            r#"
            output_channel = 18
            target_sequence = ["la", "si", "la"]

            [[notes]]
            symbol = "la"
            frequency = 440.0
            emitter_channel = 4
            receiver_channel = 22

            [[notes]]
            symbol = "si"
            frequency = 493.88
            emitter_channel = 27
            receiver_channel = 23
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.notes.len(), 2);
        assert_eq!(config.output_channel, Channel(18));
        assert_eq!(config.note("si").unwrap().receiver_channel, Channel(23));
    }

    #[test]
    fn test_malformed_toml_is_error() {
        let result = HarpConfig::from_toml_str("notes = 5");
        assert!(matches!(result, Err(Error::Toml(_))));
    }

    #[test]
    fn test_channel_display() {
        assert_eq!(Channel(12).to_string(), "GPIO12");
    }
}
