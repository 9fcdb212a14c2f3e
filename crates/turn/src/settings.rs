use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{ExtractSnafu, SettingsError};

pub const SETTINGS_DIRECTORY_NAME: &str = "zova";
pub const SETTINGS_FILE_NAME: &str = "turn.json";
pub const ENV_PREFIX: &str = "ZOVA_TURN_";

pub const DEFAULT_CHARS_PER_TICK: usize = 2;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 16;
pub const DEFAULT_ACKNOWLEDGEMENT_DELAY_MS: u64 = 3_000;
pub const DEFAULT_STREAMING_CURSOR: &str = "▍";
pub const DEFAULT_ACKNOWLEDGEMENT_TEXT: &str = "Feedback received. Thank you.";

/// Reveal rate for streamed answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingSettings {
    #[serde(default = "default_chars_per_tick")]
    pub chars_per_tick: usize,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for TypingSettings {
    fn default() -> Self {
        Self {
            chars_per_tick: DEFAULT_CHARS_PER_TICK,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

impl TypingSettings {
    /// Never zero, even for settings that skipped `normalized()`.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnSettings {
    #[serde(default)]
    pub typing: TypingSettings,
    #[serde(default = "default_acknowledgement_delay_ms")]
    pub acknowledgement_delay_ms: u64,
    #[serde(default = "default_streaming_cursor")]
    pub streaming_cursor: String,
    #[serde(default = "default_acknowledgement_text")]
    pub acknowledgement_text: String,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            typing: TypingSettings::default(),
            acknowledgement_delay_ms: DEFAULT_ACKNOWLEDGEMENT_DELAY_MS,
            streaming_cursor: default_streaming_cursor(),
            acknowledgement_text: default_acknowledgement_text(),
        }
    }
}

impl TurnSettings {
    pub fn acknowledgement_delay(&self) -> Duration {
        Duration::from_millis(self.acknowledgement_delay_ms)
    }

    /// Replaces values that would stall the reveal or flash the acknowledgement away.
    pub fn normalized(mut self) -> Self {
        if self.typing.chars_per_tick == 0 {
            self.typing.chars_per_tick = DEFAULT_CHARS_PER_TICK;
        }
        if self.typing.tick_interval_ms == 0 {
            self.typing.tick_interval_ms = DEFAULT_TICK_INTERVAL_MS;
        }
        if self.acknowledgement_delay_ms == 0 {
            self.acknowledgement_delay_ms = DEFAULT_ACKNOWLEDGEMENT_DELAY_MS;
        }
        if self.streaming_cursor.is_empty() {
            self.streaming_cursor = default_streaming_cursor();
        }
        self.acknowledgement_text = self.acknowledgement_text.trim().to_string();
        if self.acknowledgement_text.is_empty() {
            self.acknowledgement_text = default_acknowledgement_text();
        }

        self
    }

    /// Layers defaults, the JSON file (when present) and `ZOVA_TURN_*` variables.
    pub fn extract(path: &Path) -> Result<Self, SettingsError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let settings = figment.extract::<Self>().context(ExtractSnafu {
            stage: "extract-turn-settings",
            path: path.to_path_buf(),
        })?;
        Ok(settings.normalized())
    }
}

/// Hot-swappable settings shared by every turn in a transcript.
pub struct SettingsStore {
    settings: Arc<ArcSwap<TurnSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".zova"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> Arc<TurnSettings> {
        self.settings.load_full()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Re-reads the file, keeping the current settings when it no longer parses.
    pub fn reload(&self) -> Result<(), SettingsError> {
        let settings = TurnSettings::extract(&self.config_path)?;
        self.settings.store(Arc::new(settings));
        tracing::info!("reloaded turn settings from {:?}", self.config_path);
        Ok(())
    }

    fn load_from_disk(path: &Path) -> TurnSettings {
        if !path.exists() {
            tracing::info!("turn settings not found at {:?}, using defaults", path);
        }

        match TurnSettings::extract(path) {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!("{error}. using defaults");
                TurnSettings::default()
            }
        }
    }
}

fn default_chars_per_tick() -> usize {
    DEFAULT_CHARS_PER_TICK
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_acknowledgement_delay_ms() -> u64 {
    DEFAULT_ACKNOWLEDGEMENT_DELAY_MS
}

fn default_streaming_cursor() -> String {
    DEFAULT_STREAMING_CURSOR.to_string()
}

fn default_acknowledgement_text() -> String {
    DEFAULT_ACKNOWLEDGEMENT_TEXT.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("zova-turn-settings-{}-{name}", std::process::id()))
            .join(SETTINGS_FILE_NAME)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let store = SettingsStore::new(scratch_path("missing"));
        assert_eq!(*store.settings(), TurnSettings::default());
        assert_eq!(
            store.settings().acknowledgement_delay(),
            Duration::from_millis(3_000)
        );
    }

    #[test]
    fn file_values_are_merged_and_normalized() {
        let path = scratch_path("merge");
        let parent = path.parent().expect("scratch path has a parent");
        std::fs::create_dir_all(parent).expect("create scratch dir");
        std::fs::write(
            &path,
            r#"{"typing": {"chars_per_tick": 0, "tick_interval_ms": 40}, "acknowledgement_text": "  thanks  "}"#,
        )
        .expect("write settings");

        let store = SettingsStore::new(path.clone());
        let settings = store.settings();
        assert_eq!(settings.typing.chars_per_tick, DEFAULT_CHARS_PER_TICK);
        assert_eq!(settings.typing.tick_interval(), Duration::from_millis(40));
        assert_eq!(settings.acknowledgement_text, "thanks");
        assert_eq!(settings.streaming_cursor, DEFAULT_STREAMING_CURSOR);

        std::fs::write(&path, r#"{"acknowledgement_delay_ms": 1500}"#).expect("rewrite settings");
        store.reload().expect("reload should succeed");
        assert_eq!(
            store.settings().acknowledgement_delay(),
            Duration::from_millis(1_500)
        );

        let _ = std::fs::remove_dir_all(parent);
    }

    #[test]
    fn tick_interval_is_never_zero() {
        let typing = TypingSettings {
            chars_per_tick: 1,
            tick_interval_ms: 0,
        };
        assert_eq!(typing.tick_interval(), Duration::from_millis(1));
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let path = scratch_path("broken");
        let parent = path.parent().expect("scratch path has a parent");
        std::fs::create_dir_all(parent).expect("create scratch dir");
        std::fs::write(&path, "{ not json").expect("write settings");

        let store = SettingsStore::new(path.clone());
        assert_eq!(*store.settings(), TurnSettings::default());
        assert!(store.reload().is_err());

        let _ = std::fs::remove_dir_all(parent);
    }
}
