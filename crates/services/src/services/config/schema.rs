use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::EnumString;
use ts_rs::TS;

pub const CURRENT_CONFIG_VERSION: &str = "v1";

const DEFAULT_POINTER_ACTIVATION_DISTANCE: f64 = 8.0;
const DEFAULT_TOUCH_ACTIVATION_DELAY_MS: u64 = 250;
const DEFAULT_SWIPE_THRESHOLD: f64 = 50.0;
const DEFAULT_LOOK_AHEAD_HOURS: u32 = 2;
const DEFAULT_REMINDER_TOAST_MS: u64 = 5000;
const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, EnumString, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ThemeMode {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(default)]
pub struct NotificationConfig {
    /// Master switch for reminder toasts. Mutation results are always shown.
    pub enabled: bool,
    #[serde(alias = "soundEnabled")]
    pub sound_enabled: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sound_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(default)]
pub struct BoardConfig {
    /// Pointer travel in px before a press turns into a drag.
    #[serde(alias = "pointerActivationDistance")]
    pub pointer_activation_distance: f64,
    /// How long a touch must be held before it turns into a drag.
    #[serde(alias = "touchActivationDelayMs")]
    pub touch_activation_delay_ms: u64,
    /// Horizontal travel in px that counts as a swipe to the next column.
    #[serde(alias = "swipeThreshold")]
    pub swipe_threshold: f64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            pointer_activation_distance: DEFAULT_POINTER_ACTIVATION_DISTANCE,
            touch_activation_delay_ms: DEFAULT_TOUCH_ACTIVATION_DELAY_MS,
            swipe_threshold: DEFAULT_SWIPE_THRESHOLD,
        }
    }
}

impl BoardConfig {
    pub fn touch_activation_delay(&self) -> Duration {
        Duration::from_millis(self.touch_activation_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(default)]
pub struct ReminderConfig {
    /// A task due today is announced once this many hours or fewer remain.
    #[serde(alias = "lookAheadHours")]
    pub look_ahead_hours: u32,
    /// Announce each (task, due date, kind) once per session instead of on
    /// every snapshot.
    pub dedupe: bool,
    #[serde(alias = "toastDurationMs")]
    pub toast_duration_ms: u64,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            look_ahead_hours: DEFAULT_LOOK_AHEAD_HOURS,
            dedupe: true,
            toast_duration_ms: DEFAULT_REMINDER_TOAST_MS,
        }
    }
}

impl ReminderConfig {
    pub fn toast_duration(&self) -> Duration {
        Duration::from_millis(self.toast_duration_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(default)]
pub struct AssistantConfig {
    #[serde(alias = "apiBase")]
    pub api_base: String,
    pub model: String,
    /// Stream partial answers into the transcript instead of waiting for the
    /// full response.
    pub streaming: bool,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            streaming: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(default)]
pub struct Config {
    #[serde(alias = "configVersion")]
    pub config_version: String,
    pub theme: ThemeMode,
    pub notifications: NotificationConfig,
    pub board: BoardConfig,
    pub reminders: ReminderConfig,
    pub assistant: AssistantConfig,
}

impl Config {
    pub fn from_raw(raw_config: &str) -> Self {
        match serde_json::from_str::<Config>(raw_config) {
            Ok(config) => config.normalized(),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse config (line {}, column {}): {}, using default",
                    e.line(),
                    e.column(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn normalized(mut self) -> Self {
        self.config_version = CURRENT_CONFIG_VERSION.to_string();
        let board_defaults = BoardConfig::default();

        if !self.board.pointer_activation_distance.is_finite()
            || self.board.pointer_activation_distance < 0.0
        {
            tracing::warn!(
                "Invalid pointer activation distance {}, resetting to default",
                self.board.pointer_activation_distance
            );
            self.board.pointer_activation_distance = board_defaults.pointer_activation_distance;
        }

        if !self.board.swipe_threshold.is_finite() || self.board.swipe_threshold <= 0.0 {
            tracing::warn!(
                "Invalid swipe threshold {}, resetting to default",
                self.board.swipe_threshold
            );
            self.board.swipe_threshold = board_defaults.swipe_threshold;
        }

        if self.assistant.api_base.trim().is_empty() {
            self.assistant.api_base = DEFAULT_GEMINI_API_BASE.to_string();
        }
        if self.assistant.model.trim().is_empty() {
            self.assistant.model = DEFAULT_GEMINI_MODEL.to_string();
        }

        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: CURRENT_CONFIG_VERSION.to_string(),
            theme: ThemeMode::System,
            notifications: NotificationConfig::default(),
            board: BoardConfig::default(),
            reminders: ReminderConfig::default(),
            assistant: AssistantConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_for_empty_config() {
        let config = Config::from_raw("{}");

        assert_eq!(config.config_version, CURRENT_CONFIG_VERSION);
        assert_eq!(config.theme, ThemeMode::System);
        assert_eq!(config.board.pointer_activation_distance, 8.0);
        assert_eq!(config.board.touch_activation_delay(), Duration::from_millis(250));
        assert_eq!(config.reminders.look_ahead_hours, 2);
        assert!(config.reminders.dedupe);
        assert!(config.notifications.enabled);
        assert!(config.assistant.streaming);
    }

    #[test]
    fn invalid_json_falls_back_to_default() {
        let config = Config::from_raw("{invalid json");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn aliases_and_normalization_are_applied() {
        let raw = r#"{
            "configVersion": "v0",
            "board": { "swipeThreshold": -3, "pointerActivationDistance": 12 },
            "reminders": { "lookAheadHours": 6, "dedupe": false },
            "assistant": { "model": "  " }
        }"#;

        let config = Config::from_raw(raw);

        assert_eq!(config.config_version, CURRENT_CONFIG_VERSION);
        assert_eq!(config.board.swipe_threshold, 50.0);
        assert_eq!(config.board.pointer_activation_distance, 12.0);
        assert_eq!(config.reminders.look_ahead_hours, 6);
        assert!(!config.reminders.dedupe);
        assert_eq!(config.assistant.model, DEFAULT_GEMINI_MODEL);
    }
}
