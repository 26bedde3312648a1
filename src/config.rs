use std::{fmt, str::FromStr};

use serde::Deserialize;

/// Configuration bundled into the binary at build time.
pub const BUNDLED_CONFIG: &str = include_str!("../typing-sounds.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundVariant {
    /// Procedurally generated key clicks on a randomized cadence.
    Synth,
    /// One recorded clip looped while typing.
    Sample,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TypingConfig {
    pub log_level: String,
    pub sound: SoundConfig,
    pub detector: DetectorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    pub variant: SoundVariant,
    pub gain: f32,
    pub initial_delay_ms: u32,
    pub synth: SynthConfig,
    pub sample: SampleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub pool_size: usize,
    pub click_duration_ms: u32,
    pub min_interval_ms: u32,
    pub interval_jitter_ms: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SampleConfig {
    pub asset_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub stop_threshold_ms: u32,
    pub safety_net_ms: u32,
    pub initial_check_delay_ms: u32,
    /// 0 disables polling.
    pub poll_interval_ms: u32,
    pub filter_mutations: bool,
    pub max_ancestor_depth: usize,
    pub stop_button_selectors: Vec<String>,
    pub assistant_message_selector: String,
    pub assistant_container_selector: String,
    /// Empty disables the streaming indicator check.
    pub streaming_indicator_selectors: Vec<String>,
}

impl Default for TypingConfig {
    fn default() -> Self {
        TypingConfig {
            log_level: "info".to_string(),
            sound: SoundConfig::default(),
            detector: DetectorConfig::default(),
        }
    }
}

impl Default for SoundConfig {
    fn default() -> Self {
        SoundConfig {
            variant: SoundVariant::Synth,
            gain: 0.3,
            initial_delay_ms: 400,
            synth: SynthConfig::default(),
            sample: SampleConfig::default(),
        }
    }
}

impl Default for SynthConfig {
    fn default() -> Self {
        SynthConfig {
            pool_size: 7,
            click_duration_ms: 80,
            min_interval_ms: 80,
            interval_jitter_ms: 70,
        }
    }
}

impl Default for SampleConfig {
    fn default() -> Self {
        SampleConfig {
            asset_path: "sounds/typing.mp3".to_string(),
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            stop_threshold_ms: 500,
            safety_net_ms: 1200,
            initial_check_delay_ms: 1000,
            poll_interval_ms: 250,
            filter_mutations: false,
            max_ancestor_depth: 10,
            stop_button_selectors: strings(&[
                r#"button[data-testid*="stop"]"#,
                r#"button[aria-label*="Stop"]"#,
                r#"[data-testid="stop-button"]"#,
            ]),
            assistant_message_selector: r#"[data-message-author-role="assistant"]:last-child"#
                .to_string(),
            assistant_container_selector: r#"[data-message-author-role="assistant"]"#.to_string(),
            streaming_indicator_selectors: strings(&[
                r#"[data-testid*="streaming"]"#,
                r#"[class*="streaming"]"#,
                r#"[class*="generating"]"#,
                ".cursor-blink",
                r#"[class*="cursor"]"#,
                r#"[class*="typing"]"#,
            ]),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum ConfigError {
    Parse(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(message) => write!(f, "failed to parse config: {message}"),
            ConfigError::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl TypingConfig {
    pub fn from_toml(text: &str) -> Result<TypingConfig, ConfigError> {
        let config: TypingConfig =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn bundled() -> Result<TypingConfig, ConfigError> {
        Self::from_toml(BUNDLED_CONFIG)
    }

    /// Falls back to `info` when the configured level does not parse.
    pub fn log_level(&self) -> log::Level {
        log::Level::from_str(&self.log_level).unwrap_or(log::Level::Info)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::Invalid(message.to_string()));

        if log::Level::from_str(&self.log_level).is_err() {
            return Err(ConfigError::Invalid(format!(
                "unknown log level '{}'",
                self.log_level
            )));
        }
        if !(self.sound.gain > 0.0 && self.sound.gain <= 1.0) {
            return invalid("sound.gain must be in (0, 1]");
        }
        let synth = &self.sound.synth;
        if synth.pool_size == 0 {
            return invalid("sound.synth.pool_size must be non-zero");
        }
        if synth.click_duration_ms == 0 {
            return invalid("sound.synth.click_duration_ms must be non-zero");
        }
        if synth.min_interval_ms == 0 {
            return invalid("sound.synth.min_interval_ms must be non-zero");
        }
        if self.sound.variant == SoundVariant::Sample && self.sound.sample.asset_path.is_empty() {
            return invalid("sound.sample.asset_path is required for the sample variant");
        }
        let detector = &self.detector;
        if detector.stop_threshold_ms == 0 {
            return invalid("detector.stop_threshold_ms must be non-zero");
        }
        if detector.safety_net_ms <= detector.stop_threshold_ms {
            return invalid("detector.safety_net_ms must exceed detector.stop_threshold_ms");
        }
        if detector.assistant_message_selector.is_empty() {
            return invalid("detector.assistant_message_selector must not be empty");
        }
        Ok(())
    }
}
