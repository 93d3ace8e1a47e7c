use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result, anyhow};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000";
pub const DEFAULT_VOICE: &str = "Google US English";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the graph server
    pub endpoint: Option<String>,
    pub preferred_voice: Option<String>,
    /// Bot message shown when the chat opens
    pub greeting: Option<String>,
    /// Longest wait for the next piece of a reply
    pub request_timeout_secs: Option<u64>,
    /// Text-to-speech program, e.g. `espeak-ng`
    pub tts_command: Option<String>,
    /// Flag the TTS program takes before a voice name, e.g. `-v`
    pub tts_voice_flag: Option<String>,
    /// Voices the TTS program offers, default first
    pub voices: Option<Vec<String>>,
    /// Recognizer that prints transcripts line by line
    pub stt_command: Option<String>,
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load the config file (if any) and apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::get_config_path()?)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let config_content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Config = serde_json::from_str(&config_content)
            .with_context(|| format!("Malformed config file {:?}", path))?;
        Ok(config)
    }

    /// Every default spelled out, as a starting point for editing
    pub fn starter() -> Self {
        Self {
            endpoint: Some(DEFAULT_ENDPOINT.to_string()),
            preferred_voice: Some(DEFAULT_VOICE.to_string()),
            request_timeout_secs: Some(DEFAULT_TIMEOUT_SECS),
            ..Self::default()
        }
    }

    /// Write the starter config to `path` unless a file is already there.
    ///
    /// Returns whether a file was written.
    pub fn init_at(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        Self::starter()
            .save_to(path)
            .with_context(|| format!("Failed to write config file {:?}", path))?;
        Ok(true)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        Ok(())
    }

    /// Environment variables win over the file
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = var("GENIE_ENDPOINT") {
            self.endpoint = Some(endpoint);
        }
        if let Some(voice) = var("GENIE_VOICE") {
            self.preferred_voice = Some(voice);
        }
        match var("GENIE_TIMEOUT_SECS").map(|s| s.parse::<u64>()) {
            Some(Ok(secs)) => self.request_timeout_secs = Some(secs),
            Some(Err(e)) => tracing::warn!("ignoring GENIE_TIMEOUT_SECS: {}", e),
            None => {}
        }
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }

    pub fn preferred_voice(&self) -> &str {
        self.preferred_voice.as_deref().unwrap_or(DEFAULT_VOICE)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        )
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_file
            .clone()
            .or_else(|| dirs::cache_dir().map(|dir| dir.join("genie").join("genie.log")))
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("genie").join("config.json"))
    }
}
