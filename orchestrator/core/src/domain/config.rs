// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Startup configuration (C2, spec §6 "Configuration (recognized keys)").
//!
//! Loaded from YAML with discovery + env-var overrides in the same shape as
//! the teacher's `domain::node_config::NodeConfigManifest`, but flattened to
//! the keys this system actually recognizes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,
    #[serde(default)]
    pub projects_dir: Option<PathBuf>,
    #[serde(default)]
    pub api_keys: ApiKeys,
    #[serde(default)]
    pub api_endpoints: ApiEndpoints,
    #[serde(default)]
    pub remotion: RemotionConfig,
    #[serde(default)]
    pub file_management: FileManagementConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub port_range: PortRangeConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub layers: LayersConfig,
    /// Gates the voice/sound-effect generation tools independently of
    /// credential presence (spec §6 `AUDIO_ENABLED`).
    #[serde(default = "default_true")]
    pub audio_enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeys {
    pub elevenlabs: Option<String>,
    pub freesound: Option<String>,
    pub flux: Option<String>,
}

impl ApiKeys {
    pub fn has_elevenlabs(&self) -> bool {
        self.elevenlabs.is_some()
    }

    pub fn has_freesound(&self) -> bool {
        self.freesound.is_some()
    }

    pub fn has_flux(&self) -> bool {
        self.flux.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEndpoints {
    #[serde(default = "default_elevenlabs_endpoint")]
    pub elevenlabs: String,
    #[serde(default = "default_flux_endpoint")]
    pub flux: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            elevenlabs: default_elevenlabs_endpoint(),
            flux: default_flux_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotionConfig {
    pub browser_executable: Option<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
    #[serde(default = "default_remotion_timeout_ms")]
    pub timeout: u64,
}

impl Default for RemotionConfig {
    fn default() -> Self {
        Self {
            browser_executable: None,
            concurrency: default_concurrency(),
            timeout: default_remotion_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileManagementConfig {
    #[serde(default = "default_true")]
    pub cleanup_temp_files: bool,
    #[serde(default = "default_max_asset_age_hours")]
    pub max_asset_age_hours: f64,
}

impl Default for FileManagementConfig {
    fn default() -> Self {
        Self {
            cleanup_temp_files: true,
            max_asset_age_hours: default_max_asset_age_hours(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortRangeConfig {
    #[serde(default = "default_port_start")]
    pub start: u16,
    #[serde(default = "default_port_end")]
    pub end: u16,
    #[serde(default = "default_port_deny")]
    pub deny: Vec<u16>,
}

impl Default for PortRangeConfig {
    fn default() -> Self {
        Self {
            start: default_port_start(),
            end: default_port_end(),
            deny: default_port_deny(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategyName {
    Lru,
    Lfu,
    Priority,
    Smart,
}

impl Default for EvictionStrategyName {
    fn default() -> Self {
        Self::Smart
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_max_weight")]
    pub max_weight: u32,
    #[serde(default = "default_warning")]
    pub warning: f64,
    #[serde(default = "default_critical")]
    pub critical: f64,
    #[serde(default)]
    pub auto_optimize: bool,
    #[serde(default)]
    pub strategy: EvictionStrategyName,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_weight: default_max_weight(),
            warning: default_warning(),
            critical: default_critical(),
            auto_optimize: false,
            strategy: EvictionStrategyName::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayersConfig {
    pub max_active: Option<u32>,
    #[serde(default = "default_true")]
    pub auto_resolve_dependencies: bool,
    #[serde(default = "default_true")]
    pub enforce_exclusivity: bool,
    #[serde(default)]
    pub track_history: bool,
}

fn default_true() -> bool {
    true
}

fn default_assets_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".montage-broker")
        .join("assets")
}

fn default_elevenlabs_endpoint() -> String {
    "https://api.elevenlabs.io".to_string()
}

fn default_flux_endpoint() -> String {
    "https://api.bfl.ml".to_string()
}

fn default_concurrency() -> u32 {
    1
}

fn default_remotion_timeout_ms() -> u64 {
    30_000
}

fn default_max_asset_age_hours() -> f64 {
    24.0
}

fn default_port_start() -> u16 {
    3000
}

fn default_port_end() -> u16 {
    3020
}

fn default_port_deny() -> Vec<u16> {
    vec![3002]
}

fn default_max_weight() -> u32 {
    10_000
}

fn default_warning() -> f64 {
    0.75
}

fn default_critical() -> f64 {
    0.9
}

impl Default for Config {
    fn default() -> Self {
        Self {
            assets_dir: default_assets_dir(),
            projects_dir: None,
            api_keys: ApiKeys::default(),
            api_endpoints: ApiEndpoints::default(),
            remotion: RemotionConfig::default(),
            file_management: FileManagementConfig::default(),
            logging: LoggingConfig::default(),
            port_range: PortRangeConfig::default(),
            context: ContextConfig::default(),
            layers: LayersConfig::default(),
            audio_enabled: true,
        }
    }
}

impl Config {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read config file {:?}: {e}", path.as_ref()))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {:?}: {e}", path.as_ref()))?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Discovery precedence: `MONTAGE_CONFIG_PATH` env var, then
    /// `./montage-broker.yaml`, then `~/.montage-broker/config.yaml`.
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("MONTAGE_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }
        let cwd = PathBuf::from("./montage-broker.yaml");
        if cwd.exists() {
            return Some(cwd);
        }
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".montage-broker").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }
        None
    }

    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = cli_path {
            tracing::info!(path = ?path, "loading configuration from explicit path");
            Self::from_yaml_file(&path)?
        } else if let Some(path) = Self::discover_config() {
            tracing::info!(path = ?path, "loading configuration from discovered path");
            Self::from_yaml_file(&path)?
        } else {
            tracing::warn!("no configuration file found in standard locations, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies the environment variables spec §6 enumerates, overriding
    /// whatever the YAML file set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(&std::env::vars().collect::<HashMap<_, _>>());
    }

    /// Testable variant of [`Self::apply_env_overrides`] taking an explicit
    /// environment map instead of reading the process environment.
    pub fn apply_env_overrides_from(&mut self, env: &HashMap<String, String>) {
        if let Some(v) = env.get("LOG_LEVEL") {
            self.logging.level = match v.to_lowercase().as_str() {
                "error" => LogLevel::Error,
                "warn" => LogLevel::Warn,
                "info" => LogLevel::Info,
                "debug" => LogLevel::Debug,
                other => {
                    tracing::warn!(value = other, "invalid LOG_LEVEL, ignoring");
                    self.logging.level
                }
            };
        }
        if let Some(v) = env.get("LOG_FILE") {
            self.logging.file = Some(PathBuf::from(v));
        }
        if let Some(v) = env.get("REMOTION_ASSETS_DIR") {
            self.assets_dir = PathBuf::from(v);
        }
        if let Some(v) = env.get("ELEVENLABS_API_KEY") {
            self.api_keys.elevenlabs = Some(v.clone());
        }
        if let Some(v) = env.get("FREESOUND_API_KEY") {
            self.api_keys.freesound = Some(v.clone());
        }
        if let Some(v) = env.get("FLUX_API_KEY") {
            self.api_keys.flux = Some(v.clone());
        }
        if let Some(v) = env.get("AUDIO_ENABLED") {
            match v.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.audio_enabled = true,
                "false" | "0" | "no" => self.audio_enabled = false,
                other => tracing::warn!(value = other, "invalid AUDIO_ENABLED, ignoring"),
            }
        }
    }

    /// Fatal at startup (spec §5 "Configuration — missing or invalid settings; fatal at startup").
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port_range.start >= self.port_range.end {
            anyhow::bail!(
                "portRange.start ({}) must be less than portRange.end ({})",
                self.port_range.start,
                self.port_range.end
            );
        }
        if self.remotion.concurrency < 1 {
            anyhow::bail!("remotion.concurrency must be >= 1");
        }
        if self.remotion.timeout == 0 {
            anyhow::bail!("remotion.timeout must be > 0");
        }
        for (name, url) in [
            ("apiEndpoints.elevenlabs", &self.api_endpoints.elevenlabs),
            ("apiEndpoints.flux", &self.api_endpoints.flux),
        ] {
            url::Url::parse(url).map_err(|e| anyhow::anyhow!("{name} is not a valid URL: {e}"))?;
        }
        if !(0.0..1.0).contains(&self.context.warning) || !(0.0..=1.0).contains(&self.context.critical) {
            anyhow::bail!("context.warning/critical must be fractions in [0,1)/[0,1]");
        }
        if self.context.warning >= self.context.critical {
            anyhow::bail!("context.warning must be less than context.critical");
        }
        Ok(())
    }

    pub fn usage_stats_path(&self) -> PathBuf {
        self.assets_dir.join(".tool-usage-stats.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_port_range() {
        let mut config = Config::default();
        config.port_range.start = 4000;
        config.port_range.end = 3000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_override_sets_api_key() {
        let mut config = Config::default();
        let mut env = HashMap::new();
        env.insert("ELEVENLABS_API_KEY".to_string(), "sk-test".to_string());
        config.apply_env_overrides_from(&env);
        assert!(config.api_keys.has_elevenlabs());
    }

    #[test]
    fn audio_enabled_env_override_disables_audio_tools() {
        let mut config = Config::default();
        assert!(config.audio_enabled);
        let mut env = HashMap::new();
        env.insert("AUDIO_ENABLED".to_string(), "false".to_string());
        config.apply_env_overrides_from(&env);
        assert!(!config.audio_enabled);
    }

    #[test]
    fn yaml_roundtrip_preserves_port_range() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.port_range.start, config.port_range.start);
        assert_eq!(parsed.port_range.deny, config.port_range.deny);
    }
}
