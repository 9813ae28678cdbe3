use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Top-level configuration for the Vitl runtime support library
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RuntimeConfig {
    /// Bump arena behaviour
    #[serde(default)]
    pub arena: ArenaConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Arena allocation options.
///
/// These are per-arena: two arenas built from different configs do not
/// share counters or poisoning behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Region size used when an arena is created with capacity 0
    #[serde(default = "default_arena_capacity")]
    pub default_capacity: usize,

    /// Zero-fill every allocation before handing it out
    #[serde(default)]
    pub zero_on_alloc: bool,

    /// Overwrite the used prefix with `POISON_BYTE` on reset (and fill the
    /// fresh region on creation)
    #[serde(default)]
    pub poison_on_reset: bool,

    /// Overwrite the whole region with `FREED_POISON_BYTE` before release
    #[serde(default)]
    pub poison_on_destroy: bool,

    /// Track peak offset, bytes handed out, allocation and reset counts
    #[serde(default)]
    pub stats: bool,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            default_capacity: default_arena_capacity(),
            zero_on_alloc: false,
            poison_on_reset: false,
            poison_on_destroy: false,
            stats: false,
        }
    }
}

impl ArenaConfig {
    /// Debug profile: poison everything and keep counters.
    pub fn debug() -> Self {
        Self {
            poison_on_reset: true,
            poison_on_destroy: true,
            stats: true,
            ..Self::default()
        }
    }

    pub fn with_default_capacity(mut self, bytes: usize) -> Self {
        self.default_capacity = bytes;
        self
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "json", "compact"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_arena_capacity() -> usize {
    1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn parse_flag(value: &str) -> bool {
    let v = value.to_lowercase();
    v == "true" || v == "1" || v == "yes"
}

/// Loads and validates `RuntimeConfig`
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: RuntimeConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (.env file)
    /// 2. Config file (.vitl.toml)
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        info!("Loading Vitl runtime configuration");

        Self::load_dotenv();

        let (config, config_path) = Self::load_config_file()?;
        let config = Self::apply_env_overrides(config);
        Self::validate_config(&config)?;

        match config_path {
            Some(ref path) => info!("Config file: {}", path.display()),
            None => info!("Config file: NONE (using defaults)"),
        }
        info!(
            "Arena default capacity: {} bytes, stats: {}",
            config.arena.default_capacity, config.arena.stats
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Load one explicit config file, then apply environment overrides.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_path(path.as_ref(), Self::apply_env_overrides)
    }

    /// Load one explicit config file exactly as written, ignoring `VITL_*`
    /// and `RUST_LOG`.
    pub fn from_path_without_env(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_path(path.as_ref(), |config| config)
    }

    fn load_path(
        path: &Path,
        overrides: impl FnOnce(RuntimeConfig) -> RuntimeConfig,
    ) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let config = overrides(Self::read_toml_file(path)?);
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: Some(path.to_path_buf()),
        })
    }

    /// Wrap an already-built configuration after validating it.
    pub fn from_config(config: RuntimeConfig) -> Result<Self, ConfigError> {
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: None,
        })
    }

    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            } else {
                info!("Loaded .env file from current directory");
            }
            return;
        }

        if let Some(home) = dirs::home_dir() {
            let home_env = home.join(".vitl.env");
            if home_env.exists() {
                if let Err(e) = dotenv::from_path(&home_env) {
                    warn!("Failed to load .vitl.env: {}", e);
                } else {
                    info!("Loaded .vitl.env from home directory");
                }
            }
        }
    }

    /// Search order:
    /// 1. ./.vitl.toml
    /// 2. ~/.vitl/config.toml
    /// 3. defaults
    fn load_config_file() -> Result<(RuntimeConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".vitl.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".vitl").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        info!("No config file found, using defaults");
        Ok((RuntimeConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<RuntimeConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_env_overrides(config: RuntimeConfig) -> RuntimeConfig {
        Self::apply_overrides(config, |name| std::env::var(name).ok())
    }

    fn apply_overrides(
        mut config: RuntimeConfig,
        var: impl Fn(&str) -> Option<String>,
    ) -> RuntimeConfig {
        if let Some(capacity) = var("VITL_ARENA_DEFAULT_CAPACITY") {
            match capacity.parse() {
                Ok(bytes) => config.arena.default_capacity = bytes,
                Err(_) => warn!("Ignoring VITL_ARENA_DEFAULT_CAPACITY={}", capacity),
            }
        }
        if let Some(flag) = var("VITL_ARENA_ZERO_ON_ALLOC") {
            config.arena.zero_on_alloc = parse_flag(&flag);
        }
        if let Some(flag) = var("VITL_ARENA_POISON_ON_RESET") {
            config.arena.poison_on_reset = parse_flag(&flag);
        }
        if let Some(flag) = var("VITL_ARENA_POISON_ON_DESTROY") {
            config.arena.poison_on_destroy = parse_flag(&flag);
        }
        if let Some(flag) = var("VITL_ARENA_STATS") {
            config.arena.stats = parse_flag(&flag);
        }

        if let Some(level) = var("RUST_LOG") {
            // Only plain levels are representable here; directive strings
            // are left to the EnvFilter.
            let level = level.to_lowercase();
            if matches!(
                level.as_str(),
                "trace" | "debug" | "info" | "warn" | "error"
            ) {
                config.logging.level = level;
            }
        }
        if let Some(format) = var("VITL_LOG_FORMAT") {
            config.logging.format = format.to_lowercase();
        }

        config
    }

    pub(crate) fn validate_config(config: &RuntimeConfig) -> Result<(), ConfigError> {
        if config.arena.default_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "arena.default_capacity must be greater than zero".to_string(),
            ));
        }

        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    other
                )))
            }
        }

        match config.logging.format.as_str() {
            "pretty" | "json" | "compact" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, json, compact",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Path of the config file that was loaded, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Write a default config file, creating parent directories as needed.
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = RuntimeConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}
