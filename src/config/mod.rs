use crate::models::BridgeConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat};
use std::fs;

/// Name of the configuration file inside the config directory
pub const CONFIG_FILE_NAME: &str = "mediabridge.yaml";

/// Prefix for environment overrides, e.g. `MEDIABRIDGE__BRIDGE__CALL_TIMEOUT_MS=45000`
pub const ENV_PREFIX: &str = "MEDIABRIDGE";

/// Configuration manager for loading and saving `mediabridge.yaml`.
///
/// Values are layered: built-in defaults, then the YAML file (if present),
/// then `MEDIABRIDGE__SECTION__KEY` environment variables.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory holding `mediabridge.yaml` (e.g., "Bridge Data")
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE_NAME),
            config_dir,
        })
    }

    /// Load the configuration.
    ///
    /// # Returns
    /// The merged BridgeConfig. A missing file yields the defaults plus any
    /// environment overrides.
    pub fn load_config(&self) -> Result<BridgeConfig> {
        if !self.config_path.exists() {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                self.config_path
            );
        }

        let settings = Config::builder()
            .add_source(File::new(self.config_path.as_str(), FileFormat::Yaml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config: {}", self.config_path))?;

        let config: BridgeConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse config: {}", self.config_path))?;

        tracing::info!("Loaded config from {}", self.config_path);
        Ok(config)
    }

    /// Save the configuration file.
    pub fn save_config(&self, config: &BridgeConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?;

        fs::write(&self.config_path, yaml_string)
            .with_context(|| format!("Failed to write config: {}", self.config_path))?;

        tracing::info!("Saved config to {}", self.config_path);
        Ok(())
    }

    /// Write the default configuration unless a file already exists.
    ///
    /// Returns true if a file was written.
    pub fn write_default_config(&self, overwrite: bool) -> Result<bool> {
        if self.config_path.exists() && !overwrite {
            tracing::info!("Config already exists at {}", self.config_path);
            return Ok(false);
        }

        self.save_config(&BridgeConfig::default())?;
        Ok(true)
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }
}

/// Expand a leading `~` to the user's home directory.
///
/// Paths without a leading `~`, or with no home directory known, are returned unchanged.
pub fn expand_home(path: &str) -> Utf8PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') => rest,
        _ => return Utf8PathBuf::from(path),
    };

    match home_dir() {
        Some(home) => {
            let rest = rest.trim_start_matches(['/', '\\']);
            if rest.is_empty() { home } else { home.join(rest) }
        }
        None => Utf8PathBuf::from(path),
    }
}

/// The user's home directory, if known and valid UTF-8.
pub fn home_dir() -> Option<Utf8PathBuf> {
    dirs::home_dir().and_then(|home| Utf8PathBuf::from_path_buf(home).ok())
}
