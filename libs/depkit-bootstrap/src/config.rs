use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::home_dir::resolve_home_dir;

/// Host configuration: typed runtime and logging sections plus a free-form
/// per-component bag.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Core runtime configuration.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Logging configuration (optional, uses defaults if None).
    pub logging: Option<LoggingConfig>,
    /// Directory of per-component YAML files, one file per component.
    #[serde(default)]
    pub components_dir: Option<String>,
    /// Component name → arbitrary JSON/YAML value.
    #[serde(default)]
    pub components: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Normalized to an absolute path on load; empty means platform default.
    #[serde(default)]
    pub home_dir: String,
    /// Services started by the runner, in order.
    #[serde(default)]
    pub services: Vec<String>,
    /// Upper bound for each service start; 0 disables it.
    #[serde(default)]
    pub start_timeout_sec: u64,
}

impl RuntimeConfig {
    pub fn start_timeout(&self) -> Option<Duration> {
        (self.start_timeout_sec > 0).then(|| Duration::from_secs(self.start_timeout_sec))
    }
}

/// Logging configuration - maps target prefixes to their logging settings.
/// Key "default" is the catch-all for logs that don't match an explicit target.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Section {
    pub console_level: String, // "info", "debug", "error", "off"
    #[serde(default)]
    pub file: String, // "logs/depkit.log", empty disables the file sink
    #[serde(default)]
    pub file_level: String,
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub max_backups: Option<usize>, // How many files to keep
    #[serde(default)]
    pub max_size_mb: Option<u64>, // Max size of the file in MB
}

/// Create a default logging configuration.
pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        Section {
            console_level: "info".to_string(),
            file: "logs/depkit.log".to_string(),
            file_level: "debug".to_string(),
            max_age_days: Some(7),
            max_backups: Some(3),
            max_size_mb: Some(100),
        },
    );
    logging
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            logging: Some(default_logging_config()),
            components_dir: None,
            components: HashMap::new(),
        }
    }
}

const DEFAULT_SUBDIR: &str = ".depkit";

impl AppConfig {
    /// Load configuration with layered loading: defaults → YAML file → environment variables.
    /// Also normalizes `runtime.home_dir` into an absolute path and creates the directory.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        let config_path = config_path.as_ref();

        // Optional sections stay None unless YAML/ENV provide them.
        let base = AppConfig {
            logging: None,
            ..AppConfig::default()
        };

        let figment = Figment::new()
            .merge(Serialized::defaults(base))
            .merge(Yaml::file(config_path))
            // Example: APP__RUNTIME__START_TIMEOUT_SEC=30 maps to runtime.start_timeout_sec
            .merge(Env::prefixed("APP__").split("__"));

        let mut config: AppConfig = figment
            .extract()
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

        normalize_home_dir(&mut config.runtime).context("Failed to resolve runtime.home_dir")?;

        if let Some(dir) = config.components_dir.clone() {
            let dir = relative_to(config_path, Path::new(&dir));
            merge_component_files(&mut config.components, &dir)
                .with_context(|| format!("Failed to read components_dir {}", dir.display()))?;
        }

        Ok(config)
    }

    /// Load configuration from file or create with default values.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => {
                let mut c = Self::default();
                normalize_home_dir(&mut c.runtime)
                    .context("Failed to resolve runtime.home_dir (defaults)")?;
                Ok(c)
            }
        }
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    pub fn home_dir(&self) -> &Path {
        Path::new(&self.runtime.home_dir)
    }
}

fn normalize_home_dir(runtime: &mut RuntimeConfig) -> Result<()> {
    let configured = Some(runtime.home_dir.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let resolved: PathBuf = resolve_home_dir(configured, DEFAULT_SUBDIR, true)?;
    runtime.home_dir = resolved.to_string_lossy().into_owned();
    Ok(())
}

/// Relative `dir` values are taken from the config file's directory.
fn relative_to(config_path: &Path, dir: &Path) -> PathBuf {
    if dir.is_absolute() {
        return dir.to_path_buf();
    }
    config_path
        .parent()
        .map(|p| p.join(dir))
        .unwrap_or_else(|| dir.to_path_buf())
}

/// Every `<name>.yaml`/`<name>.yml` in `dir` becomes the section of component
/// `<name>`, replacing any inline section.
fn merge_component_files(
    bag: &mut HashMap<String, serde_json::Value>,
    dir: &Path,
) -> Result<()> {
    use std::fs;

    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_yaml = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|e| e.eq_ignore_ascii_case("yml") || e.eq_ignore_ascii_case("yaml"))
            .unwrap_or(false);
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !is_yaml {
            continue;
        }
        let raw = fs::read_to_string(&path)?;
        let val: serde_yaml::Value = serde_yaml::from_str(&raw)
            .with_context(|| format!("Invalid YAML in {}", path.display()))?;
        bag.insert(name.to_string(), serde_json::to_value(val)?);
    }
    Ok(())
}
