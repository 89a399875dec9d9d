use std::fs;
use std::path::{Path, PathBuf};
use serde::Deserialize;
use crate::error::MigrationError;

pub const DEFAULT_CONFIG_FILE: &str = "cd-migrate.toml";

/// Settings read from `cd-migrate.toml`. Every field has a default, so an
/// empty or missing file is valid. Command line flags override these.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ToolConfig {
    #[serde(default = "default_tf_tool")]
    pub tf_tool: String,
    /// Parent of the per-run working directory. System temp dir when unset.
    #[serde(default)]
    pub work_root: Option<String>,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default)]
    pub compact: bool,
    #[serde(default)]
    pub keep_temp: bool,
    #[serde(default = "default_disable_triggers")]
    pub disable_triggers: bool,
    #[serde(default = "default_max_reported_failures")]
    pub max_reported_failures: usize,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_provider_version")]
    pub provider_version: String,
    #[serde(default)]
    pub name_seed: Option<u64>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            tf_tool: default_tf_tool(),
            work_root: None,
            output_dir: default_output_dir(),
            compact: false,
            keep_temp: false,
            disable_triggers: default_disable_triggers(),
            max_reported_failures: default_max_reported_failures(),
            api_key_env: default_api_key_env(),
            provider_version: default_provider_version(),
            name_seed: None,
        }
    }
}

impl ToolConfig {
    /// Loads `path`, or the defaults when it does not exist. Relative
    /// directories are resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self, MigrationError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| MigrationError::io(format!("Failed to read config file '{}'", path.display()), e))?;
        let mut config: ToolConfig = toml::from_str(&content).map_err(|e| MigrationError::Codec {
            file: path.display().to_string(),
            message: e.to_string(),
        })?;

        let base = path.parent().unwrap_or(Path::new("."));
        config.output_dir = resolve(base, &config.output_dir);
        config.work_root = config.work_root.map(|w| resolve(base, &w));
        Ok(config)
    }

    pub fn work_root(&self) -> PathBuf {
        self.work_root.as_ref().map(PathBuf::from).unwrap_or_else(std::env::temp_dir)
    }

    /// Reads the API key from the environment variable named by `api_key_env`.
    pub fn api_key(&self) -> Result<String, MigrationError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| MigrationError::external("Missing credentials", format!("set {} to an IBM Cloud API key", self.api_key_env)))
    }
}

fn resolve(base: &Path, dir: &str) -> String {
    if Path::new(dir).is_relative() {
        base.join(dir).to_string_lossy().into_owned()
    } else {
        dir.to_string()
    }
}

fn default_tf_tool() -> String { "terraform".to_string() }
fn default_output_dir() -> String { "migrated".to_string() }
fn default_disable_triggers() -> bool { true }
fn default_max_reported_failures() -> usize { 5 }
fn default_api_key_env() -> String { "IBMCLOUD_API_KEY".to_string() }
fn default_provider_version() -> String { ">= 1.70.0".to_string() }
