//! Configuration management for the Spadecs runtime host.
//!
//! Settings are loaded from a TOML file. A missing file is created with the
//! defaults so a fresh deployment starts with an editable template.

use clr_bridge::locator::{ENV_ARCH_HOME, ENV_RUNTIME_VERSION};
use clr_bridge::{HostEnvironment, HostLoader, RuntimeVersion};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Valid values for `logging.level`.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Bootstrap assembly path cannot be empty")]
    EmptyAssemblyPath,

    #[error("Entry type and entry point names cannot be empty")]
    EmptyEntryPoint,

    #[error("Invalid minimum runtime version: {0}")]
    InvalidMinVersion(String),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Managed bootstrapper settings
    pub bootstrap: BootstrapSettings,
    /// Runtime selection settings
    #[serde(default)]
    pub runtime: RuntimeSettings,
    /// Where the game-server event imports live
    #[serde(default)]
    pub imports: ImportSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// The managed assembly that receives the binding map at load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapSettings {
    /// Path of `Spadecs.Boot.dll`
    pub assembly_path: String,
    #[serde(default = "default_bootstrap_identity")]
    pub assembly_identity: String,
    #[serde(default = "default_entry_type")]
    pub entry_type: String,
    #[serde(default = "default_load_method")]
    pub load_method: String,
    #[serde(default = "default_unload_method")]
    pub unload_method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Lowest acceptable `major.minor.build`
    #[serde(default = "default_min_version")]
    pub min_version: String,
    /// Runtime root directory. Takes precedence over the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// Exact runtime version to use, skipping the installed-runtime scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSettings {
    #[serde(default = "default_imports_identity")]
    pub assembly_identity: String,
    #[serde(default = "default_event_type")]
    pub event_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub level: String,
    /// JSON formatting
    #[serde(default)]
    pub json_format: bool,
}

fn default_bootstrap_identity() -> String {
    "Spadecs.Boot, Version=1.0.0.0".to_string()
}

fn default_entry_type() -> String {
    "Spadecs.Bootstrapper".to_string()
}

fn default_load_method() -> String {
    "OnLoad".to_string()
}

fn default_unload_method() -> String {
    "OnUnload".to_string()
}

fn default_min_version() -> String {
    RuntimeVersion::default().to_string()
}

fn default_imports_identity() -> String {
    "Spadecs, Version=1.0.0.0".to_string()
}

fn default_event_type() -> String {
    "Spadecs.EventManager".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            min_version: default_min_version(),
            root: None,
            version: None,
        }
    }
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            assembly_identity: default_imports_identity(),
            event_type: default_event_type(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bootstrap: BootstrapSettings {
                assembly_path: "dotnet/net5.0/Spadecs.Boot.dll".to_string(),
                assembly_identity: default_bootstrap_identity(),
                entry_type: default_entry_type(),
                load_method: default_load_method(),
                unload_method: default_unload_method(),
            },
            runtime: RuntimeSettings::default(),
            imports: ImportSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file, writing the defaults if it does not exist.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bootstrap.assembly_path.trim().is_empty() {
            return Err(ConfigError::EmptyAssemblyPath);
        }

        let entry_points = [
            &self.bootstrap.entry_type,
            &self.bootstrap.load_method,
            &self.bootstrap.unload_method,
            &self.imports.event_type,
        ];
        if entry_points.iter().any(|name| name.trim().is_empty()) {
            return Err(ConfigError::EmptyEntryPoint);
        }

        self.min_version()?;

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    pub fn min_version(&self) -> Result<RuntimeVersion, ConfigError> {
        self.runtime
            .min_version
            .parse()
            .map_err(|_| ConfigError::InvalidMinVersion(self.runtime.min_version.clone()))
    }

    /// `base` with the configured runtime overrides applied on top.
    ///
    /// The root override is placed in the highest precedence variable so it
    /// wins over anything the process environment sets.
    pub fn environment(&self, mut base: HostEnvironment) -> HostEnvironment {
        if let Some(root) = &self.runtime.root {
            base.set_var(ENV_ARCH_HOME, root.as_str());
        }
        if let Some(version) = &self.runtime.version {
            base.set_var(ENV_RUNTIME_VERSION, version.as_str());
        }
        base
    }

    /// Builds the host loader for the bootstrap assembly.
    pub fn host_loader(&self) -> Result<HostLoader, ConfigError> {
        let loader = HostLoader::new(
            &self.bootstrap.assembly_path,
            &self.bootstrap.assembly_identity,
            &self.bootstrap.entry_type,
        )
        .with_min_version(self.min_version()?)
        .with_entry_points(&self.bootstrap.load_method, &self.bootstrap.unload_method);
        let environment = self.environment(loader.environment.clone());
        Ok(loader.with_environment(environment))
    }
}
