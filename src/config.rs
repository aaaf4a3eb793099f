use std::path::{Path, PathBuf};
use std::time::Duration;

use facet::Facet;

use crate::error::VbmError;
use crate::facade::FacadeConfig;
use crate::paths;
use crate::request::{CreateDefaults, DiskFormat};

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Config {
    #[facet(default)]
    pub tool: ToolConfig,
    #[facet(default)]
    pub defaults: DefaultsConfig,
    #[facet(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct ToolConfig {
    /// Binary name or path; bare names are looked up on `PATH`.
    #[facet(default = "VBoxManage")]
    pub path: String,
    #[facet(default = 30)]
    pub timeout_s: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            path: "VBoxManage".into(),
            timeout_s: 30,
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct DefaultsConfig {
    #[facet(default = "Other_64")]
    pub os_type: String,
    #[facet(default = "VDI")]
    pub disk_format: String,
    #[facet(default = "eth0")]
    pub bridge_adapter: String,
    #[facet(default = "vboxnet0")]
    pub hostonly_adapter: String,
    #[facet(default)]
    pub disk_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            os_type: "Other_64".into(),
            disk_format: "VDI".into(),
            bridge_adapter: "eth0".into(),
            hostonly_adapter: "vboxnet0".into(),
            disk_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct LoggingConfig {
    /// Append debug logs to this file. Empty disables file logging.
    #[facet(default)]
    pub file: String,
}

impl Config {
    /// Apply command-line overrides and re-validate.
    pub fn with_overrides(
        mut self,
        tool: Option<&Path>,
        timeout_s: Option<u64>,
    ) -> Result<Self, VbmError> {
        if let Some(tool) = tool {
            self.tool.path = tool.display().to_string();
        }
        if let Some(timeout_s) = timeout_s {
            self.tool.timeout_s = timeout_s;
        }
        validate_config(&self)?;
        Ok(self)
    }

    /// Log file from `[logging] file`, if set.
    pub fn log_file(&self) -> Option<PathBuf> {
        let file = self.logging.file.trim();
        (!file.is_empty()).then(|| PathBuf::from(file))
    }

    pub fn facade_config(&self) -> Result<FacadeConfig, VbmError> {
        let disk_format = self
            .defaults
            .disk_format
            .parse::<DiskFormat>()
            .map_err(|message| VbmError::Validation { message })?;
        let disk_dir = self.defaults.disk_dir.trim();

        Ok(FacadeConfig {
            tool: PathBuf::from(&self.tool.path),
            timeout: Duration::from_secs(self.tool.timeout_s),
            defaults: CreateDefaults {
                os_type: self.defaults.os_type.clone(),
                disk_format,
                bridge_adapter: self.defaults.bridge_adapter.clone(),
                hostonly_adapter: self.defaults.hostonly_adapter.clone(),
                disk_dir: (!disk_dir.is_empty()).then(|| PathBuf::from(disk_dir)),
            },
        })
    }
}

// ── validation ────────────────────────────────────────────

fn validate_config(config: &Config) -> Result<(), VbmError> {
    if config.tool.path.trim().is_empty() {
        return Err(VbmError::Validation {
            message: "tool.path must not be empty".into(),
        });
    }
    if config.tool.timeout_s < 1 {
        return Err(VbmError::Validation {
            message: "tool.timeout_s must be at least 1".into(),
        });
    }
    if config.defaults.os_type.trim().is_empty() {
        return Err(VbmError::Validation {
            message: "defaults.os_type must not be empty".into(),
        });
    }
    if let Err(e) = config.defaults.disk_format.parse::<DiskFormat>() {
        return Err(VbmError::Validation {
            message: format!("defaults.disk_format: {e}"),
        });
    }
    for (key, value) in [
        ("defaults.bridge_adapter", &config.defaults.bridge_adapter),
        ("defaults.hostonly_adapter", &config.defaults.hostonly_adapter),
    ] {
        if value.trim().is_empty() {
            return Err(VbmError::Validation {
                message: format!("{key} must not be empty"),
            });
        }
    }
    let disk_dir = config.defaults.disk_dir.trim();
    if !disk_dir.is_empty() && !Path::new(disk_dir).is_absolute() {
        return Err(VbmError::Validation {
            message: format!("defaults.disk_dir must be absolute (got '{disk_dir}')"),
        });
    }
    Ok(())
}

// ── public API ────────────────────────────────────────────

pub fn parse_config(contents: &str, path: &Path) -> Result<Config, VbmError> {
    let config: Config = facet_toml::from_str(contents).map_err(|e| VbmError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Load the config file.
///
/// An explicit path must exist. Without one, the per-user file is read when
/// present and built-in defaults are used otherwise.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, VbmError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = paths::config_file();
            if !path.exists() {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Config::default());
            }
            path
        }
    };

    let contents = std::fs::read_to_string(&path).map_err(|source| VbmError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "loaded config");
    parse_config(&contents, &path)
}
