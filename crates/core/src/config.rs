//! Controller configuration
//!
//! [`VmConfig`] is read once, either from a JSON5/TOML file or from defaults,
//! then adjusted by `CCVM_VM_DOCKER_*` environment overrides. It is immutable
//! afterwards and shared by every lifecycle operation. [`HostConfig`] is the
//! resource policy applied to every container the controller creates.

use crate::errors::{CcvmError, ConfigError, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, instrument};

pub const ENV_NETWORK_MODE: &str = "CCVM_VM_DOCKER_HOSTCONFIG_NETWORKMODE";
pub const ENV_MEMORY: &str = "CCVM_VM_DOCKER_HOSTCONFIG_MEMORY";
pub const ENV_CPU_SHARES: &str = "CCVM_VM_DOCKER_HOSTCONFIG_CPUSHARES";
pub const ENV_ATTACH_STDOUT: &str = "CCVM_VM_DOCKER_ATTACHSTDOUT";
pub const ENV_DOCKER_PATH: &str = "CCVM_VM_DOCKER_PATH";

/// Default ceiling for code packages (100 MiB)
pub const DEFAULT_MAX_PACKAGE_SIZE: u64 = 100 * 1024 * 1024;

static GLOBAL: OnceCell<VmConfig> = OnceCell::new();

/// Container log driver settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(rename = "type")]
    pub driver: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        let mut config = BTreeMap::new();
        config.insert("max-size".to_string(), "50m".to_string());
        config.insert("max-file".to_string(), "5".to_string());
        Self {
            driver: "json-file".to_string(),
            config,
        }
    }
}

/// Host resource policy applied to every chaincode container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostConfig {
    /// Network namespace mode (`host`, `bridge`, a named network, ...)
    pub network_mode: String,
    /// Memory limit in bytes, 0 for unlimited
    pub memory: i64,
    /// Relative CPU weight, 0 for the engine default
    pub cpu_shares: i64,
    /// CFS quota in microseconds, 0 for unset
    pub cpu_quota: i64,
    /// CFS period in microseconds, 0 for unset
    pub cpu_period: i64,
    /// DNS servers for the container
    pub dns: Vec<String>,
    pub privileged: bool,
    pub log_config: LogConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            network_mode: "host".to_string(),
            memory: 2_147_483_648,
            cpu_shares: 0,
            cpu_quota: 0,
            cpu_period: 0,
            dns: Vec::new(),
            privileged: false,
            log_config: LogConfig::default(),
        }
    }
}

impl HostConfig {
    /// Render as `docker create` flags
    pub fn to_docker_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if !self.network_mode.is_empty() {
            args.push("--network".to_string());
            args.push(self.network_mode.clone());
        }
        if self.memory > 0 {
            args.push("--memory".to_string());
            args.push(self.memory.to_string());
        }
        if self.cpu_shares > 0 {
            args.push("--cpu-shares".to_string());
            args.push(self.cpu_shares.to_string());
        }
        if self.cpu_quota > 0 {
            args.push("--cpu-quota".to_string());
            args.push(self.cpu_quota.to_string());
        }
        if self.cpu_period > 0 {
            args.push("--cpu-period".to_string());
            args.push(self.cpu_period.to_string());
        }
        for server in &self.dns {
            args.push("--dns".to_string());
            args.push(server.clone());
        }
        if self.privileged {
            args.push("--privileged".to_string());
        }
        if !self.log_config.driver.is_empty() {
            args.push("--log-driver".to_string());
            args.push(self.log_config.driver.clone());
            for (key, value) in &self.log_config.config {
                args.push("--log-opt".to_string());
                args.push(format!("{}={}", key, value));
            }
        }

        args
    }
}

/// Base runtime image per chaincode platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeImages {
    pub golang: String,
    pub node: String,
    pub java: String,
    pub binary: String,
}

impl Default for RuntimeImages {
    fn default() -> Self {
        Self {
            golang: "hyperledger/fabric-baseos:latest".to_string(),
            node: "hyperledger/fabric-nodeenv:latest".to_string(),
            java: "hyperledger/fabric-javaenv:latest".to_string(),
            binary: "hyperledger/fabric-baseos:latest".to_string(),
        }
    }
}

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VmConfig {
    /// Engine CLI binary
    pub docker_path: String,
    /// Capture container stdout/stderr on Start
    pub attach_stdout: bool,
    /// Largest accepted code package, in bytes
    pub max_package_size: u64,
    pub runtime_images: RuntimeImages,
    pub host_config: HostConfig,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            docker_path: "docker".to_string(),
            attach_stdout: false,
            max_package_size: DEFAULT_MAX_PACKAGE_SIZE,
            runtime_images: RuntimeImages::default(),
            host_config: HostConfig::default(),
        }
    }
}

impl VmConfig {
    /// Load a configuration file then apply environment overrides
    ///
    /// Files ending in `.toml` are parsed as TOML, anything else as JSON5.
    #[instrument]
    pub fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading controller configuration from {}", path.display());

        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let mut config: VmConfig = if is_toml {
            toml::from_str(&content).map_err(|e| ConfigError::Parsing {
                message: format!("TOML parsing error: {}", e),
            })?
        } else {
            json5::from_str(&content).map_err(|e| ConfigError::Parsing {
                message: format!("JSON parsing error: {}", e),
            })?
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Process-wide configuration, computed on first use
    ///
    /// Concurrent first callers observe a single initialization; the value
    /// never changes afterwards.
    pub fn global() -> Result<&'static VmConfig> {
        GLOBAL.get_or_try_init(Self::from_env)
    }

    /// Apply `CCVM_VM_DOCKER_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup(ENV_NETWORK_MODE) {
            debug!(network_mode = %mode, "Overriding network mode from environment");
            self.host_config.network_mode = mode;
        }
        if let Some(raw) = lookup(ENV_MEMORY) {
            self.host_config.memory = parse_number(ENV_MEMORY, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CPU_SHARES) {
            self.host_config.cpu_shares = parse_number(ENV_CPU_SHARES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_ATTACH_STDOUT) {
            self.attach_stdout = parse_bool(ENV_ATTACH_STDOUT, &raw)?;
        }
        if let Some(path) = lookup(ENV_DOCKER_PATH) {
            self.docker_path = path;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.docker_path.trim().is_empty() {
            return Err(validation("dockerPath must not be empty"));
        }
        if self.max_package_size == 0 {
            return Err(validation("maxPackageSize must be greater than zero"));
        }
        if self.host_config.memory < 0 || self.host_config.cpu_shares < 0 {
            return Err(validation("hostConfig limits must not be negative"));
        }
        Ok(())
    }
}

fn validation(message: &str) -> CcvmError {
    ConfigError::Validation {
        message: message.to_string(),
    }
    .into()
}

fn parse_number(key: &str, raw: &str) -> Result<i64> {
    raw.trim().parse::<i64>().map_err(|e| {
        ConfigError::Validation {
            message: format!("{} must be an integer, got '{}': {}", key, raw, e),
        }
        .into()
    })
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => Err(ConfigError::Validation {
            message: format!("{} must be a boolean, got '{}'", key, other),
        }
        .into()),
    }
}
