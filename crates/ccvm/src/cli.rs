use crate::commands::{self, CommandContext};
use anyhow::{Context, Result};
use ccvm_core::build_context::Platform;
use ccvm_core::config::VmConfig;
use ccvm_core::controller::DEFAULT_STOP_TIMEOUT;
use ccvm_core::logging;
use ccvm_core::naming::{ChaincodeId, ScopeId};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

/// Log format options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log level options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Chaincode language of a code package
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum Lang {
    Golang,
    Node,
    Java,
    Binary,
}

impl From<Lang> for Platform {
    fn from(lang: Lang) -> Self {
        match lang {
            Lang::Golang => Platform::Golang,
            Lang::Node => Platform::Node,
            Lang::Java => Platform::Java,
            Lang::Binary => Platform::Binary,
        }
    }
}

/// Chaincode instance selector shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct ChaincodeArgs {
    /// Chaincode name
    #[arg(long, value_name = "NAME")]
    pub name: String,

    /// Chaincode version
    #[arg(long = "version", value_name = "VERSION", default_value = "")]
    pub cc_version: String,
}

impl ChaincodeArgs {
    pub fn ccid(&self) -> ChaincodeId {
        ChaincodeId::new(self.name.clone(), self.cc_version.clone())
    }
}

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version,
    about = "Chaincode container lifecycle controller",
    long_about = "Chaincode container lifecycle controller\n\nBuilds, starts, stops and removes sandboxed chaincode containers on a local container engine.",
    color = clap::ColorChoice::Auto
)]
pub struct Cli {
    /// Log format (text or json, defaults to text, can be set via CCVM_LOG_FORMAT env var)
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log level (ignored when CCVM_LOG or RUST_LOG is set)
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Controller configuration file (JSON5, or TOML by extension)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Network the controller is scoped to
    #[arg(long, global = true, value_name = "ID", default_value = "")]
    pub network_id: String,

    /// Peer the controller is scoped to
    #[arg(long, global = true, value_name = "ID", default_value = "")]
    pub peer_id: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the VM name and the engine name of a chaincode
    Name {
        #[command(flatten)]
        chaincode: ChaincodeArgs,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Build the chaincode image from a code package
    Deploy {
        #[command(flatten)]
        chaincode: ChaincodeArgs,

        /// Gzipped tar of the chaincode
        #[arg(long, value_name = "FILE")]
        package: PathBuf,

        /// Chaincode language
        #[arg(long, value_enum, default_value = "golang")]
        lang: Lang,
    },

    /// Create and start the chaincode container
    Start {
        #[command(flatten)]
        chaincode: ChaincodeArgs,

        /// Code package used to rebuild the image if the engine lost it
        #[arg(long, value_name = "FILE")]
        package: Option<PathBuf>,

        /// Chaincode language of --package
        #[arg(long, value_enum, default_value = "golang")]
        lang: Lang,

        /// Copy a host file into the container (repeatable)
        #[arg(long = "file", value_name = "SRC:DEST")]
        files: Vec<String>,

        /// Container environment variable (repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Return once the container is running instead of following its
        /// output until it exits (only relevant with attachStdout)
        #[arg(long)]
        detach: bool,

        /// Container command arguments
        #[arg(last = true, value_name = "ARGS")]
        args: Vec<String>,
    },

    /// Stop, and optionally kill and remove, the chaincode container
    Stop {
        #[command(flatten)]
        chaincode: ChaincodeArgs,

        /// Grace period in seconds
        #[arg(long, default_value_t = DEFAULT_STOP_TIMEOUT)]
        timeout: u32,

        /// Kill the container after the graceful stop
        #[arg(long)]
        kill: bool,

        /// Remove the container afterwards
        #[arg(long)]
        remove: bool,
    },

    /// Remove the chaincode image
    Destroy {
        #[command(flatten)]
        chaincode: ChaincodeArgs,

        /// Remove even when stopped containers reference the image
        #[arg(long)]
        force: bool,

        /// Also delete untagged parent layers
        #[arg(long)]
        prune: bool,
    },
}

impl Cli {
    pub async fn dispatch(self) -> Result<()> {
        let log_format = match self.log_format {
            Some(LogFormat::Text) => Some("text"),
            Some(LogFormat::Json) => Some("json"),
            None => None,
        };

        // environment filters win over the flag
        let env_filter_set =
            std::env::var_os(logging::ENV_LOG).is_some() || std::env::var_os("RUST_LOG").is_some();
        let log_level = self.log_level.as_str();
        let level_directive = format!("ccvm={},ccvm_core={}", log_level, log_level);
        logging::init(
            log_format,
            (!env_filter_set).then_some(level_directive.as_str()),
        )?;
        tracing::debug!("CLI initialized with log level: {}", log_level);

        let config = match &self.config {
            Some(path) => VmConfig::load_from_path(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => VmConfig::from_env().context("Failed to load configuration")?,
        };
        let ctx = CommandContext {
            scope: ScopeId::new(self.network_id, self.peer_id),
            config: Arc::new(config),
        };

        match self.command {
            Commands::Name { chaincode, json } => {
                commands::name::execute_name(&ctx, commands::name::NameArgs {
                    ccid: chaincode.ccid(),
                    json,
                })
            }
            Commands::Deploy {
                chaincode,
                package,
                lang,
            } => {
                commands::deploy::execute_deploy(
                    &ctx,
                    commands::deploy::DeployArgs {
                        ccid: chaincode.ccid(),
                        package,
                        platform: lang.into(),
                    },
                )
                .await
            }
            Commands::Start {
                chaincode,
                package,
                lang,
                files,
                env,
                detach,
                args,
            } => {
                commands::start::execute_start(
                    &ctx,
                    commands::start::StartArgs {
                        ccid: chaincode.ccid(),
                        package,
                        platform: lang.into(),
                        files,
                        env,
                        detach,
                        args,
                    },
                )
                .await
            }
            Commands::Stop {
                chaincode,
                timeout,
                kill,
                remove,
            } => {
                commands::stop::execute_stop(
                    &ctx,
                    commands::stop::StopArgs {
                        ccid: chaincode.ccid(),
                        timeout,
                        kill,
                        remove,
                    },
                )
                .await
            }
            Commands::Destroy {
                chaincode,
                force,
                prune,
            } => {
                commands::destroy::execute_destroy(
                    &ctx,
                    commands::destroy::DestroyArgs {
                        ccid: chaincode.ccid(),
                        force,
                        prune,
                    },
                )
                .await
            }
        }
    }
}
