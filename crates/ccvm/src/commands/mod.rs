//! Command implementations
//!
//! Each subcommand builds a controller from the shared [`CommandContext`] and
//! runs one lifecycle operation against the local engine.

pub mod deploy;
pub mod destroy;
pub mod name;
pub mod start;
pub mod stop;

use anyhow::{Context, Result};
use ccvm_core::build_context::{CodePackage, Platform};
use ccvm_core::config::VmConfig;
use ccvm_core::docker::CliDocker;
use ccvm_core::naming::{ChaincodeId, ScopeId};
use ccvm_core::DockerVm;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Settings shared by every subcommand
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub scope: ScopeId,
    pub config: Arc<VmConfig>,
}

impl CommandContext {
    /// Controller bound to the configured engine CLI
    pub fn controller(&self) -> DockerVm<CliDocker> {
        DockerVm::new(
            self.scope.clone(),
            Arc::clone(&self.config),
            CliDocker::from_config(&self.config),
        )
    }

    /// Read a code package from disk, honoring the size ceiling
    pub fn read_package(
        &self,
        ccid: &ChaincodeId,
        path: &Path,
        platform: Platform,
    ) -> Result<CodePackage> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open code package {}", path.display()))?;
        let package =
            CodePackage::from_reader(ccid.clone(), platform, file, self.config.max_package_size)
                .with_context(|| format!("Failed to read code package {}", path.display()))?;
        Ok(package)
    }
}
