//! Deploy command implementation

use super::CommandContext;
use anyhow::{Context, Result};
use ccvm_core::build_context::Platform;
use ccvm_core::naming::ChaincodeId;
use std::path::PathBuf;
use tracing::{info, instrument};

/// Deploy command arguments
#[derive(Debug, Clone)]
pub struct DeployArgs {
    pub ccid: ChaincodeId,
    /// Gzipped tar of the chaincode
    pub package: PathBuf,
    pub platform: Platform,
}

#[instrument(skip(ctx))]
pub async fn execute_deploy(ctx: &CommandContext, args: DeployArgs) -> Result<()> {
    let package = ctx.read_package(&args.ccid, &args.package, args.platform)?;
    let vm = ctx.controller();

    vm.deploy(&args.ccid, &package)
        .await
        .with_context(|| format!("Failed to deploy {}", args.ccid))?;

    info!("Deployed {} as {}", args.ccid, vm.get_vm_name_for_docker(&args.ccid)?);
    Ok(())
}
