//! Destroy command implementation

use super::CommandContext;
use anyhow::{Context, Result};
use ccvm_core::naming::ChaincodeId;
use tracing::instrument;

/// Destroy command arguments
#[derive(Debug, Clone)]
pub struct DestroyArgs {
    pub ccid: ChaincodeId,
    /// Remove even when stopped containers reference the image
    pub force: bool,
    /// Delete untagged parent layers
    pub prune: bool,
}

#[instrument(skip(ctx))]
pub async fn execute_destroy(ctx: &CommandContext, args: DestroyArgs) -> Result<()> {
    ctx.controller()
        .destroy(&args.ccid, args.force, args.prune)
        .await
        .with_context(|| format!("Failed to destroy {}", args.ccid))
}
