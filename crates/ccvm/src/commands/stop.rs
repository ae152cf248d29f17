//! Stop command implementation

use super::CommandContext;
use anyhow::{Context, Result};
use ccvm_core::naming::ChaincodeId;
use ccvm_core::StopOptions;
use tracing::instrument;

/// Stop command arguments
#[derive(Debug, Clone)]
pub struct StopArgs {
    pub ccid: ChaincodeId,
    /// Grace period in seconds
    pub timeout: u32,
    pub kill: bool,
    pub remove: bool,
}

#[instrument(skip(ctx))]
pub async fn execute_stop(ctx: &CommandContext, args: StopArgs) -> Result<()> {
    let opts = StopOptions {
        timeout: args.timeout,
        kill: args.kill,
        remove: args.remove,
    };

    ctx.controller()
        .stop(&args.ccid, opts)
        .await
        .with_context(|| format!("Failed to stop {}", args.ccid))
}
