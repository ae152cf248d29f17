//! Name command implementation
//!
//! Prints the case-preserving VM name and the derived engine name of a
//! chaincode. Needs no container engine.

use super::CommandContext;
use anyhow::Result;
use ccvm_core::naming::ChaincodeId;
use serde::Serialize;
use tracing::instrument;

/// Name command arguments
#[derive(Debug, Clone)]
pub struct NameArgs {
    pub ccid: ChaincodeId,
    /// Emit JSON on stdout
    pub json: bool,
}

/// JSON output of the name command
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NameResult {
    pub vm_name: String,
    pub docker_name: String,
}

#[instrument(skip(ctx))]
pub fn execute_name(ctx: &CommandContext, args: NameArgs) -> Result<()> {
    let vm = ctx.controller();
    let result = NameResult {
        vm_name: vm.get_vm_name(&args.ccid),
        docker_name: vm.get_vm_name_for_docker(&args.ccid)?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("VM name:     {}", result.vm_name);
        println!("Docker name: {}", result.docker_name);
    }
    Ok(())
}
