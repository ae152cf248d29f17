//! Start command implementation
//!
//! Host files given as `SRC:DEST` are read up front and copied into the
//! container at `DEST` before it starts. When a code package is supplied it
//! backs the image rebuild if the engine no longer has the image. With output
//! capture configured the command follows the container until it exits,
//! unless `--detach` is given.

use super::CommandContext;
use anyhow::{bail, Context, Result};
use ccvm_core::build_context::{Builder, Platform};
use ccvm_core::naming::ChaincodeId;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Start command arguments
#[derive(Debug, Clone)]
pub struct StartArgs {
    pub ccid: ChaincodeId,
    /// Code package for the rebuild path
    pub package: Option<PathBuf>,
    pub platform: Platform,
    /// `SRC:DEST` file copies
    pub files: Vec<String>,
    /// `KEY=VALUE` environment
    pub env: Vec<String>,
    /// Return without waiting for captured output
    pub detach: bool,
    /// Container command
    pub args: Vec<String>,
}

#[instrument(skip(ctx))]
pub async fn execute_start(ctx: &CommandContext, args: StartArgs) -> Result<()> {
    validate_env(&args.env)?;
    let files = read_files(&args.files)?;
    let vm = ctx.controller();

    let builder = match &args.package {
        Some(path) => {
            let package = ctx.read_package(&args.ccid, path, args.platform)?;
            Some(vm.package_builder(package))
        }
        None => None,
    };

    vm.start(
        &args.ccid,
        &args.args,
        &args.env,
        &files,
        builder.as_ref().map(|b| b as &dyn Builder),
    )
    .await
    .with_context(|| format!("Failed to start {}", args.ccid))?;

    if vm.client().pending_followers() == 0 {
        return Ok(());
    }
    if args.detach {
        warn!(
            "Output capture for {} stops when ccvm exits; omit --detach to follow it",
            args.ccid
        );
        return Ok(());
    }

    info!("Following output of {} until it exits", args.ccid);
    vm.client().wait_for_output().await;
    Ok(())
}

/// Parse `SRC:DEST` specs and load each source file
fn read_files(specs: &[String]) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();
    for spec in specs {
        let (source, dest) = parse_file_spec(spec)?;
        let data = std::fs::read(source)
            .with_context(|| format!("Failed to read {}", source.display()))?;
        debug!("Staging {} ({} bytes) for {}", source.display(), data.len(), dest);
        files.insert(dest.to_string(), data);
    }
    Ok(files)
}

fn parse_file_spec(spec: &str) -> Result<(&Path, &str)> {
    let Some((source, dest)) = spec.rsplit_once(':') else {
        bail!("Invalid --file '{}': expected SRC:DEST", spec);
    };
    if source.is_empty() {
        bail!("Invalid --file '{}': empty source path", spec);
    }
    if !dest.starts_with('/') || dest.len() < 2 {
        bail!(
            "Invalid --file '{}': destination must be an absolute file path",
            spec
        );
    }
    Ok((Path::new(source), dest))
}

fn validate_env(env: &[String]) -> Result<()> {
    for var in env {
        match var.split_once('=') {
            Some((key, _)) if !key.is_empty() => {}
            _ => bail!("Invalid --env '{}': expected KEY=VALUE", var),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_file_spec() {
        let (source, dest) = parse_file_spec("certs/peer.pem:/etc/peer.pem").unwrap();
        assert_eq!(source, Path::new("certs/peer.pem"));
        assert_eq!(dest, "/etc/peer.pem");

        assert!(parse_file_spec("no-separator").is_err());
        assert!(parse_file_spec(":/etc/x").is_err());
        assert!(parse_file_spec("a:relative/dest").is_err());
        assert!(parse_file_spec("a:/").is_err());
    }

    #[test]
    fn test_read_files() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("peer.pem");
        std::fs::write(&source, b"cert").unwrap();

        let spec = format!("{}:/etc/hyperledger/peer.pem", source.display());
        let files = read_files(&[spec]).unwrap();
        assert_eq!(files["/etc/hyperledger/peer.pem"], b"cert".to_vec());

        let missing = format!("{}:/etc/x", temp_dir.path().join("nope").display());
        assert!(read_files(&[missing]).is_err());
    }

    #[test]
    fn test_validate_env() {
        assert!(validate_env(&["A=1".to_string(), "B=".to_string()]).is_ok());
        assert!(validate_env(&["NOVALUE".to_string()]).is_err());
        assert!(validate_env(&["=1".to_string()]).is_err());
    }
}
