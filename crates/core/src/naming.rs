//! Chaincode identity and deterministic engine naming
//!
//! Image tags and container names are derived from the controller scope
//! (network and peer) plus the chaincode name and version. The derived name is
//! a normalized, engine-safe prefix followed by the SHA-256 of the prefix as it
//! was *before* normalization, so identities that differ only in case or in
//! characters the engine rejects still map to distinct names.

use crate::errors::VmError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, instrument};

/// Label keys stamped on images built by this controller
pub const LABEL_CHAINCODE_NAME: &str = "io.ccvm.chaincode.name";
pub const LABEL_CHAINCODE_VERSION: &str = "io.ccvm.chaincode.version";
pub const LABEL_CHAINCODE_PLATFORM: &str = "io.ccvm.chaincode.platform";
pub const LABEL_VM_NAME: &str = "io.ccvm.vm.name";

/// Docker repository naming rule for the final derived name
static REPOSITORY_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+(([._-][a-z0-9]+)+)?$").expect("Valid regex pattern")
});

/// Identity of one chaincode instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChaincodeId {
    /// Chaincode name
    pub name: String,
    /// Chaincode version, may be empty
    #[serde(default)]
    pub version: String,
}

impl ChaincodeId {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// `name-version`, or just `name` when the version is empty
    pub fn canonical_name(&self) -> String {
        if self.version.is_empty() {
            self.name.clone()
        } else {
            format!("{}-{}", self.name, self.version)
        }
    }
}

impl fmt::Display for ChaincodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_name())
    }
}

/// Isolation namespace of one controller instance
///
/// Several peers (possibly of different networks) can share one engine; the
/// scope keeps their images and containers apart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId {
    #[serde(default)]
    pub network_id: String,
    #[serde(default)]
    pub peer_id: String,
}

impl ScopeId {
    pub fn new(network_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            peer_id: peer_id.into(),
        }
    }

    /// Human-readable, case-preserving name for a chaincode in this scope
    ///
    /// Empty scope components are omitted: `dev-peer0-mycc-1.0`,
    /// `peer1-mycc-1.0`, `dev-mycc-1.0`.
    pub fn vm_name(&self, ccid: &ChaincodeId) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        if !self.network_id.is_empty() {
            parts.push(&self.network_id);
        }
        if !self.peer_id.is_empty() {
            parts.push(&self.peer_id);
        }
        let name = ccid.canonical_name();
        parts.push(&name);
        parts.join("-")
    }

    /// Engine-safe derived name: normalized prefix plus digest of the raw prefix
    #[instrument(level = "debug", skip(self), fields(network = %self.network_id, peer = %self.peer_id))]
    pub fn docker_name(&self, ccid: &ChaincodeId) -> Result<String, VmError> {
        let raw = self.vm_name(ccid);
        if let Some(c) = raw.chars().find(|c| c.is_control()) {
            return Err(VmError::InvalidName {
                name: raw.escape_debug().to_string(),
                reason: format!("contains control character {:?}", c),
            });
        }

        let hash = sha256_hex(raw.as_bytes());
        let name = format!("{}-{}", normalize(&raw), hash);

        if !REPOSITORY_NAME.is_match(&name) {
            return Err(VmError::InvalidName {
                name,
                reason: format!(
                    "'{}' does not satisfy the repository name rule {}",
                    raw,
                    REPOSITORY_NAME.as_str()
                ),
            });
        }

        debug!(vm_name = %raw, docker_name = %name, "Derived engine name");
        Ok(name)
    }

    /// Image tag used by Deploy, the Start rebuild path and Destroy
    pub fn image_name(&self, ccid: &ChaincodeId) -> Result<String, VmError> {
        self.docker_name(ccid)
    }

    /// Container name used by Start and Stop
    pub fn container_name(&self, ccid: &ChaincodeId) -> Result<String, VmError> {
        self.docker_name(ccid)
    }
}

/// Lower-case and replace everything outside `[a-z0-9.-]` with `-`
fn normalize(raw: &str) -> String {
    raw.chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected(prefix: &str, raw: &str) -> String {
        format!("{}-{}", prefix, sha256_hex(raw.as_bytes()))
    }

    #[test]
    fn test_docker_name_basic() {
        let scope = ScopeId::new("dev", "peer0");
        let ccid = ChaincodeId::new("mycc", "0.0");
        assert_eq!(
            scope.docker_name(&ccid).unwrap(),
            expected("dev-peer0-mycc-0.0", "dev-peer0-mycc-0.0")
        );
    }

    #[test]
    fn test_docker_name_table() {
        let cases = [
            (
                ScopeId::new("dev", "peer0"),
                ChaincodeId::new("mycc", "1.0"),
                expected("dev-peer0-mycc-1.0", "dev-peer0-mycc-1.0"),
            ),
            (
                ScopeId::new("", "peer1"),
                ChaincodeId::new("mycc", "1.0"),
                expected("peer1-mycc-1.0", "peer1-mycc-1.0"),
            ),
            (
                ScopeId::new("Dev", "Peer0"),
                ChaincodeId::new("myCC", "1.0"),
                expected("dev-peer0-mycc-1.0", "Dev-Peer0-myCC-1.0"),
            ),
            (
                ScopeId::new("Dev$dev", "Peer*0"),
                ChaincodeId::new("myCC", "1.0"),
                expected("dev-dev-peer-0-mycc-1.0", "Dev$dev-Peer*0-myCC-1.0"),
            ),
            (
                ScopeId::new("dev", ""),
                ChaincodeId::new("mycc", "1.0"),
                expected("dev-mycc-1.0", "dev-mycc-1.0"),
            ),
            (
                ScopeId::new("dev", "peer0"),
                ChaincodeId::new("myCC", "1.0"),
                expected("dev-peer0-mycc-1.0", "dev-peer0-myCC-1.0"),
            ),
        ];

        for (scope, ccid, want) in cases {
            assert_eq!(scope.docker_name(&ccid).unwrap(), want, "{:?} {:?}", scope, ccid);
        }
    }

    #[test]
    fn test_case_variants_do_not_collide() {
        let lower = ScopeId::new("dev", "peer0")
            .docker_name(&ChaincodeId::new("mycc", "1.0"))
            .unwrap();
        let upper = ScopeId::new("Dev", "Peer0")
            .docker_name(&ChaincodeId::new("myCC", "1.0"))
            .unwrap();

        assert!(lower.starts_with("dev-peer0-mycc-1.0-"));
        assert!(upper.starts_with("dev-peer0-mycc-1.0-"));
        assert_ne!(lower, upper);
    }

    #[test]
    fn test_docker_name_deterministic() {
        let scope = ScopeId::new("net", "peer9");
        let ccid = ChaincodeId::new("asset", "2.1");
        let first = scope.docker_name(&ccid).unwrap();
        for _ in 0..10 {
            assert_eq!(scope.docker_name(&ccid).unwrap(), first);
        }
        assert_eq!(scope.image_name(&ccid).unwrap(), first);
        assert_eq!(scope.container_name(&ccid).unwrap(), first);
    }

    #[test]
    fn test_vm_name_preserves_case() {
        let scope = ScopeId::new("Dev", "Peer0");
        assert_eq!(
            scope.vm_name(&ChaincodeId::new("myCC", "1.0")),
            "Dev-Peer0-myCC-1.0"
        );
    }

    #[test]
    fn test_vm_name_without_version() {
        let scope = ScopeId::default();
        assert_eq!(scope.vm_name(&ChaincodeId::new("simple", "")), "simple");
    }

    #[test]
    fn test_invalid_repository_name_rejected() {
        // consecutive separators survive normalization and violate the rule
        let scope = ScopeId::new("dev", "peer0");
        let err = scope
            .docker_name(&ChaincodeId::new("my..cc", "1.0"))
            .unwrap_err();
        assert!(matches!(err, VmError::InvalidName { .. }));
    }

    #[test]
    fn test_control_characters_rejected() {
        let scope = ScopeId::new("dev", "peer0");
        let err = scope
            .docker_name(&ChaincodeId::new("mycc\nRUN\tid", "1.0"))
            .unwrap_err();
        match err {
            VmError::InvalidName { name, reason } => {
                assert_eq!(name, "dev-peer0-mycc\\nRUN\\tid-1.0");
                assert!(reason.contains("control character"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(scope
            .docker_name(&ChaincodeId::new("mycc", "1.0\r"))
            .is_err());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("A_b c.D-1"), "a-b-c.d-1");
        assert_eq!(normalize("é"), "-");
    }
}
