//! Build-context assembly for chaincode images
//!
//! A code package (a gzipped tar of the chaincode sources or binaries) is
//! wrapped together with a synthesized Dockerfile into the gzipped tar the
//! engine's image build consumes. Archives are produced fresh on every call and
//! never touch the disk. Entry metadata is fixed (mtime 0, root ownership,
//! mode 0644) so identical inputs yield byte-identical archives.

use crate::config::{RuntimeImages, VmConfig};
use crate::errors::AssemblyError;
use crate::naming::{
    ChaincodeId, LABEL_CHAINCODE_NAME, LABEL_CHAINCODE_PLATFORM, LABEL_CHAINCODE_VERSION,
    LABEL_VM_NAME,
};
use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use tracing::{debug, instrument};

/// File name of the code payload inside the build context
const PAYLOAD_ENTRY: &str = "code.tar.gz";
/// Where the payload is unpacked inside the image
const CHAINCODE_DIR: &str = "/usr/local/src/chaincode";

/// Chaincode language/runtime platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Golang,
    Node,
    Java,
    Binary,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Golang => "golang",
            Self::Node => "node",
            Self::Java => "java",
            Self::Binary => "binary",
        }
    }

    /// Base runtime image for this platform
    pub fn base_image<'a>(&self, images: &'a RuntimeImages) -> &'a str {
        match self {
            Self::Golang => &images.golang,
            Self::Node => &images.node,
            Self::Java => &images.java,
            Self::Binary => &images.binary,
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "golang" | "go" => Ok(Self::Golang),
            "node" | "nodejs" => Ok(Self::Node),
            "java" => Ok(Self::Java),
            "binary" => Ok(Self::Binary),
            _ => Err(format!(
                "Unknown platform: {}. Supported platforms: golang, node, java, binary",
                s
            )),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A chaincode code package as handed over by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePackage {
    pub ccid: ChaincodeId,
    pub platform: Platform,
    /// Gzipped tar of the chaincode payload
    pub payload: Vec<u8>,
}

impl CodePackage {
    pub fn new(ccid: ChaincodeId, platform: Platform, payload: Vec<u8>) -> Self {
        Self {
            ccid,
            platform,
            payload,
        }
    }

    /// Read a package, refusing to buffer more than `limit` bytes
    pub fn from_reader<R: Read>(
        ccid: ChaincodeId,
        platform: Platform,
        reader: R,
        limit: u64,
    ) -> std::result::Result<Self, AssemblyError> {
        let mut payload = Vec::new();
        reader
            .take(limit.saturating_add(1))
            .read_to_end(&mut payload)
            .map_err(|e| AssemblyError::Unreadable {
                message: e.to_string(),
            })?;

        if payload.len() as u64 > limit {
            return Err(AssemblyError::TooLarge {
                size: payload.len() as u64,
                limit,
            });
        }

        Ok(Self::new(ccid, platform, payload))
    }

    /// Check the identity, then emptiness, size and readability
    pub fn validate(&self, limit: u64) -> std::result::Result<(), AssemblyError> {
        for (field, value) in [("name", &self.ccid.name), ("version", &self.ccid.version)] {
            if value.chars().any(char::is_control) {
                return Err(AssemblyError::InvalidIdentity {
                    field,
                    value: value.clone(),
                });
            }
        }

        if self.payload.is_empty() {
            return Err(AssemblyError::Empty);
        }

        let size = self.payload.len() as u64;
        if size > limit {
            return Err(AssemblyError::TooLarge { size, limit });
        }

        let mut archive = tar::Archive::new(GzDecoder::new(self.payload.as_slice()));
        let entries = archive.entries().map_err(unreadable)?;
        let mut count = 0usize;
        for entry in entries {
            entry.map_err(unreadable)?;
            count += 1;
        }
        if count == 0 {
            return Err(AssemblyError::Empty);
        }

        Ok(())
    }
}

fn unreadable(e: std::io::Error) -> AssemblyError {
    AssemblyError::Unreadable {
        message: e.to_string(),
    }
}

/// Build context ready for the engine's image build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArchive {
    bytes: Vec<u8>,
}

impl BuildArchive {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Vec<u8>> for BuildArchive {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

/// Produces a fresh build archive on demand
///
/// Start uses this to rebuild an image the engine no longer has.
pub trait Builder {
    fn build(&self) -> std::result::Result<BuildArchive, AssemblyError>;
}

/// Turns code packages into build archives
#[derive(Debug, Clone)]
pub struct BuildContextAssembler {
    runtime_images: RuntimeImages,
    max_package_size: u64,
}

impl BuildContextAssembler {
    pub fn new(runtime_images: RuntimeImages, max_package_size: u64) -> Self {
        Self {
            runtime_images,
            max_package_size,
        }
    }

    pub fn from_config(config: &VmConfig) -> Self {
        Self::new(config.runtime_images.clone(), config.max_package_size)
    }

    /// Synthesize the Dockerfile for a package
    pub fn dockerfile(&self, package: &CodePackage, vm_name: &str) -> String {
        let ccid = &package.ccid;
        let mut dockerfile = String::new();

        dockerfile.push_str(&format!(
            "FROM {}\n",
            package.platform.base_image(&self.runtime_images)
        ));
        dockerfile.push_str(&format!(
            "LABEL {}={} \\\n      {}={} \\\n      {}={} \\\n      {}={}\n",
            LABEL_CHAINCODE_NAME,
            quote(&ccid.name),
            LABEL_CHAINCODE_VERSION,
            quote(&ccid.version),
            LABEL_CHAINCODE_PLATFORM,
            quote(package.platform.as_str()),
            LABEL_VM_NAME,
            quote(vm_name)
        ));
        dockerfile.push_str(&format!(
            "ENV CHAINCODE_NAME={} CHAINCODE_VERSION={}\n",
            quote(&ccid.name),
            quote(&ccid.version)
        ));
        dockerfile.push_str(&format!("ADD {} {}/\n", PAYLOAD_ENTRY, CHAINCODE_DIR));
        dockerfile.push_str(&format!("WORKDIR {}\n", CHAINCODE_DIR));

        dockerfile
    }

    /// Validate a package and wrap it with its Dockerfile
    #[instrument(skip(self, package), fields(ccid = %package.ccid, platform = %package.platform))]
    pub fn assemble(
        &self,
        package: &CodePackage,
        vm_name: &str,
    ) -> std::result::Result<BuildArchive, AssemblyError> {
        package.validate(self.max_package_size)?;

        let dockerfile = self.dockerfile(package, vm_name);
        let encoder = GzBuilder::new()
            .mtime(0)
            .write(Vec::new(), Compression::default());
        let mut tar_builder = tar::Builder::new(encoder);

        append_entry(&mut tar_builder, "Dockerfile", dockerfile.as_bytes())?;
        append_entry(&mut tar_builder, PAYLOAD_ENTRY, &package.payload)?;

        let bytes = tar_builder.into_inner()?.finish()?;
        debug!(
            "Assembled build context of {} bytes (payload {} bytes)",
            bytes.len(),
            package.payload.len()
        );

        Ok(BuildArchive::from(bytes))
    }
}

/// Append one regular file with fixed ownership and timestamps
pub(crate) fn append_entry<W: std::io::Write>(
    tar_builder: &mut tar::Builder<W>,
    path: &str,
    data: &[u8],
) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(path)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o100644);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("")?;
    header.set_groupname("")?;
    header.set_cksum();
    tar_builder.append(&header, data)
}

/// Double-quote a Dockerfile value
fn quote(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$");
    format!("\"{}\"", escaped)
}

/// [`Builder`] that assembles a fixed code package
#[derive(Debug, Clone)]
pub struct PackageBuilder {
    assembler: BuildContextAssembler,
    package: CodePackage,
    vm_name: String,
}

impl PackageBuilder {
    pub fn new(assembler: BuildContextAssembler, package: CodePackage, vm_name: String) -> Self {
        Self {
            assembler,
            package,
            vm_name,
        }
    }
}

impl Builder for PackageBuilder {
    fn build(&self) -> std::result::Result<BuildArchive, AssemblyError> {
        self.assembler.assemble(&self.package, &self.vm_name)
    }
}

/// Gzipped tar of `(path, contents)` pairs with fixed metadata
pub fn tar_gz(files: &[(&str, &[u8])]) -> std::io::Result<Vec<u8>> {
    let encoder = GzBuilder::new()
        .mtime(0)
        .write(Vec::new(), Compression::default());
    let mut tar_builder = tar::Builder::new(encoder);
    for (path, data) in files {
        append_entry(&mut tar_builder, path, data)?;
    }
    tar_builder.into_inner()?.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn package(payload: Vec<u8>) -> CodePackage {
        CodePackage::new(ChaincodeId::new("mycc", "1.0"), Platform::Golang, payload)
    }

    fn sample_payload() -> Vec<u8> {
        tar_gz(&[("src/main.go", b"package main\n".as_slice())]).unwrap()
    }

    fn read_entries(archive: &BuildArchive) -> BTreeMap<String, Vec<u8>> {
        let mut out = BTreeMap::new();
        let mut tar = tar::Archive::new(GzDecoder::new(archive.as_bytes()));
        for entry in tar.entries().unwrap() {
            let mut entry = entry.unwrap();
            assert_eq!(entry.header().mtime().unwrap(), 0);
            let path = entry.path().unwrap().to_string_lossy().to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            out.insert(path, data);
        }
        out
    }

    #[test]
    fn test_platform_from_str() {
        assert_eq!("GOLANG".parse::<Platform>().unwrap(), Platform::Golang);
        assert_eq!("nodejs".parse::<Platform>().unwrap(), Platform::Node);
        assert!("cobol".parse::<Platform>().is_err());
    }

    #[test]
    fn test_dockerfile_contents() {
        let assembler = BuildContextAssembler::from_config(&VmConfig::default());
        let dockerfile = assembler.dockerfile(&package(sample_payload()), "dev-peer0-mycc-1.0-abc");

        assert!(dockerfile.starts_with("FROM hyperledger/fabric-baseos:latest\n"));
        assert!(dockerfile.contains("io.ccvm.chaincode.name=\"mycc\""));
        assert!(dockerfile.contains("io.ccvm.chaincode.version=\"1.0\""));
        assert!(dockerfile.contains("io.ccvm.chaincode.platform=\"golang\""));
        assert!(dockerfile.contains("io.ccvm.vm.name=\"dev-peer0-mycc-1.0-abc\""));
        assert!(dockerfile.contains("ADD code.tar.gz /usr/local/src/chaincode/"));
    }

    #[test]
    fn test_dockerfile_base_image_per_platform() {
        let assembler = BuildContextAssembler::from_config(&VmConfig::default());
        let mut pkg = package(sample_payload());
        pkg.platform = Platform::Node;
        assert!(assembler
            .dockerfile(&pkg, "n")
            .starts_with("FROM hyperledger/fabric-nodeenv:latest"));
        pkg.platform = Platform::Java;
        assert!(assembler
            .dockerfile(&pkg, "n")
            .starts_with("FROM hyperledger/fabric-javaenv:latest"));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
        assert_eq!(quote("$HOME"), "\"\\$HOME\"");
    }

    #[test]
    fn test_assemble_contains_dockerfile_and_payload() {
        let assembler = BuildContextAssembler::from_config(&VmConfig::default());
        let payload = sample_payload();
        let archive = assembler.assemble(&package(payload.clone()), "vm").unwrap();

        let entries = read_entries(&archive);
        assert_eq!(entries.len(), 2);
        assert!(String::from_utf8_lossy(&entries["Dockerfile"]).starts_with("FROM "));
        assert_eq!(entries[PAYLOAD_ENTRY], payload);
    }

    #[test]
    fn test_assemble_is_deterministic() {
        let assembler = BuildContextAssembler::from_config(&VmConfig::default());
        let pkg = package(sample_payload());
        let first = assembler.assemble(&pkg, "vm").unwrap();
        let second = assembler.assemble(&pkg, "vm").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_package_rejected() {
        let assembler = BuildContextAssembler::from_config(&VmConfig::default());
        let err = assembler.assemble(&package(Vec::new()), "vm").unwrap_err();
        assert!(matches!(err, AssemblyError::Empty));
    }

    #[test]
    fn test_package_without_entries_rejected() {
        let assembler = BuildContextAssembler::from_config(&VmConfig::default());
        let err = assembler
            .assemble(&package(tar_gz(&[]).unwrap()), "vm")
            .unwrap_err();
        assert!(matches!(err, AssemblyError::Empty));
    }

    #[test]
    fn test_oversized_package_rejected() {
        let assembler = BuildContextAssembler::new(RuntimeImages::default(), 16);
        let err = assembler.assemble(&package(sample_payload()), "vm").unwrap_err();
        assert!(matches!(err, AssemblyError::TooLarge { limit: 16, .. }));
    }

    #[test]
    fn test_unreadable_package_rejected() {
        let assembler = BuildContextAssembler::from_config(&VmConfig::default());
        let err = assembler
            .assemble(&package(b"definitely not gzip".to_vec()), "vm")
            .unwrap_err();
        assert!(matches!(err, AssemblyError::Unreadable { .. }));
    }

    #[test]
    fn test_identity_with_line_breaks_rejected() {
        let assembler = BuildContextAssembler::from_config(&VmConfig::default());
        let pkg = CodePackage::new(
            ChaincodeId::new("mycc\nRUN\tid", "1.0"),
            Platform::Golang,
            sample_payload(),
        );
        let err = assembler.assemble(&pkg, "vm").unwrap_err();
        assert!(matches!(err, AssemblyError::InvalidIdentity { field: "name", .. }));

        let pkg = CodePackage::new(
            ChaincodeId::new("mycc", "1.0\r\nUSER root"),
            Platform::Golang,
            sample_payload(),
        );
        let err = assembler.assemble(&pkg, "vm").unwrap_err();
        assert!(matches!(err, AssemblyError::InvalidIdentity { field: "version", .. }));
    }

    #[test]
    fn test_from_reader_stops_at_limit() {
        let data = vec![7u8; 64];
        let err = CodePackage::from_reader(
            ChaincodeId::new("cc", "1"),
            Platform::Binary,
            data.as_slice(),
            32,
        )
        .unwrap_err();
        assert!(matches!(err, AssemblyError::TooLarge { size: 33, limit: 32 }));

        let pkg = CodePackage::from_reader(
            ChaincodeId::new("cc", "1"),
            Platform::Binary,
            data.as_slice(),
            64,
        )
        .unwrap();
        assert_eq!(pkg.payload.len(), 64);
    }

    #[test]
    fn test_package_builder_builds_fresh_archive() {
        let builder = PackageBuilder::new(
            BuildContextAssembler::from_config(&VmConfig::default()),
            package(sample_payload()),
            "vm".to_string(),
        );
        let archive = builder.build().unwrap();
        assert!(!archive.is_empty());
        assert!(read_entries(&archive).contains_key("Dockerfile"));
    }
}
