//! Chaincode container lifecycle controller
//!
//! [`DockerVm`] drives Deploy, Start, Stop and Destroy for chaincode instances
//! within one [`ScopeId`]. It keeps no record of what exists: every call
//! derives the image and container name from the identity and re-learns the
//! current state from the engine's answers, treating the engine's existence
//! signals as the state machine. Calls for different identities can run
//! concurrently; concurrent calls for the same identity converge because
//! "already exists" and "not found" are absorbed where they mean the goal is
//! already reached.
//!
//! The only retry is Start's single image rebuild after the engine reports
//! the image missing.

use crate::build_context::{
    append_entry, BuildArchive, BuildContextAssembler, Builder, CodePackage, PackageBuilder,
};
use crate::config::VmConfig;
use crate::docker::{
    AttachToContainerOptions, BuildImageOptions, CreateContainerOptions, DockerClient,
    KillContainerOptions, RemoveContainerOptions, RemoveImageOptions, UploadToContainerOptions,
};
use crate::errors::{AssemblyError, DockerError, ResourceKind, VmError};
use crate::naming::{ChaincodeId, ScopeId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Default grace period for a graceful stop, in seconds
pub const DEFAULT_STOP_TIMEOUT: u32 = 10;

/// Sub-steps requested from [`DockerVm::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOptions {
    /// Grace period before the engine kills the process, in seconds
    pub timeout: u32,
    /// Send SIGKILL after the graceful stop
    pub kill: bool,
    /// Remove the container afterwards
    pub remove: bool,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_STOP_TIMEOUT,
            kill: false,
            remove: false,
        }
    }
}

/// Outcome of one create/upload/attach/start pass
enum StartAttempt {
    Started,
    ImageMissing,
}

/// Lifecycle controller for chaincode containers on one engine
#[derive(Debug)]
pub struct DockerVm<C: DockerClient> {
    scope: ScopeId,
    config: Arc<VmConfig>,
    client: C,
    assembler: BuildContextAssembler,
}

impl<C: DockerClient> DockerVm<C> {
    pub fn new(scope: ScopeId, config: Arc<VmConfig>, client: C) -> Self {
        let assembler = BuildContextAssembler::from_config(&config);
        Self {
            scope,
            config,
            client,
            assembler,
        }
    }

    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Case-preserving name of a chaincode in this scope, e.g. `Dev-Peer0-myCC-1.0`
    pub fn get_vm_name(&self, ccid: &ChaincodeId) -> String {
        self.scope.vm_name(ccid)
    }

    /// Engine name shared by the chaincode's image and container
    pub fn get_vm_name_for_docker(&self, ccid: &ChaincodeId) -> Result<String, VmError> {
        self.scope.docker_name(ccid)
    }

    /// [`Builder`] that reassembles `package` for Start's rebuild path
    pub fn package_builder(&self, package: CodePackage) -> PackageBuilder {
        let vm_name = self.get_vm_name(&package.ccid);
        PackageBuilder::new(self.assembler.clone(), package, vm_name)
    }

    /// Assemble a build context for `package` and build the image for `ccid`
    ///
    /// `package` must carry the same identity as `ccid`. Rebuilding under the
    /// same name replaces the image. No container is created.
    #[instrument(skip(self, package), fields(scope = ?self.scope))]
    pub async fn deploy(&self, ccid: &ChaincodeId, package: &CodePackage) -> Result<(), VmError> {
        let image = self.get_vm_name_for_docker(ccid)?;
        if package.ccid != *ccid {
            return Err(VmError::Assembly {
                name: image,
                source: AssemblyError::IdentityMismatch {
                    expected: ccid.to_string(),
                    actual: package.ccid.to_string(),
                },
            });
        }
        let archive = self
            .assembler
            .assemble(package, &self.get_vm_name(ccid))
            .map_err(|source| VmError::Assembly {
                name: image.clone(),
                source,
            })?;

        self.build_image(&image, archive).await?;
        info!(image = %image, "Deployed chaincode image");
        Ok(())
    }

    /// Build the image for `ccid` from a ready build context
    #[instrument(skip(self, archive), fields(scope = ?self.scope, bytes = archive.len()))]
    pub async fn deploy_archive(
        &self,
        ccid: &ChaincodeId,
        archive: BuildArchive,
    ) -> Result<(), VmError> {
        let image = self.get_vm_name_for_docker(ccid)?;
        self.build_image(&image, archive).await?;
        info!(image = %image, "Deployed chaincode image");
        Ok(())
    }

    /// Ensure a container is running for `ccid`
    ///
    /// Creates the container (an existing one is reused), copies `files` into
    /// it keyed by absolute path, attaches output capture when configured,
    /// and starts it. When the engine reports the image missing and a
    /// `builder` is supplied, the image is rebuilt once and the sequence
    /// retried; a second missing image is [`VmError::ImageUnavailable`].
    ///
    /// A failure after the container was created leaves it in place.
    #[instrument(skip(self, args, env, files, builder), fields(scope = ?self.scope))]
    pub async fn start(
        &self,
        ccid: &ChaincodeId,
        args: &[String],
        env: &[String],
        files: &BTreeMap<String, Vec<u8>>,
        builder: Option<&dyn Builder>,
    ) -> Result<(), VmError> {
        let name = self.get_vm_name_for_docker(ccid)?;
        let upload = if files.is_empty() {
            None
        } else {
            Some(upload_archive(files).map_err(|e| VmError::Upload {
                container: name.clone(),
                source: DockerError::engine("prepare upload", e.to_string()),
            })?)
        };

        let mut rebuilt = false;
        loop {
            match self.start_once(&name, args, env, upload.as_deref()).await? {
                StartAttempt::Started => {
                    info!(container = %name, "Started chaincode container");
                    return Ok(());
                }
                StartAttempt::ImageMissing if rebuilt => {
                    return Err(VmError::ImageUnavailable {
                        image: name,
                        rebuilt: true,
                    });
                }
                StartAttempt::ImageMissing => {
                    let Some(builder) = builder else {
                        return Err(VmError::ImageUnavailable {
                            image: name,
                            rebuilt: false,
                        });
                    };

                    warn!(image = %name, "Image missing, rebuilding");
                    let archive = builder.build().map_err(|source| VmError::Assembly {
                        name: name.clone(),
                        source,
                    })?;
                    self.build_image(&name, archive).await?;
                    rebuilt = true;
                }
            }
        }
    }

    async fn start_once(
        &self,
        name: &str,
        args: &[String],
        env: &[String],
        upload: Option<&[u8]>,
    ) -> Result<StartAttempt, VmError> {
        let attach = self.config.attach_stdout;
        let create = CreateContainerOptions {
            name: name.to_string(),
            image: name.to_string(),
            cmd: args.to_vec(),
            env: env.to_vec(),
            host_config: self.config.host_config.clone(),
            attach_stdout: attach,
            attach_stderr: attach,
        };

        match self.client.create_container(create).await {
            Ok(id) => debug!(container = %name, id = %id, "Created container"),
            Err(DockerError::AlreadyExists { .. }) => {
                debug!(container = %name, "Container already exists, reusing it");
            }
            Err(e) if e.is_no_such_image() => return Ok(StartAttempt::ImageMissing),
            Err(e) => return Err(start_failure("create", name, e)),
        }

        if let Some(archive) = upload {
            let opts = UploadToContainerOptions {
                path: "/".to_string(),
                archive: archive.to_vec(),
            };
            self.client
                .upload_to_container(name, opts)
                .await
                .map_err(|e| {
                    unavailable_or("upload", name, e, |source| VmError::Upload {
                        container: name.to_string(),
                        source,
                    })
                })?;
        }

        if attach {
            let opts = AttachToContainerOptions {
                container: name.to_string(),
                stdout: true,
                stderr: true,
                stream: true,
                logs: true,
            };
            self.client
                .attach_to_container(opts)
                .await
                .map_err(|e| start_failure("attach", name, e))?;
        }

        match self.client.start_container(name).await {
            Ok(()) => Ok(StartAttempt::Started),
            Err(e) if e.is_no_such_image() => Ok(StartAttempt::ImageMissing),
            Err(e) => Err(start_failure("start", name, e)),
        }
    }

    async fn build_image(&self, image: &str, archive: BuildArchive) -> Result<(), VmError> {
        let opts = BuildImageOptions {
            name: image.to_string(),
            archive: archive.into_bytes(),
            pull: false,
        };
        self.client.build_image(opts).await.map_err(|e| {
            unavailable_or("build", image, e, |source| VmError::Build {
                image: image.to_string(),
                source,
            })
        })
    }

    /// Stop, then optionally kill and remove, the container for `ccid`
    ///
    /// Every requested sub-step is attempted even when an earlier one failed.
    /// A container that is already stopped or gone satisfies the sub-step. A
    /// single failure is returned as is; several come back as
    /// [`VmError::StopIncomplete`].
    #[instrument(skip(self), fields(scope = ?self.scope))]
    pub async fn stop(&self, ccid: &ChaincodeId, opts: StopOptions) -> Result<(), VmError> {
        let name = self.get_vm_name_for_docker(ccid)?;
        let mut failures = Vec::new();

        match self.client.stop_container(&name, opts.timeout).await {
            Ok(()) => debug!(container = %name, "Stopped container"),
            Err(e) if already_stopped(&e) => {
                debug!(container = %name, "Container already stopped: {}", e)
            }
            Err(e) => failures.push(unavailable_or("stop", &name, e, |source| {
                VmError::Stop {
                    container: name.clone(),
                    source,
                }
            })),
        }
        if engine_unreachable(&failures) {
            return Err(failures.remove(0));
        }

        if opts.kill {
            let kill = KillContainerOptions::new(name.clone());
            match self.client.kill_container(kill).await {
                Ok(()) => debug!(container = %name, "Killed container"),
                Err(e) if already_stopped(&e) => {
                    debug!(container = %name, "Nothing to kill: {}", e)
                }
                Err(e) => failures.push(unavailable_or("kill", &name, e, |source| {
                    VmError::Kill {
                        container: name.clone(),
                        source,
                    }
                })),
            }
        }

        if opts.remove {
            let remove = RemoveContainerOptions {
                id: name.clone(),
                force: true,
                remove_volumes: false,
            };
            match self.client.remove_container(remove).await {
                Ok(()) => debug!(container = %name, "Removed container"),
                Err(e) if e.is_no_such_container() => {
                    debug!(container = %name, "Container already removed")
                }
                Err(e) => failures.push(unavailable_or("remove", &name, e, |source| {
                    VmError::Remove {
                        container: name.clone(),
                        source,
                    }
                })),
            }
        }

        match failures.len() {
            0 => {
                info!(container = %name, "Stopped chaincode container");
                Ok(())
            }
            1 => Err(failures.remove(0)),
            _ => Err(VmError::StopIncomplete {
                container: name,
                failures,
            }),
        }
    }

    /// Remove the image for `ccid`
    ///
    /// `force` removes it even when stopped containers reference it; `prune`
    /// also deletes untagged parent layers. An absent image is success.
    #[instrument(skip(self), fields(scope = ?self.scope))]
    pub async fn destroy(&self, ccid: &ChaincodeId, force: bool, prune: bool) -> Result<(), VmError> {
        let image = self.get_vm_name_for_docker(ccid)?;
        let opts = RemoveImageOptions {
            force,
            no_prune: !prune,
        };

        match self.client.remove_image_extended(&image, opts).await {
            Ok(()) => {
                info!(image = %image, "Removed chaincode image");
                Ok(())
            }
            Err(e) if e.is_no_such_image() => {
                debug!(image = %image, "Image already absent");
                Ok(())
            }
            Err(e) => Err(unavailable_or("destroy", &image, e, |source| {
                VmError::Destroy {
                    image: image.clone(),
                    source,
                }
            })),
        }
    }
}

/// Engine answers meaning a stop or kill has nothing left to do
fn already_stopped(error: &DockerError) -> bool {
    matches!(
        error,
        DockerError::NotFound {
            kind: ResourceKind::Container,
            ..
        } | DockerError::NotRunning { .. }
    )
}

fn engine_unreachable(failures: &[VmError]) -> bool {
    matches!(failures.first(), Some(VmError::EngineUnavailable { .. }))
}

/// Wrap an engine error, routing an unreachable engine to its own variant
fn unavailable_or<F>(operation: &'static str, name: &str, error: DockerError, wrap: F) -> VmError
where
    F: FnOnce(DockerError) -> VmError,
{
    match error {
        DockerError::Unavailable { .. } => VmError::EngineUnavailable {
            operation,
            name: name.to_string(),
            source: error,
        },
        other => wrap(other),
    }
}

fn start_failure(operation: &'static str, container: &str, error: DockerError) -> VmError {
    unavailable_or(operation, container, error, |source| VmError::Start {
        operation,
        container: container.to_string(),
        source,
    })
}

/// Uncompressed tar of `files`, paths made relative to `/`
fn upload_archive(files: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>, AssemblyError> {
    let mut tar_builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
        let relative = path.trim_start_matches('/');
        if relative.is_empty() {
            return Err(AssemblyError::Unreadable {
                message: format!("invalid upload path '{}'", path),
            });
        }
        append_entry(&mut tar_builder, relative, data)?;
    }
    Ok(tar_builder.into_inner()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_context::{tar_gz, Platform};
    use crate::docker::mock::{MockContainer, MockDocker, MockDockerConfig, MockOp};

    fn ccid() -> ChaincodeId {
        ChaincodeId::new("mycc", "0.0")
    }

    fn vm(mock: &MockDocker) -> DockerVm<&MockDocker> {
        DockerVm::new(
            ScopeId::new("dev", "peer0"),
            Arc::new(VmConfig::default()),
            mock,
        )
    }

    fn package() -> CodePackage {
        let payload = tar_gz(&[("chaincode", b"#!/bin/sh\n".as_slice())]).unwrap();
        CodePackage::new(ccid(), Platform::Binary, payload)
    }

    #[test]
    fn test_vm_names() {
        let mock = MockDocker::new();
        let vm = DockerVm::new(
            ScopeId::new("Dev", "Peer0"),
            Arc::new(VmConfig::default()),
            &mock,
        );
        let id = ChaincodeId::new("myCC", "1.0");
        assert_eq!(vm.get_vm_name(&id), "Dev-Peer0-myCC-1.0");
        assert!(vm
            .get_vm_name_for_docker(&id)
            .unwrap()
            .starts_with("dev-peer0-mycc-1.0-"));
    }

    #[tokio::test]
    async fn test_deploy_builds_named_image() {
        let mock = MockDocker::new();
        let vm = vm(&mock);

        vm.deploy(&ccid(), &package()).await.unwrap();

        let image = vm.get_vm_name_for_docker(&ccid()).unwrap();
        assert!(mock.has_image(&image));
        assert_eq!(mock.ops(), vec![MockOp::BuildImage]);
    }

    #[tokio::test]
    async fn test_deploy_archive_uses_supplied_context() {
        let mock = MockDocker::new();
        let vm = vm(&mock);
        assert_eq!(vm.scope(), &ScopeId::new("dev", "peer0"));

        let archive = vm.package_builder(package()).build().unwrap();
        vm.deploy_archive(&ccid(), archive).await.unwrap();

        let image = vm.get_vm_name_for_docker(&ccid()).unwrap();
        assert!(vm.client().has_image(&image));
    }

    #[tokio::test]
    async fn test_deploy_rejects_empty_package() {
        let mock = MockDocker::new();
        let vm = vm(&mock);
        let empty = CodePackage::new(ccid(), Platform::Golang, Vec::new());

        let err = vm.deploy(&ccid(), &empty).await.unwrap_err();
        assert!(matches!(
            err,
            VmError::Assembly {
                source: AssemblyError::Empty,
                ..
            }
        ));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_rejects_package_of_other_chaincode() {
        let mock = MockDocker::new();
        let vm = vm(&mock);
        let other = CodePackage::new(
            ChaincodeId::new("othercc", "1.0"),
            Platform::Golang,
            package().payload,
        );

        let err = vm.deploy(&ccid(), &other).await.unwrap_err();
        match err {
            VmError::Assembly {
                source: AssemblyError::IdentityMismatch { expected, actual },
                ..
            } => {
                assert_eq!(expected, ccid().to_string());
                assert_eq!(actual, "othercc-1.0");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_rejects_identity_with_control_characters() {
        let mock = MockDocker::new();
        let vm = vm(&mock);
        let hostile = ChaincodeId::new("mycc\nRUN\tid", "1.0");
        let pkg = CodePackage::new(hostile.clone(), Platform::Golang, package().payload);

        let err = vm.deploy(&hostile, &pkg).await.unwrap_err();
        assert!(matches!(err, VmError::InvalidName { .. }));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_build_failure() {
        let mock = MockDocker::with_config(MockDockerConfig {
            build_error: true,
            ..Default::default()
        });
        let err = vm(&mock).deploy(&ccid(), &package()).await.unwrap_err();
        assert!(matches!(err, VmError::Build { .. }));
    }

    #[tokio::test]
    async fn test_start_sequence() {
        let mock = MockDocker::new();
        let vm = DockerVm::new(
            ScopeId::new("dev", "peer0"),
            Arc::new(VmConfig {
                attach_stdout: true,
                ..VmConfig::default()
            }),
            &mock,
        );
        let name = vm.get_vm_name_for_docker(&ccid()).unwrap();
        mock.add_image(name.clone());

        let mut files = BTreeMap::new();
        files.insert("/etc/peer/tls.crt".to_string(), b"cert".to_vec());
        let args = vec!["chaincode".to_string(), "-peer.address=peer0:7052".to_string()];
        let env = vec!["CORE_CHAINCODE_ID_NAME=mycc:0.0".to_string()];

        vm.start(&ccid(), &args, &env, &files, None).await.unwrap();

        assert_eq!(
            mock.ops(),
            vec![
                MockOp::CreateContainer,
                MockOp::UploadToContainer,
                MockOp::AttachToContainer,
                MockOp::StartContainer
            ]
        );
        let container = mock.container(&name).unwrap();
        assert!(container.running);
        assert!(container.attached);
        assert_eq!(container.cmd, args);
        assert_eq!(container.env, env);
        assert_eq!(container.files["/etc/peer/tls.crt"], b"cert".to_vec());
    }

    #[tokio::test]
    async fn test_start_without_attach_or_files() {
        let mock = MockDocker::new();
        let vm = vm(&mock);
        mock.add_image(vm.get_vm_name_for_docker(&ccid()).unwrap());

        vm.start(&ccid(), &[], &[], &BTreeMap::new(), None)
            .await
            .unwrap();
        assert_eq!(
            mock.ops(),
            vec![MockOp::CreateContainer, MockOp::StartContainer]
        );
    }

    #[tokio::test]
    async fn test_start_missing_image_without_builder() {
        let mock = MockDocker::new();
        let err = vm(&mock)
            .start(&ccid(), &[], &[], &BTreeMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VmError::ImageUnavailable { rebuilt: false, .. }));
        assert_eq!(mock.call_count(MockOp::BuildImage), 0);
    }

    #[tokio::test]
    async fn test_start_failure_is_not_retried() {
        let mock = MockDocker::with_config(MockDockerConfig {
            start_error: true,
            ..Default::default()
        });
        let vm = vm(&mock);
        let name = vm.get_vm_name_for_docker(&ccid()).unwrap();
        mock.add_image(name.clone());

        let err = vm
            .start(&ccid(), &[], &[], &BTreeMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VmError::Start { operation: "start", .. }));
        assert_eq!(mock.call_count(MockOp::StartContainer), 1);
        // no compensating cleanup
        assert!(mock.has_container(&name));
    }

    #[tokio::test]
    async fn test_create_failure() {
        let mock = MockDocker::with_config(MockDockerConfig {
            create_error: true,
            ..Default::default()
        });
        let err = vm(&mock)
            .start(&ccid(), &[], &[], &BTreeMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VmError::Start { operation: "create", .. }));
    }

    #[tokio::test]
    async fn test_attach_failure_is_start_error() {
        let mock = MockDocker::with_config(MockDockerConfig {
            attach_error: true,
            ..Default::default()
        });
        let vm = DockerVm::new(
            ScopeId::new("dev", "peer0"),
            Arc::new(VmConfig {
                attach_stdout: true,
                ..VmConfig::default()
            }),
            &mock,
        );
        mock.add_image(vm.get_vm_name_for_docker(&ccid()).unwrap());

        let err = vm
            .start(&ccid(), &[], &[], &BTreeMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VmError::Start { operation: "attach", .. }));
        assert_eq!(mock.call_count(MockOp::StartContainer), 0);
    }

    #[tokio::test]
    async fn test_engine_unavailable_everywhere() {
        let mock = MockDocker::with_config(MockDockerConfig {
            unavailable: true,
            ..Default::default()
        });
        let vm = vm(&mock);
        let builder = vm.package_builder(package());

        let err = vm
            .start(&ccid(), &[], &[], &BTreeMap::new(), Some(&builder))
            .await
            .unwrap_err();
        assert!(matches!(err, VmError::EngineUnavailable { operation: "create", .. }));
        assert_eq!(mock.calls().len(), 1);

        let err = vm.deploy(&ccid(), &package()).await.unwrap_err();
        assert!(matches!(err, VmError::EngineUnavailable { operation: "build", .. }));

        let opts = StopOptions {
            kill: true,
            remove: true,
            ..Default::default()
        };
        let err = vm.stop(&ccid(), opts).await.unwrap_err();
        assert!(matches!(err, VmError::EngineUnavailable { operation: "stop", .. }));

        let err = vm.destroy(&ccid(), false, false).await.unwrap_err();
        assert!(matches!(err, VmError::EngineUnavailable { operation: "destroy", .. }));
    }

    #[tokio::test]
    async fn test_stop_kill_remove() {
        let mock = MockDocker::new();
        let vm = vm(&mock);
        let name = vm.get_vm_name_for_docker(&ccid()).unwrap();
        mock.add_container(MockContainer::new(name.clone(), name.clone()).running());

        let opts = StopOptions {
            timeout: 5,
            kill: true,
            remove: true,
        };
        vm.stop(&ccid(), opts).await.unwrap();

        assert_eq!(
            mock.ops(),
            vec![
                MockOp::StopContainer,
                MockOp::KillContainer,
                MockOp::RemoveContainer
            ]
        );
        assert!(!mock.has_container(&name));
    }

    #[tokio::test]
    async fn test_stop_collects_failures_and_continues() {
        let mock = MockDocker::with_config(MockDockerConfig {
            stop_error: true,
            kill_error: true,
            ..Default::default()
        });
        let vm = vm(&mock);
        let name = vm.get_vm_name_for_docker(&ccid()).unwrap();
        mock.add_container(MockContainer::new(name.clone(), name.clone()).running());

        let opts = StopOptions {
            kill: true,
            remove: true,
            ..Default::default()
        };
        let err = vm.stop(&ccid(), opts).await.unwrap_err();

        let failures = err.failures();
        assert_eq!(failures.len(), 2);
        assert!(matches!(failures[0], VmError::Stop { .. }));
        assert!(matches!(failures[1], VmError::Kill { .. }));
        // removal was still attempted and succeeded
        assert!(!mock.has_container(&name));
    }

    #[tokio::test]
    async fn test_stop_single_failure_returned_directly() {
        let mock = MockDocker::with_config(MockDockerConfig {
            remove_error: true,
            ..Default::default()
        });
        let vm = vm(&mock);
        let name = vm.get_vm_name_for_docker(&ccid()).unwrap();
        mock.add_container(MockContainer::new(name.clone(), name));

        let opts = StopOptions {
            remove: true,
            ..Default::default()
        };
        let err = vm.stop(&ccid(), opts).await.unwrap_err();
        assert!(matches!(err, VmError::Remove { .. }));
    }

    #[tokio::test]
    async fn test_destroy_force_and_prune_flags() {
        let mock = MockDocker::new();
        let vm = vm(&mock);
        let image = vm.get_vm_name_for_docker(&ccid()).unwrap();
        mock.add_image(image.clone());
        mock.add_container(MockContainer::new("other", image.clone()));

        let err = vm.destroy(&ccid(), false, true).await.unwrap_err();
        assert!(matches!(err, VmError::Destroy { .. }));
        assert!(mock.has_image(&image));

        vm.destroy(&ccid(), true, true).await.unwrap();
        assert!(!mock.has_image(&image));
    }

    #[test]
    fn test_upload_archive_relative_paths() {
        let mut files = BTreeMap::new();
        files.insert("/a/b.txt".to_string(), b"x".to_vec());
        let bytes = upload_archive(&files).unwrap();

        let mut archive = tar::Archive::new(bytes.as_slice());
        let paths: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(paths, vec!["a/b.txt".to_string()]);

        let mut bad = BTreeMap::new();
        bad.insert("/".to_string(), Vec::new());
        assert!(upload_archive(&bad).is_err());
    }
}
