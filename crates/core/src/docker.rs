//! Container engine client
//!
//! This module defines the capability the lifecycle controller needs from a
//! container engine ([`DockerClient`]), the production implementation driving
//! the `docker` CLI ([`CliDocker`]), and a stateful test double
//! ([`mock::MockDocker`]).
//!
//! Each operation is a thin mapping onto one engine call. Failures are
//! classified exactly once, here, into [`DockerError`]: the existence signals
//! (`NotFound`, `AlreadyExists`, `NotRunning`), engine reachability
//! (`Unavailable`), and everything else (`Engine`) carrying the engine's own
//! message.

use crate::config::{HostConfig, VmConfig};
use crate::errors::{DockerError, ResourceKind};
use crate::retry::{retry_async, JitterStrategy, RetryConfig, RetryDecision};
use serde::Deserialize;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Result type of every engine operation
pub type DockerResult<T> = std::result::Result<T, DockerError>;

/// Options for creating a container
#[derive(Debug, Clone, Default)]
pub struct CreateContainerOptions {
    /// Container name
    pub name: String,
    /// Image to create the container from
    pub image: String,
    /// Command arguments
    pub cmd: Vec<String>,
    /// Environment as `KEY=VALUE`
    pub env: Vec<String>,
    pub host_config: HostConfig,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
}

/// Options for copying a tar archive into a container
#[derive(Debug, Clone, Default)]
pub struct UploadToContainerOptions {
    /// Destination directory inside the container
    pub path: String,
    /// Uncompressed tar stream
    pub archive: Vec<u8>,
}

/// Options for attaching to a container's output streams
#[derive(Debug, Clone, Default)]
pub struct AttachToContainerOptions {
    pub container: String,
    pub stdout: bool,
    pub stderr: bool,
    /// Keep following output until the container exits
    pub stream: bool,
    /// Include output produced before the attach
    pub logs: bool,
}

/// Options for building an image
#[derive(Debug, Clone, Default)]
pub struct BuildImageOptions {
    /// Image tag
    pub name: String,
    /// Gzipped tar build context
    pub archive: Vec<u8>,
    /// Always attempt to pull a newer base image
    pub pull: bool,
}

/// Options for removing an image
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveImageOptions {
    /// Remove even when referenced by stopped containers
    pub force: bool,
    /// Keep untagged parent layers
    pub no_prune: bool,
}

/// Options for sending a signal to a container
#[derive(Debug, Clone)]
pub struct KillContainerOptions {
    pub id: String,
    pub signal: String,
}

impl KillContainerOptions {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            signal: "KILL".to_string(),
        }
    }
}

/// Options for removing a container
#[derive(Debug, Clone, Default)]
pub struct RemoveContainerOptions {
    pub id: String,
    pub force: bool,
    /// Also remove anonymous volumes
    pub remove_volumes: bool,
}

/// Container engine capability used by the lifecycle controller
#[allow(async_fn_in_trait)]
pub trait DockerClient {
    /// Create a container, returning its ID
    async fn create_container(&self, opts: CreateContainerOptions) -> DockerResult<String>;

    /// Start a created or stopped container
    async fn start_container(&self, id: &str) -> DockerResult<()>;

    /// Extract a tar archive into a container's filesystem
    async fn upload_to_container(&self, id: &str, opts: UploadToContainerOptions)
        -> DockerResult<()>;

    /// Begin capturing a container's output streams
    async fn attach_to_container(&self, opts: AttachToContainerOptions) -> DockerResult<()>;

    /// Build an image from a build context
    async fn build_image(&self, opts: BuildImageOptions) -> DockerResult<()>;

    /// Remove an image by name
    async fn remove_image_extended(&self, name: &str, opts: RemoveImageOptions)
        -> DockerResult<()>;

    /// Gracefully stop a container, waiting up to `timeout` seconds
    async fn stop_container(&self, id: &str, timeout: u32) -> DockerResult<()>;

    /// Send a signal to a container
    async fn kill_container(&self, opts: KillContainerOptions) -> DockerResult<()>;

    /// Remove a container
    async fn remove_container(&self, opts: RemoveContainerOptions) -> DockerResult<()>;
}

impl<T: DockerClient> DockerClient for &T {
    async fn create_container(&self, opts: CreateContainerOptions) -> DockerResult<String> {
        (*self).create_container(opts).await
    }

    async fn start_container(&self, id: &str) -> DockerResult<()> {
        (*self).start_container(id).await
    }

    async fn upload_to_container(
        &self,
        id: &str,
        opts: UploadToContainerOptions,
    ) -> DockerResult<()> {
        (*self).upload_to_container(id, opts).await
    }

    async fn attach_to_container(&self, opts: AttachToContainerOptions) -> DockerResult<()> {
        (*self).attach_to_container(opts).await
    }

    async fn build_image(&self, opts: BuildImageOptions) -> DockerResult<()> {
        (*self).build_image(opts).await
    }

    async fn remove_image_extended(
        &self,
        name: &str,
        opts: RemoveImageOptions,
    ) -> DockerResult<()> {
        (*self).remove_image_extended(name, opts).await
    }

    async fn stop_container(&self, id: &str, timeout: u32) -> DockerResult<()> {
        (*self).stop_container(id, timeout).await
    }

    async fn kill_container(&self, opts: KillContainerOptions) -> DockerResult<()> {
        (*self).kill_container(opts).await
    }

    async fn remove_container(&self, opts: RemoveContainerOptions) -> DockerResult<()> {
        (*self).remove_container(opts).await
    }
}

/// Map a failed engine CLI invocation onto the error taxonomy
///
/// `target` is the image or container the command acted on and becomes the
/// `id` of the existence variants.
pub fn classify_cli_error(operation: &str, target: &str, stderr: &str) -> DockerError {
    let lower = stderr.to_lowercase();

    if lower.contains("cannot connect to the docker daemon")
        || lower.contains("error during connect")
        || lower.contains("is the docker daemon running")
    {
        return DockerError::Unavailable {
            message: stderr.trim().to_string(),
        };
    }
    if lower.contains("no such image") || lower.contains("unable to find image") {
        return DockerError::NotFound {
            kind: ResourceKind::Image,
            id: target.to_string(),
        };
    }
    if lower.contains("no such container") {
        return DockerError::NotFound {
            kind: ResourceKind::Container,
            id: target.to_string(),
        };
    }
    if lower.contains("is already in use") {
        return DockerError::AlreadyExists {
            id: target.to_string(),
        };
    }
    if lower.contains("is not running") {
        return DockerError::NotRunning {
            id: target.to_string(),
        };
    }

    DockerError::engine(operation, stderr.trim())
}

/// Engine client driving the `docker` CLI
///
/// Clones share the set of output followers started by
/// [`DockerClient::attach_to_container`].
#[derive(Debug, Clone)]
pub struct CliDocker {
    /// Engine CLI binary path
    docker_path: String,
    followers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Default for CliDocker {
    fn default() -> Self {
        Self::new()
    }
}

impl CliDocker {
    pub fn new() -> Self {
        Self::with_path("docker".to_string())
    }

    /// Create a client using a custom CLI binary
    pub fn with_path(docker_path: String) -> Self {
        Self {
            docker_path,
            followers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn from_config(config: &VmConfig) -> Self {
        Self::with_path(config.docker_path.clone())
    }

    pub fn docker_path(&self) -> &str {
        &self.docker_path
    }

    /// Number of output followers that have not been awaited yet
    pub fn pending_followers(&self) -> usize {
        self.lock_followers().len()
    }

    /// Wait until every output follower has finished
    ///
    /// A follower finishes when its container exits. Followers still running
    /// when the process exits are cut off along with the runtime, so a caller
    /// that wants the complete output must await this.
    pub async fn wait_for_output(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = self.lock_followers().drain(..).collect();
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    warn!("Output follower failed: {}", e);
                }
            }
        }
    }

    fn lock_followers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.followers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run one engine command off the async runtime and classify its failure
    async fn run(
        &self,
        operation: &'static str,
        target: &str,
        args: Vec<String>,
        stdin: Option<Vec<u8>>,
    ) -> DockerResult<String> {
        debug!("Executing engine command: {} {}", self.docker_path, args.join(" "));

        let docker_path = self.docker_path.clone();
        let target = target.to_string();

        tokio::task::spawn_blocking(move || -> DockerResult<String> {
            let mut command = Command::new(&docker_path);
            command
                .args(&args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .stdin(if stdin.is_some() {
                    Stdio::piped()
                } else {
                    Stdio::null()
                });

            let mut child = command.spawn().map_err(|e| DockerError::Unavailable {
                message: format!("Failed to execute {}: {}", docker_path, e),
            })?;

            // Feed stdin from a separate thread so a chatty child cannot
            // deadlock against a full stdout pipe.
            let writer = match (stdin, child.stdin.take()) {
                (Some(data), Some(mut pipe)) => {
                    Some(std::thread::spawn(move || pipe.write_all(&data)))
                }
                _ => None,
            };

            let output = child
                .wait_with_output()
                .map_err(|e| DockerError::engine(operation, e.to_string()))?;

            if let Some(writer) = writer {
                match writer.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) if output.status.success() => {
                        return Err(DockerError::engine(
                            operation,
                            format!("Failed to stream input: {}", e),
                        ));
                    }
                    Ok(Err(_)) => {}
                    Err(_) => {
                        return Err(DockerError::engine(operation, "Input writer panicked"));
                    }
                }
            }

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(classify_cli_error(operation, &target, &stderr));
            }

            String::from_utf8(output.stdout)
                .map(|s| s.trim().to_string())
                .map_err(|e| {
                    DockerError::engine(operation, format!("Invalid UTF-8 in engine output: {}", e))
                })
        })
        .await
        .map_err(|e| DockerError::engine(operation, format!("Task join error: {}", e)))?
    }

    /// Current state of a container as reported by `docker inspect`
    async fn container_state(&self, id: &str) -> DockerResult<ContainerState> {
        let output = self
            .run(
                "docker inspect",
                id,
                vec![
                    "container".to_string(),
                    "inspect".to_string(),
                    "--format".to_string(),
                    "{{json .State}}".to_string(),
                    id.to_string(),
                ],
                None,
            )
            .await?;

        serde_json::from_str(&output).map_err(|e| {
            DockerError::engine("docker inspect", format!("Failed to parse state: {}", e))
        })
    }
}

/// Subset of the engine's container state
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    /// `created`, `running`, `exited`, ...
    status: String,
    #[serde(default)]
    running: bool,
}

impl ContainerState {
    /// Whether the container has been started at least once
    fn has_started(&self) -> bool {
        self.running || !matches!(self.status.as_str(), "created" | "restarting")
    }
}

fn classify_attach_poll(error: &DockerError) -> RetryDecision {
    match error {
        DockerError::NotRunning { .. } => RetryDecision::Retry,
        _ => RetryDecision::Stop,
    }
}

impl DockerClient for CliDocker {
    #[instrument(skip(self, opts), fields(name = %opts.name, image = %opts.image))]
    async fn create_container(&self, opts: CreateContainerOptions) -> DockerResult<String> {
        let mut args = vec![
            "create".to_string(),
            "--pull".to_string(),
            "never".to_string(),
            "--name".to_string(),
            opts.name.clone(),
        ];
        args.extend(opts.host_config.to_docker_args());
        for var in &opts.env {
            args.push("--env".to_string());
            args.push(var.clone());
        }
        args.push(opts.image.clone());
        args.extend(opts.cmd.iter().cloned());

        // `docker create` names the image in its error; the name conflict
        // names the container.
        let id = match self.run("docker create", &opts.name, args, None).await {
            Err(DockerError::NotFound {
                kind: ResourceKind::Image,
                ..
            }) => {
                return Err(DockerError::NotFound {
                    kind: ResourceKind::Image,
                    id: opts.image,
                })
            }
            other => other?,
        };

        debug!("Created container with ID: {}", id);
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn start_container(&self, id: &str) -> DockerResult<()> {
        self.run(
            "docker start",
            id,
            vec!["start".to_string(), id.to_string()],
            None,
        )
        .await?;
        debug!("Container {} started", id);
        Ok(())
    }

    #[instrument(skip(self, opts), fields(path = %opts.path, bytes = opts.archive.len()))]
    async fn upload_to_container(
        &self,
        id: &str,
        opts: UploadToContainerOptions,
    ) -> DockerResult<()> {
        let destination = format!("{}:{}", id, opts.path);
        self.run(
            "docker cp",
            id,
            vec!["cp".to_string(), "-".to_string(), destination],
            Some(opts.archive),
        )
        .await?;
        Ok(())
    }

    /// Follow the container's output into the log
    ///
    /// The CLI cannot attach to a container that is not running yet, so a
    /// background follower waits for the container to leave the `created`
    /// state and then streams `docker logs --follow`. The engine keeps output
    /// under its log driver, so nothing written before the follower connects
    /// is lost. The follower is registered with this client; see
    /// [`CliDocker::wait_for_output`].
    #[instrument(skip(self, opts), fields(container = %opts.container))]
    async fn attach_to_container(&self, opts: AttachToContainerOptions) -> DockerResult<()> {
        // Surface a missing container now rather than inside the follower.
        self.container_state(&opts.container).await?;

        let client = self.clone();
        let handle = tokio::spawn(async move {
            let poll = RetryConfig::new(
                50,
                Duration::from_millis(100),
                Duration::from_secs(2),
                JitterStrategy::EqualJitter,
            );
            let container = opts.container.clone();
            let waited = retry_async(
                &poll,
                || {
                    let client = client.clone();
                    let container = container.clone();
                    async move {
                        if client.container_state(&container).await?.has_started() {
                            Ok(())
                        } else {
                            Err(DockerError::NotRunning {
                                id: container.clone(),
                            })
                        }
                    }
                },
                classify_attach_poll,
            )
            .await;

            if let Err(e) = waited {
                warn!(container = %container, "Giving up on output capture: {}", e);
                return;
            }

            if let Err(e) = follow_logs(&client.docker_path, &opts).await {
                warn!(container = %container, "Output capture ended with error: {}", e);
            }
        });
        self.lock_followers().push(handle);

        Ok(())
    }

    #[instrument(skip(self, opts), fields(name = %opts.name, bytes = opts.archive.len()))]
    async fn build_image(&self, opts: BuildImageOptions) -> DockerResult<()> {
        let mut args = vec!["build".to_string(), "-t".to_string(), opts.name.clone()];
        if opts.pull {
            args.push("--pull".to_string());
        }
        args.push("-".to_string());

        self.run("docker build", &opts.name, args, Some(opts.archive))
            .await?;
        debug!("Built image {}", opts.name);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_image_extended(
        &self,
        name: &str,
        opts: RemoveImageOptions,
    ) -> DockerResult<()> {
        let mut args = vec!["rmi".to_string()];
        if opts.force {
            args.push("--force".to_string());
        }
        if opts.no_prune {
            args.push("--no-prune".to_string());
        }
        args.push(name.to_string());

        self.run("docker rmi", name, args, None).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop_container(&self, id: &str, timeout: u32) -> DockerResult<()> {
        self.run(
            "docker stop",
            id,
            vec![
                "stop".to_string(),
                "-t".to_string(),
                timeout.to_string(),
                id.to_string(),
            ],
            None,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn kill_container(&self, opts: KillContainerOptions) -> DockerResult<()> {
        self.run(
            "docker kill",
            &opts.id,
            vec![
                "kill".to_string(),
                "--signal".to_string(),
                opts.signal.clone(),
                opts.id.clone(),
            ],
            None,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_container(&self, opts: RemoveContainerOptions) -> DockerResult<()> {
        let mut args = vec!["rm".to_string()];
        if opts.force {
            args.push("--force".to_string());
        }
        if opts.remove_volumes {
            args.push("--volumes".to_string());
        }
        args.push(opts.id.clone());

        self.run("docker rm", &opts.id, args, None).await?;
        Ok(())
    }
}

/// Stream `docker logs --follow` line by line into tracing
async fn follow_logs(docker_path: &str, opts: &AttachToContainerOptions) -> std::io::Result<()> {
    let mut command = tokio::process::Command::new(docker_path);
    command.arg("logs");
    if opts.stream {
        command.arg("--follow");
    }
    if !opts.logs {
        command.arg("--since").arg("0s");
    }
    command
        .arg(&opts.container)
        .stdin(Stdio::null())
        .stdout(if opts.stdout {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stderr(if opts.stderr {
            Stdio::piped()
        } else {
            Stdio::null()
        });

    let mut child = command.spawn()?;

    let stdout = child.stdout.take().map(|out| {
        let container = opts.container.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(out).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(container = %container, stream = "stdout", "{}", line);
            }
        })
    });
    let stderr = child.stderr.take().map(|err| {
        let container = opts.container.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(err).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(container = %container, stream = "stderr", "{}", line);
            }
        })
    });

    let status = child.wait().await?;
    for handle in [stdout, stderr].into_iter().flatten() {
        let _ = handle.await;
    }
    debug!(container = %opts.container, "Output capture finished: {}", status);
    Ok(())
}

pub mod mock {
    //! Stateful engine double for controller tests
    //!
    //! Images and containers live in in-memory maps keyed by name, so the
    //! existence signals the controller depends on arise naturally. Every
    //! operation can additionally be forced to fail, and every call is
    //! recorded for verification.

    use super::{
        AttachToContainerOptions, BuildImageOptions, CreateContainerOptions, DockerClient,
        DockerResult, KillContainerOptions, RemoveContainerOptions, RemoveImageOptions,
        UploadToContainerOptions,
    };
    use crate::errors::{DockerError, ResourceKind};
    use std::collections::{BTreeMap, BTreeSet};
    use std::io::Read;
    use std::sync::{Arc, Mutex};
    use tracing::{debug, instrument};

    /// Failure injection switches
    #[derive(Debug, Clone, Default)]
    pub struct MockDockerConfig {
        /// Every operation reports the engine as unreachable
        pub unavailable: bool,
        pub create_error: bool,
        pub start_error: bool,
        pub upload_error: bool,
        pub attach_error: bool,
        pub build_error: bool,
        pub remove_image_error: bool,
        pub stop_error: bool,
        pub kill_error: bool,
        pub remove_error: bool,
        /// Image builds succeed but the image never appears
        pub build_forgets_image: bool,
        /// Number of upcoming starts that report a missing image
        pub start_missing_image: u32,
    }

    /// Operation kinds recorded in the call log
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MockOp {
        CreateContainer,
        StartContainer,
        UploadToContainer,
        AttachToContainer,
        BuildImage,
        RemoveImage,
        StopContainer,
        KillContainer,
        RemoveContainer,
    }

    /// One recorded call
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct MockCall {
        pub op: MockOp,
        pub target: String,
    }

    /// Simulated container
    #[derive(Debug, Clone, Default)]
    pub struct MockContainer {
        pub name: String,
        pub image: String,
        pub cmd: Vec<String>,
        pub env: Vec<String>,
        pub running: bool,
        pub attached: bool,
        /// Uploaded files by absolute path
        pub files: BTreeMap<String, Vec<u8>>,
    }

    impl MockContainer {
        pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                image: image.into(),
                ..Default::default()
            }
        }

        pub fn running(mut self) -> Self {
            self.running = true;
            self
        }
    }

    /// In-memory container engine
    #[derive(Debug, Default)]
    pub struct MockDocker {
        config: Arc<Mutex<MockDockerConfig>>,
        images: Arc<Mutex<BTreeSet<String>>>,
        containers: Arc<Mutex<BTreeMap<String, MockContainer>>>,
        calls: Arc<Mutex<Vec<MockCall>>>,
    }

    impl MockDocker {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_config(config: MockDockerConfig) -> Self {
            Self {
                config: Arc::new(Mutex::new(config)),
                ..Default::default()
            }
        }

        /// Update mock configuration
        pub fn update_config<F>(&self, f: F)
        where
            F: FnOnce(&mut MockDockerConfig),
        {
            let mut config = self.config.lock().unwrap();
            f(&mut config);
        }

        pub fn add_image(&self, name: impl Into<String>) {
            self.images.lock().unwrap().insert(name.into());
        }

        pub fn has_image(&self, name: &str) -> bool {
            self.images.lock().unwrap().contains(name)
        }

        pub fn add_container(&self, container: MockContainer) {
            self.containers
                .lock()
                .unwrap()
                .insert(container.name.clone(), container);
        }

        pub fn container(&self, name: &str) -> Option<MockContainer> {
            self.containers.lock().unwrap().get(name).cloned()
        }

        pub fn has_container(&self, name: &str) -> bool {
            self.containers.lock().unwrap().contains_key(name)
        }

        /// Every call made so far, in order
        pub fn calls(&self) -> Vec<MockCall> {
            self.calls.lock().unwrap().clone()
        }

        /// Number of calls of one kind
        pub fn call_count(&self, op: MockOp) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| c.op == op).count()
        }

        /// Operation kinds in call order
        pub fn ops(&self) -> Vec<MockOp> {
            self.calls.lock().unwrap().iter().map(|c| c.op).collect()
        }

        pub fn clear_calls(&self) {
            self.calls.lock().unwrap().clear();
        }

        /// Record the call, then fail if the engine is configured unreachable
        fn enter(&self, op: MockOp, target: &str) -> DockerResult<MockDockerConfig> {
            debug!("MockDocker {:?} called for {}", op, target);
            self.calls.lock().unwrap().push(MockCall {
                op,
                target: target.to_string(),
            });

            let config = self.config.lock().unwrap().clone();
            if config.unavailable {
                return Err(DockerError::Unavailable {
                    message: "mock engine unavailable".to_string(),
                });
            }
            Ok(config)
        }

        fn no_such_container(id: &str) -> DockerError {
            DockerError::NotFound {
                kind: ResourceKind::Container,
                id: id.to_string(),
            }
        }
    }

    impl DockerClient for MockDocker {
        #[instrument(skip(self, opts), fields(name = %opts.name))]
        async fn create_container(&self, opts: CreateContainerOptions) -> DockerResult<String> {
            let config = self.enter(MockOp::CreateContainer, &opts.name)?;
            if config.create_error {
                return Err(DockerError::engine("create", "mock create failure"));
            }

            let mut containers = self.containers.lock().unwrap();
            if containers.contains_key(&opts.name) {
                return Err(DockerError::AlreadyExists { id: opts.name });
            }
            if !self.images.lock().unwrap().contains(&opts.image) {
                return Err(DockerError::NotFound {
                    kind: ResourceKind::Image,
                    id: opts.image,
                });
            }

            containers.insert(
                opts.name.clone(),
                MockContainer {
                    name: opts.name.clone(),
                    image: opts.image,
                    cmd: opts.cmd,
                    env: opts.env,
                    ..Default::default()
                },
            );
            Ok(format!("mock-{}", opts.name))
        }

        #[instrument(skip(self))]
        async fn start_container(&self, id: &str) -> DockerResult<()> {
            let config = self.enter(MockOp::StartContainer, id)?;

            let mut containers = self.containers.lock().unwrap();
            let container = containers
                .get_mut(id)
                .ok_or_else(|| Self::no_such_container(id))?;

            if config.start_missing_image > 0 {
                self.update_config(|c| c.start_missing_image -= 1);
                return Err(DockerError::NotFound {
                    kind: ResourceKind::Image,
                    id: container.image.clone(),
                });
            }
            if config.start_error {
                return Err(DockerError::engine("start", "mock start failure"));
            }

            container.running = true;
            Ok(())
        }

        #[instrument(skip(self, opts))]
        async fn upload_to_container(
            &self,
            id: &str,
            opts: UploadToContainerOptions,
        ) -> DockerResult<()> {
            let config = self.enter(MockOp::UploadToContainer, id)?;

            let mut containers = self.containers.lock().unwrap();
            let container = containers
                .get_mut(id)
                .ok_or_else(|| Self::no_such_container(id))?;
            if config.upload_error {
                return Err(DockerError::engine("upload", "mock upload failure"));
            }

            let mut archive = tar::Archive::new(opts.archive.as_slice());
            let entries = archive
                .entries()
                .map_err(|e| DockerError::engine("upload", e.to_string()))?;
            for entry in entries {
                let mut entry = entry.map_err(|e| DockerError::engine("upload", e.to_string()))?;
                let path = entry
                    .path()
                    .map_err(|e| DockerError::engine("upload", e.to_string()))?
                    .to_string_lossy()
                    .to_string();
                let mut data = Vec::new();
                entry
                    .read_to_end(&mut data)
                    .map_err(|e| DockerError::engine("upload", e.to_string()))?;
                let full = format!("{}/{}", opts.path.trim_end_matches('/'), path);
                container.files.insert(full, data);
            }
            Ok(())
        }

        #[instrument(skip(self, opts), fields(container = %opts.container))]
        async fn attach_to_container(&self, opts: AttachToContainerOptions) -> DockerResult<()> {
            let config = self.enter(MockOp::AttachToContainer, &opts.container)?;

            let mut containers = self.containers.lock().unwrap();
            let container = containers
                .get_mut(&opts.container)
                .ok_or_else(|| Self::no_such_container(&opts.container))?;
            if config.attach_error {
                return Err(DockerError::engine("attach", "mock attach failure"));
            }

            container.attached = true;
            Ok(())
        }

        #[instrument(skip(self, opts), fields(name = %opts.name))]
        async fn build_image(&self, opts: BuildImageOptions) -> DockerResult<()> {
            let config = self.enter(MockOp::BuildImage, &opts.name)?;
            if config.build_error {
                return Err(DockerError::engine("build", "mock build failure"));
            }
            if opts.archive.is_empty() {
                return Err(DockerError::engine("build", "empty build context"));
            }

            if !config.build_forgets_image {
                self.images.lock().unwrap().insert(opts.name);
            }
            Ok(())
        }

        #[instrument(skip(self))]
        async fn remove_image_extended(
            &self,
            name: &str,
            opts: RemoveImageOptions,
        ) -> DockerResult<()> {
            let config = self.enter(MockOp::RemoveImage, name)?;
            if config.remove_image_error {
                return Err(DockerError::engine("rmi", "mock image removal failure"));
            }

            let in_use = self
                .containers
                .lock()
                .unwrap()
                .values()
                .any(|c| c.image == name);
            let mut images = self.images.lock().unwrap();
            if !images.contains(name) {
                return Err(DockerError::NotFound {
                    kind: ResourceKind::Image,
                    id: name.to_string(),
                });
            }
            if in_use && !opts.force {
                return Err(DockerError::engine(
                    "rmi",
                    format!("conflict: image {} is being used by a container", name),
                ));
            }

            images.remove(name);
            Ok(())
        }

        #[instrument(skip(self))]
        async fn stop_container(&self, id: &str, _timeout: u32) -> DockerResult<()> {
            let config = self.enter(MockOp::StopContainer, id)?;

            let mut containers = self.containers.lock().unwrap();
            let container = containers
                .get_mut(id)
                .ok_or_else(|| Self::no_such_container(id))?;
            if config.stop_error {
                return Err(DockerError::engine("stop", "mock stop failure"));
            }

            container.running = false;
            Ok(())
        }

        #[instrument(skip(self))]
        async fn kill_container(&self, opts: KillContainerOptions) -> DockerResult<()> {
            let config = self.enter(MockOp::KillContainer, &opts.id)?;

            let mut containers = self.containers.lock().unwrap();
            let container = containers
                .get_mut(&opts.id)
                .ok_or_else(|| Self::no_such_container(&opts.id))?;
            if config.kill_error {
                return Err(DockerError::engine("kill", "mock kill failure"));
            }
            if !container.running {
                return Err(DockerError::NotRunning { id: opts.id });
            }

            container.running = false;
            Ok(())
        }

        #[instrument(skip(self))]
        async fn remove_container(&self, opts: RemoveContainerOptions) -> DockerResult<()> {
            let config = self.enter(MockOp::RemoveContainer, &opts.id)?;

            let mut containers = self.containers.lock().unwrap();
            let running = containers
                .get(&opts.id)
                .ok_or_else(|| Self::no_such_container(&opts.id))?
                .running;
            if config.remove_error {
                return Err(DockerError::engine("rm", "mock remove failure"));
            }
            if running && !opts.force {
                return Err(DockerError::engine(
                    "rm",
                    format!("cannot remove running container {}", opts.id),
                ));
            }

            containers.remove(&opts.id);
            Ok(())
        }
    }
}
