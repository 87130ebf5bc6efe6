use async_trait::async_trait;
use berth_core::{Error, LaunchSpec, Result, SandboxRuntime, SandboxState};
use bollard::{
    Docker,
    errors::Error as BollardError,
    models::{ContainerCreateBody, HostConfig},
    query_parameters::{
        CreateContainerOptionsBuilder, InspectContainerOptions, RemoveContainerOptionsBuilder,
        StartContainerOptions, StopContainerOptionsBuilder, WaitContainerOptions,
    },
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

/// Docker-backed [`SandboxRuntime`].
///
/// Containers are created with `auto_remove`, so a stopped sandbox cleans
/// itself up; "no such container" is therefore an expected status on the
/// stop, remove, and wait paths and is absorbed rather than surfaced.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the local Docker daemon.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Runtime(format!("docker connect: {e}")))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    async fn create(&self, name: &str, spec: &LaunchSpec) -> Result<()> {
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            working_dir: Some(spec.workspace_path.clone()),
            host_config: Some(host_config(spec)),
            ..ContainerCreateBody::default()
        };
        self.docker
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(name).build()),
                body,
            )
            .await
            .map(|_| ())
            .map_err(|e| classify_create_error(spec, &e))
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions>)
            .await
            .map_err(|e| Error::Runtime(format!("start container: {e}")))
    }

    async fn inspect(&self, name: &str) -> Result<Option<SandboxState>> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(details) => {
                let running = details
                    .state
                    .as_ref()
                    .and_then(|state| state.running)
                    .unwrap_or(false);
                Ok(Some(if running {
                    SandboxState::Running
                } else {
                    SandboxState::Stopped
                }))
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Error::Runtime(format!("inspect container: {e}"))),
        }
    }

    async fn stop(&self, name: &str, grace: Duration) -> Result<()> {
        // The daemon escalates to SIGKILL once the grace period elapses.
        let options = StopContainerOptionsBuilder::new()
            .t(grace.as_secs() as i32)
            .build();
        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) || is_already_stopped(&e) => Ok(()),
            Err(e) => Err(Error::Runtime(format!("stop container: {e}"))),
        }
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptionsBuilder::new().force(true).v(true).build();
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::Runtime(format!("remove container: {e}"))),
        }
    }

    async fn wait_exit(&self, name: &str) -> Result<()> {
        let mut wait = std::pin::pin!(
            self.docker
                .wait_container(name, None::<WaitContainerOptions>)
        );
        match wait.next().await {
            Some(Ok(_)) | None => Ok(()),
            // A nonzero exit code is reported as an error body; it is still
            // an exit.
            Some(Err(BollardError::DockerContainerWaitError { .. })) => Ok(()),
            Some(Err(e)) if is_not_found(&e) => Ok(()),
            Some(Err(e)) => Err(Error::Runtime(format!("wait container: {e}"))),
        }
    }
}

fn host_config(spec: &LaunchSpec) -> HostConfig {
    let limits = &spec.limits;

    // Size-capped ephemeral workspace; available regardless of the daemon's
    // storage backend.
    let tmpfs = HashMap::from([(
        spec.workspace_path.clone(),
        format!("rw,size={}", limits.workspace_bytes),
    )]);

    let storage_opt = spec
        .storage_quota
        .then(|| HashMap::from([("size".to_string(), limits.workspace_bytes.to_string())]));

    HostConfig {
        memory: Some(limits.memory_bytes),
        nano_cpus: Some(limits.nano_cpus),
        pids_limit: Some(limits.pids_limit),
        network_mode: Some(spec.network.clone()),
        tmpfs: Some(tmpfs),
        storage_opt,
        auto_remove: Some(true),
        ..HostConfig::default()
    }
}

/// The daemon rejects `storage_opt` quotas unless the backing filesystem
/// supports project quotas. That rejection is a capability probe result the
/// provisioner falls back from; anything else is a genuine failure.
fn classify_create_error(spec: &LaunchSpec, error: &BollardError) -> Error {
    if spec.storage_quota {
        if let BollardError::DockerResponseServerError {
            status_code: 500,
            message,
        } = error
        {
            if message.contains("storage-opt") {
                return Error::UnsupportedFeature(format!("storage quota: {message}"));
            }
        }
    }
    Error::Runtime(format!("create container: {error}"))
}

fn is_not_found(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError { status_code, .. } if *status_code == 404
    )
}

fn is_already_stopped(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError { status_code, .. } if *status_code == 304
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::SandboxLimits;

    fn spec(storage_quota: bool) -> LaunchSpec {
        LaunchSpec {
            image: "berth-sandbox:latest".to_string(),
            network: "berth-net".to_string(),
            workspace_path: "/workspace".to_string(),
            limits: SandboxLimits::default(),
            storage_quota,
        }
    }

    fn server_error(status_code: u16, message: &str) -> BollardError {
        BollardError::DockerResponseServerError {
            status_code,
            message: message.to_string(),
        }
    }

    #[test]
    fn host_config_applies_resource_limits() {
        let config = host_config(&spec(false));
        assert_eq!(config.memory, Some(512 * 1024 * 1024));
        assert_eq!(config.nano_cpus, Some(1_000_000_000));
        assert_eq!(config.pids_limit, Some(100));
        assert_eq!(config.network_mode, Some("berth-net".to_string()));
        assert_eq!(config.auto_remove, Some(true));
    }

    #[test]
    fn host_config_caps_workspace_with_tmpfs() {
        let config = host_config(&spec(false));
        let tmpfs = config.tmpfs.unwrap();
        assert_eq!(
            tmpfs.get("/workspace"),
            Some(&format!("rw,size={}", 1024 * 1024 * 1024))
        );
    }

    #[test]
    fn host_config_includes_storage_opt_only_when_requested() {
        assert!(host_config(&spec(false)).storage_opt.is_none());
        let storage_opt = host_config(&spec(true)).storage_opt.unwrap();
        assert_eq!(
            storage_opt.get("size"),
            Some(&(1024 * 1024 * 1024i64).to_string())
        );
    }

    #[test]
    fn storage_opt_rejection_classified_as_unsupported() {
        let error = server_error(
            500,
            "--storage-opt is supported only for overlay over xfs with 'pquota' mount option",
        );
        let classified = classify_create_error(&spec(true), &error);
        assert!(matches!(classified, Error::UnsupportedFeature(_)));
    }

    #[test]
    fn storage_opt_rejection_without_quota_request_is_a_runtime_error() {
        let error = server_error(500, "--storage-opt is not supported");
        let classified = classify_create_error(&spec(false), &error);
        assert!(matches!(classified, Error::Runtime(_)));
    }

    #[test]
    fn unrelated_create_failure_is_a_runtime_error() {
        let error = server_error(404, "no such image");
        let classified = classify_create_error(&spec(true), &error);
        assert!(matches!(classified, Error::Runtime(_)));
    }

    #[test]
    fn not_found_and_already_stopped_statuses_are_recognized() {
        assert!(is_not_found(&server_error(404, "no such container")));
        assert!(!is_not_found(&server_error(500, "boom")));
        assert!(is_already_stopped(&server_error(304, "already stopped")));
        assert!(!is_already_stopped(&server_error(404, "gone")));
    }
}
