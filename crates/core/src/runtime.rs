use crate::config::SandboxLimits;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Launch configuration handed to the runtime when creating a sandbox.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub image: String,
    /// Isolation network to attach to. No ports are published; the network
    /// handles routing.
    pub network: String,
    /// Workspace path inside the sandbox, backed by a size-capped ephemeral
    /// mount.
    pub workspace_path: String,
    pub limits: SandboxLimits,
    /// Opt into the stronger disk-quota enforcement. Not supported on every
    /// storage backend; the provisioner retries without it when the runtime
    /// classifies the rejection as unsupported.
    pub storage_quota: bool,
}

impl LaunchSpec {
    /// The same spec with the optional disk quota dropped.
    pub fn without_storage_quota(&self) -> Self {
        Self {
            storage_quota: false,
            ..self.clone()
        }
    }
}

/// Live state of a sandbox as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    Running,
    Stopped,
}

/// Create/start/inspect/stop of sandbox processes.
///
/// Sandboxes are addressed by the name derived from their session; the
/// runtime owns the execution resource, the session registry owns identity.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Creates a sandbox without starting it.
    ///
    /// Fails with [`Error::UnsupportedFeature`](crate::Error) when the spec
    /// requests the storage quota and the host's storage backend rejects it;
    /// every other failure is a genuine provisioning error.
    async fn create(&self, name: &str, spec: &LaunchSpec) -> Result<()>;

    async fn start(&self, name: &str) -> Result<()>;

    /// Returns `None` when no sandbox by that name exists.
    async fn inspect(&self, name: &str) -> Result<Option<SandboxState>>;

    /// Stops the sandbox, escalating to a hard kill once `grace` elapses.
    /// "Already stopped" and "already removed" count as success.
    async fn stop(&self, name: &str, grace: Duration) -> Result<()>;

    /// Forcibly removes a sandbox, typically one left behind by a failed
    /// start. Removing a sandbox that does not exist counts as success.
    async fn remove(&self, name: &str) -> Result<()>;

    /// Resolves when the sandbox process exits on its own (crash,
    /// self-termination, OOM-kill). Resolves immediately if it is already
    /// gone.
    async fn wait_exit(&self, name: &str) -> Result<()>;
}
