use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource limits applied to every sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxLimits {
    /// Memory cap in bytes.
    pub memory_bytes: i64,
    /// CPU share in units of 10^-9 cores.
    pub nano_cpus: i64,
    /// Maximum number of processes inside the sandbox.
    pub pids_limit: i64,
    /// Workspace size cap in bytes.
    pub workspace_bytes: i64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 512 * 1024 * 1024,
            nano_cpus: 1_000_000_000,
            pids_limit: 100,
            workspace_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// Lifecycle policy and provisioning parameters shared by the manager's
/// components.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Global cap on concurrently running sandboxes.
    pub max_sandboxes: i64,
    pub limits: SandboxLimits,
    /// Inactivity past which a session is evicted.
    pub idle_timeout: Duration,
    /// Period of the eviction sweep.
    pub sweep_interval: Duration,
    /// Grace period granted to a stopping sandbox before a hard kill.
    pub stop_grace: Duration,
    /// Isolation network the sandboxes attach to.
    pub network: String,
    /// Image every sandbox runs.
    pub image: String,
    /// Workspace path exposed inside each sandbox.
    pub workspace_path: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_sandboxes: 10,
            limits: SandboxLimits::default(),
            idle_timeout: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
            stop_grace: Duration::from_secs(10),
            network: "berth-net".to_string(),
            image: "berth-sandbox:latest".to_string(),
            workspace_path: "/workspace".to_string(),
        }
    }
}
