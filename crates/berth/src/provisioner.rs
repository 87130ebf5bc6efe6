use crate::admission::AdmissionController;
use crate::registry::SessionRegistry;
use berth_core::{
    Error, LaunchSpec, LifecycleConfig, Result, SandboxRuntime, Session, epoch_millis,
    sandbox_name,
};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Turns a granted capacity slot into a running sandbox.
///
/// Provisioning is all-or-nothing with respect to the slot: any failure after
/// the reservation releases it before the error reaches the caller, so a
/// denied or failed request never leaks capacity.
pub struct Provisioner {
    registry: Arc<SessionRegistry>,
    admission: Arc<AdmissionController>,
    runtime: Arc<dyn SandboxRuntime>,
    config: LifecycleConfig,
}

impl Provisioner {
    pub fn new(
        registry: Arc<SessionRegistry>,
        admission: Arc<AdmissionController>,
        runtime: Arc<dyn SandboxRuntime>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            registry,
            admission,
            runtime,
            config,
        }
    }

    /// Provisions a new sandbox and returns its session.
    ///
    /// # Errors
    ///
    /// - [`Error::CapacityExceeded`]: no slot available; nothing was created.
    /// - [`Error::ProvisionFailed`]: the runtime failed after a slot was
    ///   granted; the slot has been released.
    pub async fn provision(&self) -> Result<Session> {
        if !self.admission.reserve().await? {
            return Err(Error::CapacityExceeded);
        }

        match self.provision_reserved().await {
            Ok(session) => Ok(session),
            Err(e) => {
                // Compensating action: the reservation must not leak.
                if let Err(release_err) = self.admission.release().await {
                    error!(
                        error = %release_err,
                        "failed to release slot after provisioning failure"
                    );
                }
                Err(e)
            }
        }
    }

    async fn provision_reserved(&self) -> Result<Session> {
        let session_id = Uuid::new_v4().simple().to_string();
        let name = sandbox_name(&session_id);
        let spec = LaunchSpec {
            image: self.config.image.clone(),
            network: self.config.network.clone(),
            workspace_path: self.config.workspace_path.clone(),
            limits: self.config.limits.clone(),
            storage_quota: true,
        };

        match self.runtime.create(&name, &spec).await {
            Ok(()) => {}
            Err(Error::UnsupportedFeature(feature)) => {
                warn!(
                    sandbox = %name,
                    %feature,
                    "disk quota unsupported on this host, retrying with base configuration"
                );
                self.runtime
                    .create(&name, &spec.without_storage_quota())
                    .await
                    .map_err(|e| Error::ProvisionFailed(e.to_string()))?;
            }
            Err(e) => return Err(Error::ProvisionFailed(e.to_string())),
        }

        if let Err(e) = self.runtime.start(&name).await {
            if let Err(remove_err) = self.runtime.remove(&name).await {
                warn!(sandbox = %name, error = %remove_err, "failed to remove unstartable sandbox");
            }
            return Err(Error::ProvisionFailed(e.to_string()));
        }

        let now = epoch_millis();
        let session = Session {
            session_id: session_id.clone(),
            sandbox_name: name.clone(),
            workspace_path: self.config.workspace_path.clone(),
            created_at: now,
            last_active: now,
        };

        if let Err(e) = self.registry.put(&session).await {
            // The sandbox is running but untracked; take it back down before
            // reporting the store failure.
            if let Err(stop_err) = self.runtime.stop(&name, self.config.stop_grace).await {
                warn!(sandbox = %name, error = %stop_err, "failed to stop untracked sandbox");
            }
            return Err(e);
        }

        self.spawn_exit_watcher(session_id, name);
        Ok(session)
    }

    /// Registers the completion watcher: when the sandbox process exits on
    /// its own (crash, self-termination, OOM-kill), its session is
    /// deregistered. Idempotent delete absorbs any race with an explicit
    /// delete or the eviction sweep.
    fn spawn_exit_watcher(&self, session_id: String, sandbox_name: String) {
        let runtime = Arc::clone(&self.runtime);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            if let Err(e) = runtime.wait_exit(&sandbox_name).await {
                warn!(sandbox = %sandbox_name, error = %e, "exit watcher lost the sandbox");
                return;
            }
            debug!(session_id = %session_id, "sandbox exited on its own, deregistering");
            if let Err(e) = registry.delete(&session_id).await {
                warn!(session_id = %session_id, error = %e, "failed to deregister exited sandbox");
            }
        });
    }
}
