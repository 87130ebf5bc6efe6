use crate::registry::SessionRegistry;
use berth_core::{SandboxRuntime, StateStore};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Extra headroom on top of the stop grace before a drain attempt is
/// abandoned outright.
const DRAIN_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Drains all tracked sandboxes during process shutdown.
pub struct Reconciler {
    registry: Arc<SessionRegistry>,
    runtime: Arc<dyn SandboxRuntime>,
    store: Arc<dyn StateStore>,
    stop_grace: Duration,
}

impl Reconciler {
    pub fn new(
        registry: Arc<SessionRegistry>,
        runtime: Arc<dyn SandboxRuntime>,
        store: Arc<dyn StateStore>,
        stop_grace: Duration,
    ) -> Self {
        Self {
            registry,
            runtime,
            store,
            stop_grace,
        }
    }

    /// Best-effort drain: stop the evictor's timer, read all sessions once,
    /// issue grace-bounded stops for every tracked sandbox concurrently, wait
    /// for all attempts to settle, then close the store.
    ///
    /// Individual stop failures are logged and never abort the batch; a
    /// sandbox that is already gone counts as settled. No single attempt may
    /// hold up the drain past its grace period plus a fixed margin.
    pub async fn drain(&self, evictor: JoinHandle<()>) {
        evictor.abort();

        let sessions = match self.registry.list_all().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "shutdown drain could not list sessions");
                Vec::new()
            }
        };
        info!(count = sessions.len(), "draining tracked sandboxes");

        let attempts = sessions.iter().map(|session| {
            let runtime = Arc::clone(&self.runtime);
            let name = session.sandbox_name.clone();
            let grace = self.stop_grace;
            async move {
                match tokio::time::timeout(grace + DRAIN_TIMEOUT_MARGIN, runtime.stop(&name, grace))
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(sandbox = %name, error = %e, "shutdown stop failed"),
                    Err(_) => warn!(sandbox = %name, "shutdown stop timed out"),
                }
            }
        });
        join_all(attempts).await;

        if let Err(e) = self.store.close().await {
            warn!(error = %e, "failed to close state store");
        }
    }
}
