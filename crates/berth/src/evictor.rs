use crate::registry::SessionRegistry;
use berth_core::{SandboxRuntime, epoch_millis};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Periodic sweep that stops and deregisters sessions idle past the
/// inactivity threshold.
pub struct Evictor {
    registry: Arc<SessionRegistry>,
    runtime: Arc<dyn SandboxRuntime>,
    idle_timeout: Duration,
    sweep_interval: Duration,
    stop_grace: Duration,
}

impl Evictor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        runtime: Arc<dyn SandboxRuntime>,
        idle_timeout: Duration,
        sweep_interval: Duration,
        stop_grace: Duration,
    ) -> Self {
        Self {
            registry,
            runtime,
            idle_timeout,
            sweep_interval,
            stop_grace,
        }
    }

    /// Spawns the periodic sweep task. Abort the returned handle to stop the
    /// timer; the reconciler does so before draining.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep(epoch_millis()).await;
            }
        })
    }

    /// One sweep pass as of `now_ms`.
    ///
    /// A registry read failure aborts the whole pass (the next tick retries).
    /// A stop failure for one session is logged and its record is still
    /// deleted: an orphaned sandbox that later exits on its own is harmless
    /// once its record is gone.
    pub async fn sweep(&self, now_ms: i64) {
        let sessions = match self.registry.list_all().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "eviction sweep aborted: session listing failed");
                return;
            }
        };

        let threshold = self.idle_timeout.as_millis() as i64;
        for session in sessions {
            let idle = session.idle_millis(now_ms);
            // A session at exactly the threshold survives; eviction requires
            // strictly longer idleness.
            if idle <= threshold {
                continue;
            }

            info!(
                session_id = %session.session_id,
                idle_ms = idle,
                "evicting idle session"
            );
            if let Err(e) = self
                .runtime
                .stop(&session.sandbox_name, self.stop_grace)
                .await
            {
                warn!(
                    sandbox = %session.sandbox_name,
                    error = %e,
                    "failed to stop idle sandbox, deleting its record anyway"
                );
            }
            if let Err(e) = self.registry.delete(&session.session_id).await {
                warn!(session_id = %session.session_id, error = %e, "failed to deregister idle session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionController;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use berth_core::{LaunchSpec, Result, SandboxState, Session, StateStore, sandbox_name};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRuntime {
        stopped: Mutex<Vec<String>>,
        fail_stops: bool,
    }

    #[async_trait]
    impl SandboxRuntime for RecordingRuntime {
        async fn create(&self, _name: &str, _spec: &LaunchSpec) -> Result<()> {
            Ok(())
        }

        async fn start(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn inspect(&self, _name: &str) -> Result<Option<SandboxState>> {
            Ok(Some(SandboxState::Running))
        }

        async fn stop(&self, name: &str, _grace: Duration) -> Result<()> {
            self.stopped.lock().unwrap().push(name.to_string());
            if self.fail_stops {
                return Err(berth_core::Error::Runtime("stop refused".to_string()));
            }
            Ok(())
        }

        async fn remove(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn wait_exit(&self, _name: &str) -> Result<()> {
            Ok(())
        }
    }

    const THRESHOLD_MS: i64 = 600_000;
    const NOW_MS: i64 = 10_000_000;

    fn fixtures(runtime: Arc<RecordingRuntime>) -> (Arc<SessionRegistry>, Evictor) {
        let store = Arc::new(MemoryStore::new()) as Arc<dyn StateStore>;
        let admission = Arc::new(AdmissionController::new(store.clone(), 10));
        let registry = Arc::new(SessionRegistry::new(store, admission));
        let evictor = Evictor::new(
            registry.clone(),
            runtime,
            Duration::from_millis(THRESHOLD_MS as u64),
            Duration::from_secs(60),
            Duration::from_secs(10),
        );
        (registry, evictor)
    }

    fn session(id: &str, last_active: i64) -> Session {
        Session {
            session_id: id.to_string(),
            sandbox_name: sandbox_name(id),
            workspace_path: "/workspace".to_string(),
            created_at: last_active,
            last_active,
        }
    }

    #[tokio::test]
    async fn session_exactly_at_threshold_survives() {
        let runtime = Arc::new(RecordingRuntime::default());
        let (registry, evictor) = fixtures(runtime.clone());
        registry
            .put(&session("edge", NOW_MS - THRESHOLD_MS))
            .await
            .unwrap();

        evictor.sweep(NOW_MS).await;

        assert!(runtime.stopped.lock().unwrap().is_empty());
        assert_eq!(registry.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn session_past_threshold_is_evicted() {
        let runtime = Arc::new(RecordingRuntime::default());
        let (registry, evictor) = fixtures(runtime.clone());
        registry
            .put(&session("idle", NOW_MS - THRESHOLD_MS - 1))
            .await
            .unwrap();

        evictor.sweep(NOW_MS).await;

        assert_eq!(
            *runtime.stopped.lock().unwrap(),
            vec![sandbox_name("idle")]
        );
        assert!(registry.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn active_sessions_are_left_untouched() {
        let runtime = Arc::new(RecordingRuntime::default());
        let (registry, evictor) = fixtures(runtime.clone());
        registry.put(&session("fresh", NOW_MS - 1_000)).await.unwrap();
        registry
            .put(&session("idle", NOW_MS - THRESHOLD_MS - 1))
            .await
            .unwrap();

        evictor.sweep(NOW_MS).await;

        let remaining = registry.list_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].session_id, "fresh");
    }

    #[tokio::test]
    async fn stop_failure_still_deletes_the_record() {
        let runtime = Arc::new(RecordingRuntime {
            fail_stops: true,
            ..Default::default()
        });
        let (registry, evictor) = fixtures(runtime.clone());
        registry
            .put(&session("idle", NOW_MS - THRESHOLD_MS - 1))
            .await
            .unwrap();

        evictor.sweep(NOW_MS).await;

        assert_eq!(runtime.stopped.lock().unwrap().len(), 1);
        assert!(registry.list_all().await.unwrap().is_empty());
    }
}
