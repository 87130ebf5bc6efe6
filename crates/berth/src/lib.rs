//! Sandbox lifecycle management under a shared capacity budget.
//!
//! Berth provisions ephemeral, resource-bounded sandboxes on demand, tracks
//! them in a session registry, and reclaims them when idle or on shutdown.
//! Clients never address a sandbox directly at provisioning time; they hold
//! an opaque session identifier and are handed the routable sandbox name.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use berth::{
//!     AdmissionController, LifecycleConfig, MemoryStore, Provisioner, SessionRegistry,
//! };
//! use std::sync::Arc;
//!
//! # async fn example(runtime: Arc<dyn berth::SandboxRuntime>) -> berth::Result<()> {
//! let config = LifecycleConfig::default();
//! let store = Arc::new(MemoryStore::new());
//! let admission = Arc::new(AdmissionController::new(store.clone(), config.max_sandboxes));
//! let registry = Arc::new(SessionRegistry::new(store.clone(), admission.clone()));
//! let provisioner = Provisioner::new(registry.clone(), admission, runtime, config);
//!
//! let session = provisioner.provision().await?;
//! registry.delete(&session.session_id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Every deregistration path (explicit delete, sandbox self-exit, eviction)
//! funnels through [`SessionRegistry::delete`], which is idempotent and
//! releases the capacity slot exactly once per session.

mod admission;
mod evictor;
mod provisioner;
mod reconciler;
mod registry;
pub mod runtime;
pub mod store;

pub use admission::AdmissionController;
pub use evictor::Evictor;
pub use provisioner::Provisioner;
pub use reconciler::Reconciler;
pub use registry::SessionRegistry;
pub use runtime::DockerRuntime;
pub use store::MemoryStore;

pub use berth_core::{
    Error, LaunchSpec, LifecycleConfig, Result, SandboxLimits, SandboxRuntime, SandboxState,
    Session, StateStore, epoch_millis, sandbox_name,
};
