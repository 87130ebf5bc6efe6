use anyhow::Context;
use berth::{
    AdmissionController, DockerRuntime, Evictor, LifecycleConfig, MemoryStore, Provisioner,
    Reconciler, SandboxLimits, SandboxRuntime, SessionRegistry, StateStore,
};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod api;

#[derive(Parser, Debug)]
#[command(name = "berth-server")]
#[command(about = "HTTP control plane for the berth sandbox lifecycle manager")]
#[command(version)]
struct Config {
    /// Address to listen on
    #[arg(long, env = "BERTH_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    listen_addr: SocketAddr,

    /// Maximum number of concurrently running sandboxes
    #[arg(long, env = "BERTH_MAX_SANDBOXES", default_value_t = 10,
          value_parser = clap::value_parser!(i64).range(1..))]
    max_sandboxes: i64,

    /// Memory limit per sandbox in MiB
    #[arg(long, env = "BERTH_MEMORY_LIMIT_MB", default_value_t = 512,
          value_parser = clap::value_parser!(i64).range(1..))]
    memory_limit_mb: i64,

    /// CPU cores per sandbox
    #[arg(long, env = "BERTH_CPU_LIMIT", default_value_t = 1.0)]
    cpu_limit: f64,

    /// Process-count cap per sandbox
    #[arg(long, env = "BERTH_PIDS_LIMIT", default_value_t = 100,
          value_parser = clap::value_parser!(i64).range(1..))]
    pids_limit: i64,

    /// Workspace size cap per sandbox in MiB
    #[arg(long, env = "BERTH_WORKSPACE_SIZE_MB", default_value_t = 1024,
          value_parser = clap::value_parser!(i64).range(1..))]
    workspace_size_mb: i64,

    /// Seconds of inactivity before a session is evicted
    #[arg(long, env = "BERTH_IDLE_TIMEOUT_SECS", default_value_t = 600)]
    idle_timeout_secs: u64,

    /// Seconds between eviction sweeps
    #[arg(long, env = "BERTH_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    sweep_interval_secs: u64,

    /// Grace period in seconds for a stopping sandbox before a hard kill
    #[arg(long, env = "BERTH_STOP_GRACE_SECS", default_value_t = 10)]
    stop_grace_secs: u64,

    /// Isolation network the sandboxes attach to
    #[arg(long, env = "BERTH_NETWORK", default_value = "berth-net")]
    network: String,

    /// Image every sandbox runs
    #[arg(long, env = "BERTH_IMAGE", default_value = "berth-sandbox:latest")]
    image: String,

    /// Workspace path exposed inside each sandbox
    #[arg(long, env = "BERTH_WORKSPACE_PATH", default_value = "/workspace")]
    workspace_path: String,
}

impl Config {
    fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            max_sandboxes: self.max_sandboxes,
            limits: SandboxLimits {
                memory_bytes: self.memory_limit_mb * 1024 * 1024,
                nano_cpus: (self.cpu_limit * 1_000_000_000.0) as i64,
                pids_limit: self.pids_limit,
                workspace_bytes: self.workspace_size_mb * 1024 * 1024,
            },
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            stop_grace: Duration::from_secs(self.stop_grace_secs),
            network: self.network.clone(),
            image: self.image.clone(),
            workspace_path: self.workspace_path.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::parse();
    let lifecycle = config.lifecycle();

    let store = Arc::new(MemoryStore::new()) as Arc<dyn StateStore>;
    let runtime = Arc::new(DockerRuntime::connect().context("connecting to the sandbox runtime")?)
        as Arc<dyn SandboxRuntime>;

    let admission = Arc::new(AdmissionController::new(
        store.clone(),
        lifecycle.max_sandboxes,
    ));
    let registry = Arc::new(SessionRegistry::new(store.clone(), admission.clone()));
    let provisioner = Arc::new(Provisioner::new(
        registry.clone(),
        admission,
        runtime.clone(),
        lifecycle.clone(),
    ));

    let evictor = Arc::new(Evictor::new(
        registry.clone(),
        runtime.clone(),
        lifecycle.idle_timeout,
        lifecycle.sweep_interval,
        lifecycle.stop_grace,
    ))
    .spawn();

    let app = api::router(api::AppState {
        provisioner,
        registry: registry.clone(),
        runtime: runtime.clone(),
        stop_grace: lifecycle.stop_grace,
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listen address")?;
    info!(addr = %config.listen_addr, max_sandboxes = lifecycle.max_sandboxes, "berth server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown signal received, draining sandboxes");
    Reconciler::new(registry, runtime, store, lifecycle.stop_grace)
        .drain(evictor)
        .await;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
