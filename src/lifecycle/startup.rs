//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize logging, metrics and the security core in dependency order
//! - Start background tasks (sweeps, config watcher, signal listener)
//! - Bind listeners and begin accepting traffic
//! - On shutdown, stop listeners first, then background tasks
//!
//! Any startup error is fatal. Listeners start last so traffic only
//! arrives once every guard is ready.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::admin::{setup_admin_router, AdminState};
use crate::clock::SystemClock;
use crate::config::watcher::ConfigWatcher;
use crate::config::{load_config, validate_config, ConfigError, GuardConfig};
use crate::http::GatewayServer;
use crate::lifecycle::maintenance::MaintenanceHandle;
use crate::lifecycle::signals::wait_for_signal;
use crate::lifecycle::Shutdown;
use crate::observability::{logging, metrics};
use crate::security::{DomainError, InMemoryIdentifierRegistry, SecurityCore, SeedRecord};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("allowed domains: {0}")]
    Domain(#[from] DomainError),

    #[error("upstream address: {0}")]
    Upstream(#[from] axum::http::uri::InvalidUri),

    #[error("identifier seed: {0}")]
    Seed(#[from] serde_json::Error),

    #[error("config watcher: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration from `path`, or validated defaults.
pub fn resolve_config(path: Option<&Path>) -> Result<GuardConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let config = GuardConfig::default();
            validate_config(&config).map_err(ConfigError::Validation)?;
            Ok(config)
        }
    }
}

/// Run the gateway until SIGINT/SIGTERM.
pub async fn run(config_path: Option<PathBuf>) -> Result<(), StartupError> {
    let config = resolve_config(config_path.as_deref())?;
    logging::init(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        request_timeout_secs = config.timeouts.request_secs,
        "portal-guard starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = Arc::new(InMemoryIdentifierRegistry::new());
    if let Some(path) = &config.national_id.seed_file {
        let indexed = load_seed(Path::new(path), &registry)?;
        tracing::info!(path = %path, indexed, "Identifier registry seeded");
    }
    let core = Arc::new(SecurityCore::from_config(
        &config,
        registry.clone(),
        Arc::new(SystemClock),
    )?);
    let shutdown = Shutdown::new();

    let maintenance = MaintenanceHandle::spawn(core.clone(), &config, &shutdown);

    // The watcher must outlive the gateway
    let _watcher = match &config_path {
        Some(path) => Some(watch_allowlist(path, core.clone(), &shutdown)?),
        None => None,
    };

    let admin = if config.admin.enabled {
        Some(spawn_admin(&config, core.clone(), registry.clone(), &shutdown).await?)
    } else {
        None
    };

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_shutdown.trigger();
    });

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let gateway = GatewayServer::new(&config, core, registry)?;
    let served = gateway.run(listener, shutdown.subscribe()).await;

    shutdown.trigger();
    if let Some(admin) = admin {
        if let Err(e) = admin.await {
            tracing::error!(error = %e, "Admin server task failed");
        }
    }
    maintenance.join().await;

    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Index records listed in a JSON seed file.
pub fn load_seed(path: &Path, registry: &InMemoryIdentifierRegistry) -> Result<usize, StartupError> {
    let content = std::fs::read_to_string(path)?;
    let records: Vec<SeedRecord> = serde_json::from_str(&content)?;
    Ok(registry.seed(records))
}

/// Hot-reload the SSRF allowlist when the config file changes.
fn watch_allowlist(
    path: &Path,
    core: Arc<SecurityCore>,
    shutdown: &Shutdown,
) -> Result<notify::RecommendedWatcher, StartupError> {
    let (watcher, updates) = ConfigWatcher::new(path);
    let handle = watcher.run()?;
    tokio::spawn(apply_reloads(core, updates, shutdown.subscribe()));
    Ok(handle)
}

async fn apply_reloads(
    core: Arc<SecurityCore>,
    mut updates: mpsc::UnboundedReceiver<GuardConfig>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            Some(config) = updates.recv() => {
                match core.ssrf().replace_domains(&config.ssrf.allowed_domains, "config_reload") {
                    Ok(()) => tracing::info!(
                        domains = config.ssrf.allowed_domains.len(),
                        "Allowed domains reloaded"
                    ),
                    Err(e) => tracing::error!(error = %e, "Rejected allowlist reload"),
                }
            }
            _ = shutdown.recv() => break,
            else => break,
        }
    }
}

async fn spawn_admin(
    config: &GuardConfig,
    core: Arc<SecurityCore>,
    registry: Arc<InMemoryIdentifierRegistry>,
    shutdown: &Shutdown,
) -> Result<JoinHandle<()>, StartupError> {
    let listener = TcpListener::bind(&config.admin.bind_address).await?;
    let addr = listener.local_addr()?;
    let router = setup_admin_router(AdminState::new(core, registry, &config.admin.api_key));
    let mut stop = shutdown.subscribe();

    tracing::info!(address = %addr, "Admin API listening");
    Ok(tokio::spawn(async move {
        let served = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = stop.recv().await;
        })
        .await;
        if let Err(e) = served {
            tracing::error!(error = %e, "Admin server error");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_resolve_defaults() {
        let config = resolve_config(None).unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn test_load_seed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"category": "students", "cpf": "529.982.247-25", "id": "s-1"}},
                {{"category": "professors", "cpf": "11144477735", "id": "p-9"}},
                {{"category": "students", "cpf": "000", "id": "s-2"}}
            ]"#
        )
        .unwrap();

        let registry = InMemoryIdentifierRegistry::new();
        assert_eq!(load_seed(file.path(), &registry).unwrap(), 2);
        assert_eq!(registry.len(), 2);

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        write!(broken, "not json").unwrap();
        assert!(matches!(
            load_seed(broken.path(), &registry),
            Err(StartupError::Seed(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rate_limit.general]\nmax_requests = 0\nwindow_secs = 60").unwrap();
        assert!(matches!(
            resolve_config(Some(file.path())),
            Err(ConfigError::Validation(_))
        ));
    }
}
