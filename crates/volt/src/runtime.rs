use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use volt_core::cluster::MemberId;
use volt_core::store::ensure_layout;
use volt_core::{Component, Health, SharedConfig, VoltConfig};
use volt_runtime::{
    serve_status, Cluster, ClusterSettings, Director, DirectorState, Overwatch, OverwatchHandle,
    StatusState,
};

/// Hostname of this machine, or `unknown`.
pub fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// A single volt member.
pub struct Volt {
    config: VoltConfig,
}

impl Volt {
    pub fn new(config: VoltConfig) -> Self {
        Self { config }
    }

    /// Join the cluster, serve status and block until a shutdown signal.
    pub async fn run(self) -> Result<()> {
        let config = self.config;
        tracing::info!(version = env!("CARGO_PKG_VERSION"), "volt starting");

        let status_addr: SocketAddr = config
            .node
            .listen_address
            .parse()
            .with_context(|| format!("invalid listen address {}", config.node.listen_address))?;

        let store = volt_runtime::connect(&config.store).await?;
        ensure_layout(store.as_ref()).await?;

        let seed = SharedConfig::from_cluster_config(&config.cluster);
        let shared = SharedConfig::load(store.as_ref(), &seed).await?;
        tracing::info!(
            heartbeat_interval = ?shared.heartbeat_interval,
            heartbeat_timeout = ?shared.heartbeat_timeout,
            "Loaded shared config"
        );

        let hostname = local_hostname();
        let member_id = match &config.node.member_id {
            Some(id) => MemberId::new(id.clone()),
            None => MemberId::derive(&hostname, &config.node.listen_address),
        };

        let settings = ClusterSettings::new(
            member_id.clone(),
            hostname,
            config.node.listen_address.clone(),
            &shared,
            &config.cluster,
        )
        .with_tags(config.node.tags.clone())
        .with_version(env!("CARGO_PKG_VERSION"));

        let health = Arc::new(Health::new());
        let state = Arc::new(DirectorState::new());
        let (overwatch_handle, reports) =
            OverwatchHandle::channel(config.overwatch.report_queue_size);
        let (distribute_tx, distribute_rx) = mpsc::channel(config.cluster.distribute_queue_size);

        let cluster = Arc::new(Cluster::new(
            store.clone(),
            settings,
            state.clone(),
            distribute_tx.clone(),
            overwatch_handle.clone(),
        ));
        let director = Arc::new(Director::new(
            store.clone(),
            state.clone(),
            distribute_tx,
            distribute_rx,
            overwatch_handle,
        ));

        let components: Vec<Arc<dyn Component>> = vec![
            cluster.clone() as Arc<dyn Component>,
            director.clone() as Arc<dyn Component>,
        ];
        for component in &components {
            component
                .start()
                .await
                .with_context(|| format!("failed to start {}", component.identify()))?;
        }

        let overwatch = Arc::new(Overwatch::new(
            store.clone(),
            config.overwatch.clone(),
            health.clone(),
            components,
            reports,
        ));
        overwatch.start()?;

        let shutdown = CancellationToken::new();
        let status = StatusState {
            health,
            registry: cluster.registry().clone(),
            state,
            member_id: member_id.clone(),
        };
        let mut server = tokio::spawn(serve_status(status_addr, status, shutdown.clone()));

        tracing::info!(member_id = %member_id, "volt started");

        let server_result = tokio::select! {
            _ = shutdown_signal() => None,
            result = &mut server => Some(result),
        };

        tracing::info!("Starting graceful shutdown");

        overwatch.stop().await;
        if let Err(e) = director.stop().await {
            tracing::warn!(error = %e, "Director stop failed");
        }
        if let Err(e) = cluster.stop().await {
            tracing::warn!(error = %e, "Cluster stop failed");
        }
        if let Err(e) = cluster.leave().await {
            tracing::warn!(error = %e, "Failed to leave cluster cleanly");
        }

        shutdown.cancel();
        let server_result = match server_result {
            Some(result) => result,
            None => server.await,
        };

        tracing::info!("volt stopped");

        server_result
            .context("status server task panicked")?
            .context("status server failed")
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_hostname_not_empty() {
        assert!(!local_hostname().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_listen_address() {
        let mut config = VoltConfig::default();
        config.node.listen_address = "not-an-address".to_string();

        let err = Volt::new(config).run().await.unwrap_err();
        assert!(err.to_string().contains("invalid listen address"));
    }
}
