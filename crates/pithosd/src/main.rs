//! pithosd: Pithos storage node daemon.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use pithos_core::config::PithosConfig;
use pithos_core::TransportAddress;
use pithos_services::{MetricsSink, ReadyFlag, TracingMetrics};

use pithosd::udp::{self, UdpTransport};
use pithosd::{node, roles, Communicator, LoopbackOverlay, Node};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = PithosConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = PithosConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        PithosConfig::default()
    });

    let bind: SocketAddr = format!("{}:{}", config.network.bind, config.network.port)
        .parse()
        .with_context(|| format!("invalid bind address {}", config.network.bind))?;
    let socket = Arc::new(
        UdpSocket::bind(bind)
            .await
            .context("failed to bind communicator socket")?,
    );
    let address = TransportAddress::new(socket.local_addr()?);
    tracing::info!(%address, "pithosd starting");

    // Underlay readiness
    let ready = ReadyFlag::new(config.network.bootstrap_wait_ms == 0);
    if config.network.bootstrap_wait_ms > 0 {
        let ready = ready.clone();
        let wait = Duration::from_millis(config.network.bootstrap_wait_ms);
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            ready.set_ready(true);
            tracing::info!("underlay bootstrap complete");
        });
    }

    let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetrics);
    let components = roles::build(&config.roles, metrics.clone());
    tracing::info!(
        peer_logic = config.roles.peer_logic,
        group_storage = config.roles.group_storage,
        super_peer = config.roles.super_peer,
        role = ?components.role(),
        "roles enabled"
    );

    let (handle, inbox) = node::channel(address);
    let (transport, outgoing) = UdpTransport::channel();
    let communicator = Communicator::new(
        address,
        components,
        Box::new(transport),
        Box::new(LoopbackOverlay::new(handle.clone())),
        Arc::new(ready),
        &config,
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let node_task = tokio::spawn(
        Node::new(communicator, inbox, shutdown_tx.subscribe(), metrics).run(),
    );

    let sender_task = tokio::spawn(udp::send_loop(
        socket.clone(),
        outgoing,
        shutdown_tx.subscribe(),
    ));

    let receiver_task = tokio::spawn(udp::receive_loop(
        socket,
        handle.clone(),
        shutdown_tx.subscribe(),
    ));

    let stats_printer = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            match handle.snapshot().await {
                Ok(snap) => tracing::info!(
                    packets_sent = snap.packets_sent,
                    packets_received = snap.packets_received,
                    bytes_sent = snap.bytes_sent,
                    bytes_received = snap.bytes_received,
                    "traffic snapshot"
                ),
                Err(_) => return,
            }
        }
    });

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        r = node_task => match r {
            Ok(Ok(report)) => match serde_json::to_string(&report) {
                Ok(json) => tracing::info!(report = %json, "node stopped"),
                Err(_) => tracing::info!(?report, "node stopped"),
            },
            Ok(Err(e)) => {
                tracing::error!(error = %e, "node failed");
                return Err(e).context("node stopped on a fatal error");
            }
            Err(e) => tracing::error!(error = %e, "node task panicked"),
        },
        r = sender_task   => tracing::error!("udp sender exited: {:?}", r),
        r = receiver_task => tracing::error!("udp receiver exited: {:?}", r),
        r = stats_printer => tracing::error!("stats printer exited: {:?}", r),
    }

    Ok(())
}
