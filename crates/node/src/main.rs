//! ACRABRB Node
//!
//! Runs one request through a full simulated network:
//! spawn peers, register them with settlement, post a request, wait for the
//! first quorum certificate and settle it.

use acrabrb_consensus::{Crypto, Network, Secp256k1Keccak};
use acrabrb_settlement::{address_of, FulfillmentSubmitter, LocalSettlement, Settlement};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::NodeConfig;

/// ACRABRB quorum relay
#[derive(Parser, Debug)]
#[command(name = "acrabrb")]
#[command(about = "Byzantine reliable broadcast of signed responses with on-chain style settlement", long_about = None)]
struct Args {
    /// Byzantine peers tolerated (t) [default: 3]
    #[arg(long)]
    byzantine: Option<usize>,

    /// Message adversaries tolerated (d) [default: 1]
    #[arg(long)]
    adversaries: Option<usize>,

    /// Upper bound of the simulated response latency [default: 100]
    #[arg(long)]
    max_delay_ms: Option<u64>,

    /// Peer announcement window [default: 1000]
    #[arg(long)]
    warmup_ms: Option<u64>,

    /// Quorum timeout [default: 10000]
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Request payload, hex [default: 0xbeef]
    #[arg(long)]
    payload: Option<String>,

    /// Request callback address [default: 0x5fbdb2315678afecb367f032d93f642f64180aa3]
    #[arg(long)]
    callback: Option<String>,

    /// JSON config file, overridden by flags
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn node_config(&self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };

        if let Some(t) = self.byzantine {
            config.byzantine = t;
        }
        if let Some(d) = self.adversaries {
            config.adversaries = d;
        }
        if let Some(ms) = self.max_delay_ms {
            config.max_response_delay_ms = ms;
        }
        if let Some(ms) = self.warmup_ms {
            config.warmup_ms = ms;
        }
        if let Some(ms) = self.timeout_ms {
            config.timeout_ms = ms;
        }
        if let Some(payload) = &self.payload {
            config.payload = payload.clone();
        }
        if let Some(callback) = &self.callback {
            config.callback_address = callback.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.node_config()?;
    run(config).await
}

async fn run(config: NodeConfig) -> Result<()> {
    let consensus = config.consensus();
    let payload = config.payload_bytes()?;
    let callback = config.callback()?;

    tracing::info!("Starting ACRABRB node");
    tracing::info!("  Peers: {} (t={}, d={})", consensus.network_size(), consensus.byzantine, consensus.adversaries);
    tracing::info!("  Max response delay: {}ms", consensus.max_response_delay_ms);
    tracing::info!("  Warm-up: {}ms, quorum timeout: {}ms", consensus.warmup_ms, config.timeout_ms);

    let crypto: Arc<dyn Crypto> = Arc::new(Secp256k1Keccak);
    let settlement = Arc::new(LocalSettlement::new(crypto.clone(), consensus.byzantine));

    let mut network = Network::spawn(consensus, crypto)
        .await
        .context("Network bootstrap failed")?;

    let directory = network.directory();
    for peer in &directory {
        let address = address_of(&peer.public_key);
        tracing::info!("[{}] REG PEER addr={} pubKey=0x{}", peer.id, address, hex::encode(&peer.public_key));
        settlement.register_peer(address).await?;
    }

    // Requests reach the peers through the settlement event stream
    let mut requests = settlement.subscribe_requests();
    settlement.post_request(callback, payload).await?;
    let request = requests.recv().await.context("Request stream closed")?;

    let start = Instant::now();
    network.submit_request(request);

    let timeout = Duration::from_millis(config.timeout_ms);
    let fulfillment = match tokio::time::timeout(timeout, network.next_fulfillment()).await {
        Ok(Some(fulfillment)) => fulfillment,
        Ok(None) => {
            network.shutdown().await;
            anyhow::bail!("Coordinator stopped before quorum");
        }
        Err(_) => {
            let stats = network.stats();
            network.shutdown().await;
            anyhow::bail!(
                "No quorum within {}ms ({} broadcasts relayed)",
                config.timeout_ms,
                stats.broadcasts
            );
        }
    };

    tracing::info!(
        "QUORUM {} peers in {}ms",
        fulfillment.bundle.signatures.len(),
        start.elapsed().as_millis()
    );

    let submitter = FulfillmentSubmitter::new(settlement.clone()).with_directory(directory);
    let receipt = submitter.submit(&fulfillment).await?;

    tracing::info!(
        "RECEIPT seq={} response={:?} fulfiller={} signers={}",
        receipt.sequence,
        String::from_utf8_lossy(&receipt.response),
        receipt.fulfiller,
        receipt.signers.len()
    );

    for snapshot in network.snapshots().await {
        tracing::debug!(
            "[{}] byzantine={} delivered={} ledgers={} dropped={}",
            snapshot.id,
            snapshot.byzantine,
            snapshot.delivered.len(),
            snapshot.ledgers.len(),
            snapshot.stats.bundles_dropped
        );
    }

    let stats = network.stats();
    tracing::info!(
        "Relay: {} broadcasts, {} bundles, {} bytes, {} fulfillments",
        stats.broadcasts,
        stats.bundles_relayed,
        stats.bytes_relayed,
        stats.fulfillments_seen
    );

    let failures = network.shutdown().await;
    for (id, e) in &failures {
        tracing::error!("Peer {} failed: {}", id, e);
    }

    tracing::info!("Node stopped");

    Ok(())
}
