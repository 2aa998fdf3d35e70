// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::client::{ChainClient, EthChainClient};
use crate::config::{BridgeNodeConfig, BridgeServerConfig, ChainSettings};
use crate::coordinator::{AnchorCoordinator, RaftRpcCoordinator, StaticCoordinator};
use crate::crypto::{AnchorSigner, CtxSigner};
use crate::events::DecodeContext;
use crate::ledger::{ConfirmationEmitter, UnconfirmedLedger};
use crate::metrics::BridgeMetrics;
use crate::processor::ConfirmationProcessor;
use crate::registry::CrossTxRegistry;
use crate::relay::RelayDispatcher;
use crate::scanner::{reconcile, BackfillScanner, ChainScan};
use crate::server::{run_server, AnchorNodePublicMetadata};
use crate::watcher::ChainWatcher;
use anyhow::anyhow;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Per-chain pieces shared by the watcher, the processor and the backfill.
pub struct ChainRuntime {
    pub settings: ChainSettings,
    pub decode: DecodeContext,
    pub client: Arc<dyn ChainClient>,
    pub ledger: Arc<UnconfirmedLedger>,
    pub registry: Arc<RwLock<CrossTxRegistry>>,
}

impl ChainRuntime {
    pub fn new(
        config: &BridgeServerConfig,
        settings: &ChainSettings,
        client: Arc<dyn ChainClient>,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        let decode = settings.decode_context(config.topics);
        let emitter = ConfirmationEmitter::new(settings.name, config.channel_size, metrics.clone());
        let ledger = UnconfirmedLedger::new(
            settings.name,
            client.clone(),
            settings.ledger,
            decode,
            emitter,
            metrics.clone(),
        );
        Self {
            settings: settings.clone(),
            decode,
            client,
            ledger: Arc::new(ledger),
            registry: Arc::new(RwLock::new(CrossTxRegistry::new(settings.name, metrics))),
        }
    }

    pub fn scanner(
        &self,
        config: &BridgeServerConfig,
        metrics: Arc<BridgeMetrics>,
    ) -> BackfillScanner {
        BackfillScanner::new(
            self.settings.name,
            self.client.clone(),
            self.decode,
            config.receipt_retry_backoff,
            metrics,
        )
    }

    /// Dispatcher settling takers on this chain
    pub fn dispatcher(
        &self,
        config: &BridgeServerConfig,
        coordinator: Arc<dyn AnchorCoordinator>,
        metrics: Arc<BridgeMetrics>,
    ) -> RelayDispatcher {
        RelayDispatcher::new(
            self.settings.name,
            self.settings.chain_id,
            self.settings.contract,
            config.relay_gas_limit,
            self.client.clone(),
            config.anchor_key.clone(),
            coordinator,
            metrics,
        )
    }

    /// Exclusive end of a backfill: the configured end block, else the head
    pub async fn scan_end(&self) -> anyhow::Result<u64> {
        match self.settings.end_block {
            Some(end) => Ok(end),
            None => Ok(self.client.block_number().await? + 1),
        }
    }

    /// First block that is not confirmed yet at the current head
    async fn confirmed_end(&self) -> anyhow::Result<u64> {
        let head = self.client.block_number().await?;
        Ok((head + 1)
            .saturating_sub(self.settings.ledger.depth)
            .max(self.settings.start_block))
    }
}

pub async fn connect_chain(settings: &ChainSettings) -> anyhow::Result<Arc<dyn ChainClient>> {
    let client = EthChainClient::new(settings.name, &settings.rpc_url, settings.chain_id)
        .await
        .map_err(|e| {
            anyhow!(
                "[{}] Failed to connect to {}: {}",
                settings.name,
                settings.rpc_url,
                e
            )
        })?;
    Ok(Arc::new(client))
}

pub fn build_coordinator(
    config: &BridgeServerConfig,
) -> anyhow::Result<Arc<dyn AnchorCoordinator>> {
    Ok(match &config.raft_rpc_url {
        Some(url) => Arc::new(RaftRpcCoordinator::new(url)?),
        None => Arc::new(StaticCoordinator::new(format!("{:?}", config.anchor_address()))),
    })
}

/// Scans both chains up to `ends` and seeds their registries with whatever
/// is still pending.
pub async fn backfill(
    config: &BridgeServerConfig,
    main: &ChainRuntime,
    sub: &ChainRuntime,
    ends: (u64, u64),
    metrics: Arc<BridgeMetrics>,
    cancel: &CancellationToken,
) -> anyhow::Result<(ChainScan, ChainScan)> {
    let mut main_scan = main
        .scanner(config, metrics.clone())
        .scan_range(main.settings.start_block, Some(ends.0), cancel)
        .await?;
    let mut sub_scan = sub
        .scanner(config, metrics)
        .scan_range(sub.settings.start_block, Some(ends.1), cancel)
        .await?;
    reconcile(&mut main_scan, &mut sub_scan);
    main.registry.write().await.seed(&main_scan, &main.decode);
    sub.registry.write().await.seed(&sub_scan, &sub.decode);
    Ok((main_scan, sub_scan))
}

pub async fn run_bridge_node(
    config: BridgeNodeConfig,
    version: &'static str,
    prometheus_registry: prometheus::Registry,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let config = config.validate()?;
    let metrics = Arc::new(BridgeMetrics::new(&prometheus_registry));

    let main_client = connect_chain(&config.main).await?;
    let sub_client = connect_chain(&config.sub).await?;
    let main = ChainRuntime::new(&config, &config.main, main_client, metrics.clone());
    let sub = ChainRuntime::new(&config, &config.sub, sub_client, metrics.clone());

    let coordinator = build_coordinator(&config)?;
    let node_info = coordinator.node_info().await?;
    info!(
        "Anchor {:?} joined a cluster of {} as {}",
        config.anchor_address(),
        node_info.cluster_size,
        node_info.role
    );

    let metrics_address =
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), config.metrics_port);
    let server_handle = run_server(
        metrics_address,
        AnchorNodePublicMetadata {
            version,
            anchor_address: config.anchor_address(),
            main_chain_id: config.main.chain_id,
            sub_chain_id: config.sub.chain_id,
        },
        coordinator.clone(),
        prometheus_registry,
    )
    .await?;

    // Whatever is confirmed already comes from the backfill, the watchers
    // start at the first block still waiting for depth.
    let ends = (main.confirmed_end().await?, sub.confirmed_end().await?);
    let (main_scan, sub_scan) =
        backfill(&config, &main, &sub, ends, metrics.clone(), &cancel).await?;
    info!(
        "Backfill done: main makers {} takers {}, sub makers {} takers {}",
        main_scan.makers.len(),
        main_scan.takers.len(),
        sub_scan.makers.len(),
        sub_scan.takers.len()
    );

    let main_dispatcher = Arc::new(main.dispatcher(&config, coordinator.clone(), metrics.clone()));
    let sub_dispatcher = Arc::new(sub.dispatcher(&config, coordinator.clone(), metrics.clone()));

    let mut tasks = JoinSet::new();
    for (local, remote, relay) in [
        (&main, &sub, sub_dispatcher),
        (&sub, &main, main_dispatcher),
    ] {
        let processor = ConfirmationProcessor::new(
            local.settings.name,
            local.registry.clone(),
            AnchorSigner::new(Some(config.anchor_key.clone())),
            CtxSigner::new(local.settings.chain_id),
            config.threshold,
            config.anchors.clone(),
            relay,
            metrics.clone(),
        );
        // Subscribe before any watcher runs so no confirmation is missed
        let local_rx = local.ledger.emitter().subscribe();
        let remote_rx = remote.ledger.emitter().subscribe();
        tasks.spawn(processor.run(local_rx, remote_rx, cancel.clone()));
    }
    for (runtime, start) in [(&main, ends.0), (&sub, ends.1)] {
        let watcher = ChainWatcher::new(
            runtime.settings.name,
            runtime.client.clone(),
            runtime.settings.contract,
            runtime.ledger.clone(),
            runtime.settings.poll_interval,
            config.receipt_retry_backoff,
            start,
        );
        tasks.spawn(watcher.run(cancel.clone()));
    }

    let mut result = Ok(());
    while let Some(joined) = tasks.join_next().await {
        let outcome = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => anyhow!(e),
            Err(e) => anyhow!("Task join error: {}", e),
        };
        error!("Anchor node task failed, shutting down: {}", outcome);
        cancel.cancel();
        if result.is_ok() {
            result = Err(outcome);
        }
    }
    server_handle.abort();
    info!("Anchor node stopped");
    result
}
