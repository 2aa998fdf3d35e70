// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use cross_anchor::config::{BridgeNodeConfig, BridgeServerConfig, Config};
use cross_anchor::crypto::{
    generate_anchor_key, write_anchor_key, AnchorSigner, CrossTransactionWithSignatures,
};
use cross_anchor::encoding::decode_hex;
use cross_anchor::manual::sign_transaction;
use cross_anchor::metrics::BridgeMetrics;
use cross_anchor::node::{backfill, build_coordinator, connect_chain, run_bridge_node, ChainRuntime};
use cross_anchor_cli::{AnchorCommand, Args, ChainSelector};
use ethers::signers::Signer;
use ethers::types::H256;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn load_config(path: &Path) -> anyhow::Result<BridgeServerConfig> {
    BridgeNodeConfig::load(path)?.validate()
}

async fn runtime(
    config: &BridgeServerConfig,
    chain: ChainSelector,
    metrics: Arc<BridgeMetrics>,
) -> anyhow::Result<ChainRuntime> {
    let settings = chain.settings(config);
    let client = connect_chain(settings).await?;
    Ok(ChainRuntime::new(config, settings, client, metrics))
}

// Cancels the returned token on ctrl-c
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            shutdown.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();
    let metrics = Arc::new(BridgeMetrics::new(&prometheus::Registry::new()));

    match args.command {
        AnchorCommand::Run { config_path } => {
            let config = BridgeNodeConfig::load(&config_path)?;
            run_bridge_node(
                config,
                env!("CARGO_PKG_VERSION"),
                prometheus::Registry::new(),
                interrupt_token(),
            )
            .await?;
        }
        AnchorCommand::SignTx {
            config_path,
            chain,
            hash,
            data,
        } => {
            let config = load_config(&config_path)?;
            let tx_hash = H256::from_str(&hash)
                .map_err(|e| anyhow::anyhow!("Invalid tx hash {:?}: {}", hash, e))?;
            let incoming = data
                .as_deref()
                .map(decode_hex::<CrossTransactionWithSignatures>)
                .transpose()?;

            let local = runtime(&config, chain, metrics.clone()).await?;
            let remote = runtime(&config, chain.other(), metrics.clone()).await?;
            let relay = remote.dispatcher(&config, build_coordinator(&config)?, metrics);
            let report = sign_transaction(
                local.client.as_ref(),
                &local.decode,
                &AnchorSigner::new(Some(config.anchor_key.clone())),
                &config.anchors,
                config.threshold,
                incoming.as_ref(),
                &relay,
                tx_hash,
            )
            .await?;

            for maker in &report.makers {
                println!("maker {:?}", maker.ctx_id);
                println!("  signed tx: {}", maker.signed_tx);
                println!("  record:    {}", maker.record);
                println!(
                    "  signers:   {:?} (executable: {})",
                    maker.signers, maker.executable
                );
            }
            let remote_name = chain.other();
            for (ctx_id, outcome) in &report.relays {
                match outcome {
                    Ok(outcome) => {
                        println!("taker {:?} relayed to {}: {:?}", ctx_id, remote_name, outcome)
                    }
                    Err(e) => println!("taker {:?} relay to {} failed: {}", ctx_id, remote_name, e),
                }
            }
            for ctx_id in &report.finishes {
                println!("finish {:?}", ctx_id);
            }
        }
        AnchorCommand::Scan { config_path } => {
            let config = load_config(&config_path)?;
            let main = runtime(&config, ChainSelector::Main, metrics.clone()).await?;
            let sub = runtime(&config, ChainSelector::Sub, metrics.clone()).await?;
            let ends = (main.scan_end().await?, sub.scan_end().await?);
            let (main_scan, sub_scan) =
                backfill(&config, &main, &sub, ends, metrics, &interrupt_token()).await?;
            let scans = [
                (ChainSelector::Main, &main_scan),
                (ChainSelector::Sub, &sub_scan),
            ];
            for (chain, scan) in scans {
                println!(
                    "[{}] scanned to block {}: {} pending makers, {} pending takers, {} finished",
                    chain,
                    scan.next_block,
                    scan.makers.len(),
                    scan.takers.len(),
                    scan.finished.len()
                );
                for ctx_id in scan.makers.keys() {
                    println!("  maker {:?}", ctx_id);
                }
                for ctx_id in scan.takers.keys() {
                    println!("  taker {:?}", ctx_id);
                }
            }
        }
        AnchorCommand::RegisterChain {
            config_path,
            chain,
            remote_chain_id,
            sign_confirm_count,
        } => {
            let config = load_config(&config_path)?;
            let local = runtime(&config, chain, metrics.clone()).await?;
            let dispatcher = local.dispatcher(&config, build_coordinator(&config)?, metrics);
            let tx_hash = dispatcher
                .register_chain(remote_chain_id, sign_confirm_count, &config.anchors)
                .await?;
            println!("Chain {} registered on {} in tx {:?}", remote_chain_id, chain, tx_hash);
        }
        AnchorCommand::CreateAnchorKey { path } => {
            let key = generate_anchor_key();
            write_anchor_key(&path, &key)?;
            println!("Anchor key {:?} written to {}", key.address(), path.display());
        }
    }
    Ok(())
}
