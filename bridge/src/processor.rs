// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Consumer of one chain's confirmed events.
//!
//! The chain's own events register makers and takers, get makers signed and
//! get takers settled on the other chain. The other chain's events only move
//! statuses and evict settled entries.

use crate::crypto::{AnchorSigner, CrossTransactionWithSignatures, CtxSigner};
use crate::encoding::encode_hex;
use crate::error::{BridgeError, BridgeResult};
use crate::metrics::BridgeMetrics;
use crate::registry::CrossTxRegistry;
use crate::relay::RelayDispatcher;
use crate::types::CrossBlockEvent;
use ethers::types::Address;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct ConfirmationProcessor {
    chain_name: String,
    registry: Arc<RwLock<CrossTxRegistry>>,
    signer: AnchorSigner,
    ctx_signer: CtxSigner,
    threshold: usize,
    anchors: Vec<Address>,
    // Dispatcher of the other chain, where this chain's takers settle
    relay: Arc<RelayDispatcher>,
    metrics: Arc<BridgeMetrics>,
}

impl ConfirmationProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain_name: &str,
        registry: Arc<RwLock<CrossTxRegistry>>,
        signer: AnchorSigner,
        ctx_signer: CtxSigner,
        threshold: usize,
        anchors: Vec<Address>,
        relay: Arc<RelayDispatcher>,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            chain_name: chain_name.to_string(),
            registry,
            signer,
            ctx_signer,
            threshold,
            anchors,
            relay,
            metrics,
        }
    }

    /// Handles an event confirmed on this chain.
    ///
    /// A signing failure is returned: the anchor must stop rather than skip a
    /// maker.
    pub async fn handle_local(&self, event: &CrossBlockEvent) -> BridgeResult<()> {
        let chain = self.chain_name.as_str();
        self.registry.write().await.apply_local(event);

        for tx in &event.confirmed_maker {
            let signed = self.signer.sign(tx, &self.ctx_signer).map_err(|e| {
                error!(
                    "[{}] Cannot sign maker {:?} confirmed at {}: {}",
                    chain, tx.ctx_id, event.number, e
                );
                e
            })?;
            let mut registry = self.registry.write().await;
            // A maker seen before keeps its record and the signatures merged into it
            let mut record = match registry.maker(&tx.ctx_id) {
                Some(known) => known
                    .signatures
                    .clone()
                    .unwrap_or_else(|| CrossTransactionWithSignatures::new(known.tx.clone())),
                None => CrossTransactionWithSignatures::new(tx.clone()),
            };
            let signer = match record.add_signature(&signed, &self.ctx_signer, None) {
                Ok(signer) => signer,
                Err(BridgeError::DuplicateSignature(_)) => {
                    debug!("[{}] Maker {:?} already signed", chain, tx.ctx_id);
                    continue;
                }
                Err(e @ BridgeError::MismatchedCrossTransaction { .. }) => {
                    warn!("[{}] Duplicated maker {:?} not signed: {}", chain, tx.ctx_id, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !self.anchors.contains(&signer) {
                warn!("[{}] Local key {:?} is not a registered anchor", chain, signer);
            }
            self.metrics
                .signatures_produced
                .with_label_values(&[chain])
                .inc();
            let status = registry.record_signatures(record, self.threshold);
            info!(
                "[{}] Signed maker {:?} ({:?}), tx_rlp: {}",
                chain,
                tx.ctx_id,
                status,
                encode_hex(&signed)
            );
        }

        for rtx in &event.confirmed_taker {
            if let Err(e) = self.relay.relay(rtx).await {
                warn!(
                    "[{}] Relay of taker {:?} confirmed at {} abandoned: {}",
                    chain, rtx.ctx_id, event.number, e
                );
            }
        }
        Ok(())
    }

    /// Handles an event confirmed on the other chain.
    pub async fn handle_counterpart(&self, event: &CrossBlockEvent) {
        self.registry.write().await.apply_counterpart(event);
    }

    /// Merges signatures another anchor produced for one of our makers.
    pub async fn merge_signatures(
        &self,
        incoming: &CrossTransactionWithSignatures,
    ) -> BridgeResult<usize> {
        let ctx_id = incoming.ctx_id();
        let mut registry = self.registry.write().await;
        let known = registry
            .maker(&ctx_id)
            .ok_or(BridgeError::UnknownCrossTransaction(ctx_id))?;
        let mut record = known
            .signatures
            .clone()
            .unwrap_or_else(|| CrossTransactionWithSignatures::new(known.tx.clone()));
        let added = record.merge(incoming, &self.ctx_signer, Some(&self.anchors))?;
        self.metrics
            .signatures_merged
            .with_label_values(&[self.chain_name.as_str()])
            .inc_by(added as u64);
        registry.record_signatures(record, self.threshold);
        Ok(added)
    }

    pub async fn run(
        self,
        mut local: broadcast::Receiver<CrossBlockEvent>,
        mut counterpart: broadcast::Receiver<CrossBlockEvent>,
        cancel: CancellationToken,
    ) -> BridgeResult<()> {
        let chain = self.chain_name.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = local.recv() => match event {
                    Ok(event) => self.handle_local(&event).await?,
                    Err(RecvError::Lagged(n)) => {
                        error!("[{}] Processor lagged behind, {} confirmed events lost", chain, n)
                    }
                    Err(RecvError::Closed) => break,
                },
                event = counterpart.recv() => match event {
                    Ok(event) => self.handle_counterpart(&event).await,
                    Err(RecvError::Lagged(n)) => {
                        warn!("[{}] Processor skipped {} counterpart events", chain, n)
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        info!("[{}] Confirmation processor stopped", chain);
        Ok(())
    }
}
