// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pending cross transactions of one chain.
//!
//! The registry is only fed with confirmed [`CrossBlockEvent`]s: the chain's
//! own events through [`CrossTxRegistry::apply_local`] and the counterpart
//! chain's events through [`CrossTxRegistry::apply_counterpart`].

use crate::crypto::CrossTransactionWithSignatures;
use crate::events::{decode_maker, decode_taker, DecodeContext};
use crate::metrics::BridgeMetrics;
use crate::scanner::ChainScan;
use crate::types::{CrossBlockEvent, CrossTransaction, CtxStatus, ReceptTransaction};
use ethers::types::H256;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakerRecord {
    pub tx: CrossTransaction,
    pub status: CtxStatus,
    pub signatures: Option<CrossTransactionWithSignatures>,
}

pub struct CrossTxRegistry {
    chain_name: String,
    makers: HashMap<H256, MakerRecord>,
    takers: HashMap<H256, ReceptTransaction>,
    // Finishes of local makers, keyed by the local height they take effect at
    deferred_local: BTreeMap<u64, Vec<H256>>,
    // Counterpart finishes evicting local takers, keyed by counterpart height
    deferred_counterpart: BTreeMap<u64, Vec<H256>>,
    local_height: u64,
    counterpart_height: u64,
    metrics: Arc<BridgeMetrics>,
}

impl CrossTxRegistry {
    pub fn new(chain_name: &str, metrics: Arc<BridgeMetrics>) -> Self {
        Self {
            chain_name: chain_name.to_string(),
            makers: HashMap::new(),
            takers: HashMap::new(),
            deferred_local: BTreeMap::new(),
            deferred_counterpart: BTreeMap::new(),
            local_height: 0,
            counterpart_height: 0,
            metrics,
        }
    }

    pub fn maker(&self, ctx_id: &H256) -> Option<&MakerRecord> {
        self.makers.get(ctx_id)
    }

    pub fn taker(&self, ctx_id: &H256) -> Option<&ReceptTransaction> {
        self.takers.get(ctx_id)
    }

    pub fn status(&self, ctx_id: &H256) -> Option<CtxStatus> {
        self.makers.get(ctx_id).map(|r| r.status)
    }

    pub fn maker_count(&self) -> usize {
        self.makers.len()
    }

    pub fn taker_count(&self) -> usize {
        self.takers.len()
    }

    /// Applies an event confirmed on this registry's own chain.
    pub fn apply_local(&mut self, event: &CrossBlockEvent) {
        for tx in &event.confirmed_maker {
            if self.makers.contains_key(&tx.ctx_id) {
                warn!(
                    "[{}] Duplicated maker {:?}, keeping the first one",
                    self.chain_name, tx.ctx_id
                );
                continue;
            }
            self.makers.insert(
                tx.ctx_id,
                MakerRecord {
                    tx: tx.unsigned(),
                    status: CtxStatus::Pending,
                    signatures: None,
                },
            );
        }
        for rtx in &event.confirmed_taker {
            self.takers.insert(rtx.ctx_id, rtx.clone());
        }
        for modifier in &event.confirmed_finish {
            self.deferred_local
                .entry(modifier.at_block_number)
                .or_default()
                .push(modifier.ctx_id);
        }
        self.advance_local(event.number);
    }

    /// Applies an event confirmed on the counterpart chain.
    pub fn apply_counterpart(&mut self, event: &CrossBlockEvent) {
        for rtx in &event.confirmed_taker {
            let matched = self
                .makers
                .get(&rtx.ctx_id)
                .is_some_and(|record| record.tx.origin_chain_id == rtx.destination_chain_id);
            if !matched {
                debug!(
                    "[{}] Taker {:?} for chain {} matches no local maker",
                    self.chain_name, rtx.ctx_id, rtx.destination_chain_id
                );
                continue;
            }
            if self.set_status(&rtx.ctx_id, CtxStatus::Taken) {
                debug!("[{}] Maker {:?} taken", self.chain_name, rtx.ctx_id);
            }
        }
        for modifier in &event.confirmed_finish {
            self.deferred_counterpart
                .entry(modifier.at_block_number)
                .or_default()
                .push(modifier.ctx_id);
        }
        self.advance_counterpart(event.number);
    }

    /// Evicts makers whose finish took effect at or before `height`.
    pub fn advance_local(&mut self, height: u64) {
        self.local_height = self.local_height.max(height);
        let later = self.deferred_local.split_off(&(self.local_height + 1));
        let due = std::mem::replace(&mut self.deferred_local, later);
        for ctx_id in due.into_values().flatten() {
            if let Some(record) = self.makers.remove(&ctx_id) {
                info!(
                    "[{}] Maker {:?} finished (was {})",
                    self.chain_name, ctx_id, record.status
                );
            }
        }
        self.update_gauges();
    }

    /// Evicts takers whose counterpart finish took effect at or before `height`.
    pub fn advance_counterpart(&mut self, height: u64) {
        self.counterpart_height = self.counterpart_height.max(height);
        let later = self
            .deferred_counterpart
            .split_off(&(self.counterpart_height + 1));
        let due = std::mem::replace(&mut self.deferred_counterpart, later);
        for ctx_id in due.into_values().flatten() {
            if self.takers.remove(&ctx_id).is_some() {
                debug!("[{}] Taker {:?} settled", self.chain_name, ctx_id);
            }
        }
        self.update_gauges();
    }

    /// Moves a maker forward to `status`, returns false if it is unknown or
    /// already at or past it.
    pub fn set_status(&mut self, ctx_id: &H256, status: CtxStatus) -> bool {
        match self.makers.get_mut(ctx_id) {
            Some(record) if record.status < status => {
                record.status = status;
                true
            }
            _ => false,
        }
    }

    /// Stores the signatures collected so far and moves the maker to
    /// `Signed`, or `Executable` once `threshold` anchors signed.
    pub fn record_signatures(
        &mut self,
        signatures: CrossTransactionWithSignatures,
        threshold: usize,
    ) -> Option<CtxStatus> {
        let ctx_id = signatures.ctx_id();
        let status = if signatures.is_executable(threshold) {
            CtxStatus::Executable
        } else {
            CtxStatus::Signed
        };
        let record = self.makers.get_mut(&ctx_id)?;
        record.signatures = Some(signatures);
        if record.status < status {
            record.status = status;
        }
        Some(record.status)
    }

    /// Loads makers and takers found by a backfill scan.
    pub fn seed(&mut self, scan: &ChainScan, decode: &DecodeContext) {
        for log in scan.makers.values() {
            match decode_maker(log, decode.chain_id) {
                Some(tx) if !self.makers.contains_key(&tx.ctx_id) => {
                    self.makers.insert(
                        tx.ctx_id,
                        MakerRecord {
                            tx,
                            status: CtxStatus::Pending,
                            signatures: None,
                        },
                    );
                }
                Some(_) => {}
                None => warn!(
                    "[{}] Skipping malformed maker log in tx {:?}",
                    self.chain_name, log.tx_hash
                ),
            }
        }
        for log in scan.takers.values() {
            if let Some(rtx) = decode_taker(log, decode.chain_id) {
                self.takers.insert(rtx.ctx_id, rtx);
            }
        }
        info!(
            "[{}] Seeded registry: {} makers, {} takers",
            self.chain_name,
            self.makers.len(),
            self.takers.len()
        );
        self.update_gauges();
    }

    fn update_gauges(&self) {
        let chain = self.chain_name.as_str();
        self.metrics
            .pending_makers
            .with_label_values(&[chain])
            .set(self.makers.len() as i64);
        self.metrics
            .pending_takers
            .with_label_values(&[chain])
            .set(self.takers.len() as i64);
    }
}
