// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-chain ledger of mined blocks waiting for confirmation depth.
//!
//! Blocks are inserted in ascending order. Every insert first walks the
//! oldest entries: an entry whose canonical hash changed is a side fork and is
//! dropped, an entry that reached `depth` is decoded and its bridge events are
//! batched into a [`CrossBlockEvent`] numbered `header.number + depth`.

use crate::client::ChainClient;
use crate::config::LedgerConfig;
use crate::events::{decode_log, BridgeEvent, DecodeContext};
use crate::metrics::BridgeMetrics;
use crate::types::{BlockLogEntry, CrossBlockEvent, RawLog};
use ethers::types::H256;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// Fan-out of confirmed cross block events to the chain's subscribers.
#[derive(Clone)]
pub struct ConfirmationEmitter {
    chain_name: String,
    sender: broadcast::Sender<CrossBlockEvent>,
    metrics: Arc<BridgeMetrics>,
}

impl ConfirmationEmitter {
    pub fn new(chain_name: &str, capacity: usize, metrics: Arc<BridgeMetrics>) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            chain_name: chain_name.to_string(),
            sender,
            metrics,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CrossBlockEvent> {
        self.sender.subscribe()
    }

    /// Delivers `event` to current subscribers, returns how many received it.
    /// Empty events are never delivered.
    pub fn emit(&self, event: CrossBlockEvent) -> usize {
        if event.is_empty() {
            return 0;
        }
        let chain = self.chain_name.as_str();
        self.metrics
            .cross_block_events_emitted
            .with_label_values(&[chain])
            .inc();
        self.metrics
            .confirmed_makers
            .with_label_values(&[chain])
            .inc_by(event.confirmed_maker.len() as u64);
        self.metrics
            .confirmed_takers
            .with_label_values(&[chain])
            .inc_by(event.confirmed_taker.len() as u64);
        self.metrics
            .confirmed_finishes
            .with_label_values(&[chain])
            .inc_by(event.confirmed_finish.len() as u64);
        info!("[{}] Confirmed cross block event {}", chain, event);
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("[{}] No subscriber for confirmed event", chain);
                0
            }
        }
    }
}

/// What one `shift` walk did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShiftSummary {
    pub confirmed: usize,
    pub dropped: usize,
    /// Numbers of the events emitted by the ledger itself
    pub emitted: Vec<u64>,
    /// Whether any confirmation was merged into the caller's event
    pub merged: bool,
}

pub struct UnconfirmedLedger {
    chain_name: String,
    client: Arc<dyn ChainClient>,
    config: LedgerConfig,
    decode: DecodeContext,
    entries: Mutex<VecDeque<BlockLogEntry>>,
    emitter: ConfirmationEmitter,
    metrics: Arc<BridgeMetrics>,
}

impl UnconfirmedLedger {
    pub fn new(
        chain_name: &str,
        client: Arc<dyn ChainClient>,
        config: LedgerConfig,
        decode: DecodeContext,
        emitter: ConfirmationEmitter,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            chain_name: chain_name.to_string(),
            client,
            config,
            decode,
            entries: Mutex::new(VecDeque::with_capacity(config.capacity)),
            emitter,
            metrics,
        }
    }

    pub fn emitter(&self) -> &ConfirmationEmitter {
        &self.emitter
    }

    pub fn depth(&self) -> u64 {
        self.config.depth
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Heights currently waiting for confirmation, oldest first
    pub async fn pending_indices(&self) -> Vec<u64> {
        self.entries.lock().await.iter().map(|e| e.index).collect()
    }

    /// Confirms whatever `index` makes old enough, then appends the block.
    pub async fn insert(
        &self,
        index: u64,
        hash: H256,
        logs: Vec<RawLog>,
        current: Option<&mut CrossBlockEvent>,
    ) -> ShiftSummary {
        let mut entries = self.entries.lock().await;
        let summary = self.shift_locked(&mut entries, index, current).await;

        entries.push_back(BlockLogEntry { index, hash, logs });
        if entries.len() > self.config.capacity {
            warn!(
                "[{}] Unconfirmed ledger holds {} blocks, above capacity {}",
                self.chain_name,
                entries.len(),
                self.config.capacity
            );
        }
        self.metrics
            .ledger_blocks_inserted
            .with_label_values(&[self.chain_name.as_str()])
            .inc();
        self.metrics
            .last_inserted_block
            .with_label_values(&[self.chain_name.as_str()])
            .set(index as i64);
        self.metrics
            .ledger_size
            .with_label_values(&[self.chain_name.as_str()])
            .set(entries.len() as i64);
        summary
    }

    /// Drops every entry at or above `index`, returns how many.
    ///
    /// Used when the chain reorganised below blocks already inserted.
    pub async fn rewind(&self, index: u64) -> usize {
        let chain = self.chain_name.as_str();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.index < index);
        let dropped = before - entries.len();
        self.metrics
            .ledger_side_fork_blocks
            .with_label_values(&[chain])
            .inc_by(dropped as u64);
        self.metrics
            .ledger_size
            .with_label_values(&[chain])
            .set(entries.len() as i64);
        dropped
    }

    /// Confirms or drops every entry that is old enough relative to `height`.
    pub async fn shift(&self, height: u64, current: Option<&mut CrossBlockEvent>) -> ShiftSummary {
        let mut entries = self.entries.lock().await;
        let summary = self.shift_locked(&mut entries, height, current).await;
        self.metrics
            .ledger_size
            .with_label_values(&[self.chain_name.as_str()])
            .set(entries.len() as i64);
        summary
    }

    async fn shift_locked(
        &self,
        entries: &mut VecDeque<BlockLogEntry>,
        height: u64,
        mut current: Option<&mut CrossBlockEvent>,
    ) -> ShiftSummary {
        let chain = self.chain_name.as_str();
        let mut summary = ShiftSummary::default();
        while let Some(next) = entries.front() {
            // Entries are ascending, nothing after this one is old enough either
            if next.index + self.config.depth > height {
                break;
            }
            let header = match self.client.header_by_number(next.index).await {
                Ok(Some(header)) => header,
                Ok(None) => {
                    warn!(
                        "[{}] Canonical header of block {} not available, retrying later",
                        chain, next.index
                    );
                    self.metrics
                        .ledger_header_lookup_failures
                        .with_label_values(&[chain])
                        .inc();
                    break;
                }
                Err(e) => {
                    warn!(
                        "[{}] Failed to retrieve header of block {}: {:?}",
                        chain, next.index, e
                    );
                    self.metrics
                        .ledger_header_lookup_failures
                        .with_label_values(&[chain])
                        .inc();
                    self.metrics
                        .errors
                        .with_label_values(&[chain, e.error_type()])
                        .inc();
                    break;
                }
            };

            let Some(entry) = entries.pop_front() else {
                break;
            };
            if header.hash != entry.hash {
                info!(
                    "[{}] Block {} {:?} became a side fork, canonical is {:?}",
                    chain, entry.index, entry.hash, header.hash
                );
                self.metrics
                    .ledger_side_fork_blocks
                    .with_label_values(&[chain])
                    .inc();
                summary.dropped += 1;
                continue;
            }

            let confirm_number = header.number + self.config.depth;
            let mut event = CrossBlockEvent::new(confirm_number);
            self.collect_events(&entry, &mut event);
            debug!(
                "[{}] Block {} confirmed at {}: {}",
                chain, entry.index, height, event
            );
            self.metrics
                .ledger_blocks_confirmed
                .with_label_values(&[chain])
                .inc();
            summary.confirmed += 1;

            match current.as_deref_mut() {
                Some(batch) if batch.number == confirm_number => {
                    batch.extend(
                        event.confirmed_maker,
                        event.confirmed_taker,
                        event.confirmed_finish,
                    );
                    summary.merged = true;
                }
                _ => {
                    if !event.is_empty() {
                        summary.emitted.push(event.number);
                        self.emitter.emit(event);
                    }
                }
            }
        }
        summary
    }

    // Logs not produced in this exact block are left out
    fn collect_events(&self, entry: &BlockLogEntry, event: &mut CrossBlockEvent) {
        for log in entry.logs.iter().filter(|l| l.block_hash == entry.hash) {
            match decode_log(log, &self.decode) {
                BridgeEvent::Maker(tx) => event.confirmed_maker.push(tx),
                BridgeEvent::Taker(rtx) => event.confirmed_taker.push(rtx),
                BridgeEvent::Finish(modifier) => event.confirmed_finish.push(modifier),
                BridgeEvent::Ignored => {}
            }
        }
    }
}
