// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Follows one chain's head and feeds every new block to its ledger.

use crate::client::{receipt_with_retry, ChainClient};
use crate::error::{BridgeError, BridgeResult};
use crate::ledger::{ShiftSummary, UnconfirmedLedger};
use crate::types::{BlockSummary, CrossBlockEvent};
use ethers::types::{Address, H256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct ChainWatcher {
    chain_name: String,
    client: Arc<dyn ChainClient>,
    contract: Address,
    ledger: Arc<UnconfirmedLedger>,
    poll_interval: Duration,
    retry_backoff: Duration,
    next_block: u64,
    // Hashes of the blocks inserted within the confirmation depth
    inserted: BTreeMap<u64, H256>,
}

impl ChainWatcher {
    pub fn new(
        chain_name: &str,
        client: Arc<dyn ChainClient>,
        contract: Address,
        ledger: Arc<UnconfirmedLedger>,
        poll_interval: Duration,
        retry_backoff: Duration,
        start_block: u64,
    ) -> Self {
        Self {
            chain_name: chain_name.to_string(),
            client,
            contract,
            ledger,
            poll_interval,
            retry_backoff,
            next_block: start_block,
            inserted: BTreeMap::new(),
        }
    }

    /// Next block to be inserted into the ledger
    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    /// Fetches the next block and inserts it, emitting whatever it confirmed.
    ///
    /// Events confirmed by this insert that share a number are delivered as
    /// one batch. A block that does not extend the last inserted one rewinds
    /// the watcher to the fork point and nothing is inserted.
    pub async fn process_next(&mut self) -> BridgeResult<ShiftSummary> {
        let number = self.next_block;
        let block = self
            .client
            .block_by_number(number)
            .await?
            .ok_or(BridgeError::BlockNotFound(number))?;
        if let Some(fork) = self.fork_point(&block).await? {
            self.rewind(fork).await;
            return Ok(ShiftSummary::default());
        }

        let mut logs = vec![];
        for tx in block.transactions_to(self.contract) {
            let receipt = receipt_with_retry(
                self.client.as_ref(),
                &self.chain_name,
                number,
                tx.hash,
                self.retry_backoff,
            )
            .await?;
            logs.extend(receipt.logs);
        }
        debug!(
            "[{}] Block {} {:?} carries {} bridge logs",
            self.chain_name,
            number,
            block.hash,
            logs.len()
        );

        let mut current = CrossBlockEvent::new(number);
        let mut summary = self
            .ledger
            .insert(number, block.hash, logs, Some(&mut current))
            .await;
        if !current.is_empty() {
            summary.emitted.push(current.number);
            self.ledger.emitter().emit(current);
        }

        self.inserted.insert(number, block.hash);
        let keep_from = number.saturating_sub(self.ledger.depth());
        self.inserted = self.inserted.split_off(&keep_from);
        self.next_block = number + 1;
        Ok(summary)
    }

    // Lowest block to re-fetch when `block` does not extend the inserted chain
    async fn fork_point(&self, block: &BlockSummary) -> BridgeResult<Option<u64>> {
        let Some(parent) = block.number.checked_sub(1) else {
            return Ok(None);
        };
        match self.inserted.get(&parent) {
            Some(hash) if *hash != block.parent_hash => {}
            _ => return Ok(None),
        }
        let mut fork = parent;
        while let Some(below) = fork.checked_sub(1) {
            let Some(known) = self.inserted.get(&below) else {
                break;
            };
            let header = self
                .client
                .header_by_number(below)
                .await?
                .ok_or(BridgeError::BlockNotFound(below))?;
            if header.hash == *known {
                break;
            }
            fork = below;
        }
        Ok(Some(fork))
    }

    async fn rewind(&mut self, fork: u64) {
        let dropped = self.ledger.rewind(fork).await;
        self.inserted.retain(|n, _| *n < fork);
        info!(
            "[{}] Chain reorganised below block {}, re-fetching from {} ({} dropped)",
            self.chain_name, self.next_block, fork, dropped
        );
        self.next_block = fork;
    }

    /// Processes every block up to the current head. Stops at the first
    /// failing block, which is retried on the next call.
    pub async fn catch_up(&mut self) -> BridgeResult<u64> {
        let head = self.client.block_number().await?;
        while self.next_block <= head {
            self.process_next().await?;
        }
        Ok(head)
    }

    pub async fn run(mut self, cancel: CancellationToken) -> BridgeResult<()> {
        info!(
            "[{}] Starting chain watcher at block {}",
            self.chain_name, self.next_block
        );
        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(
                        "[{}] Chain watcher cancelled at block {}",
                        self.chain_name, self.next_block
                    );
                    return Ok(());
                }
                _ = interval.tick() => {
                    match self.catch_up().await {
                        Ok(head) => debug!("[{}] Caught up with head {}", self.chain_name, head),
                        Err(e) if e.is_retryable() => {
                            warn!(
                                "[{}] Block {} not processed, retrying: {}",
                                self.chain_name, self.next_block, e
                            );
                        }
                        Err(e) => {
                            error!(
                                "[{}] Chain watcher stopped at block {}: {}",
                                self.chain_name, self.next_block, e
                            );
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}
