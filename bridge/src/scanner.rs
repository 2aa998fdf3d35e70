// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Backfill of a historical block range.
//!
//! A scan collects the maker and taker logs still pending at the end of the
//! range, so a restarted node can seed its registries.

use crate::client::{receipt_with_retry, ChainClient};
use crate::error::{BridgeError, BridgeResult};
use crate::events::{decode_log, BridgeEvent, DecodeContext};
use crate::metrics::BridgeMetrics;
use crate::types::RawLog;
use ethers::types::H256;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

const PROGRESS_LOG_INTERVAL: u64 = 500;

/// Pending bridge logs found in a block range
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainScan {
    pub makers: BTreeMap<H256, RawLog>,
    pub takers: BTreeMap<H256, RawLog>,
    pub finished: BTreeSet<H256>,
    /// First block not scanned yet
    pub next_block: u64,
}

impl ChainScan {
    pub fn starting_at(block: u64) -> Self {
        Self {
            next_block: block,
            ..Default::default()
        }
    }
}

/// Removes from each chain the takers the other chain already finished.
pub fn reconcile(main: &mut ChainScan, sub: &mut ChainScan) {
    for ctx_id in &main.finished {
        sub.takers.remove(ctx_id);
    }
    for ctx_id in &sub.finished {
        main.takers.remove(ctx_id);
    }
}

pub struct BackfillScanner {
    chain_name: String,
    client: Arc<dyn ChainClient>,
    decode: DecodeContext,
    retry_backoff: Duration,
    metrics: Arc<BridgeMetrics>,
}

impl BackfillScanner {
    pub fn new(
        chain_name: &str,
        client: Arc<dyn ChainClient>,
        decode: DecodeContext,
        retry_backoff: Duration,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            chain_name: chain_name.to_string(),
            client,
            decode,
            retry_backoff,
            metrics,
        }
    }

    /// Scans `[from, end)`, up to the current head when `end` is `None`.
    pub async fn scan_range(
        &self,
        from: u64,
        end: Option<u64>,
        cancel: &CancellationToken,
    ) -> BridgeResult<ChainScan> {
        let mut scan = ChainScan::starting_at(from);
        self.resume(&mut scan, end, cancel).await?;
        Ok(scan)
    }

    /// Continues `scan` from its `next_block`.
    ///
    /// On error the blocks scanned so far are kept and `next_block` is the
    /// block to retry; a block is never half recorded.
    pub async fn resume(
        &self,
        scan: &mut ChainScan,
        end: Option<u64>,
        cancel: &CancellationToken,
    ) -> BridgeResult<()> {
        let end = match end {
            Some(end) => end,
            None => self.client.block_number().await? + 1,
        };
        info!(
            "[{}] Scanning blocks [{}, {})",
            self.chain_name, scan.next_block, end
        );
        while scan.next_block < end {
            let number = scan.next_block;
            if cancel.is_cancelled() {
                info!("[{}] Scan cancelled at block {}", self.chain_name, number);
                return Err(BridgeError::ScanCancelled { resume_at: number });
            }
            let logs = self.block_logs(number).await.map_err(|e| {
                self.metrics
                    .errors
                    .with_label_values(&[self.chain_name.as_str(), e.error_type()])
                    .inc();
                e
            })?;
            self.record(scan, logs);
            scan.next_block = number + 1;

            if number % PROGRESS_LOG_INTERVAL == 0 {
                info!(
                    "[{}] Scanned up to block {}, pending makers {}, pending takers {}",
                    self.chain_name,
                    number,
                    scan.makers.len(),
                    scan.takers.len()
                );
            }
        }
        info!(
            "[{}] Scan done at block {}: makers {}, takers {}, finished {}",
            self.chain_name,
            end,
            scan.makers.len(),
            scan.takers.len(),
            scan.finished.len()
        );
        Ok(())
    }

    fn record(&self, scan: &mut ChainScan, logs: Vec<RawLog>) {
        for log in logs {
            match decode_log(&log, &self.decode) {
                BridgeEvent::Maker(tx) => {
                    scan.makers.insert(tx.ctx_id, log);
                }
                BridgeEvent::Taker(rtx) => {
                    scan.takers.insert(rtx.ctx_id, log);
                }
                BridgeEvent::Finish(modifier) => {
                    scan.makers.remove(&modifier.ctx_id);
                    scan.finished.insert(modifier.ctx_id);
                }
                BridgeEvent::Ignored => {}
            }
        }
    }

    // Bridge contract logs of one block, in transaction order
    async fn block_logs(&self, number: u64) -> BridgeResult<Vec<RawLog>> {
        let block = self
            .client
            .block_by_number(number)
            .await?
            .ok_or(BridgeError::BlockNotFound(number))?;
        let mut logs = vec![];
        for tx in block.transactions_to(self.decode.contract) {
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
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventTopics;
    use crate::test_utils::{
        block_hash, finish_log, init_test_logging, maker_log, taker_log, MockChainClient,
        TEST_CONTRACT,
    };
    use ethers::types::{Address, U256};

    fn scanner(client: Arc<MockChainClient>, chain_id: u64) -> BackfillScanner {
        init_test_logging();
        BackfillScanner::new(
            "main",
            client,
            DecodeContext {
                contract: TEST_CONTRACT,
                chain_id: U256::from(chain_id),
                depth: 1,
                topics: EventTopics::default(),
            },
            Duration::from_millis(1),
            Arc::new(BridgeMetrics::new_for_testing()),
        )
    }

    fn maker_in(ctx: u8, number: u64) -> RawLog {
        maker_log(
            H256::repeat_byte(ctx),
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            2,
            10,
            1,
            b"",
            number,
            block_hash(number),
        )
    }

    #[tokio::test]
    async fn test_finish_removes_own_maker() {
        let client = Arc::new(MockChainClient::new(1));
        client.add_block(0, block_hash(0), vec![maker_in(1, 0), maker_in(2, 0)]);
        client.add_block(1, block_hash(1), vec![]);
        client.add_block(
            2,
            block_hash(2),
            vec![finish_log(H256::repeat_byte(1), 2, block_hash(2))],
        );

        let scan = scanner(client, 1)
            .scan_range(0, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(scan.next_block, 3);
        assert_eq!(scan.makers.keys().copied().collect::<Vec<_>>(), vec![H256::repeat_byte(2)]);
        assert!(scan.finished.contains(&H256::repeat_byte(1)));
    }

    #[tokio::test]
    async fn test_receipt_retried_once() {
        let client = Arc::new(MockChainClient::new(1));
        let log = maker_in(1, 0);
        client.add_block(0, block_hash(0), vec![log.clone()]);
        client.fail_receipt(log.tx_hash, 1);

        let scan = scanner(client.clone(), 1)
            .scan_range(0, Some(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(scan.makers.len(), 1);

        client.fail_receipt(log.tx_hash, 2);
        let err = scanner(client, 1)
            .scan_range(0, Some(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ReceiptFetchFailed { block: 0, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_failed_block_resumes_at_same_block() {
        let client = Arc::new(MockChainClient::new(1));
        client.add_block(0, block_hash(0), vec![maker_in(1, 0)]);
        let log = maker_in(2, 1);
        client.add_block(1, block_hash(1), vec![log.clone()]);
        client.fail_receipt(log.tx_hash, 2);

        let scanner = scanner(client, 1);
        let mut scan = ChainScan::starting_at(0);
        let cancel = CancellationToken::new();
        assert!(scanner.resume(&mut scan, Some(2), &cancel).await.is_err());
        assert_eq!(scan.next_block, 1);
        assert_eq!(scan.makers.len(), 1);

        scanner.resume(&mut scan, Some(2), &cancel).await.unwrap();
        assert_eq!(scan.next_block, 2);
        assert_eq!(scan.makers.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_scan_reports_resume_block() {
        let client = Arc::new(MockChainClient::new(1));
        client.add_empty_blocks(0, 5);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = scanner(client, 1)
            .scan_range(3, None, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::ScanCancelled { resume_at: 3 });
    }

    #[tokio::test]
    async fn test_missing_block_fails_scan() {
        let client = Arc::new(MockChainClient::new(1));
        client.add_empty_blocks(0, 1);
        let err = scanner(client, 1)
            .scan_range(0, Some(4), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::BlockNotFound(2));
    }

    #[test]
    fn test_reconcile_removes_finished_takers() {
        let x = H256::repeat_byte(7);
        let y = H256::repeat_byte(8);
        let mut main = ChainScan::default();
        let mut sub = ChainScan::default();
        main.finished.insert(x);
        sub.takers
            .insert(x, taker_log(x, Address::zero(), Address::zero(), 1, 1, block_hash(1)));
        sub.takers
            .insert(y, taker_log(y, Address::zero(), Address::zero(), 1, 1, block_hash(1)));
        sub.finished.insert(y);
        main.takers
            .insert(y, taker_log(y, Address::zero(), Address::zero(), 2, 1, block_hash(1)));

        reconcile(&mut main, &mut sub);
        assert!(!sub.takers.contains_key(&x));
        assert!(sub.takers.contains_key(&y));
        assert!(main.takers.is_empty());
    }
}
