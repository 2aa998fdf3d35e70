// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{BridgeError, BridgeResult};
use crate::types::{BlockSummary, Header, RawLog, Receipt, TxSummary};
use async_trait::async_trait;
use ethers::providers::{Http, JsonRpcClient, Middleware, Provider};
use ethers::types::{Address, BlockNumber, Bytes, H256, U256};
use std::time::Duration;
use tap::TapFallible;
use tracing::{error, info, warn};

/// Chain access needed by the confirmation and relay pipeline.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> BridgeResult<u64>;

    /// Height of the current chain head
    async fn block_number(&self) -> BridgeResult<u64>;

    /// Canonical header at `number`, `None` if the chain is not that high yet
    async fn header_by_number(&self, number: u64) -> BridgeResult<Option<Header>>;

    async fn block_by_number(&self, number: u64) -> BridgeResult<Option<BlockSummary>>;

    async fn transaction_receipt(&self, tx_hash: H256) -> BridgeResult<Option<Receipt>>;

    /// Next nonce of `address`, pending transactions included
    async fn account_nonce(&self, address: Address) -> BridgeResult<u64>;

    async fn suggest_gas_price(&self) -> BridgeResult<U256>;

    async fn send_raw_transaction(&self, raw: Bytes) -> BridgeResult<H256>;
}

/// Fetches a receipt of a mined block's transaction, retrying once after
/// `backoff`. A second failure names the block so the pass can resume there.
pub async fn receipt_with_retry(
    client: &dyn ChainClient,
    chain_name: &str,
    block: u64,
    tx_hash: H256,
    backoff: Duration,
) -> BridgeResult<Receipt> {
    let first = match client.transaction_receipt(tx_hash).await {
        Ok(Some(receipt)) => return Ok(receipt),
        Ok(None) => "receipt not found".to_string(),
        Err(e) => e.to_string(),
    };
    warn!(
        "[{}] Failed to get receipt of tx {:?} in block {}: {}, retrying in {:?}",
        chain_name, tx_hash, block, first, backoff
    );
    tokio::time::sleep(backoff).await;
    let reason = match client.transaction_receipt(tx_hash).await {
        Ok(Some(receipt)) => return Ok(receipt),
        Ok(None) => "receipt not found".to_string(),
        Err(e) => e.to_string(),
    };
    error!(
        "[{}] Giving up on receipt of tx {:?} in block {}: {}",
        chain_name, tx_hash, block, reason
    );
    Err(BridgeError::ReceiptFetchFailed {
        block,
        tx_hash,
        reason,
    })
}

/// `ChainClient` over an ethers JSON-RPC provider.
pub struct EthChainClient<P> {
    provider: Provider<P>,
    chain_name: String,
}

impl EthChainClient<Http> {
    pub async fn new(
        chain_name: &str,
        provider_url: &str,
        expected_chain_id: u64,
    ) -> BridgeResult<Self> {
        let provider = Provider::<Http>::try_from(provider_url).map_err(|e| {
            BridgeError::InvalidConfig(format!("invalid rpc url {}: {}", provider_url, e))
        })?;
        let client = Self::with_provider(chain_name, provider);
        client.describe(expected_chain_id).await?;
        Ok(client)
    }
}

impl<P> EthChainClient<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn with_provider(chain_name: &str, provider: Provider<P>) -> Self {
        Self {
            provider,
            chain_name: chain_name.to_string(),
        }
    }

    pub fn provider(&self) -> &Provider<P> {
        &self.provider
    }

    // Validate chain identifier and log connection info
    async fn describe(&self, expected_chain_id: u64) -> BridgeResult<()> {
        let chain_id = self.provider.get_chainid().await?.as_u64();
        if chain_id != expected_chain_id {
            return Err(BridgeError::ChainIdMismatch {
                expected: expected_chain_id,
                actual: chain_id,
            });
        }
        let block_number = self.provider.get_block_number().await?;
        info!(
            "[{}] Connected to chain {}, current block: {}",
            self.chain_name, chain_id, block_number
        );
        Ok(())
    }
}

#[async_trait]
impl<P> ChainClient for EthChainClient<P>
where
    P: JsonRpcClient + 'static,
{
    async fn chain_id(&self) -> BridgeResult<u64> {
        Ok(self.provider.get_chainid().await?.as_u64())
    }

    async fn block_number(&self) -> BridgeResult<u64> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    async fn header_by_number(&self, number: u64) -> BridgeResult<Option<Header>> {
        let block = self
            .provider
            .get_block(BlockNumber::Number(number.into()))
            .await
            .tap_err(|e| warn!("[{}] Failed to get header {}: {:?}", self.chain_name, number, e))?;
        let Some(block) = block else {
            return Ok(None);
        };
        // A block without a hash is still pending
        match (block.hash, block.number) {
            (Some(hash), Some(n)) => Ok(Some(Header {
                number: n.as_u64(),
                hash,
                parent_hash: block.parent_hash,
            })),
            _ => Ok(None),
        }
    }

    async fn block_by_number(&self, number: u64) -> BridgeResult<Option<BlockSummary>> {
        let block = self
            .provider
            .get_block_with_txs(BlockNumber::Number(number.into()))
            .await?;
        let Some(block) = block else {
            return Ok(None);
        };
        let (Some(hash), Some(n)) = (block.hash, block.number) else {
            return Ok(None);
        };
        Ok(Some(BlockSummary {
            number: n.as_u64(),
            hash,
            parent_hash: block.parent_hash,
            transactions: block
                .transactions
                .iter()
                .map(|tx| TxSummary {
                    hash: tx.hash,
                    to: tx.to,
                })
                .collect(),
        }))
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> BridgeResult<Option<Receipt>> {
        let Some(receipt) = self.provider.get_transaction_receipt(tx_hash).await? else {
            return Ok(None);
        };
        let block_hash = receipt.block_hash.ok_or_else(|| {
            BridgeError::ProviderError(format!("receipt of {:?} has no block hash", tx_hash))
        })?;
        let block_number = receipt.block_number.ok_or_else(|| {
            BridgeError::ProviderError(format!("receipt of {:?} has no block number", tx_hash))
        })?;
        let logs = receipt
            .logs
            .into_iter()
            .map(RawLog::try_from)
            .collect::<BridgeResult<Vec<_>>>()?;
        Ok(Some(Receipt {
            tx_hash,
            block_hash,
            block_number: block_number.as_u64(),
            logs,
        }))
    }

    async fn account_nonce(&self, address: Address) -> BridgeResult<u64> {
        let nonce = self
            .provider
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await?;
        Ok(nonce.as_u64())
    }

    async fn suggest_gas_price(&self) -> BridgeResult<U256> {
        Ok(self.provider.get_gas_price().await?)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> BridgeResult<H256> {
        let pending = self.provider.send_raw_transaction(raw).await?;
        Ok(pending.tx_hash())
    }
}
