// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::client::ChainClient;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{MAKER_FINISH_TOPIC, MAKER_TOPIC, TAKER_TOPIC};
use crate::types::{BlockSummary, Header, RawLog, Receipt, TxSummary, HASH_LENGTH};
use async_trait::async_trait;
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, H160, H256, U256};
use ethers::utils::keccak256;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub const TEST_CONTRACT: Address = H160([0x42; 20]);

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic anchor key, `seed` must be non-zero
pub fn anchor_wallet(seed: u8) -> LocalWallet {
    LocalWallet::from_bytes(&[seed; 32]).unwrap()
}

pub fn block_hash(number: u64) -> H256 {
    H256(keccak256(number.to_be_bytes()))
}

fn word_of_u64(value: u64) -> [u8; HASH_LENGTH] {
    let mut word = [0u8; HASH_LENGTH];
    U256::from(value).to_big_endian(&mut word);
    word
}

fn word_of_address(address: Address) -> [u8; HASH_LENGTH] {
    H256::from(address).0
}

#[allow(clippy::too_many_arguments)]
pub fn maker_log(
    ctx_id: H256,
    from: Address,
    to: Address,
    destination_chain_id: u64,
    value: u64,
    charge: u64,
    payload: &[u8],
    block_number: u64,
    block_hash: H256,
) -> RawLog {
    let mut data = Vec::new();
    data.extend_from_slice(&word_of_address(to));
    data.extend_from_slice(&word_of_u64(destination_chain_id));
    data.extend_from_slice(&word_of_u64(value));
    data.extend_from_slice(&word_of_u64(charge));
    data.extend_from_slice(&word_of_u64(5 * HASH_LENGTH as u64));
    data.extend_from_slice(&word_of_u64(payload.len() as u64));
    data.extend_from_slice(payload);
    let padding = (HASH_LENGTH - payload.len() % HASH_LENGTH) % HASH_LENGTH;
    data.extend(std::iter::repeat(0u8).take(padding));

    RawLog {
        address: TEST_CONTRACT,
        topics: vec![*MAKER_TOPIC, ctx_id, H256::from(from)],
        data,
        tx_hash: H256(keccak256(ctx_id.as_bytes())),
        block_hash,
        block_number,
    }
}

pub fn taker_log(
    ctx_id: H256,
    from: Address,
    to: Address,
    destination_chain_id: u64,
    block_number: u64,
    block_hash: H256,
) -> RawLog {
    let mut data = Vec::new();
    data.extend_from_slice(&word_of_u64(destination_chain_id));
    data.extend_from_slice(&word_of_address(from));
    data.extend_from_slice(&word_of_u64(1));
    data.extend_from_slice(&word_of_u64(0));

    RawLog {
        address: TEST_CONTRACT,
        topics: vec![*TAKER_TOPIC, ctx_id, H256::from(to)],
        data,
        tx_hash: H256(keccak256([ctx_id.as_bytes(), b"taker"].concat())),
        block_hash,
        block_number,
    }
}

pub fn finish_log(ctx_id: H256, block_number: u64, block_hash: H256) -> RawLog {
    RawLog {
        address: TEST_CONTRACT,
        topics: vec![*MAKER_FINISH_TOPIC, ctx_id, H256::zero()],
        data: vec![],
        tx_hash: H256(keccak256([ctx_id.as_bytes(), b"finish"].concat())),
        block_hash,
        block_number,
    }
}

#[derive(Default)]
struct MockChainState {
    head: u64,
    headers: HashMap<u64, Header>,
    blocks: HashMap<u64, BlockSummary>,
    receipts: HashMap<H256, Receipt>,
    failing_headers: HashSet<u64>,
    receipt_failures: HashMap<H256, usize>,
    nonces: HashMap<Address, u64>,
    gas_price: U256,
    sent: Vec<Bytes>,
    reject_sends: bool,
}

/// In-memory chain with controllable canonical headers.
pub struct MockChainClient {
    chain_id: u64,
    state: Mutex<MockChainState>,
}

impl MockChainClient {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Mutex::new(MockChainState {
                gas_price: U256::from(1_000_000_000u64),
                ..Default::default()
            }),
        }
    }

    /// Adds a canonical block whose transactions emitted `logs`, one tx per log.
    pub fn add_block(&self, number: u64, hash: H256, logs: Vec<RawLog>) {
        let mut state = self.state.lock().unwrap();
        let parent_hash = state
            .headers
            .get(&number.wrapping_sub(1))
            .map(|h| h.hash)
            .unwrap_or_default();
        let mut transactions = Vec::new();
        for log in logs {
            let receipt = state.receipts.entry(log.tx_hash).or_insert_with(|| Receipt {
                tx_hash: log.tx_hash,
                block_hash: hash,
                block_number: number,
                logs: vec![],
            });
            receipt.logs.push(log.clone());
            if !transactions.iter().any(|t: &TxSummary| t.hash == log.tx_hash) {
                transactions.push(TxSummary {
                    hash: log.tx_hash,
                    to: Some(log.address),
                });
            }
        }
        let header = Header {
            number,
            hash,
            parent_hash,
        };
        state.headers.insert(number, header);
        state.blocks.insert(
            number,
            BlockSummary {
                number,
                hash,
                parent_hash,
                transactions,
            },
        );
        state.head = state.head.max(number);
    }

    /// Adds blocks `[from, to]` without bridge logs
    pub fn add_empty_blocks(&self, from: u64, to: u64) {
        for n in from..=to {
            self.add_block(n, block_hash(n), vec![]);
        }
    }

    /// Replaces the canonical hash at `number`, simulating a reorg
    pub fn reorg(&self, number: u64, hash: H256) {
        let mut state = self.state.lock().unwrap();
        if let Some(header) = state.headers.get_mut(&number) {
            header.hash = hash;
        }
        if let Some(block) = state.blocks.get_mut(&number) {
            block.hash = hash;
        }
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn fail_header(&self, number: u64, fail: bool) {
        let mut state = self.state.lock().unwrap();
        if fail {
            state.failing_headers.insert(number);
        } else {
            state.failing_headers.remove(&number);
        }
    }

    /// The next `times` receipt lookups of `tx_hash` fail
    pub fn fail_receipt(&self, tx_hash: H256, times: usize) {
        self.state
            .lock()
            .unwrap()
            .receipt_failures
            .insert(tx_hash, times);
    }

    pub fn set_nonce(&self, address: Address, nonce: u64) {
        self.state.lock().unwrap().nonces.insert(address, nonce);
    }

    pub fn reject_sends(&self, reject: bool) {
        self.state.lock().unwrap().reject_sends = reject;
    }

    pub fn sent_transactions(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().sent.clone()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn chain_id(&self) -> BridgeResult<u64> {
        Ok(self.chain_id)
    }

    async fn block_number(&self) -> BridgeResult<u64> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn header_by_number(&self, number: u64) -> BridgeResult<Option<Header>> {
        let state = self.state.lock().unwrap();
        if state.failing_headers.contains(&number) {
            return Err(BridgeError::TransientProviderError(format!(
                "header {} unavailable",
                number
            )));
        }
        Ok(state.headers.get(&number).copied())
    }

    async fn block_by_number(&self, number: u64) -> BridgeResult<Option<BlockSummary>> {
        Ok(self.state.lock().unwrap().blocks.get(&number).cloned())
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> BridgeResult<Option<Receipt>> {
        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.receipt_failures.get_mut(&tx_hash) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BridgeError::TransientProviderError(format!(
                    "receipt {:?} unavailable",
                    tx_hash
                )));
            }
        }
        Ok(state.receipts.get(&tx_hash).cloned())
    }

    async fn account_nonce(&self, address: Address) -> BridgeResult<u64> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .nonces
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn suggest_gas_price(&self) -> BridgeResult<U256> {
        Ok(self.state.lock().unwrap().gas_price)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> BridgeResult<H256> {
        let mut state = self.state.lock().unwrap();
        if state.reject_sends {
            return Err(BridgeError::ProviderError("nonce too low".to_string()));
        }
        let hash = H256(keccak256(&raw));
        state.sent.push(raw);
        Ok(hash)
    }
}
