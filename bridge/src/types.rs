// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{BridgeError, BridgeResult};
use ethers::types::{Address, Log, Signature, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of a topic or a data word in an event log
pub const HASH_LENGTH: usize = 32;
/// Width of an account address
pub const ADDRESS_LENGTH: usize = 20;

/// A contract log as observed in a transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub tx_hash: H256,
    pub block_hash: H256,
    pub block_number: u64,
}

impl TryFrom<Log> for RawLog {
    type Error = BridgeError;

    fn try_from(log: Log) -> BridgeResult<Self> {
        // Pending logs carry no block position and can never be confirmed
        let block_hash = log.block_hash.ok_or_else(|| {
            BridgeError::ProviderError(format!("log of {:?} has no block hash", log.address))
        })?;
        let block_number = log.block_number.ok_or_else(|| {
            BridgeError::ProviderError(format!("log of {:?} has no block number", log.address))
        })?;
        let tx_hash = log.transaction_hash.ok_or_else(|| {
            BridgeError::ProviderError(format!("log of {:?} has no tx hash", log.address))
        })?;
        Ok(Self {
            address: log.address,
            topics: log.topics,
            data: log.data.to_vec(),
            tx_hash,
            block_hash,
            block_number: block_number.as_u64(),
        })
    }
}

/// Canonical header fields the ledger needs to verify inclusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub number: u64,
    pub hash: H256,
    pub parent_hash: H256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSummary {
    pub hash: H256,
    pub to: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub number: u64,
    pub hash: H256,
    pub parent_hash: H256,
    pub transactions: Vec<TxSummary>,
}

impl BlockSummary {
    pub fn header(&self) -> Header {
        Header {
            number: self.number,
            hash: self.hash,
            parent_hash: self.parent_hash,
        }
    }

    /// Transactions sent to the given contract
    pub fn transactions_to(&self, contract: Address) -> impl Iterator<Item = &TxSummary> {
        self.transactions
            .iter()
            .filter(move |tx| tx.to == Some(contract))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: H256,
    pub block_hash: H256,
    pub block_number: u64,
    pub logs: Vec<RawLog>,
}

/// A block waiting in the unconfirmed ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLogEntry {
    pub index: u64,
    pub hash: H256,
    pub logs: Vec<RawLog>,
}

/// Lifecycle of a cross transaction. Ordered: a record only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtxStatus {
    Pending,
    Signed,
    Executable,
    Taken,
    Finished,
}

impl fmt::Display for CtxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CtxStatus::Pending => "pending",
            CtxStatus::Signed => "signed",
            CtxStatus::Executable => "executable",
            CtxStatus::Taken => "taken",
            CtxStatus::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// A maker event: value locked on the origin chain, waiting for a taker on
/// the destination chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossTransaction {
    pub ctx_id: H256,
    pub value: U256,
    /// Fee offered to the taker on the destination chain
    pub charge: U256,
    pub origin_chain_id: U256,
    pub destination_chain_id: U256,
    pub from: Address,
    pub to: Address,
    pub tx_hash: H256,
    pub block_hash: H256,
    pub payload: Vec<u8>,
    pub signature: Option<Signature>,
}

impl CrossTransaction {
    pub fn id(&self) -> H256 {
        self.ctx_id
    }

    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Copy of the immutable fields, without any signature
    pub fn unsigned(&self) -> Self {
        Self {
            signature: None,
            ..self.clone()
        }
    }

    /// Whether both transactions describe the same maker event
    pub fn same_content(&self, other: &Self) -> bool {
        self.unsigned() == other.unsigned()
    }
}

/// A taker event: the destination chain accepted a maker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceptTransaction {
    pub ctx_id: H256,
    pub tx_hash: H256,
    pub from: Address,
    pub to: Address,
    /// Chain the settlement has to be relayed to
    pub destination_chain_id: U256,
    /// Chain the taker event was observed on
    pub origin_chain_id: U256,
}

/// A finish event, applied once `at_block_number` is reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrossTransactionModifier {
    pub ctx_id: H256,
    pub at_block_number: u64,
    pub status: CtxStatus,
}

impl CrossTransactionModifier {
    pub fn finished(ctx_id: H256, at_block_number: u64) -> Self {
        Self {
            ctx_id,
            at_block_number,
            status: CtxStatus::Finished,
        }
    }
}

/// Bridge events that reached confirmation depth at one block height.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrossBlockEvent {
    pub number: u64,
    pub confirmed_maker: Vec<CrossTransaction>,
    pub confirmed_taker: Vec<ReceptTransaction>,
    pub confirmed_finish: Vec<CrossTransactionModifier>,
}

impl CrossBlockEvent {
    pub fn new(number: u64) -> Self {
        Self {
            number,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed_maker.is_empty()
            && self.confirmed_taker.is_empty()
            && self.confirmed_finish.is_empty()
    }

    pub fn extend(
        &mut self,
        makers: Vec<CrossTransaction>,
        takers: Vec<ReceptTransaction>,
        finishes: Vec<CrossTransactionModifier>,
    ) {
        self.confirmed_maker.extend(makers);
        self.confirmed_taker.extend(takers);
        self.confirmed_finish.extend(finishes);
    }
}

impl fmt::Display for CrossBlockEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} (makers={}, takers={}, finishes={})",
            self.number,
            self.confirmed_maker.len(),
            self.confirmed_taker.len(),
            self.confirmed_finish.len()
        )
    }
}
