// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Decoding of the bridge contract's event logs.
//!
//! The bridge contract emits three events. Their layouts are fixed by the
//! on-chain schema and are read here byte for byte:
//!
//! ```text
//! MakerTx     topics: [sig, ctxId, from]
//!             data:   [to, destId, value, charge, offset, count, payload..]
//! TakerTx     topics: [sig, ctxId, to]
//!             data:   [remoteChainId, from, value, destValue]
//! MakerFinish topics: [sig, ctxId, to]
//!             data:   -
//! ```
//!
//! Every word is 32 bytes wide, addresses sit in the low-order 20 bytes of
//! their word. Logs that do not match are not bridge events and are skipped.

use crate::types::{
    CrossTransaction, CrossTransactionModifier, RawLog, ReceptTransaction, ADDRESS_LENGTH,
    HASH_LENGTH,
};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const MAKER_EVENT_SIGNATURE: &str =
    "MakerTx(bytes32,address,address,uint256,uint256,uint256,bytes)";
pub const TAKER_EVENT_SIGNATURE: &str = "TakerTx(bytes32,address,uint256,address,uint256,uint256)";
pub const MAKER_FINISH_EVENT_SIGNATURE: &str = "MakerFinish(bytes32,address)";

pub static MAKER_TOPIC: Lazy<H256> = Lazy::new(|| H256(keccak256(MAKER_EVENT_SIGNATURE)));
pub static TAKER_TOPIC: Lazy<H256> = Lazy::new(|| H256(keccak256(TAKER_EVENT_SIGNATURE)));
pub static MAKER_FINISH_TOPIC: Lazy<H256> =
    Lazy::new(|| H256(keccak256(MAKER_FINISH_EVENT_SIGNATURE)));

/// Minimum data length of a maker log: six words, the last one being the payload length
pub const MAKER_MIN_DATA_LEN: usize = 6 * HASH_LENGTH;
/// Minimum data length of a taker log
pub const TAKER_MIN_DATA_LEN: usize = 4 * HASH_LENGTH;
/// Bridge events carry the event signature, the ctxId and one indexed address
pub const MIN_TOPICS: usize = 3;

/// Topic signatures of the bridge contract events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventTopics {
    #[serde(default = "default_maker_topic")]
    pub maker: H256,
    #[serde(default = "default_taker_topic")]
    pub taker: H256,
    #[serde(default = "default_maker_finish_topic")]
    pub maker_finish: H256,
}

fn default_maker_topic() -> H256 {
    *MAKER_TOPIC
}

fn default_taker_topic() -> H256 {
    *TAKER_TOPIC
}

fn default_maker_finish_topic() -> H256 {
    *MAKER_FINISH_TOPIC
}

impl Default for EventTopics {
    fn default() -> Self {
        Self {
            maker: default_maker_topic(),
            taker: default_taker_topic(),
            maker_finish: default_maker_finish_topic(),
        }
    }
}

/// Everything the decoder needs to know about the observing chain
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext {
    pub contract: Address,
    pub chain_id: U256,
    pub depth: u64,
    pub topics: EventTopics,
}

/// Result of classifying one log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Maker(CrossTransaction),
    Taker(ReceptTransaction),
    Finish(CrossTransactionModifier),
    Ignored,
}

impl BridgeEvent {
    pub fn ctx_id(&self) -> Option<H256> {
        match self {
            BridgeEvent::Maker(tx) => Some(tx.ctx_id),
            BridgeEvent::Taker(rtx) => Some(rtx.ctx_id),
            BridgeEvent::Finish(modifier) => Some(modifier.ctx_id),
            BridgeEvent::Ignored => None,
        }
    }
}

/// Classifies a log emitted by the bridge contract.
///
/// Only the layout is checked here; callers decide whether the log's block
/// is the one being confirmed.
pub fn decode_log(log: &RawLog, ctx: &DecodeContext) -> BridgeEvent {
    if log.address != ctx.contract || log.topics.len() < MIN_TOPICS {
        return BridgeEvent::Ignored;
    }
    let signature = log.topics[0];
    if signature == ctx.topics.maker {
        decode_maker(log, ctx.chain_id)
            .map(BridgeEvent::Maker)
            .unwrap_or(BridgeEvent::Ignored)
    } else if signature == ctx.topics.taker {
        decode_taker(log, ctx.chain_id)
            .map(BridgeEvent::Taker)
            .unwrap_or(BridgeEvent::Ignored)
    } else if signature == ctx.topics.maker_finish {
        BridgeEvent::Finish(CrossTransactionModifier::finished(
            log.topics[1],
            log.block_number + ctx.depth,
        ))
    } else {
        BridgeEvent::Ignored
    }
}

/// Decodes a maker log, `None` if the data is shorter than its layout requires.
pub fn decode_maker(log: &RawLog, chain_id: U256) -> Option<CrossTransaction> {
    if log.topics.len() < MIN_TOPICS || log.data.len() < MAKER_MIN_DATA_LEN {
        return None;
    }
    let data = &log.data;
    let count = word(data, 5);
    let payload_start = MAKER_MIN_DATA_LEN;
    if count > U256::from(data.len() - payload_start) {
        warn!(
            "Maker log {:?} in tx {:?} declares {} payload bytes but carries {}",
            log.topics[1],
            log.tx_hash,
            count,
            data.len() - payload_start
        );
        return None;
    }
    let payload_end = payload_start + count.as_usize();

    Some(CrossTransaction {
        ctx_id: log.topics[1],
        value: word(data, 2),
        charge: word(data, 3),
        origin_chain_id: chain_id,
        destination_chain_id: word(data, 1),
        from: address_of(log.topics[2].as_bytes()),
        to: address_of(&data[..HASH_LENGTH]),
        tx_hash: log.tx_hash,
        block_hash: log.block_hash,
        payload: data[payload_start..payload_end].to_vec(),
        signature: None,
    })
}

/// Decodes a taker log, `None` if the data is shorter than its layout requires.
pub fn decode_taker(log: &RawLog, chain_id: U256) -> Option<ReceptTransaction> {
    if log.topics.len() < MIN_TOPICS || log.data.len() < TAKER_MIN_DATA_LEN {
        return None;
    }
    Some(ReceptTransaction {
        ctx_id: log.topics[1],
        tx_hash: log.tx_hash,
        from: address_of(&log.data[HASH_LENGTH..2 * HASH_LENGTH]),
        to: address_of(log.topics[2].as_bytes()),
        destination_chain_id: word(&log.data, 0),
        origin_chain_id: chain_id,
    })
}

// Big-endian integer stored in the `index`-th word of `data`
fn word(data: &[u8], index: usize) -> U256 {
    U256::from_big_endian(&data[index * HASH_LENGTH..(index + 1) * HASH_LENGTH])
}

// Address stored in the low-order bytes of a word
fn address_of(word: &[u8]) -> Address {
    Address::from_slice(&word[HASH_LENGTH - ADDRESS_LENGTH..HASH_LENGTH])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{finish_log, maker_log, taker_log, TEST_CONTRACT};

    fn context() -> DecodeContext {
        DecodeContext {
            contract: TEST_CONTRACT,
            chain_id: U256::from(1),
            depth: 12,
            topics: EventTopics::default(),
        }
    }

    #[test]
    fn test_topics_are_distinct() {
        let topics = EventTopics::default();
        assert_ne!(topics.maker, topics.taker);
        assert_ne!(topics.maker, topics.maker_finish);
        assert_ne!(topics.taker, topics.maker_finish);
    }

    #[test]
    fn test_decode_maker_fields() {
        let ctx_id = H256::repeat_byte(0xc1);
        let from = Address::repeat_byte(0xaa);
        let to = Address::repeat_byte(0xbb);
        let log = maker_log(ctx_id, from, to, 2, 1_000, 10, b"hello", 5, H256::repeat_byte(5));

        let BridgeEvent::Maker(tx) = decode_log(&log, &context()) else {
            panic!("expected a maker event");
        };
        assert_eq!(tx.ctx_id, ctx_id);
        assert_eq!(tx.from, from);
        assert_eq!(tx.to, to);
        assert_eq!(tx.destination_chain_id, U256::from(2));
        assert_eq!(tx.value, U256::from(1_000));
        assert_eq!(tx.charge, U256::from(10));
        assert_eq!(tx.origin_chain_id, U256::from(1));
        assert_eq!(tx.payload, b"hello".to_vec());
        assert_eq!(tx.block_hash, H256::repeat_byte(5));
        assert!(tx.signature.is_none());
    }

    #[test]
    fn test_maker_at_minimum_length_has_empty_payload() {
        let log = maker_log(
            H256::repeat_byte(1),
            Address::repeat_byte(2),
            Address::repeat_byte(3),
            2,
            1,
            0,
            b"",
            1,
            H256::repeat_byte(9),
        );
        assert_eq!(log.data.len(), MAKER_MIN_DATA_LEN);
        let BridgeEvent::Maker(tx) = decode_log(&log, &context()) else {
            panic!("expected a maker event");
        };
        assert!(tx.payload.is_empty());
    }

    #[test]
    fn test_maker_one_byte_short_is_ignored() {
        let mut log = maker_log(
            H256::repeat_byte(1),
            Address::repeat_byte(2),
            Address::repeat_byte(3),
            2,
            1,
            0,
            b"",
            1,
            H256::repeat_byte(9),
        );
        log.data.pop();
        assert_eq!(decode_log(&log, &context()), BridgeEvent::Ignored);
    }

    #[test]
    fn test_maker_with_overlong_count_is_ignored() {
        let mut log = maker_log(
            H256::repeat_byte(1),
            Address::repeat_byte(2),
            Address::repeat_byte(3),
            2,
            1,
            0,
            b"abc",
            1,
            H256::repeat_byte(9),
        );
        // declare more payload than present
        log.data[6 * HASH_LENGTH - 1] = 200;
        assert_eq!(decode_log(&log, &context()), BridgeEvent::Ignored);
    }

    #[test]
    fn test_maker_with_two_topics_is_ignored() {
        let mut log = maker_log(
            H256::repeat_byte(1),
            Address::repeat_byte(2),
            Address::repeat_byte(3),
            2,
            1,
            0,
            b"",
            1,
            H256::repeat_byte(9),
        );
        log.topics.truncate(2);
        assert_eq!(decode_log(&log, &context()), BridgeEvent::Ignored);
    }

    #[test]
    fn test_decode_taker_fields() {
        let ctx_id = H256::repeat_byte(0xc2);
        let from = Address::repeat_byte(0x11);
        let to = Address::repeat_byte(0x22);
        let log = taker_log(ctx_id, from, to, 2, 7, H256::repeat_byte(7));

        let BridgeEvent::Taker(rtx) = decode_log(&log, &context()) else {
            panic!("expected a taker event");
        };
        assert_eq!(rtx.ctx_id, ctx_id);
        assert_eq!(rtx.from, from);
        assert_eq!(rtx.to, to);
        assert_eq!(rtx.destination_chain_id, U256::from(2));
        assert_eq!(rtx.origin_chain_id, U256::from(1));
    }

    #[test]
    fn test_short_taker_is_ignored() {
        let mut log = taker_log(
            H256::repeat_byte(1),
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            2,
            7,
            H256::repeat_byte(7),
        );
        log.data.truncate(TAKER_MIN_DATA_LEN - 1);
        assert_eq!(decode_log(&log, &context()), BridgeEvent::Ignored);
    }

    #[test]
    fn test_finish_is_deferred_by_depth() {
        let log = finish_log(H256::repeat_byte(3), 100, H256::repeat_byte(8));
        let BridgeEvent::Finish(modifier) = decode_log(&log, &context()) else {
            panic!("expected a finish event");
        };
        assert_eq!(modifier.at_block_number, 112);
    }

    #[test]
    fn test_ctx_id_is_shared_by_all_variants() {
        let ctx_id = H256::repeat_byte(0x42);
        let block_hash = H256::repeat_byte(1);
        let maker = maker_log(
            ctx_id,
            Address::repeat_byte(2),
            Address::repeat_byte(3),
            2,
            1,
            0,
            b"p",
            1,
            block_hash,
        );
        let taker = taker_log(
            ctx_id,
            Address::repeat_byte(2),
            Address::repeat_byte(3),
            1,
            1,
            block_hash,
        );
        let finish = finish_log(ctx_id, 1, block_hash);

        let ctx = context();
        assert_eq!(decode_log(&maker, &ctx).ctx_id(), Some(ctx_id));
        assert_eq!(decode_log(&taker, &ctx).ctx_id(), Some(ctx_id));
        assert_eq!(decode_log(&finish, &ctx).ctx_id(), Some(ctx_id));
    }

    #[test]
    fn test_foreign_contract_and_unknown_topic_are_ignored() {
        let mut log = finish_log(H256::repeat_byte(3), 100, H256::repeat_byte(8));
        log.address = Address::repeat_byte(0xee);
        assert_eq!(decode_log(&log, &context()), BridgeEvent::Ignored);

        let mut log = finish_log(H256::repeat_byte(3), 100, H256::repeat_byte(8));
        log.topics[0] = H256::repeat_byte(0xff);
        assert_eq!(decode_log(&log, &context()), BridgeEvent::Ignored);
    }
}
