// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! RLP encoding of signed cross transactions.
//!
//! Signed records are exchanged between anchors as hex strings, so the
//! encoding must round-trip byte for byte and keep the signature order.

use crate::crypto::{AnchorSignature, CrossTransactionWithSignatures};
use crate::error::{BridgeError, BridgeResult};
use crate::types::CrossTransaction;
use ethers::types::{Signature, U256};
use ethers::utils::hex;
use ethers::utils::rlp::{self, Decodable, DecoderError, Encodable, Rlp, RlpStream};

const CROSS_TRANSACTION_FIELDS: usize = 13;

impl Encodable for CrossTransaction {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(CROSS_TRANSACTION_FIELDS);
        s.append(&self.ctx_id);
        s.append(&self.value);
        s.append(&self.charge);
        s.append(&self.origin_chain_id);
        s.append(&self.destination_chain_id);
        s.append(&self.from);
        s.append(&self.to);
        s.append(&self.tx_hash);
        s.append(&self.block_hash);
        s.append(&self.payload);
        // An unsigned transaction carries a zero signature
        match &self.signature {
            Some(sig) => {
                s.append(&sig.v);
                s.append(&sig.r);
                s.append(&sig.s);
            }
            None => {
                s.append(&0u64);
                s.append(&U256::zero());
                s.append(&U256::zero());
            }
        }
    }
}

impl Decodable for CrossTransaction {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != CROSS_TRANSACTION_FIELDS {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let v: u64 = rlp.val_at(10)?;
        let r: U256 = rlp.val_at(11)?;
        let s: U256 = rlp.val_at(12)?;
        let signature = if v == 0 && r.is_zero() && s.is_zero() {
            None
        } else {
            Some(Signature { r, s, v })
        };
        Ok(Self {
            ctx_id: rlp.val_at(0)?,
            value: rlp.val_at(1)?,
            charge: rlp.val_at(2)?,
            origin_chain_id: rlp.val_at(3)?,
            destination_chain_id: rlp.val_at(4)?,
            from: rlp.val_at(5)?,
            to: rlp.val_at(6)?,
            tx_hash: rlp.val_at(7)?,
            block_hash: rlp.val_at(8)?,
            payload: rlp.val_at(9)?,
            signature,
        })
    }
}

impl Encodable for AnchorSignature {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(4);
        s.append(&self.signer);
        s.append(&self.signature.v);
        s.append(&self.signature.r);
        s.append(&self.signature.s);
    }
}

impl Decodable for AnchorSignature {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 4 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            signer: rlp.val_at(0)?,
            signature: Signature {
                v: rlp.val_at(1)?,
                r: rlp.val_at(2)?,
                s: rlp.val_at(3)?,
            },
        })
    }
}

impl Encodable for CrossTransactionWithSignatures {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.data);
        s.append_list(&self.signatures);
    }
}

impl Decodable for CrossTransactionWithSignatures {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            data: rlp.val_at(0)?,
            signatures: rlp.list_at(1)?,
        })
    }
}

/// Hex form of the RLP encoding, without `0x` prefix
pub fn encode_hex<T: Encodable>(value: &T) -> String {
    hex::encode(rlp::encode(value))
}

pub fn decode_hex<T: Decodable>(data: &str) -> BridgeResult<T> {
    let bytes = hex::decode(data.trim().trim_start_matches("0x"))
        .map_err(|e| BridgeError::BridgeSerializationError(format!("invalid hex: {}", e)))?;
    rlp::decode(&bytes).map_err(|e| {
        BridgeError::BridgeSerializationError(format!("invalid rlp record: {:?}", e))
    })
}
