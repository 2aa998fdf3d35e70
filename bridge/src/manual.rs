// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Anchor actions on a single transaction, driven by an operator.

use crate::client::ChainClient;
use crate::crypto::{AnchorSigner, CrossTransactionWithSignatures, CtxSigner};
use crate::encoding::encode_hex;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{decode_log, BridgeEvent, DecodeContext};
use crate::relay::{RelayDispatcher, RelayOutcome};
use ethers::types::{Address, H256};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMaker {
    pub ctx_id: H256,
    /// Hex of the maker carrying this anchor's signature
    pub signed_tx: String,
    /// Hex of the multi-signed record
    pub record: String,
    pub signers: Vec<Address>,
    pub executable: bool,
}

#[derive(Debug, Default)]
pub struct ManualSignReport {
    pub makers: Vec<SignedMaker>,
    pub relays: Vec<(H256, BridgeResult<RelayOutcome>)>,
    pub finishes: Vec<H256>,
}

/// Signs every maker emitted by `tx_hash` and relays every taker through
/// `relay`. A record from another anchor (`incoming`) is merged into the
/// maker with the same ctxId.
#[allow(clippy::too_many_arguments)]
pub async fn sign_transaction(
    client: &dyn ChainClient,
    decode: &DecodeContext,
    signer: &AnchorSigner,
    anchors: &[Address],
    threshold: usize,
    incoming: Option<&CrossTransactionWithSignatures>,
    relay: &RelayDispatcher,
    tx_hash: H256,
) -> BridgeResult<ManualSignReport> {
    let receipt = client
        .transaction_receipt(tx_hash)
        .await?
        .ok_or(BridgeError::TxNotFound(tx_hash))?;
    let ctx_signer = CtxSigner::new(decode.chain_id.low_u64());
    let mut report = ManualSignReport::default();
    let mut merged = false;

    for log in &receipt.logs {
        match decode_log(log, decode) {
            BridgeEvent::Maker(tx) => {
                let signed = signer.sign(&tx, &ctx_signer)?;
                let mut record = CrossTransactionWithSignatures::from_signed(&signed, &ctx_signer)?;
                if let Some(incoming) = incoming.filter(|r| r.ctx_id() == tx.ctx_id) {
                    let added = record.merge(incoming, &ctx_signer, Some(anchors))?;
                    info!("Merged {} signatures into {:?}", added, tx.ctx_id);
                    merged = true;
                }
                report.makers.push(SignedMaker {
                    ctx_id: tx.ctx_id,
                    signed_tx: encode_hex(&signed),
                    record: encode_hex(&record),
                    signers: record.signers(),
                    executable: record.is_executable(threshold),
                });
            }
            BridgeEvent::Taker(rtx) => {
                let outcome = relay.relay(&rtx).await;
                report.relays.push((rtx.ctx_id, outcome));
            }
            BridgeEvent::Finish(modifier) => report.finishes.push(modifier.ctx_id),
            BridgeEvent::Ignored => {}
        }
    }
    if let Some(incoming) = incoming {
        if !merged {
            warn!(
                "No maker {:?} in tx {:?}, signatures not merged",
                incoming.ctx_id(),
                tx_hash
            );
        }
    }
    Ok(report)
}
