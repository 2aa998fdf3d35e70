// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{BridgeError, BridgeResult};
use crate::types::CrossTransaction;
use anyhow::anyhow;
use ethers::core::rand::thread_rng;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Signature, H256, U256};
use ethers::utils::rlp::RlpStream;
use ethers::utils::{hex, keccak256};
use std::path::Path;
use tap::TapFallible;
use tracing::error;

/// Chain-bound signing scheme for cross transactions.
///
/// The signing hash covers every immutable field of the maker plus the chain
/// id, so a signature cannot be replayed on another bridge deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtxSigner {
    chain_id: U256,
}

impl CtxSigner {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id: U256::from(chain_id),
        }
    }

    pub fn chain_id(&self) -> U256 {
        self.chain_id
    }

    pub fn signing_hash(&self, tx: &CrossTransaction) -> H256 {
        let mut s = RlpStream::new_list(11);
        s.append(&tx.value);
        s.append(&tx.charge);
        s.append(&tx.origin_chain_id);
        s.append(&tx.destination_chain_id);
        s.append(&tx.ctx_id);
        s.append(&tx.tx_hash);
        s.append(&tx.block_hash);
        s.append(&tx.from);
        s.append(&tx.to);
        s.append(&tx.payload);
        s.append(&self.chain_id);
        H256(keccak256(s.out()))
    }

    /// Address that produced the signature carried by `tx`
    pub fn sender(&self, tx: &CrossTransaction) -> BridgeResult<Address> {
        let signature = tx.signature.ok_or_else(|| BridgeError::InvalidSignature {
            ctx_id: tx.ctx_id,
            reason: "transaction is not signed".to_string(),
        })?;
        self.recover(tx, &signature)
    }

    fn recover(&self, tx: &CrossTransaction, signature: &Signature) -> BridgeResult<Address> {
        signature
            .recover(self.signing_hash(tx))
            .map_err(|e| BridgeError::InvalidSignature {
                ctx_id: tx.ctx_id,
                reason: e.to_string(),
            })
    }
}

/// Signs makers with the local anchor key.
#[derive(Debug, Clone)]
pub struct AnchorSigner {
    key: Option<LocalWallet>,
}

impl AnchorSigner {
    pub fn new(key: Option<LocalWallet>) -> Self {
        Self { key }
    }

    pub fn address(&self) -> Option<Address> {
        self.key.as_ref().map(|k| k.address())
    }

    /// Returns a copy of `tx` carrying the anchor's signature.
    pub fn sign(
        &self,
        tx: &CrossTransaction,
        signer: &CtxSigner,
    ) -> BridgeResult<CrossTransaction> {
        let key = self.key.as_ref().ok_or(BridgeError::MissingSigningKey)?;
        let signature = key
            .sign_hash(signer.signing_hash(tx))
            .map_err(|e| BridgeError::SigningFailed {
                ctx_id: tx.ctx_id,
                reason: e.to_string(),
            })
            .tap_err(|e| error!("Failed to sign cross transaction: {}", e))?;
        Ok(tx.unsigned().with_signature(signature))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorSignature {
    pub signer: Address,
    pub signature: Signature,
}

/// A maker together with the anchor signatures collected for it, in the
/// order they were added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossTransactionWithSignatures {
    pub data: CrossTransaction,
    pub signatures: Vec<AnchorSignature>,
}

impl CrossTransactionWithSignatures {
    pub fn new(tx: CrossTransaction) -> Self {
        Self {
            data: tx.unsigned(),
            signatures: vec![],
        }
    }

    /// Record holding the single signature carried by `tx`
    pub fn from_signed(tx: &CrossTransaction, signer: &CtxSigner) -> BridgeResult<Self> {
        let mut record = Self::new(tx.clone());
        record.add_signature(tx, signer, None)?;
        Ok(record)
    }

    pub fn ctx_id(&self) -> H256 {
        self.data.ctx_id
    }

    pub fn signers(&self) -> Vec<Address> {
        self.signatures.iter().map(|s| s.signer).collect()
    }

    pub fn contains_signer(&self, signer: &Address) -> bool {
        self.signatures.iter().any(|s| &s.signer == signer)
    }

    /// Whether `threshold` distinct anchors signed
    pub fn is_executable(&self, threshold: usize) -> bool {
        threshold > 0 && self.signatures.len() >= threshold
    }

    fn check_same(&self, incoming: &CrossTransaction) -> BridgeResult<()> {
        if incoming.ctx_id != self.data.ctx_id || !incoming.same_content(&self.data) {
            return Err(BridgeError::MismatchedCrossTransaction {
                target: self.data.ctx_id,
                incoming: incoming.ctx_id,
            });
        }
        Ok(())
    }

    fn check_anchor(signer: Address, anchors: Option<&[Address]>) -> BridgeResult<()> {
        match anchors {
            Some(anchors) if !anchors.contains(&signer) => Err(BridgeError::UnknownAnchor(signer)),
            _ => Ok(()),
        }
    }

    /// Appends the signature carried by `incoming`, returns its signer.
    ///
    /// When `anchors` is given the signer must be one of them.
    pub fn add_signature(
        &mut self,
        incoming: &CrossTransaction,
        signer: &CtxSigner,
        anchors: Option<&[Address]>,
    ) -> BridgeResult<Address> {
        self.check_same(incoming)?;
        let signature = incoming.signature.ok_or_else(|| BridgeError::InvalidSignature {
            ctx_id: incoming.ctx_id,
            reason: "transaction is not signed".to_string(),
        })?;
        let address = signer.recover(&self.data, &signature)?;
        Self::check_anchor(address, anchors)?;
        if self.contains_signer(&address) {
            return Err(BridgeError::DuplicateSignature(address));
        }
        self.signatures.push(AnchorSignature {
            signer: address,
            signature,
        });
        Ok(address)
    }

    /// Adds every signature of `other` this record lacks, returns how many.
    ///
    /// All incoming signatures are verified before any is added.
    pub fn merge(
        &mut self,
        other: &CrossTransactionWithSignatures,
        signer: &CtxSigner,
        anchors: Option<&[Address]>,
    ) -> BridgeResult<usize> {
        self.check_same(&other.data)?;
        let mut added = vec![];
        for sig in &other.signatures {
            let recovered = signer.recover(&self.data, &sig.signature)?;
            if recovered != sig.signer {
                return Err(BridgeError::InvalidSignature {
                    ctx_id: self.data.ctx_id,
                    reason: format!(
                        "signature claims {:?} but recovers to {:?}",
                        sig.signer, recovered
                    ),
                });
            }
            Self::check_anchor(recovered, anchors)?;
            let seen = added.iter().any(|s: &AnchorSignature| s.signer == recovered);
            if !self.contains_signer(&recovered) && !seen {
                added.push(*sig);
            }
        }
        let count = added.len();
        self.signatures.extend(added);
        Ok(count)
    }
}

pub fn generate_anchor_key() -> LocalWallet {
    LocalWallet::new(&mut thread_rng())
}

/// Reads a hex encoded secp256k1 secret key
pub fn read_anchor_key<P: AsRef<Path>>(path: P) -> anyhow::Result<LocalWallet> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("Failed to read anchor key {:?}: {}", path, e))?;
    let bytes = hex::decode(contents.trim().trim_start_matches("0x"))
        .map_err(|e| anyhow!("Anchor key {:?} is not hex: {}", path, e))?;
    LocalWallet::from_bytes(&bytes).map_err(|e| anyhow!("Invalid anchor key {:?}: {}", path, e))
}

pub fn write_anchor_key<P: AsRef<Path>>(path: P, key: &LocalWallet) -> anyhow::Result<()> {
    let path = path.as_ref();
    std::fs::write(path, hex::encode(key.signer().to_bytes()))
        .map_err(|e| anyhow!("Failed to write anchor key {:?}: {}", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::anchor_wallet;

    fn maker(ctx_id: H256) -> CrossTransaction {
        CrossTransaction {
            ctx_id,
            value: U256::from(500),
            charge: U256::from(5),
            origin_chain_id: U256::from(1),
            destination_chain_id: U256::from(2),
            from: Address::repeat_byte(0xaa),
            to: Address::repeat_byte(0xbb),
            tx_hash: H256::repeat_byte(1),
            block_hash: H256::repeat_byte(2),
            payload: vec![1, 2, 3],
            signature: None,
        }
    }

    fn signed_by(seed: u8, tx: &CrossTransaction) -> CrossTransaction {
        AnchorSigner::new(Some(anchor_wallet(seed)))
            .sign(tx, &CtxSigner::new(1))
            .unwrap()
    }

    fn record_by(seed: u8, tx: &CrossTransaction) -> CrossTransactionWithSignatures {
        CrossTransactionWithSignatures::from_signed(&signed_by(seed, tx), &CtxSigner::new(1))
            .unwrap()
    }

    #[test]
    fn test_sign_and_recover() {
        let signer = CtxSigner::new(1);
        let tx = maker(H256::repeat_byte(9));
        let signed = signed_by(1, &tx);
        assert!(signed.same_content(&tx));
        assert_eq!(signer.sender(&signed).unwrap(), anchor_wallet(1).address());
    }

    #[test]
    fn test_signing_hash_ignores_signature_and_binds_chain() {
        let tx = maker(H256::repeat_byte(9));
        let signed = signed_by(1, &tx);
        let signer = CtxSigner::new(1);
        assert_eq!(signer.signing_hash(&tx), signer.signing_hash(&signed));
        assert_ne!(signer.signing_hash(&tx), CtxSigner::new(2).signing_hash(&tx));
    }

    #[test]
    fn test_missing_key_is_fatal() {
        let err = AnchorSigner::new(None)
            .sign(&maker(H256::zero()), &CtxSigner::new(1))
            .unwrap_err();
        assert_eq!(err, BridgeError::MissingSigningKey);
    }

    #[test]
    fn test_merge_unions_distinct_signers() {
        let signer = CtxSigner::new(1);
        let tx = maker(H256::repeat_byte(7));
        let mut first = record_by(1, &tx);
        let mut second = record_by(2, &tx);
        second.add_signature(&signed_by(1, &tx), &signer, None).unwrap();

        assert!(!first.is_executable(2));
        let added = first.merge(&second, &signer, None).unwrap();
        assert_eq!(added, 1);
        assert_eq!(
            first.signers(),
            vec![anchor_wallet(1).address(), anchor_wallet(2).address()]
        );
        assert!(first.is_executable(2));
        assert!(!first.is_executable(3));
    }

    #[test]
    fn test_merge_rejects_other_ctx_id() {
        let signer = CtxSigner::new(1);
        let mut target = record_by(1, &maker(H256::repeat_byte(1)));
        let other = record_by(2, &maker(H256::repeat_byte(2)));
        let err = target.merge(&other, &signer, None).unwrap_err();
        assert_eq!(
            err,
            BridgeError::MismatchedCrossTransaction {
                target: H256::repeat_byte(1),
                incoming: H256::repeat_byte(2),
            }
        );
        assert_eq!(target.signatures.len(), 1);
    }

    #[test]
    fn test_merge_rejects_changed_content() {
        let signer = CtxSigner::new(1);
        let tx = maker(H256::repeat_byte(1));
        let mut target = record_by(1, &tx);
        let mut tampered = tx.clone();
        tampered.value = U256::from(1_000_000);
        let other = record_by(2, &tampered);
        assert!(target.merge(&other, &signer, None).is_err());
        assert_eq!(target.signatures.len(), 1);
    }

    #[test]
    fn test_merge_is_all_or_nothing() {
        let signer = CtxSigner::new(1);
        let tx = maker(H256::repeat_byte(1));
        let mut target = CrossTransactionWithSignatures::new(tx.clone());
        let mut other = record_by(2, &tx);
        other.add_signature(&signed_by(3, &tx), &signer, None).unwrap();

        let anchors = [anchor_wallet(1).address(), anchor_wallet(2).address()];
        let err = target.merge(&other, &signer, Some(&anchors)).unwrap_err();
        assert_eq!(err, BridgeError::UnknownAnchor(anchor_wallet(3).address()));
        assert!(target.signatures.is_empty());
    }

    #[test]
    fn test_duplicate_signature_rejected() {
        let signer = CtxSigner::new(1);
        let tx = maker(H256::repeat_byte(1));
        let mut record = record_by(1, &tx);
        let err = record
            .add_signature(&signed_by(1, &tx), &signer, None)
            .unwrap_err();
        assert_eq!(err, BridgeError::DuplicateSignature(anchor_wallet(1).address()));
    }

    #[test]
    fn test_anchor_key_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anchor.key");
        let key = generate_anchor_key();
        write_anchor_key(&path, &key).unwrap();
        assert_eq!(read_anchor_key(&path).unwrap().address(), key.address());

        std::fs::write(&path, "not hex").unwrap();
        assert!(read_anchor_key(&path).is_err());
    }
}
