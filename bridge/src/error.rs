// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::providers::ProviderError;
use ethers::types::{Address, H256};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    // Transient chain client error, safe to retry at the same block
    #[error("transient provider error: {0}")]
    TransientProviderError(String),
    // Chain client error
    #[error("provider error: {0}")]
    ProviderError(String),
    // Receipt could not be fetched even after the retry
    #[error("failed to fetch receipt of tx {tx_hash:?} in block {block}: {reason}")]
    ReceiptFetchFailed {
        block: u64,
        tx_hash: H256,
        reason: String,
    },
    // Referenced block does not exist on the chain
    #[error("block {0} not found")]
    BlockNotFound(u64),
    // Referenced transaction does not exist on the chain
    #[error("transaction {0:?} not found")]
    TxNotFound(H256),
    // The anchor key is not loaded
    #[error("anchor signing key is missing")]
    MissingSigningKey,
    // The anchor key failed to produce a signature
    #[error("failed to sign cross transaction {ctx_id:?}: {reason}")]
    SigningFailed { ctx_id: H256, reason: String },
    // Merging signatures over different cross transactions
    #[error("cannot merge signature for {incoming:?} into {target:?}")]
    MismatchedCrossTransaction { target: H256, incoming: H256 },
    // No pending maker with this ctxId
    #[error("unknown cross transaction {0:?}")]
    UnknownCrossTransaction(H256),
    // Signature does not recover to a valid signer
    #[error("invalid anchor signature for {ctx_id:?}: {reason}")]
    InvalidSignature { ctx_id: H256, reason: String },
    // Signature was produced by an address outside the anchor set
    #[error("signer {0:?} is not a registered anchor")]
    UnknownAnchor(Address),
    // Same anchor signed twice
    #[error("anchor {0:?} already signed this cross transaction")]
    DuplicateSignature(Address),
    // Settlement transaction was rejected by the destination chain
    #[error("failed to relay cross transaction {ctx_id:?}: {reason}")]
    RelaySubmissionFailed { ctx_id: H256, reason: String },
    // Settlement already submitted by this anchor
    #[error("cross transaction {0:?} was already relayed")]
    AlreadyRelayed(H256),
    // Only the leader anchor broadcasts settlements
    #[error("this anchor is not the cluster leader")]
    NotLeader,
    // Failure to encode or decode
    #[error("serialization error: {0}")]
    BridgeSerializationError(String),
    // Configuration rejected by validation
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    // Connected to an unexpected chain
    #[error("chain id mismatch: expected {expected}, got {actual}")]
    ChainIdMismatch { expected: u64, actual: u64 },
    // Scan interrupted; resume at the given block
    #[error("scan cancelled, resume at block {resume_at}")]
    ScanCancelled { resume_at: u64 },
    // Internal Bridge error
    #[error("internal error: {0}")]
    InternalError(String),
    // Uncategorized error
    #[error("{0}")]
    Generic(String),
}

impl BridgeError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            BridgeError::TransientProviderError(_) => "transient_provider_error",
            BridgeError::ProviderError(_) => "provider_error",
            BridgeError::ReceiptFetchFailed { .. } => "receipt_fetch_failed",
            BridgeError::BlockNotFound(_) => "block_not_found",
            BridgeError::TxNotFound(_) => "tx_not_found",
            BridgeError::MissingSigningKey => "missing_signing_key",
            BridgeError::SigningFailed { .. } => "signing_failed",
            BridgeError::MismatchedCrossTransaction { .. } => "mismatched_cross_transaction",
            BridgeError::UnknownCrossTransaction(_) => "unknown_cross_transaction",
            BridgeError::InvalidSignature { .. } => "invalid_signature",
            BridgeError::UnknownAnchor(_) => "unknown_anchor",
            BridgeError::DuplicateSignature(_) => "duplicate_signature",
            BridgeError::RelaySubmissionFailed { .. } => "relay_submission_failed",
            BridgeError::AlreadyRelayed(_) => "already_relayed",
            BridgeError::NotLeader => "not_leader",
            BridgeError::BridgeSerializationError(_) => "serialization_error",
            BridgeError::InvalidConfig(_) => "invalid_config",
            BridgeError::ChainIdMismatch { .. } => "chain_id_mismatch",
            BridgeError::ScanCancelled { .. } => "scan_cancelled",
            BridgeError::InternalError(_) => "internal_error",
            BridgeError::Generic(_) => "generic",
        }
    }

    /// Whether the failed pass may be resumed at the same block
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::TransientProviderError(_)
                | BridgeError::ReceiptFetchFailed { .. }
                | BridgeError::ScanCancelled { .. }
        )
    }
}

impl From<ProviderError> for BridgeError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::JsonRpcClientError(_) | ProviderError::HTTPError(_) => {
                BridgeError::TransientProviderError(e.to_string())
            }
            other => BridgeError::ProviderError(other.to_string()),
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
