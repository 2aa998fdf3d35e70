// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Settlement of confirmed takers on the maker's chain.

use crate::client::ChainClient;
use crate::coordinator::AnchorCoordinator;
use crate::error::{BridgeError, BridgeResult};
use crate::metrics::BridgeMetrics;
use crate::types::ReceptTransaction;
use ethers::abi::{parse_abi, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use std::collections::HashSet;
use std::sync::Arc;
use tap::TapFallible;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const BRIDGE_FUNCTIONS: &[&str] = &[
    "function makerFinish(bytes32 txId, address from, address to, uint256 remoteChainId)",
    "function chainRegister(uint256 remoteChainId, uint8 signConfirmCount, address[] anchors)",
];

fn encode_call(name: &str, tokens: &[Token]) -> BridgeResult<Vec<u8>> {
    let abi = parse_abi(BRIDGE_FUNCTIONS)
        .map_err(|e| BridgeError::InternalError(format!("bridge abi: {}", e)))?;
    abi.function(name)
        .and_then(|f| f.encode_input(tokens))
        .map_err(|e| BridgeError::BridgeSerializationError(format!("{} call data: {}", name, e)))
}

/// Call data settling `rtx` on the maker's chain
pub fn maker_finish_call_data(rtx: &ReceptTransaction) -> BridgeResult<Vec<u8>> {
    encode_call(
        "makerFinish",
        &[
            Token::FixedBytes(rtx.ctx_id.as_bytes().to_vec()),
            Token::Address(rtx.from),
            Token::Address(rtx.to),
            Token::Uint(rtx.origin_chain_id),
        ],
    )
}

pub fn chain_register_call_data(
    remote_chain_id: u64,
    sign_confirm_count: u8,
    anchors: &[Address],
) -> BridgeResult<Vec<u8>> {
    encode_call(
        "chainRegister",
        &[
            Token::Uint(U256::from(remote_chain_id)),
            Token::Uint(U256::from(sign_confirm_count)),
            Token::Array(anchors.iter().map(|a| Token::Address(*a)).collect()),
        ],
    )
}

/// Parameters of a legacy contract call
#[derive(Debug, Clone)]
pub struct ContractCall {
    pub chain_id: u64,
    pub nonce: u64,
    pub to: Address,
    pub gas_limit: u64,
    pub gas_price: U256,
    pub data: Vec<u8>,
}

/// Signs a legacy transaction bound to `call.chain_id` (EIP-155)
pub fn sign_contract_call(key: &LocalWallet, call: &ContractCall) -> BridgeResult<Bytes> {
    let request = TransactionRequest::new()
        .nonce(call.nonce)
        .to(call.to)
        .value(0u64)
        .gas(call.gas_limit)
        .gas_price(call.gas_price)
        .data(call.data.clone())
        .chain_id(call.chain_id);
    let tx = TypedTransaction::Legacy(request);
    let signature = key
        .clone()
        .with_chain_id(call.chain_id)
        .sign_transaction_sync(&tx)
        .map_err(|e| BridgeError::InternalError(format!("failed to sign transaction: {}", e)))?;
    Ok(tx.rlp_signed(&signature))
}

/// Hands out consecutive nonces of one account.
///
/// The chain is asked once; afterwards nonces are reserved locally so
/// concurrent relays never reuse one.
pub struct NonceManager {
    client: Arc<dyn ChainClient>,
    address: Address,
    next: Mutex<Option<u64>>,
}

impl NonceManager {
    pub fn new(client: Arc<dyn ChainClient>, address: Address) -> Self {
        Self {
            client,
            address,
            next: Mutex::new(None),
        }
    }

    pub async fn reserve(&self) -> BridgeResult<u64> {
        let mut next = self.next.lock().await;
        let nonce = match *next {
            Some(nonce) => nonce,
            None => self.client.account_nonce(self.address).await?,
        };
        *next = Some(nonce + 1);
        Ok(nonce)
    }

    /// Forgets local reservations, the next nonce comes from the chain
    pub async fn reset(&self) {
        *self.next.lock().await = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    OtherDestination,
    NotLeader,
    AlreadyRelayed,
}

impl SkipReason {
    fn as_label(&self) -> &'static str {
        match self {
            SkipReason::OtherDestination => "other_destination",
            SkipReason::NotLeader => "not_leader",
            SkipReason::AlreadyRelayed => "already_relayed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Submitted(H256),
    Skipped(SkipReason),
}

/// Submits settlements to one chain with the anchor key.
pub struct RelayDispatcher {
    chain_name: String,
    chain_id: u64,
    contract: Address,
    gas_limit: u64,
    client: Arc<dyn ChainClient>,
    key: LocalWallet,
    coordinator: Arc<dyn AnchorCoordinator>,
    nonces: NonceManager,
    relayed: Mutex<HashSet<H256>>,
    metrics: Arc<BridgeMetrics>,
}

impl RelayDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain_name: &str,
        chain_id: u64,
        contract: Address,
        gas_limit: u64,
        client: Arc<dyn ChainClient>,
        key: LocalWallet,
        coordinator: Arc<dyn AnchorCoordinator>,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        let nonces = NonceManager::new(client.clone(), key.address());
        Self {
            chain_name: chain_name.to_string(),
            chain_id,
            contract,
            gas_limit,
            client,
            key,
            coordinator,
            nonces,
            relayed: Mutex::new(HashSet::new()),
            metrics,
        }
    }

    pub async fn is_relayed(&self, ctx_id: &H256) -> bool {
        self.relayed.lock().await.contains(ctx_id)
    }

    fn skip(&self, rtx: &ReceptTransaction, reason: SkipReason) -> RelayOutcome {
        self.metrics
            .relay_skipped
            .with_label_values(&[self.chain_name.as_str(), reason.as_label()])
            .inc();
        info!(
            "[{}] Not relaying {:?}: {}",
            self.chain_name,
            rtx.ctx_id,
            reason.as_label()
        );
        RelayOutcome::Skipped(reason)
    }

    /// Settles a confirmed taker if it targets this chain.
    ///
    /// A ctxId is submitted at most once; a failed submission is abandoned and
    /// released so a later re-scan can submit it again.
    pub async fn relay(&self, rtx: &ReceptTransaction) -> BridgeResult<RelayOutcome> {
        if rtx.destination_chain_id != U256::from(self.chain_id) {
            return Ok(self.skip(rtx, SkipReason::OtherDestination));
        }
        let leader = self.coordinator.is_leader().await.tap_err(|e| {
            self.metrics
                .errors
                .with_label_values(&[self.chain_name.as_str(), e.error_type()])
                .inc();
            warn!(
                "[{}] Cannot tell the leader, not relaying {:?}: {}",
                self.chain_name, rtx.ctx_id, e
            );
        })?;
        if !leader {
            return Ok(self.skip(rtx, SkipReason::NotLeader));
        }
        if !self.relayed.lock().await.insert(rtx.ctx_id) {
            return Ok(self.skip(rtx, SkipReason::AlreadyRelayed));
        }

        let chain = self.chain_name.as_str();
        match self.submit(rtx).await {
            Ok(tx_hash) => {
                self.metrics.relay_submitted.with_label_values(&[chain]).inc();
                info!(
                    "[{}] Relayed {:?} in tx {:?}",
                    chain, rtx.ctx_id, tx_hash
                );
                Ok(RelayOutcome::Submitted(tx_hash))
            }
            Err(e) => {
                self.relayed.lock().await.remove(&rtx.ctx_id);
                self.nonces.reset().await;
                self.metrics.relay_failed.with_label_values(&[chain]).inc();
                self.metrics
                    .errors
                    .with_label_values(&[chain, e.error_type()])
                    .inc();
                error!("[{}] Failed to relay {:?}: {}", chain, rtx.ctx_id, e);
                Err(BridgeError::RelaySubmissionFailed {
                    ctx_id: rtx.ctx_id,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn submit(&self, rtx: &ReceptTransaction) -> BridgeResult<H256> {
        let nonce = self.nonces.reserve().await?;
        let gas_price = self.client.suggest_gas_price().await?;
        let data = maker_finish_call_data(rtx)?;
        self.send(nonce, gas_price, data).await
    }

    /// Registers `remote_chain_id` and its anchor set on this chain's contract.
    pub async fn register_chain(
        &self,
        remote_chain_id: u64,
        sign_confirm_count: u8,
        anchors: &[Address],
    ) -> BridgeResult<H256> {
        let data = chain_register_call_data(remote_chain_id, sign_confirm_count, anchors)?;
        let nonce = self.nonces.reserve().await?;
        let gas_price = self.client.suggest_gas_price().await?;
        self.send(nonce, gas_price, data)
            .await
            .tap_ok(|hash| {
                info!(
                    "[{}] Registered chain {} with {} anchors in tx {:?}",
                    self.chain_name,
                    remote_chain_id,
                    anchors.len(),
                    hash
                )
            })
            .tap_err(|e| warn!("[{}] Chain registration failed: {}", self.chain_name, e))
    }

    async fn send(&self, nonce: u64, gas_price: U256, data: Vec<u8>) -> BridgeResult<H256> {
        let raw = sign_contract_call(
            &self.key,
            &ContractCall {
                chain_id: self.chain_id,
                nonce,
                to: self.contract,
                gas_limit: self.gas_limit,
                gas_price,
                data,
            },
        )?;
        self.client.send_raw_transaction(raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{AnchorRole, RaftAddress, StaticCoordinator};
    use crate::test_utils::{anchor_wallet, init_test_logging, MockChainClient, TEST_CONTRACT};
    use async_trait::async_trait;
    use ethers::utils::rlp::Rlp;

    struct Follower;

    #[async_trait]
    impl AnchorCoordinator for Follower {
        async fn role(&self) -> BridgeResult<AnchorRole> {
            Ok(AnchorRole::Follower)
        }

        async fn leader(&self) -> BridgeResult<String> {
            Ok("other".to_string())
        }

        async fn cluster(&self) -> BridgeResult<Vec<RaftAddress>> {
            Ok(vec![])
        }
    }

    struct Unreachable;

    #[async_trait]
    impl AnchorCoordinator for Unreachable {
        async fn role(&self) -> BridgeResult<AnchorRole> {
            Err(BridgeError::TransientProviderError("connection refused".to_string()))
        }

        async fn leader(&self) -> BridgeResult<String> {
            self.role().await.map(|r| r.to_string())
        }

        async fn cluster(&self) -> BridgeResult<Vec<RaftAddress>> {
            Ok(vec![])
        }
    }

    const SUB_CHAIN: u64 = 2;

    fn dispatcher(
        client: Arc<MockChainClient>,
        coordinator: Arc<dyn AnchorCoordinator>,
    ) -> RelayDispatcher {
        init_test_logging();
        RelayDispatcher::new(
            "sub",
            SUB_CHAIN,
            TEST_CONTRACT,
            250_000,
            client,
            anchor_wallet(1),
            coordinator,
            Arc::new(BridgeMetrics::new_for_testing()),
        )
    }

    fn taker(ctx: u8, destination: u64) -> ReceptTransaction {
        ReceptTransaction {
            ctx_id: H256::repeat_byte(ctx),
            tx_hash: H256::repeat_byte(0xee),
            from: Address::repeat_byte(0xaa),
            to: Address::repeat_byte(0xbb),
            destination_chain_id: U256::from(destination),
            origin_chain_id: U256::from(1),
        }
    }

    fn decode(raw: &Bytes) -> (TypedTransaction, Address) {
        let (tx, signature) = TypedTransaction::decode_signed(&Rlp::new(raw)).unwrap();
        let sender = signature.recover(tx.sighash()).unwrap();
        (tx, sender)
    }

    #[tokio::test]
    async fn test_relay_submits_signed_settlement() {
        let client = Arc::new(MockChainClient::new(SUB_CHAIN));
        client.set_nonce(anchor_wallet(1).address(), 7);
        let relay = dispatcher(client.clone(), Arc::new(StaticCoordinator::new("a")));

        let rtx = taker(1, SUB_CHAIN);
        let outcome = relay.relay(&rtx).await.unwrap();
        assert!(matches!(outcome, RelayOutcome::Submitted(_)));

        let sent = client.sent_transactions();
        assert_eq!(sent.len(), 1);
        let (tx, sender) = decode(&sent[0]);
        assert_eq!(sender, anchor_wallet(1).address());
        assert_eq!(tx.nonce(), Some(&U256::from(7)));
        assert_eq!(tx.gas(), Some(&U256::from(250_000)));
        assert_eq!(tx.to_addr(), Some(&TEST_CONTRACT));
        assert_eq!(
            tx.data().map(|d| d.to_vec()),
            Some(maker_finish_call_data(&rtx).unwrap())
        );
    }

    #[tokio::test]
    async fn test_same_ctx_is_relayed_once() {
        let client = Arc::new(MockChainClient::new(SUB_CHAIN));
        let relay = dispatcher(client.clone(), Arc::new(StaticCoordinator::new("a")));

        relay.relay(&taker(1, SUB_CHAIN)).await.unwrap();
        let outcome = relay.relay(&taker(1, SUB_CHAIN)).await.unwrap();
        assert_eq!(outcome, RelayOutcome::Skipped(SkipReason::AlreadyRelayed));
        assert_eq!(client.sent_transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_nonces_are_reserved_sequentially() {
        let client = Arc::new(MockChainClient::new(SUB_CHAIN));
        client.set_nonce(anchor_wallet(1).address(), 3);
        let relay = dispatcher(client.clone(), Arc::new(StaticCoordinator::new("a")));

        relay.relay(&taker(1, SUB_CHAIN)).await.unwrap();
        relay.relay(&taker(2, SUB_CHAIN)).await.unwrap();
        let nonces: Vec<_> = client
            .sent_transactions()
            .iter()
            .map(|raw| *decode(raw).0.nonce().unwrap())
            .collect();
        assert_eq!(nonces, vec![U256::from(3), U256::from(4)]);
    }

    #[tokio::test]
    async fn test_failed_submission_releases_ctx_and_nonce() {
        let client = Arc::new(MockChainClient::new(SUB_CHAIN));
        client.set_nonce(anchor_wallet(1).address(), 5);
        let relay = dispatcher(client.clone(), Arc::new(StaticCoordinator::new("a")));

        client.reject_sends(true);
        let err = relay.relay(&taker(1, SUB_CHAIN)).await.unwrap_err();
        assert!(matches!(err, BridgeError::RelaySubmissionFailed { .. }));
        assert!(!relay.is_relayed(&H256::repeat_byte(1)).await);

        client.reject_sends(false);
        relay.relay(&taker(1, SUB_CHAIN)).await.unwrap();
        let sent = client.sent_transactions();
        assert_eq!(sent.len(), 1);
        assert_eq!(decode(&sent[0]).0.nonce(), Some(&U256::from(5)));
    }

    #[tokio::test]
    async fn test_skips() {
        let client = Arc::new(MockChainClient::new(SUB_CHAIN));
        let relay = dispatcher(client.clone(), Arc::new(StaticCoordinator::new("a")));
        assert_eq!(
            relay.relay(&taker(1, 1)).await.unwrap(),
            RelayOutcome::Skipped(SkipReason::OtherDestination)
        );

        let follower = dispatcher(client.clone(), Arc::new(Follower));
        assert_eq!(
            follower.relay(&taker(1, SUB_CHAIN)).await.unwrap(),
            RelayOutcome::Skipped(SkipReason::NotLeader)
        );
        assert!(client.sent_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_coordinator_is_counted() {
        let client = Arc::new(MockChainClient::new(SUB_CHAIN));
        let relay = dispatcher(client.clone(), Arc::new(Unreachable));
        let err = relay.relay(&taker(1, SUB_CHAIN)).await.unwrap_err();
        assert_eq!(err.error_type(), "transient_provider_error");
        assert_eq!(
            relay
                .metrics
                .errors
                .with_label_values(&["sub", "transient_provider_error"])
                .get(),
            1
        );
        assert!(!relay.is_relayed(&H256::repeat_byte(1)).await);
        assert!(client.sent_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_register_chain() {
        let client = Arc::new(MockChainClient::new(SUB_CHAIN));
        let relay = dispatcher(client.clone(), Arc::new(StaticCoordinator::new("a")));
        let anchors = [anchor_wallet(1).address(), anchor_wallet(2).address()];
        relay.register_chain(1, 2, &anchors).await.unwrap();

        let sent = client.sent_transactions();
        let (tx, _) = decode(&sent[0]);
        let data = tx.data().unwrap().to_vec();
        assert_eq!(data, chain_register_call_data(1, 2, &anchors).unwrap());
        // selector plus three head words, array length and two addresses
        assert_eq!(data.len(), 4 + 32 * 6);
    }
}
