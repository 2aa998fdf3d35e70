// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Which anchor is allowed to broadcast settlements.
//!
//! Anchors form a raft cluster; only the current leader relays. The cluster
//! is queried over its JSON-RPC surface and never driven from here.

use crate::error::{BridgeError, BridgeResult};
use async_trait::async_trait;
use ethers::providers::{Http, JsonRpcClient, Provider};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnchorRole {
    Leader,
    Follower,
    Learner,
    Unknown,
}

impl AnchorRole {
    pub fn from_raft_role(role: &str) -> Self {
        match role {
            "minter" | "leader" => AnchorRole::Leader,
            "verifier" | "follower" => AnchorRole::Follower,
            "learner" => AnchorRole::Learner,
            _ => AnchorRole::Unknown,
        }
    }
}

impl fmt::Display for AnchorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnchorRole::Leader => "leader",
            AnchorRole::Follower => "follower",
            AnchorRole::Learner => "learner",
            AnchorRole::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RaftAddress {
    pub raft_id: u16,
    pub node_id: String,
    pub ip: String,
    pub p2p_port: u16,
    pub raft_port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RaftNodeInfo {
    pub cluster_size: usize,
    pub role: String,
    pub address: Option<RaftAddress>,
    pub peer_addresses: Vec<RaftAddress>,
    pub removed_peer_ids: Vec<u16>,
    pub applied_index: u64,
    pub snapshot_index: u64,
}

#[async_trait]
pub trait AnchorCoordinator: Send + Sync {
    async fn role(&self) -> BridgeResult<AnchorRole>;

    /// Node id of the current leader
    async fn leader(&self) -> BridgeResult<String>;

    /// Every member of the cluster, this node last
    async fn cluster(&self) -> BridgeResult<Vec<RaftAddress>>;

    async fn node_info(&self) -> BridgeResult<RaftNodeInfo> {
        let role = self.role().await?;
        let mut peers = self.cluster().await?;
        let cluster_size = peers.len();
        let address = peers.pop();
        Ok(RaftNodeInfo {
            cluster_size,
            role: role.to_string(),
            address,
            peer_addresses: peers,
            ..Default::default()
        })
    }

    async fn is_leader(&self) -> BridgeResult<bool> {
        Ok(self.role().await? == AnchorRole::Leader)
    }
}

/// Coordinator backed by the raft node's `raft_*` RPC methods
pub struct RaftRpcCoordinator<P> {
    provider: Provider<P>,
}

impl RaftRpcCoordinator<Http> {
    pub fn new(url: &str) -> BridgeResult<Self> {
        let provider = Provider::<Http>::try_from(url)
            .map_err(|e| {
                BridgeError::InvalidConfig(format!("invalid raft rpc url {}: {}", url, e))
            })?;
        Ok(Self::with_provider(provider))
    }
}

impl<P: JsonRpcClient + 'static> RaftRpcCoordinator<P> {
    pub fn with_provider(provider: Provider<P>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: JsonRpcClient + 'static> AnchorCoordinator for RaftRpcCoordinator<P> {
    async fn role(&self) -> BridgeResult<AnchorRole> {
        let role: String = self.provider.request("raft_role", ()).await?;
        Ok(AnchorRole::from_raft_role(&role))
    }

    async fn leader(&self) -> BridgeResult<String> {
        Ok(self.provider.request("raft_leader", ()).await?)
    }

    async fn cluster(&self) -> BridgeResult<Vec<RaftAddress>> {
        Ok(self.provider.request("raft_cluster", ()).await?)
    }
}

/// Single anchor deployment: this node is always the leader.
pub struct StaticCoordinator {
    node_id: String,
}

impl StaticCoordinator {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }
}

#[async_trait]
impl AnchorCoordinator for StaticCoordinator {
    async fn role(&self) -> BridgeResult<AnchorRole> {
        Ok(AnchorRole::Leader)
    }

    async fn leader(&self) -> BridgeResult<String> {
        Ok(self.node_id.clone())
    }

    async fn cluster(&self) -> BridgeResult<Vec<RaftAddress>> {
        Ok(vec![RaftAddress {
            node_id: self.node_id.clone(),
            ..Default::default()
        }])
    }
}
