// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::*;
use cross_anchor::config::{BridgeServerConfig, ChainSettings};
use std::fmt;
use std::path::PathBuf;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = "cross-anchor", version)]
pub struct Args {
    #[clap(subcommand)]
    pub command: AnchorCommand,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainSelector {
    Main,
    Sub,
}

impl ChainSelector {
    pub fn other(self) -> Self {
        match self {
            ChainSelector::Main => ChainSelector::Sub,
            ChainSelector::Sub => ChainSelector::Main,
        }
    }

    pub fn settings(self, config: &BridgeServerConfig) -> &ChainSettings {
        match self {
            ChainSelector::Main => &config.main,
            ChainSelector::Sub => &config.sub,
        }
    }
}

impl fmt::Display for ChainSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainSelector::Main => write!(f, "main"),
            ChainSelector::Sub => write!(f, "sub"),
        }
    }
}

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
pub enum AnchorCommand {
    // Run the anchor node until interrupted
    #[clap(name = "run")]
    Run {
        #[clap(long = "config-path")]
        config_path: PathBuf,
    },
    // Sign the maker events of a transaction and relay its taker events.
    // `--data` merges the hex record produced by another anchor.
    #[clap(name = "sign-tx")]
    SignTx {
        #[clap(long = "config-path")]
        config_path: PathBuf,
        #[clap(long = "chain", value_enum)]
        chain: ChainSelector,
        #[clap(long = "hash")]
        hash: String,
        #[clap(long = "data")]
        data: Option<String>,
    },
    // Scan both chains over their configured block ranges and print what is pending
    #[clap(name = "scan")]
    Scan {
        #[clap(long = "config-path")]
        config_path: PathBuf,
    },
    // Register the other chain and the anchor set on `--chain`'s bridge contract
    #[clap(name = "register-chain")]
    RegisterChain {
        #[clap(long = "config-path")]
        config_path: PathBuf,
        #[clap(long = "chain", value_enum)]
        chain: ChainSelector,
        #[clap(long = "remote-chain-id")]
        remote_chain_id: u64,
        #[clap(long = "sign-confirm-count")]
        sign_confirm_count: u8,
    },
    #[clap(name = "create-anchor-key")]
    CreateAnchorKey {
        #[clap(long = "path")]
        path: PathBuf,
    },
}
