// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod client;
pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod events;
pub mod ledger;
pub mod manual;
pub mod metrics;
pub mod node;
pub mod processor;
pub mod registry;
pub mod relay;
pub mod scanner;
pub mod server;
pub mod types;
pub mod watcher;

#[cfg(test)]
pub mod test_utils;
