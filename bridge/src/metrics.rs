// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry, IntCounterVec,
    IntGaugeVec, Registry,
};

/// Counters and gauges of the confirmation and relay pipeline.
///
/// Every metric is labelled by chain name (`main` / `sub`).
#[derive(Clone, Debug)]
pub struct BridgeMetrics {
    pub(crate) ledger_blocks_inserted: IntCounterVec,
    pub(crate) ledger_blocks_confirmed: IntCounterVec,
    pub(crate) ledger_side_fork_blocks: IntCounterVec,
    pub(crate) ledger_header_lookup_failures: IntCounterVec,
    pub(crate) ledger_size: IntGaugeVec,
    pub(crate) last_inserted_block: IntGaugeVec,

    pub(crate) cross_block_events_emitted: IntCounterVec,
    pub(crate) confirmed_makers: IntCounterVec,
    pub(crate) confirmed_takers: IntCounterVec,
    pub(crate) confirmed_finishes: IntCounterVec,

    pub(crate) pending_makers: IntGaugeVec,
    pub(crate) pending_takers: IntGaugeVec,

    pub(crate) signatures_produced: IntCounterVec,
    pub(crate) signatures_merged: IntCounterVec,

    pub(crate) relay_submitted: IntCounterVec,
    pub(crate) relay_failed: IntCounterVec,
    pub(crate) relay_skipped: IntCounterVec,

    pub(crate) errors: IntCounterVec,
}

impl BridgeMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            ledger_blocks_inserted: register_int_counter_vec_with_registry!(
                "bridge_ledger_blocks_inserted",
                "Total number of blocks inserted into the unconfirmed ledger",
                &["chain"],
                registry,
            )
            .unwrap(),
            ledger_blocks_confirmed: register_int_counter_vec_with_registry!(
                "bridge_ledger_blocks_confirmed",
                "Total number of ledger blocks that reached confirmation depth",
                &["chain"],
                registry,
            )
            .unwrap(),
            ledger_side_fork_blocks: register_int_counter_vec_with_registry!(
                "bridge_ledger_side_fork_blocks",
                "Total number of ledger blocks dropped as side forks",
                &["chain"],
                registry,
            )
            .unwrap(),
            ledger_header_lookup_failures: register_int_counter_vec_with_registry!(
                "bridge_ledger_header_lookup_failures",
                "Total number of failed canonical header lookups",
                &["chain"],
                registry,
            )
            .unwrap(),
            ledger_size: register_int_gauge_vec_with_registry!(
                "bridge_ledger_size",
                "Number of blocks waiting for confirmation",
                &["chain"],
                registry,
            )
            .unwrap(),
            last_inserted_block: register_int_gauge_vec_with_registry!(
                "bridge_last_inserted_block",
                "Height of the last block inserted into the ledger",
                &["chain"],
                registry,
            )
            .unwrap(),
            cross_block_events_emitted: register_int_counter_vec_with_registry!(
                "bridge_cross_block_events_emitted",
                "Total number of cross block events emitted",
                &["chain"],
                registry,
            )
            .unwrap(),
            confirmed_makers: register_int_counter_vec_with_registry!(
                "bridge_confirmed_makers",
                "Total number of confirmed maker events",
                &["chain"],
                registry,
            )
            .unwrap(),
            confirmed_takers: register_int_counter_vec_with_registry!(
                "bridge_confirmed_takers",
                "Total number of confirmed taker events",
                &["chain"],
                registry,
            )
            .unwrap(),
            confirmed_finishes: register_int_counter_vec_with_registry!(
                "bridge_confirmed_finishes",
                "Total number of confirmed finish events",
                &["chain"],
                registry,
            )
            .unwrap(),
            pending_makers: register_int_gauge_vec_with_registry!(
                "bridge_pending_makers",
                "Number of makers waiting for settlement",
                &["chain"],
                registry,
            )
            .unwrap(),
            pending_takers: register_int_gauge_vec_with_registry!(
                "bridge_pending_takers",
                "Number of takers waiting for the finish event",
                &["chain"],
                registry,
            )
            .unwrap(),
            signatures_produced: register_int_counter_vec_with_registry!(
                "bridge_signatures_produced",
                "Total number of maker signatures produced by this anchor",
                &["chain"],
                registry,
            )
            .unwrap(),
            signatures_merged: register_int_counter_vec_with_registry!(
                "bridge_signatures_merged",
                "Total number of anchor signatures merged into signed records",
                &["chain"],
                registry,
            )
            .unwrap(),
            relay_submitted: register_int_counter_vec_with_registry!(
                "bridge_relay_submitted",
                "Total number of settlement transactions submitted",
                &["chain"],
                registry,
            )
            .unwrap(),
            relay_failed: register_int_counter_vec_with_registry!(
                "bridge_relay_failed",
                "Total number of settlement transactions that failed to submit",
                &["chain"],
                registry,
            )
            .unwrap(),
            relay_skipped: register_int_counter_vec_with_registry!(
                "bridge_relay_skipped",
                "Total number of settlements skipped, by reason",
                &["chain", "reason"],
                registry,
            )
            .unwrap(),
            errors: register_int_counter_vec_with_registry!(
                "bridge_errors",
                "Total number of errors by chain and error type",
                &["chain", "error_type"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}
