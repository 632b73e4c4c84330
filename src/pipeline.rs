// Copyright 2025 Stake DAO
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-period distribution pipeline.
//!
//! One run walks FETCH_INPUTS → APPORTION → ACCUMULATE → BUILD_MERKLE →
//! INTEGRITY_CHECK → PUBLISH. Fetches fan out concurrently and join at an
//! explicit barrier; every stage after that is a pure single-threaded
//! transform. Nothing touches disk until the integrity check has passed, so
//! a run either publishes the complete period artifact or nothing.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use alloy::primitives::{Address, B256};

use crate::epoch::PeriodBoundary;
use crate::integrity::TokenBacking;
use crate::sources::{
    BalanceReader, BountySource, ClaimStatusOracle, DelegatorRegistry, ProposalSource,
};
use crate::store::{self, ClaimEntry, MerkleRecord, RECORD_VERSION};
use crate::types::{Gauge, GaugeShare, GaugeShares};
use crate::{apportion, carry_forward, integrity, merkle, DistributionError};

/// Static per-protocol deployment configuration.
///
/// Constructed explicitly by the caller and passed down; there are no
/// process-wide singletons, so parallel runs against different deployments
/// stay independent.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub chain_id: u64,
    /// Snapshot space, e.g. `sdcrv.eth`.
    pub space: String,
    /// The well-known delegation voter whose rewards are re-apportioned to
    /// its delegators.
    pub delegation_address: Address,
    /// Distributor contract holding frozen roots and paying claims.
    pub merkle_contract: Address,
    /// Liquid-wrapper token the rewards are denominated in.
    pub sd_token: Address,
    pub sd_token_symbol: String,
    pub sd_token_decimals: u8,
    /// Known gauges, for display names and root-gauge aliases. Bounties for
    /// gauges not listed here still distribute under the raw address.
    pub gauges: Vec<Gauge>,
}

impl Deployment {
    /// Resolve a bounty's gauge address against the registry, following
    /// root-gauge aliases back to the canonical gauge.
    pub fn gauge_for(&self, address: Address) -> Gauge {
        self.gauges
            .iter()
            .find(|g| g.address == address || g.root_gauge == Some(address))
            .cloned()
            .unwrap_or(Gauge { address, name: format!("{address:#x}"), root_gauge: None })
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct DistributionSummary {
    pub period: PeriodBoundary,
    pub merkle_root: B256,
    pub recipients: usize,
    /// Total bounty amount reported by the sources this period, token units.
    pub reported_total: f64,
    /// Amount actually assigned to addresses this period, token units.
    pub distributed_total: f64,
    /// Reported-but-unassigned delegation remainder, token units.
    pub undistributed: f64,
    pub record_path: PathBuf,
}

/// The distribution pipeline with its injected collaborators.
pub struct DistributionService {
    pub deployment: Deployment,
    pub report_dir: PathBuf,
    pub bounties: Arc<dyn BountySource>,
    pub proposals: Arc<dyn ProposalSource>,
    pub delegators: Arc<dyn DelegatorRegistry>,
    pub claims: Arc<dyn ClaimStatusOracle>,
    pub balances: Arc<dyn BalanceReader>,
}

impl DistributionService {
    /// Run one full distribution for the given proposal and period.
    pub async fn run(
        &self,
        proposal_id: &str,
        period: PeriodBoundary,
    ) -> Result<DistributionSummary, DistributionError> {
        let deployment = &self.deployment;

        tracing::info!(
            stage = "FETCH_INPUTS",
            period_start = period.start,
            proposal = proposal_id,
            space = %deployment.space,
            "fetching bounties and snapshot data"
        );

        let (bounties, proposal) = tokio::try_join!(
            self.bounties.fetch_bounties(period),
            self.proposals.get_proposal(proposal_id),
        )?;

        let mut voters = self.proposals.get_voters(&proposal.id).await?;
        let delegator_addresses = self
            .delegators
            .get_delegators(&deployment.space, proposal.created, deployment.delegation_address)
            .await?;
        let delegator_powers =
            self.proposals.get_voting_powers(&proposal, &delegator_addresses).await?;

        // Per-gauge shares in sd-token units, restricted to gauges with a
        // bounty this period. A gauge without a matching choice is fatal.
        let mut shares = GaugeShares::new();
        let mut reported_total = 0.0;
        for bounty in &bounties {
            let gauge = deployment.gauge_for(bounty.gauge());
            let choice_index = apportion::gauge_choice_index(&proposal, &gauge)?;
            let units = merkle::to_units(bounty.amount(), deployment.sd_token_decimals)?;
            reported_total += units;
            shares
                .entry(gauge.address)
                .or_insert(GaugeShare { choice_index, sd_token_amount: 0.0 })
                .sd_token_amount += units;
        }

        tracing::info!(
            stage = "APPORTION",
            gauges = shares.len(),
            voters = voters.len(),
            reported = reported_total,
            "apportioning bounties over voters"
        );

        apportion::apportion(&mut voters, &shares, deployment.delegation_address)?;
        let split = apportion::resolve_delegation(
            &voters,
            deployment.delegation_address,
            &delegator_powers,
        );
        let fresh = apportion::collect_user_rewards(&voters, deployment.delegation_address, &split);
        let distributed_total: f64 = fresh.values().sum();

        tracing::info!(stage = "ACCUMULATE", "merging unclaimed prior balances");

        let previous_records = store::load_records(&self.report_dir, period.previous().start)?;
        let previous = previous_records
            .as_ref()
            .and_then(|records| records.iter().find(|r| r.token_address == deployment.sd_token));
        let claimed = match previous {
            Some(record) => {
                self.claims
                    .has_claimed_since_last_freeze(deployment.sd_token, &record.claim_indices())
                    .await?
            }
            None => BTreeMap::new(),
        };
        let rewards = carry_forward::accumulate(fresh, previous, &claimed)?;

        tracing::info!(stage = "BUILD_MERKLE", recipients = rewards.len(), "building merkle tree");

        let tree = merkle::build(&rewards, deployment.sd_token_decimals)?;
        let record = MerkleRecord {
            version: RECORD_VERSION,
            symbol: deployment.sd_token_symbol.clone(),
            token_address: deployment.sd_token,
            decimals: deployment.sd_token_decimals,
            merkle_root: tree.root,
            total_amount: tree.total,
            chain_id: deployment.chain_id,
            merkle_contract: deployment.merkle_contract,
            claims: tree
                .claims
                .iter()
                .map(|(address, claim)| {
                    (
                        *address,
                        ClaimEntry {
                            index: claim.index,
                            amount: claim.amount,
                            proof: claim.proof.clone(),
                        },
                    )
                })
                .collect(),
        };

        tracing::info!(stage = "INTEGRITY_CHECK", root = %tree.root, "verifying backing funds");

        let backing = TokenBacking {
            symbol: deployment.sd_token_symbol.clone(),
            token: deployment.sd_token,
            reported_units: reported_total,
            merkle_total_units: merkle::to_units(tree.total, deployment.sd_token_decimals)?,
        };
        integrity::check_distributions(
            self.balances.as_ref(),
            self.claims.as_ref(),
            deployment.merkle_contract,
            std::slice::from_ref(&record),
            std::slice::from_ref(&backing),
        )
        .await?;

        tracing::info!(stage = "PUBLISH", period_start = period.start, "writing period artifact");

        let recipients = record.claims.len();
        let record_path = store::publish_records(&self.report_dir, period.start, &[record])?;

        Ok(DistributionSummary {
            period,
            merkle_root: tree.root,
            recipients,
            reported_total,
            distributed_total,
            undistributed: split.undistributed,
            record_path,
        })
    }
}
