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

//! Alloy-backed implementations of the chain-facing collaborator traits.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use alloy::{
    primitives::{Address, B256, U256},
    providers::Provider,
    rpc::types::{BlockNumberOrTag, Filter, Log},
    sol,
    sol_types::SolEvent,
};
use anyhow::Context;
use async_trait::async_trait;

use crate::epoch::PeriodBoundary;
use crate::sources::{BalanceReader, BountySource, ClaimStatusOracle, RequestBudget};
use crate::types::Bounty;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
    }

    /// MultiMerkleStash-style distributor holding the frozen roots.
    #[sol(rpc)]
    interface IMerkleDistributor {
        function merkleRoot(address token) external view returns (bytes32);
        function isClaimed(address token, uint256 index) external view returns (bool);
    }

    struct PlatformBounty {
        address gauge;
        address manager;
        address rewardToken;
        uint8 numberOfPeriods;
        uint256 endTimestamp;
        uint256 maxRewardPerVote;
        uint256 totalRewardAmount;
    }

    #[sol(rpc)]
    interface IVotemarket {
        event Claimed(
            address indexed user,
            address rewardToken,
            uint256 indexed bountyId,
            uint256 amount,
            uint256 protocolFees,
            uint256 period
        );
        function getBounty(uint256 bountyId) external view returns (PlatformBounty memory);
    }
}

/// Chunk size for log queries to avoid rate limiting
pub const LOG_QUERY_CHUNK_SIZE: u64 = 5000;

/// Query logs in chunks to avoid rate limiting
pub async fn query_logs_chunked<P: Provider>(
    provider: &P,
    filter: Filter,
    from_block: u64,
    to_block: u64,
) -> anyhow::Result<Vec<Log>> {
    let mut all_logs = Vec::new();
    let mut current_from = from_block;

    while current_from <= to_block {
        let current_to = (current_from + LOG_QUERY_CHUNK_SIZE - 1).min(to_block);

        let chunk_filter = filter
            .clone()
            .from_block(BlockNumberOrTag::Number(current_from))
            .to_block(BlockNumberOrTag::Number(current_to));

        let logs = provider.get_logs(&chunk_filter).await?;
        all_logs.extend(logs);

        current_from = current_to + 1;
    }

    Ok(all_logs)
}

/// Bounty source reading Votemarket `Claimed` events off chain.
pub struct ChainBountySource<P> {
    provider: P,
    platform: Address,
    from_block: u64,
    budget: Arc<RequestBudget>,
}

impl<P: Provider> ChainBountySource<P> {
    pub fn new(provider: P, platform: Address, from_block: u64, budget: Arc<RequestBudget>) -> Self {
        Self { provider, platform, from_block, budget }
    }
}

#[async_trait]
impl<P: Provider + 'static> BountySource for ChainBountySource<P> {
    async fn fetch_bounties(&self, period: PeriodBoundary) -> anyhow::Result<Vec<Bounty>> {
        let to_block =
            self.provider.get_block_number().await.context("failed to get block number")?;

        let filter = Filter::new()
            .address(self.platform)
            .event_signature(IVotemarket::Claimed::SIGNATURE_HASH);

        let logs = query_logs_chunked(&self.provider, filter, self.from_block, to_block)
            .await
            .context("failed to query Claimed logs")?;
        tracing::info!(count = logs.len(), platform = %self.platform, "fetched claim logs");

        let platform = IVotemarket::new(self.platform, &self.provider);
        let mut gauge_by_bounty: HashMap<U256, Address> = HashMap::new();
        let mut bounties = Vec::new();

        for log in logs {
            let Ok(decoded) = log.log_decode::<IVotemarket::Claimed>() else {
                continue;
            };
            let data = decoded.inner.data;
            if !period.contains(data.period.to::<u64>()) {
                continue;
            }

            let gauge = match gauge_by_bounty.get(&data.bountyId) {
                Some(gauge) => *gauge,
                None => {
                    self.budget.acquire().await;
                    let bounty = platform
                        .getBounty(data.bountyId)
                        .call()
                        .await
                        .with_context(|| format!("failed to get bounty {}", data.bountyId))?;
                    gauge_by_bounty.insert(data.bountyId, bounty.gauge);
                    bounty.gauge
                }
            };

            bounties.push(Bounty::Votemarket {
                gauge,
                reward_token: data.rewardToken,
                amount: data.amount,
                bounty_id: data.bountyId,
            });
        }

        tracing::info!(
            count = bounties.len(),
            period_start = period.start,
            "normalized claimed bounties"
        );
        Ok(bounties)
    }
}

/// Claim-status oracle backed by the distributor contract.
pub struct ChainClaimStatusOracle<P> {
    provider: P,
    distributor: Address,
    budget: Arc<RequestBudget>,
}

impl<P: Provider> ChainClaimStatusOracle<P> {
    pub fn new(provider: P, distributor: Address, budget: Arc<RequestBudget>) -> Self {
        Self { provider, distributor, budget }
    }
}

#[async_trait]
impl<P: Provider + 'static> ClaimStatusOracle for ChainClaimStatusOracle<P> {
    async fn merkle_root(&self, token: Address) -> anyhow::Result<B256> {
        self.budget.acquire().await;
        let distributor = IMerkleDistributor::new(self.distributor, &self.provider);
        let root = distributor
            .merkleRoot(token)
            .call()
            .await
            .with_context(|| format!("failed to read merkle root for {token}"))?;
        Ok(root)
    }

    async fn has_claimed_since_last_freeze(
        &self,
        token: Address,
        claim_indices: &BTreeMap<Address, u64>,
    ) -> anyhow::Result<BTreeMap<Address, bool>> {
        let distributor = IMerkleDistributor::new(self.distributor, &self.provider);
        let mut statuses = BTreeMap::new();

        for (&address, &index) in claim_indices {
            self.budget.acquire().await;
            let claimed = distributor
                .isClaimed(token, U256::from(index))
                .call()
                .await
                .with_context(|| format!("failed to read claim status of {address}"))?;
            statuses.insert(address, claimed);
        }

        Ok(statuses)
    }
}

/// ERC-20 balance reader.
pub struct ChainBalanceReader<P> {
    provider: P,
    budget: Arc<RequestBudget>,
}

impl<P: Provider> ChainBalanceReader<P> {
    pub fn new(provider: P, budget: Arc<RequestBudget>) -> Self {
        Self { provider, budget }
    }
}

#[async_trait]
impl<P: Provider + 'static> BalanceReader for ChainBalanceReader<P> {
    async fn balance_of(&self, token: Address, holder: Address) -> anyhow::Result<U256> {
        self.budget.acquire().await;
        let erc20 = IERC20::new(token, &self.provider);
        let balance = erc20
            .balanceOf(holder)
            .call()
            .await
            .with_context(|| format!("failed to read balance of {holder} for token {token}"))?;
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claimed_event_signature() {
        assert_eq!(
            IVotemarket::Claimed::SIGNATURE,
            "Claimed(address,address,uint256,uint256,uint256,uint256)"
        );
    }
}
