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

//! Collaborator interfaces the pipeline depends on, plus request pacing.
//!
//! The core never talks to a chain, an explorer or the Snapshot hub
//! directly; it consumes these traits. Production implementations live in
//! [`crate::chain`] and [`crate::snapshot`]; tests inject in-memory fakes.
//! Sources are not retried here — a failed fetch aborts the run rather than
//! producing partial data.

use std::collections::BTreeMap;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::epoch::PeriodBoundary;
use crate::types::{Bounty, Proposal, Voter};

/// Normalized bounty claims for a period, regardless of source protocol.
#[async_trait]
pub trait BountySource: Send + Sync {
    async fn fetch_bounties(&self, period: PeriodBoundary) -> anyhow::Result<Vec<Bounty>>;
}

/// Governance vote snapshot data (proposal, voters, voting power lookups).
#[async_trait]
pub trait ProposalSource: Send + Sync {
    async fn get_proposal(&self, id: &str) -> anyhow::Result<Proposal>;

    async fn get_voters(&self, proposal_id: &str) -> anyhow::Result<Vec<Voter>>;

    /// Voting power of each address at the proposal's snapshot.
    async fn get_voting_powers(
        &self,
        proposal: &Proposal,
        addresses: &[Address],
    ) -> anyhow::Result<BTreeMap<Address, f64>>;
}

/// Addresses that delegated their voting power to the delegation address.
#[async_trait]
pub trait DelegatorRegistry: Send + Sync {
    async fn get_delegators(
        &self,
        space: &str,
        as_of: u64,
        delegation_address: Address,
    ) -> anyhow::Result<Vec<Address>>;
}

/// Claim state of the on-chain distributor contract.
#[async_trait]
pub trait ClaimStatusOracle: Send + Sync {
    /// Current root frozen in the distributor for a token. The zero root is
    /// the "never frozen" sentinel.
    async fn merkle_root(&self, token: Address) -> anyhow::Result<B256>;

    /// For each `(address, leaf index)` of the previous record, whether that
    /// leaf was claimed since the last freeze. Implementations must return a
    /// verdict for every input address; the accumulator refuses to guess.
    async fn has_claimed_since_last_freeze(
        &self,
        token: Address,
        claim_indices: &BTreeMap<Address, u64>,
    ) -> anyhow::Result<BTreeMap<Address, bool>>;
}

/// On-chain ERC-20 balance lookups.
#[async_trait]
pub trait BalanceReader: Send + Sync {
    async fn balance_of(&self, token: Address, holder: Address) -> anyhow::Result<U256>;
}

/// Token-bucket request pacing shared by the fetch layer.
///
/// Collaborators acquire one token per outbound request; when the bucket is
/// empty the caller sleeps until the next refill. Pacing policy lives here
/// instead of being scattered as ad hoc sleeps through the fetch code.
#[derive(Debug)]
pub struct RequestBudget {
    capacity: u32,
    refill_interval: Duration,
    state: Mutex<BudgetState>,
}

#[derive(Debug)]
struct BudgetState {
    tokens: u32,
    last_refill: Instant,
}

impl RequestBudget {
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        assert!(capacity > 0, "request budget capacity must be non-zero");
        Self {
            capacity,
            refill_interval,
            state: Mutex::new(BudgetState { tokens: capacity, last_refill: Instant::now() }),
        }
    }

    /// Take one request token, sleeping until the bucket refills if empty.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                if now.duration_since(state.last_refill) >= self.refill_interval {
                    state.tokens = self.capacity;
                    state.last_refill = now;
                }
                if state.tokens > 0 {
                    state.tokens -= 1;
                    return;
                }
                self.refill_interval - now.duration_since(state.last_refill)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_budget_allows_burst_up_to_capacity() {
        let budget = RequestBudget::new(3, Duration::from_secs(1));
        let start = Instant::now();
        for _ in 0..3 {
            budget.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_blocks_until_refill() {
        let budget = RequestBudget::new(2, Duration::from_secs(1));
        budget.acquire().await;
        budget.acquire().await;

        let start = Instant::now();
        budget.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(900));
    }
}
