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

//! Snapshot hub GraphQL client: proposals, votes, voting power and the
//! delegation registry.
//!
//! The hub is treated as a black-box vote data source; this module only
//! knows its wire shapes and normalizes them into the crate's data model.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::Address;
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::sources::{DelegatorRegistry, ProposalSource, RequestBudget};
use crate::types::{Proposal, Voter};

const PAGE_SIZE: usize = 1000;

const PROPOSAL_QUERY: &str = r#"
query Proposal($id: String!) {
  proposal(id: $id) {
    id
    space { id }
    created
    snapshot
    choices
    scores
    scores_total
  }
}"#;

const VOTES_QUERY: &str = r#"
query Votes($proposal: String!, $first: Int!, $skip: Int!) {
  votes(
    first: $first
    skip: $skip
    where: { proposal: $proposal }
    orderBy: "created"
    orderDirection: asc
  ) {
    voter
    vp
    choice
  }
}"#;

const VOTING_POWER_QUERY: &str = r#"
query Vp($voter: String!, $space: String!, $proposal: String!) {
  vp(voter: $voter, space: $space, proposal: $proposal) {
    vp
  }
}"#;

const DELEGATIONS_QUERY: &str = r#"
query Delegations($space: String!, $delegate: String!, $ts: Int!, $first: Int!, $skip: Int!) {
  delegations(
    first: $first
    skip: $skip
    where: { space: $space, delegate: $delegate, timestamp_lte: $ts }
  ) {
    delegator
  }
}"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ProposalData {
    proposal: Option<RawProposal>,
}

#[derive(Debug, Deserialize)]
struct RawProposal {
    id: String,
    space: RawSpace,
    created: u64,
    snapshot: String,
    choices: Vec<String>,
    scores: Vec<f64>,
    scores_total: f64,
}

#[derive(Debug, Deserialize)]
struct RawSpace {
    id: String,
}

#[derive(Debug, Deserialize)]
struct VotesData {
    votes: Vec<RawVote>,
}

#[derive(Debug, Deserialize)]
struct RawVote {
    voter: String,
    vp: f64,
    choice: RawChoice,
}

/// Snapshot encodes a single-choice ballot as a bare 1-based index and a
/// weighted ballot as an index→weight map with string keys.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawChoice {
    Single(usize),
    Weighted(BTreeMap<String, f64>),
}

#[derive(Debug, Deserialize)]
struct VotingPowerData {
    vp: Option<RawVotingPower>,
}

#[derive(Debug, Deserialize)]
struct RawVotingPower {
    vp: f64,
}

#[derive(Debug, Deserialize)]
struct DelegationsData {
    delegations: Vec<RawDelegation>,
}

#[derive(Debug, Deserialize)]
struct RawDelegation {
    delegator: String,
}

fn parse_proposal(raw: RawProposal) -> anyhow::Result<Proposal> {
    let snapshot_block =
        raw.snapshot.parse::<u64>().with_context(|| format!("bad snapshot block {}", raw.snapshot))?;
    Ok(Proposal {
        id: raw.id,
        space: raw.space.id,
        created: raw.created,
        snapshot_block,
        choices: raw.choices,
        scores: raw.scores,
        scores_total: raw.scores_total,
    })
}

fn parse_vote(raw: RawVote) -> anyhow::Result<Voter> {
    let address = Address::from_str(&raw.voter)
        .with_context(|| format!("bad voter address {}", raw.voter))?;

    let choice = match raw.choice {
        RawChoice::Single(index) => [(index, 1.0)].into_iter().collect(),
        RawChoice::Weighted(weights) => {
            let mut choice = BTreeMap::new();
            for (key, weight) in weights {
                let index = key
                    .parse::<usize>()
                    .with_context(|| format!("bad choice index {key} for voter {}", raw.voter))?;
                choice.insert(index, weight);
            }
            choice
        }
    };

    Ok(Voter::new(address, raw.vp, choice))
}

/// Client for the Snapshot hub and the delegation subgraph.
pub struct SnapshotClient {
    http: reqwest::Client,
    hub: Url,
    delegation_subgraph: Url,
    budget: Arc<RequestBudget>,
}

impl SnapshotClient {
    pub fn new(hub: Url, delegation_subgraph: Url, budget: Arc<RequestBudget>) -> Self {
        Self { http: reqwest::Client::new(), hub, delegation_subgraph, budget }
    }

    async fn post_query<T: DeserializeOwned>(
        &self,
        url: &Url,
        query: &str,
        variables: serde_json::Value,
    ) -> anyhow::Result<T> {
        self.budget.acquire().await;

        let response = self
            .http
            .post(url.clone())
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .context("graphql request failed")?
            .error_for_status()
            .context("graphql request rejected")?
            .json::<GraphQlResponse<T>>()
            .await
            .context("malformed graphql response")?;

        if let Some(error) = response.errors.first() {
            bail!("graphql error: {}", error.message);
        }
        response.data.context("graphql response missing data")
    }
}

#[async_trait]
impl ProposalSource for SnapshotClient {
    async fn get_proposal(&self, id: &str) -> anyhow::Result<Proposal> {
        let data: ProposalData =
            self.post_query(&self.hub, PROPOSAL_QUERY, json!({ "id": id })).await?;
        let raw = data.proposal.with_context(|| format!("proposal {id} not found"))?;
        parse_proposal(raw)
    }

    async fn get_voters(&self, proposal_id: &str) -> anyhow::Result<Vec<Voter>> {
        let mut voters = Vec::new();
        let mut skip = 0usize;

        loop {
            let data: VotesData = self
                .post_query(
                    &self.hub,
                    VOTES_QUERY,
                    json!({ "proposal": proposal_id, "first": PAGE_SIZE, "skip": skip }),
                )
                .await?;

            let page_len = data.votes.len();
            for raw in data.votes {
                voters.push(parse_vote(raw)?);
            }
            if page_len < PAGE_SIZE {
                break;
            }
            skip += PAGE_SIZE;
        }

        tracing::info!(proposal = proposal_id, voters = voters.len(), "fetched voters");
        Ok(voters)
    }

    async fn get_voting_powers(
        &self,
        proposal: &Proposal,
        addresses: &[Address],
    ) -> anyhow::Result<BTreeMap<Address, f64>> {
        let mut powers = BTreeMap::new();
        for &address in addresses {
            let data: VotingPowerData = self
                .post_query(
                    &self.hub,
                    VOTING_POWER_QUERY,
                    json!({
                        "voter": format!("{address:#x}"),
                        "space": proposal.space,
                        "proposal": proposal.id,
                    }),
                )
                .await?;
            powers.insert(address, data.vp.map(|vp| vp.vp).unwrap_or(0.0));
        }
        Ok(powers)
    }
}

#[async_trait]
impl DelegatorRegistry for SnapshotClient {
    async fn get_delegators(
        &self,
        space: &str,
        as_of: u64,
        delegation_address: Address,
    ) -> anyhow::Result<Vec<Address>> {
        let mut delegators = Vec::new();
        let mut skip = 0usize;

        loop {
            let data: DelegationsData = self
                .post_query(
                    &self.delegation_subgraph,
                    DELEGATIONS_QUERY,
                    json!({
                        "space": space,
                        "delegate": format!("{delegation_address:#x}"),
                        "ts": as_of,
                        "first": PAGE_SIZE,
                        "skip": skip,
                    }),
                )
                .await?;

            let page_len = data.delegations.len();
            for raw in data.delegations {
                delegators.push(
                    Address::from_str(&raw.delegator)
                        .with_context(|| format!("bad delegator address {}", raw.delegator))?,
                );
            }
            if page_len < PAGE_SIZE {
                break;
            }
            skip += PAGE_SIZE;
        }

        tracing::info!(space, delegators = delegators.len(), "fetched delegators");
        Ok(delegators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn test_parse_single_choice_vote() {
        let raw: RawVote = serde_json::from_value(json!({
            "voter": "0x00000000000000000000000000000000000000AA",
            "vp": 60.0,
            "choice": 3
        }))
        .unwrap();
        let voter = parse_vote(raw).unwrap();
        assert_eq!(voter.address, address!("00000000000000000000000000000000000000aa"));
        assert_eq!(voter.voting_power, 60.0);
        assert_eq!(voter.choice, [(3, 1.0)].into_iter().collect());
    }

    #[test]
    fn test_parse_weighted_vote() {
        let raw: RawVote = serde_json::from_value(json!({
            "voter": "0x00000000000000000000000000000000000000bb",
            "vp": 100.0,
            "choice": { "1": 25.0, "4": 75.0 }
        }))
        .unwrap();
        let voter = parse_vote(raw).unwrap();
        assert_eq!(voter.choice, [(1, 25.0), (4, 75.0)].into_iter().collect());
    }

    #[test]
    fn test_parse_vote_rejects_bad_choice_key() {
        let raw: RawVote = serde_json::from_value(json!({
            "voter": "0x00000000000000000000000000000000000000bb",
            "vp": 1.0,
            "choice": { "not-an-index": 1.0 }
        }))
        .unwrap();
        assert!(parse_vote(raw).is_err());
    }

    #[test]
    fn test_parse_proposal() {
        let raw: RawProposal = serde_json::from_value(json!({
            "id": "0xprop",
            "space": { "id": "sdcrv.eth" },
            "created": 1700000000,
            "snapshot": "18000000",
            "choices": ["a", "b"],
            "scores": [1.0, 2.0],
            "scores_total": 3.0
        }))
        .unwrap();
        let proposal = parse_proposal(raw).unwrap();
        assert_eq!(proposal.space, "sdcrv.eth");
        assert_eq!(proposal.snapshot_block, 18_000_000);
        assert_eq!(proposal.choices.len(), 2);
    }
}
