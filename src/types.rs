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

//! Core data model shared across the distribution pipeline.

use std::collections::BTreeMap;
use std::fmt;

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Reward-market protocol a bounty was claimed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Votemarket,
    Warden,
    Hiddenhand,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Votemarket => write!(f, "votemarket"),
            Protocol::Warden => write!(f, "warden"),
            Protocol::Hiddenhand => write!(f, "hiddenhand"),
        }
    }
}

/// A claimed bounty, normalized from a source protocol's wire format.
///
/// Each source protocol keeps its own identifying fields, but all variants
/// share the `{gauge, reward_token, amount}` shape the core consumes.
/// Amounts are integer token base units, immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum Bounty {
    Votemarket {
        gauge: Address,
        reward_token: Address,
        amount: U256,
        bounty_id: U256,
    },
    Warden {
        gauge: Address,
        reward_token: Address,
        amount: U256,
    },
    Hiddenhand {
        gauge: Address,
        reward_token: Address,
        amount: U256,
        proposal_hash: B256,
    },
}

impl Bounty {
    pub fn protocol(&self) -> Protocol {
        match self {
            Bounty::Votemarket { .. } => Protocol::Votemarket,
            Bounty::Warden { .. } => Protocol::Warden,
            Bounty::Hiddenhand { .. } => Protocol::Hiddenhand,
        }
    }

    pub fn gauge(&self) -> Address {
        match self {
            Bounty::Votemarket { gauge, .. }
            | Bounty::Warden { gauge, .. }
            | Bounty::Hiddenhand { gauge, .. } => *gauge,
        }
    }

    pub fn reward_token(&self) -> Address {
        match self {
            Bounty::Votemarket { reward_token, .. }
            | Bounty::Warden { reward_token, .. }
            | Bounty::Hiddenhand { reward_token, .. } => *reward_token,
        }
    }

    pub fn amount(&self) -> U256 {
        match self {
            Bounty::Votemarket { amount, .. }
            | Bounty::Warden { amount, .. }
            | Bounty::Hiddenhand { amount, .. } => *amount,
        }
    }
}

/// An on-chain reward-eligible gauge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gauge {
    pub address: Address,
    pub name: String,
    /// Proxy address some protocols list instead of the canonical gauge.
    pub root_gauge: Option<Address>,
}

/// A governance vote snapshot, as delivered by the proposal source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub space: String,
    /// Proposal creation timestamp; delegator voting power is sampled here.
    pub created: u64,
    pub snapshot_block: u64,
    /// Ordered choice labels. Labels embed truncated gauge addresses, so
    /// gauges are matched by address prefix.
    pub choices: Vec<String>,
    pub scores: Vec<f64>,
    pub scores_total: f64,
}

/// A voter on a proposal.
///
/// `choice` maps 1-based Snapshot choice indices to the raw weight the voter
/// put on that choice. The weights need not sum to `voting_power`; only the
/// per-choice ratio matters for apportionment.
#[derive(Debug, Clone, PartialEq)]
pub struct Voter {
    pub address: Address,
    pub voting_power: f64,
    pub choice: BTreeMap<usize, f64>,
    /// Accumulated reward for this period, in sd-token units. `None` until
    /// the apportionment engine assigns something.
    pub total_rewards: Option<f64>,
}

impl Voter {
    pub fn new(address: Address, voting_power: f64, choice: BTreeMap<usize, f64>) -> Self {
        Self { address, voting_power, choice, total_rewards: None }
    }
}

/// Per-gauge bounty total for a period, expressed in the protocol's
/// liquid-wrapper (sd) token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaugeShare {
    /// 0-based position of the gauge's choice within `Proposal::choices`.
    pub choice_index: usize,
    pub sd_token_amount: f64,
}

/// Per-gauge share map, restricted to gauges that received a bounty this
/// period. Keyed by gauge address.
pub type GaugeShares = BTreeMap<Address, GaugeShare>;

/// Cumulative per-address reward amounts in token units.
///
/// `BTreeMap` keeps iteration deterministic, which the Merkle builder relies
/// on for reproducible index assignment.
pub type UserRewards = BTreeMap<Address, f64>;
