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

//! Weekly vote-bounty reward distribution.
//!
//! This crate turns per-gauge bounty claims and governance vote snapshots
//! into per-address cumulative reward Merkle trees that the on-chain
//! distributor contract verifies at claim time. The pipeline per period:
//!
//! 1. normalize claimed bounties from the reward markets ([`types::Bounty`]),
//! 2. apportion each gauge's bounty over its voters by snapshot vote weight,
//!    resolving the delegation address into its delegators ([`apportion`]),
//! 3. carry forward unclaimed balances from the previous period's record
//!    ([`carry_forward`]),
//! 4. build a deterministic sorted-pair Merkle tree ([`merkle`]),
//! 5. verify the new tree is fully backed by on-chain funds before anything
//!    is published ([`integrity`]).
//!
//! Stages 2-4 are pure, synchronous transforms over in-memory maps; all I/O
//! happens behind the collaborator traits in [`sources`].

use alloy::primitives::Address;
use thiserror::Error;

pub mod apportion;
pub mod carry_forward;
pub mod chain;
pub mod epoch;
pub mod integrity;
pub mod merkle;
pub mod pipeline;
pub mod snapshot;
pub mod sources;
pub mod store;
pub mod types;

pub use epoch::{PeriodBoundary, WEEK};
pub use pipeline::{Deployment, DistributionService};

/// Errors that abort a distribution run.
///
/// Everything here is fatal: no Merkle record is published once any of these
/// is raised. Policy edge cases (zero-voter gauges, clamped delegator power)
/// are recovered locally inside [`apportion`] and only logged.
#[derive(Error, Debug)]
pub enum DistributionError {
    /// A reported gauge bounty has no matching snapshot choice. Skipping it
    /// would make reported funds vanish from the distribution.
    #[error("no snapshot choice matches gauge {gauge}")]
    MissingChoice { gauge: Address },

    /// A token with a nonzero reported amount has no Merkle record.
    #[error("no merkle record for reported token {symbol}")]
    MissingMerkle { symbol: String },

    /// The new tree promises more than the distributor can ever pay out.
    #[error("distribution of {symbol} exceeds backing funds by {shortfall} tokens")]
    InsufficientFunds { symbol: String, shortfall: f64 },

    /// The claim-status oracle returned no verdict for an address from the
    /// previous record. Guessing risks double payment or fund loss.
    #[error("claim status unknown for {address}")]
    ClaimStatusUnknown { address: Address },

    #[error("input source error: {0}")]
    Source(#[from] anyhow::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
