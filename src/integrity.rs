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

//! Distribution integrity checking, the last gate before publication.
//!
//! A published tree is a promise: every leaf must eventually be payable from
//! the distributor contract's balance. For each token this module requires
//! `on-chain balance + amount reported this period >= new cumulative total`,
//! within a small rounding tolerance. Violations abort the run — this is the
//! one failure the pipeline treats as fatal rather than logged-and-continued.

use alloy::primitives::{Address, B256};

use crate::merkle::to_units;
use crate::sources::{BalanceReader, ClaimStatusOracle};
use crate::store::MerkleRecord;
use crate::DistributionError;

/// Tolerance in token units for rounding drift between the float-side
/// accounting and the integer amounts committed to leaves.
pub const BALANCE_TOLERANCE: f64 = 0.01;

/// Per-token figures the checker validates.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBacking {
    pub symbol: String,
    pub token: Address,
    /// Amount newly reported by the bounty sources this period, in token
    /// units (includes any reported-but-unassigned delegation remainder).
    pub reported_units: f64,
    /// Cumulative total committed to the new Merkle tree, in token units.
    pub merkle_total_units: f64,
}

/// Pure backing check for a single token.
///
/// `frozen` is false when the distributor has never frozen a root for this
/// token (zero-root sentinel); the check is skipped in that case because
/// funding happens together with the first freeze.
pub fn verify_backing(
    backing: &TokenBacking,
    on_chain_balance_units: f64,
    frozen: bool,
) -> Result<(), DistributionError> {
    if !frozen {
        tracing::info!(
            symbol = %backing.symbol,
            "token has no frozen root yet, skipping backing check"
        );
        return Ok(());
    }

    let provable = on_chain_balance_units + backing.reported_units;
    if provable < backing.merkle_total_units - BALANCE_TOLERANCE {
        return Err(DistributionError::InsufficientFunds {
            symbol: backing.symbol.clone(),
            shortfall: backing.merkle_total_units - provable,
        });
    }

    tracing::info!(
        symbol = %backing.symbol,
        balance = on_chain_balance_units,
        reported = backing.reported_units,
        merkle_total = backing.merkle_total_units,
        "backing check passed"
    );
    Ok(())
}

/// Validate every reported token against its new record and on-chain state.
///
/// Each nonzero reported token must have a Merkle record; a missing record
/// means reported funds would silently vanish from the distribution.
pub async fn check_distributions(
    balances: &dyn BalanceReader,
    oracle: &dyn ClaimStatusOracle,
    merkle_contract: Address,
    records: &[MerkleRecord],
    backings: &[TokenBacking],
) -> Result<(), DistributionError> {
    for backing in backings {
        if backing.reported_units <= 0.0 {
            continue;
        }

        let record = records
            .iter()
            .find(|r| r.token_address == backing.token)
            .ok_or_else(|| DistributionError::MissingMerkle { symbol: backing.symbol.clone() })?;

        let balance = balances.balance_of(backing.token, merkle_contract).await?;
        let balance_units = to_units(balance, record.decimals)?;
        let frozen = oracle.merkle_root(backing.token).await? != B256::ZERO;

        verify_backing(backing, balance_units, frozen)?;
    }
    Ok(())
}
