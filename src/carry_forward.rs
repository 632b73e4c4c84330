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

//! Carry-forward accumulation of unclaimed prior-period balances.
//!
//! The published Merkle record is cumulative: an address that never claims
//! keeps growing its single claimable amount. Merging the previous record
//! into this period's fresh rewards is therefore claim-aware — a claimed
//! balance is considered paid out and dropped, an unclaimed one is added on
//! top of whatever the address earned this period.

use std::collections::BTreeMap;

use alloy::primitives::Address;

use crate::merkle::to_units;
use crate::store::MerkleRecord;
use crate::types::UserRewards;
use crate::DistributionError;

/// Amounts below this are floating-point dust: floored to exactly zero so
/// they never become non-zero unclaimable leaves.
pub const DUST_THRESHOLD: f64 = 1e-8;

/// Merge the previous period's record into this period's fresh rewards.
///
/// `claimed` must hold a verdict for every address in the previous record;
/// a missing verdict aborts the run rather than guessing, since guessing
/// either double-pays (claimed treated as unclaimed) or strands funds (the
/// reverse).
pub fn accumulate(
    mut rewards: UserRewards,
    previous: Option<&MerkleRecord>,
    claimed: &BTreeMap<Address, bool>,
) -> Result<UserRewards, DistributionError> {
    if let Some(previous) = previous {
        for (&address, claim) in &previous.claims {
            let was_claimed = *claimed
                .get(&address)
                .ok_or(DistributionError::ClaimStatusUnknown { address })?;
            if was_claimed {
                tracing::debug!(%address, "previous balance claimed, resetting to newly earned");
                continue;
            }
            let prior = to_units(claim.amount, previous.decimals)?;
            *rewards.entry(address).or_insert(0.0) += prior;
        }
    }

    for amount in rewards.values_mut() {
        if *amount < DUST_THRESHOLD {
            *amount = 0.0;
        }
    }

    Ok(rewards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ClaimEntry, RECORD_VERSION};
    use alloy::primitives::{address, B256, U256};

    const A: Address = address!("00000000000000000000000000000000000000aa");
    const B: Address = address!("00000000000000000000000000000000000000bb");

    fn previous_record(entries: &[(Address, u128)]) -> MerkleRecord {
        MerkleRecord {
            version: RECORD_VERSION,
            symbol: "sdCRV".to_string(),
            token_address: address!("D1b5651E55D4CeeD36251c61c50C889B36F6abB5"),
            decimals: 18,
            merkle_root: B256::repeat_byte(0x01),
            total_amount: entries.iter().map(|(_, a)| U256::from(*a)).sum(),
            chain_id: 1,
            merkle_contract: address!("03E34b085C52985F6a5D27243F20C84bDdc01Db4"),
            claims: entries
                .iter()
                .enumerate()
                .map(|(i, (addr, amount))| {
                    (*addr, ClaimEntry { index: i as u64, amount: U256::from(*amount), proof: vec![] })
                })
                .collect(),
        }
    }

    const WEI: u128 = 1_000_000_000_000_000_000;

    #[test]
    fn test_unclaimed_balance_is_added() {
        let prev = previous_record(&[(A, 50 * WEI)]);
        let claimed = [(A, false)].into_iter().collect();
        let rewards: UserRewards = [(A, 5.0)].into_iter().collect();

        let out = accumulate(rewards, Some(&prev), &claimed).unwrap();
        assert!((out[&A] - 55.0).abs() < 1e-9);
    }

    #[test]
    fn test_claimed_balance_resets_to_newly_earned() {
        let prev = previous_record(&[(A, 50 * WEI)]);
        let claimed = [(A, true)].into_iter().collect();
        let rewards: UserRewards = [(A, 5.0)].into_iter().collect();

        let out = accumulate(rewards, Some(&prev), &claimed).unwrap();
        assert!((out[&A] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_absent_address_entry_is_created() {
        let prev = previous_record(&[(B, 7 * WEI)]);
        let claimed = [(B, false)].into_iter().collect();

        let out = accumulate(UserRewards::new(), Some(&prev), &claimed).unwrap();
        assert!((out[&B] - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_claim_status_aborts() {
        let prev = previous_record(&[(A, WEI)]);
        let result = accumulate(UserRewards::new(), Some(&prev), &BTreeMap::new());
        assert!(matches!(result, Err(DistributionError::ClaimStatusUnknown { address }) if address == A));
    }

    #[test]
    fn test_idempotent_over_same_inputs() {
        let prev = previous_record(&[(A, 50 * WEI), (B, 3 * WEI)]);
        let claimed: BTreeMap<Address, bool> =
            [(A, false), (B, false)].into_iter().collect();

        let once = accumulate(UserRewards::new(), Some(&prev), &claimed).unwrap();
        let twice = accumulate(UserRewards::new(), Some(&prev), &claimed).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_dust_floors_to_exact_zero() {
        let rewards: UserRewards = [(A, 4e-9), (B, 2.0)].into_iter().collect();
        let out = accumulate(rewards, None, &BTreeMap::new()).unwrap();
        assert_eq!(out[&A], 0.0);
        assert!((out[&B] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_previous_record_passes_through() {
        let rewards: UserRewards = [(A, 1.25)].into_iter().collect();
        let out = accumulate(rewards.clone(), None, &BTreeMap::new()).unwrap();
        assert_eq!(out, rewards);
    }
}
