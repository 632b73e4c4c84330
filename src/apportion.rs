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

//! Vote apportionment engine.
//!
//! Splits each gauge's bounty over the voters that directed voting power at
//! it in the snapshot, then resolves the delegation address's portion into
//! its underlying delegators. All functions here are pure and synchronous;
//! determinism of the whole pipeline rests on that.

use std::collections::BTreeMap;

use alloy::primitives::Address;

use crate::types::{Gauge, GaugeShares, Proposal, UserRewards, Voter};
use crate::DistributionError;

/// Snapshot choice labels truncate gauge addresses, so matching uses the
/// first 17 characters of the 0x-prefixed lowercase hex form.
const GAUGE_PREFIX_LEN: usize = 17;

/// Locate the 0-based choice index for a gauge within the proposal's choices.
///
/// The gauge's canonical address is tried first, then its root-gauge alias.
/// A bounty whose gauge matches no choice is a data inconsistency: the funds
/// were reported for this period, so silently skipping them would strand
/// value.
pub fn gauge_choice_index(proposal: &Proposal, gauge: &Gauge) -> Result<usize, DistributionError> {
    let candidates =
        std::iter::once(gauge.address).chain(gauge.root_gauge);

    for candidate in candidates {
        let prefix = format!("{candidate:#x}");
        let prefix = &prefix[..GAUGE_PREFIX_LEN.min(prefix.len())];
        if let Some(idx) =
            proposal.choices.iter().position(|choice| choice.to_lowercase().contains(prefix))
        {
            return Ok(idx);
        }
    }

    Err(DistributionError::MissingChoice { gauge: gauge.address })
}

/// Apportion every gauge's bounty over the proposal's voters.
///
/// For a gauge with bounty `R` at choice index `idx`, a voter's effective
/// weight is `voting_power * choice[idx] / sum(choice weights)` — a voter who
/// split their ballot across several gauges only brings the proportional
/// slice of their power to each. `R` is then divided pro rata over effective
/// weights and accumulated into each voter's `total_rewards`.
///
/// A gauge with a bounty but no votes (market-timing edge case) has its full
/// amount parked on the delegation address, synthesizing a zero-power entry
/// if the delegation did not vote. The amount is not lost, merely unassigned
/// until delegation resolution.
pub fn apportion(
    voters: &mut Vec<Voter>,
    shares: &GaugeShares,
    delegation_address: Address,
) -> Result<(), DistributionError> {
    for (gauge, share) in shares {
        // Voter choice maps use 1-based Snapshot indices.
        let snapshot_idx = share.choice_index + 1;

        let mut effective: Vec<(usize, f64)> = Vec::new();
        let mut total_vp = 0.0_f64;

        for (i, voter) in voters.iter().enumerate() {
            let weight_sum: f64 = voter.choice.values().sum();
            if weight_sum <= 0.0 {
                continue;
            }
            if let Some(weight) = voter.choice.get(&snapshot_idx) {
                let vp = voter.voting_power * (weight / weight_sum);
                if vp > 0.0 {
                    effective.push((i, vp));
                    total_vp += vp;
                }
            }
        }

        if total_vp <= 0.0 {
            tracing::warn!(
                %gauge,
                amount = share.sd_token_amount,
                "gauge bounty has no voters, parking on delegation address"
            );
            let idx = ensure_delegation_entry(voters, delegation_address);
            let entry = voters[idx].total_rewards.get_or_insert(0.0);
            *entry += share.sd_token_amount;
            continue;
        }

        for (i, vp) in effective {
            let earned = share.sd_token_amount * (vp / total_vp);
            let entry = voters[i].total_rewards.get_or_insert(0.0);
            *entry += earned;
        }
    }

    Ok(())
}

fn ensure_delegation_entry(voters: &mut Vec<Voter>, delegation_address: Address) -> usize {
    if let Some(idx) = voters.iter().position(|v| v.address == delegation_address) {
        return idx;
    }
    tracing::warn!(
        delegation = %delegation_address,
        "delegation address not among voters, synthesizing zero-power entry"
    );
    voters.push(Voter::new(delegation_address, 0.0, BTreeMap::new()));
    voters.len() - 1
}

/// Result of splitting the delegation address's rewards over its delegators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelegationSplit {
    /// Reward per delegator, keyed by the delegator's own address.
    pub per_delegator: BTreeMap<Address, f64>,
    /// Amount that could not be assigned to any delegator (no delegators, or
    /// all net powers zero). Stays in the reported total so the integrity
    /// checker still accounts for it, but is distributed to nobody.
    pub undistributed: f64,
}

/// Resolve the delegation address's accumulated rewards into per-delegator
/// amounts.
///
/// A delegator's net voting power is their power at proposal-creation time
/// minus whatever they spent voting directly in the same proposal, clamped
/// at zero. Shares are pro rata over net power.
pub fn resolve_delegation(
    voters: &[Voter],
    delegation_address: Address,
    delegator_powers: &BTreeMap<Address, f64>,
) -> DelegationSplit {
    let total = voters
        .iter()
        .find(|v| v.address == delegation_address)
        .and_then(|v| v.total_rewards)
        .unwrap_or(0.0);

    if total <= 0.0 {
        return DelegationSplit::default();
    }

    let mut net_powers: BTreeMap<Address, f64> = BTreeMap::new();
    for (&delegator, &power) in delegator_powers {
        let used_directly = voters
            .iter()
            .find(|v| v.address == delegator)
            .map(|v| v.voting_power)
            .unwrap_or(0.0);
        let net = power - used_directly;
        if net < 0.0 {
            tracing::warn!(
                %delegator,
                power,
                used_directly,
                "delegator direct votes exceed delegated power, clamping net power to zero"
            );
        }
        net_powers.insert(delegator, net.max(0.0));
    }

    let total_net: f64 = net_powers.values().sum();
    if total_net <= 0.0 {
        tracing::warn!(
            delegation = %delegation_address,
            amount = total,
            "no delegator has net voting power, rewards stay unassigned this period"
        );
        return DelegationSplit { per_delegator: BTreeMap::new(), undistributed: total };
    }

    let per_delegator = net_powers
        .into_iter()
        .filter(|(_, net)| *net > 0.0)
        .map(|(delegator, net)| (delegator, total * (net / total_net)))
        .collect();

    DelegationSplit { per_delegator, undistributed: 0.0 }
}

/// Collapse apportioned voters plus the delegation split into the period's
/// fresh per-address reward map.
///
/// The delegation address's own entry is replaced by the split; every other
/// voter contributes under their own address.
pub fn collect_user_rewards(
    voters: &[Voter],
    delegation_address: Address,
    split: &DelegationSplit,
) -> UserRewards {
    let mut rewards = UserRewards::new();

    for voter in voters {
        if voter.address == delegation_address {
            continue;
        }
        if let Some(amount) = voter.total_rewards {
            if amount > 0.0 {
                *rewards.entry(voter.address).or_insert(0.0) += amount;
            }
        }
    }

    for (&delegator, &amount) in &split.per_delegator {
        if amount > 0.0 {
            *rewards.entry(delegator).or_insert(0.0) += amount;
        }
    }

    rewards
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GaugeShare;
    use alloy::primitives::address;

    const DELEGATION: Address = address!("52ea58f4FC3CEd48fa18E909226c1f8A0EF887DC");

    fn voter(addr: Address, vp: f64, choices: &[(usize, f64)]) -> Voter {
        Voter::new(addr, vp, choices.iter().copied().collect())
    }

    fn gauge(addr: Address) -> Gauge {
        Gauge { address: addr, name: "test gauge".to_string(), root_gauge: None }
    }

    fn proposal_with_choices(choices: Vec<String>) -> Proposal {
        Proposal {
            id: "0xprop".to_string(),
            space: "sdcrv.eth".to_string(),
            created: 1_700_000_000,
            snapshot_block: 18_000_000,
            scores: vec![0.0; choices.len()],
            scores_total: 0.0,
            choices,
        }
    }

    #[test]
    fn test_gauge_choice_index_prefix_match() {
        let g = gauge(address!("26F7786de3E6D9Bd37Fcf47BE6F2bC455a21b74A"));
        // Snapshot labels truncate the address
        let proposal = proposal_with_choices(vec![
            "Some pool (0xd03BE91b1932715709e18021734fcB91BB4…)".to_string(),
            "VeFunder-vyper (0x26F7786de3E6D9Bd37F…)".to_string(),
        ]);
        assert_eq!(gauge_choice_index(&proposal, &g).unwrap(), 1);
    }

    #[test]
    fn test_gauge_choice_index_root_gauge_alias() {
        let mut g = gauge(address!("1111111111111111111111111111111111111111"));
        g.root_gauge = Some(address!("26F7786de3E6D9Bd37Fcf47BE6F2bC455a21b74A"));
        let proposal =
            proposal_with_choices(vec!["Pool (0x26F7786de3E6D9Bd37F…)".to_string()]);
        assert_eq!(gauge_choice_index(&proposal, &g).unwrap(), 0);
    }

    #[test]
    fn test_gauge_choice_index_missing_is_error() {
        let g = gauge(address!("26F7786de3E6D9Bd37Fcf47BE6F2bC455a21b74A"));
        let proposal = proposal_with_choices(vec!["Other (0xd03BE91b1932715709e…)".to_string()]);
        assert!(matches!(
            gauge_choice_index(&proposal, &g),
            Err(DistributionError::MissingChoice { .. })
        ));
    }

    #[test]
    fn test_apportion_splits_pro_rata() {
        let g = address!("26F7786de3E6D9Bd37Fcf47BE6F2bC455a21b74A");
        let mut voters = vec![
            voter(address!("00000000000000000000000000000000000000aa"), 60.0, &[(1, 1.0)]),
            voter(address!("00000000000000000000000000000000000000bb"), 40.0, &[(1, 1.0)]),
        ];
        let shares: GaugeShares =
            [(g, GaugeShare { choice_index: 0, sd_token_amount: 100.0 })].into_iter().collect();

        apportion(&mut voters, &shares, DELEGATION).unwrap();

        assert!((voters[0].total_rewards.unwrap() - 60.0).abs() < 1e-9);
        assert!((voters[1].total_rewards.unwrap() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_apportion_split_ballot_uses_choice_ratio() {
        // Voter put 25% of their ballot weight on gauge 1, 75% on gauge 2.
        let g1 = address!("1000000000000000000000000000000000000001");
        let g2 = address!("1000000000000000000000000000000000000002");
        let mut voters = vec![voter(
            address!("00000000000000000000000000000000000000aa"),
            100.0,
            &[(1, 1.0), (2, 3.0)],
        )];
        let shares: GaugeShares = [
            (g1, GaugeShare { choice_index: 0, sd_token_amount: 10.0 }),
            (g2, GaugeShare { choice_index: 1, sd_token_amount: 30.0 }),
        ]
        .into_iter()
        .collect();

        apportion(&mut voters, &shares, DELEGATION).unwrap();

        // Sole voter takes the full bounty of both gauges regardless of split
        assert!((voters[0].total_rewards.unwrap() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_apportion_conservation() {
        let g1 = address!("1000000000000000000000000000000000000001");
        let g2 = address!("1000000000000000000000000000000000000002");
        let mut voters = vec![
            voter(address!("00000000000000000000000000000000000000aa"), 17.5, &[(1, 2.0), (2, 5.0)]),
            voter(address!("00000000000000000000000000000000000000bb"), 42.0, &[(1, 1.0)]),
            voter(address!("00000000000000000000000000000000000000cc"), 9.25, &[(2, 1.0)]),
        ];
        let shares: GaugeShares = [
            (g1, GaugeShare { choice_index: 0, sd_token_amount: 1234.5 }),
            (g2, GaugeShare { choice_index: 1, sd_token_amount: 77.7 }),
        ]
        .into_iter()
        .collect();

        apportion(&mut voters, &shares, DELEGATION).unwrap();

        let distributed: f64 = voters.iter().filter_map(|v| v.total_rewards).sum();
        let reported: f64 = shares.values().map(|s| s.sd_token_amount).sum();
        assert!((distributed - reported).abs() < 1e-6);
    }

    #[test]
    fn test_zero_voter_gauge_parks_on_delegation() {
        let g = address!("1000000000000000000000000000000000000001");
        // Nobody voted for choice 1
        let mut voters =
            vec![voter(address!("00000000000000000000000000000000000000aa"), 50.0, &[(2, 1.0)])];
        let shares: GaugeShares =
            [(g, GaugeShare { choice_index: 0, sd_token_amount: 42.0 })].into_iter().collect();

        apportion(&mut voters, &shares, DELEGATION).unwrap();

        // Delegation entry was synthesized and holds the full amount
        let delegation = voters.iter().find(|v| v.address == DELEGATION).unwrap();
        assert_eq!(delegation.voting_power, 0.0);
        assert!((delegation.total_rewards.unwrap() - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_resolve_delegation_pro_rata() {
        let d1 = address!("00000000000000000000000000000000000000d1");
        let d2 = address!("00000000000000000000000000000000000000d2");
        let d3 = address!("00000000000000000000000000000000000000d3");
        let mut delegation_voter = voter(DELEGATION, 60.0, &[(1, 1.0)]);
        delegation_voter.total_rewards = Some(120.0);
        let voters = vec![delegation_voter];

        let powers: BTreeMap<Address, f64> =
            [(d1, 10.0), (d2, 20.0), (d3, 30.0)].into_iter().collect();

        let split = resolve_delegation(&voters, DELEGATION, &powers);
        assert!((split.per_delegator[&d1] - 20.0).abs() < 1e-9);
        assert!((split.per_delegator[&d2] - 40.0).abs() < 1e-9);
        assert!((split.per_delegator[&d3] - 60.0).abs() < 1e-9);
        assert_eq!(split.undistributed, 0.0);
    }

    #[test]
    fn test_resolve_delegation_nets_out_direct_votes() {
        let d1 = address!("00000000000000000000000000000000000000d1");
        let d2 = address!("00000000000000000000000000000000000000d2");
        let mut delegation_voter = voter(DELEGATION, 0.0, &[]);
        delegation_voter.total_rewards = Some(100.0);
        let voters = vec![
            delegation_voter,
            // d1 voted directly with 30 of their 40 power
            voter(d1, 30.0, &[(1, 1.0)]),
        ];
        let powers: BTreeMap<Address, f64> = [(d1, 40.0), (d2, 90.0)].into_iter().collect();

        let split = resolve_delegation(&voters, DELEGATION, &powers);
        // Net powers: d1 = 10, d2 = 90
        assert!((split.per_delegator[&d1] - 10.0).abs() < 1e-9);
        assert!((split.per_delegator[&d2] - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_resolve_delegation_clamps_negative_net_power() {
        let d1 = address!("00000000000000000000000000000000000000d1");
        let d2 = address!("00000000000000000000000000000000000000d2");
        let mut delegation_voter = voter(DELEGATION, 0.0, &[]);
        delegation_voter.total_rewards = Some(50.0);
        let voters = vec![
            delegation_voter,
            // d1 somehow voted with more power than they delegated
            voter(d1, 100.0, &[(1, 1.0)]),
        ];
        let powers: BTreeMap<Address, f64> = [(d1, 40.0), (d2, 25.0)].into_iter().collect();

        let split = resolve_delegation(&voters, DELEGATION, &powers);
        assert!(!split.per_delegator.contains_key(&d1));
        assert!((split.per_delegator[&d2] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_resolve_delegation_no_net_power_leaves_unassigned() {
        let mut delegation_voter = voter(DELEGATION, 0.0, &[]);
        delegation_voter.total_rewards = Some(33.0);
        let voters = vec![delegation_voter];

        let split = resolve_delegation(&voters, DELEGATION, &BTreeMap::new());
        assert!(split.per_delegator.is_empty());
        assert!((split.undistributed - 33.0).abs() < 1e-9);
    }

    #[test]
    fn test_collect_user_rewards_replaces_delegation_entry() {
        let a = address!("00000000000000000000000000000000000000aa");
        let d1 = address!("00000000000000000000000000000000000000d1");
        let d2 = address!("00000000000000000000000000000000000000d2");

        let mut va = voter(a, 60.0, &[(1, 1.0)]);
        va.total_rewards = Some(60.0);
        let mut vd = voter(DELEGATION, 40.0, &[(1, 1.0)]);
        vd.total_rewards = Some(40.0);
        let voters = vec![va, vd];

        let split = DelegationSplit {
            per_delegator: [(d1, 30.0), (d2, 10.0)].into_iter().collect(),
            undistributed: 0.0,
        };

        let rewards = collect_user_rewards(&voters, DELEGATION, &split);
        assert_eq!(rewards.len(), 3);
        assert!((rewards[&a] - 60.0).abs() < 1e-9);
        assert!((rewards[&d1] - 30.0).abs() < 1e-9);
        assert!((rewards[&d2] - 10.0).abs() < 1e-9);
        assert!(!rewards.contains_key(&DELEGATION));
    }
}
