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

//! Deterministic Merkle tree construction over a reward map.
//!
//! Leaf = `keccak256(index ‖ address ‖ amount)` with uint256 widths for index
//! and amount, matching the on-chain verifier's `abi.encodePacked` layout.
//! Internal nodes hash their children in sorted order, so the root is
//! independent of insertion order and unbalanced trees cannot be forged via
//! second preimages; an unpaired node is promoted to the next level as-is.

use std::collections::BTreeMap;

use alloy::primitives::{
    keccak256,
    utils::{format_units, parse_units},
    Address, B256, U256,
};
use anyhow::Context;

use crate::types::UserRewards;
use crate::DistributionError;

/// One address's leaf data and sibling path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleClaim {
    pub index: u64,
    /// Cumulative amount in token base units.
    pub amount: U256,
    pub proof: Vec<B256>,
}

/// Output of the builder: root plus per-address claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    pub root: B256,
    pub total: U256,
    pub claims: BTreeMap<Address, MerkleClaim>,
}

/// Convert token units to integer base units through a decimal string.
///
/// Going through `parse_units` keeps the committed integer exact for the
/// printed decimal representation; multiplying the float by `10^decimals`
/// directly would smear rounding error into the leaves.
pub fn to_base_units(amount: f64, decimals: u8) -> Result<U256, DistributionError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(DistributionError::Source(anyhow::anyhow!(
            "cannot commit non-finite or negative amount {amount}"
        )));
    }
    let formatted = format!("{amount:.prec$}", prec = decimals as usize);
    let parsed = parse_units(&formatted, decimals)
        .with_context(|| format!("parsing amount {formatted}"))?;
    Ok(parsed.get_absolute())
}

/// Convert integer base units back to token units.
pub fn to_units(amount: U256, decimals: u8) -> Result<f64, DistributionError> {
    let formatted = format_units(amount, decimals)
        .with_context(|| format!("formatting amount {amount}"))?;
    formatted
        .parse::<f64>()
        .map_err(|e| DistributionError::Source(anyhow::anyhow!("parsing {formatted}: {e}")))
}

/// Leaf hash committed in the exact `(index, address, amount)` field order
/// and widths the on-chain verifier recomputes.
pub fn leaf_hash(index: u64, address: Address, amount: U256) -> B256 {
    let mut buf = [0u8; 84];
    buf[..32].copy_from_slice(&U256::from(index).to_be_bytes::<32>());
    buf[32..52].copy_from_slice(address.as_slice());
    buf[52..].copy_from_slice(&amount.to_be_bytes::<32>());
    keccak256(buf)
}

fn hash_pair(a: B256, b: B256) -> B256 {
    let mut buf = [0u8; 64];
    if a <= b {
        buf[..32].copy_from_slice(a.as_slice());
        buf[32..].copy_from_slice(b.as_slice());
    } else {
        buf[..32].copy_from_slice(b.as_slice());
        buf[32..].copy_from_slice(a.as_slice());
    }
    keccak256(buf)
}

/// Build the tree for a reward map.
///
/// Indices follow the map's iteration order; since `UserRewards` is a
/// `BTreeMap`, identical maps always produce identical indices, proofs and
/// root. Amounts that floor to zero base units are omitted — a zero leaf is
/// unclaimable and only inflates proofs.
pub fn build(rewards: &UserRewards, decimals: u8) -> Result<MerkleTree, DistributionError> {
    let mut entries: Vec<(Address, U256)> = Vec::with_capacity(rewards.len());
    for (&address, &amount) in rewards {
        let base = to_base_units(amount, decimals)?;
        if base > U256::ZERO {
            entries.push((address, base));
        }
    }

    if entries.is_empty() {
        return Ok(MerkleTree { root: B256::ZERO, total: U256::ZERO, claims: BTreeMap::new() });
    }

    let leaves: Vec<B256> = entries
        .iter()
        .enumerate()
        .map(|(index, (address, amount))| leaf_hash(index as u64, *address, *amount))
        .collect();

    // Build all levels bottom-up; odd nodes are promoted unchanged.
    let mut levels: Vec<Vec<B256>> = vec![leaves];
    while levels.last().unwrap().len() > 1 {
        let prev = levels.last().unwrap();
        let next = prev
            .chunks(2)
            .map(|pair| if pair.len() == 2 { hash_pair(pair[0], pair[1]) } else { pair[0] })
            .collect();
        levels.push(next);
    }
    let root = levels.last().unwrap()[0];

    let mut claims = BTreeMap::new();
    let mut total = U256::ZERO;
    for (index, (address, amount)) in entries.iter().enumerate() {
        let mut proof = Vec::new();
        let mut pos = index;
        for level in &levels[..levels.len() - 1] {
            let sibling = pos ^ 1;
            if sibling < level.len() {
                proof.push(level[sibling]);
            }
            pos /= 2;
        }
        total += *amount;
        claims.insert(
            *address,
            MerkleClaim { index: index as u64, amount: *amount, proof },
        );
    }

    Ok(MerkleTree { root, total, claims })
}

/// Recompute the leaf and walk the proof against the root.
pub fn verify_proof(
    root: B256,
    index: u64,
    address: Address,
    amount: U256,
    proof: &[B256],
) -> bool {
    let mut node = leaf_hash(index, address, amount);
    for sibling in proof {
        node = hash_pair(node, *sibling);
    }
    node == root
}
