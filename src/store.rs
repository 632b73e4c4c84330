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

//! Persisted Merkle record artifacts.
//!
//! Each period's output is a full snapshot written to
//! `<report_dir>/<period_start>/merkle.json` and never mutated afterwards;
//! the next period reads it back for carry-forward. The on-disk schema is
//! versioned and commits integer amounts as decimal strings, so the artifact
//! is a stable external interface rather than whatever serde_json happens to
//! do with big integers.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use alloy::primitives::{Address, B256, U256};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::epoch::PeriodBoundary;
use crate::sources::BountySource;
use crate::types::{Bounty, Protocol};
use crate::DistributionError;

/// Current on-disk schema version.
pub const RECORD_VERSION: u32 = 1;

/// U256 amounts serialize as decimal strings by schema contract.
pub mod u256_string {
    use alloy::primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<U256>().map_err(serde::de::Error::custom)
    }
}

/// A single address's claim within a Merkle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimEntry {
    pub index: u64,
    /// Cumulative claimable amount in token base units.
    #[serde(with = "u256_string")]
    pub amount: U256,
    pub proof: Vec<B256>,
}

/// The published artifact for one reward token and one period.
///
/// Created every period, superseded by the next period's record (which
/// carries forward unclaimed balances), never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleRecord {
    pub version: u32,
    pub symbol: String,
    pub token_address: Address,
    pub decimals: u8,
    pub merkle_root: B256,
    #[serde(with = "u256_string")]
    pub total_amount: U256,
    pub chain_id: u64,
    pub merkle_contract: Address,
    pub claims: BTreeMap<Address, ClaimEntry>,
}

impl MerkleRecord {
    /// Map of address to leaf index, as the claim-status oracle consumes it.
    pub fn claim_indices(&self) -> BTreeMap<Address, u64> {
        self.claims.iter().map(|(addr, claim)| (*addr, claim.index)).collect()
    }
}

fn period_dir(report_dir: &Path, period_start: u64) -> PathBuf {
    report_dir.join(period_start.to_string())
}

/// Path of the record file for a period.
pub fn record_path(report_dir: &Path, period_start: u64) -> PathBuf {
    period_dir(report_dir, period_start).join("merkle.json")
}

/// Load the records published for a period, if any.
pub fn load_records(
    report_dir: &Path,
    period_start: u64,
) -> Result<Option<Vec<MerkleRecord>>, DistributionError> {
    let path = record_path(report_dir, period_start);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(&path)?;
    let records: Vec<MerkleRecord> = serde_json::from_slice(&bytes)?;
    Ok(Some(records))
}

/// Publish all of a period's records atomically.
///
/// Everything is serialized up front, then written through a temp file and
/// renamed into place, so a failure partway leaves either the complete new
/// artifact or nothing.
pub fn publish_records(
    report_dir: &Path,
    period_start: u64,
    records: &[MerkleRecord],
) -> Result<PathBuf, DistributionError> {
    let bytes = serde_json::to_vec_pretty(records)?;

    let dir = period_dir(report_dir, period_start);
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(&bytes)?;
    tmp.flush()?;

    let path = record_path(report_dir, period_start);
    tmp.persist(&path).map_err(|e| DistributionError::Io(e.error))?;

    tracing::info!(path = %path.display(), records = records.len(), "published merkle records");
    Ok(path)
}

/// Path of the normalized bounty artifact an external aggregator drops for
/// API-derived protocols.
pub fn bounty_file_path(report_dir: &Path, period_start: u64, protocol: Protocol) -> PathBuf {
    period_dir(report_dir, period_start).join(format!("bounties-{protocol}.json"))
}

/// Bounty source reading a pre-normalized artifact from disk.
///
/// The Warden and Hidden Hand aggregators run upstream and leave their
/// claims as `Bounty` JSON under the period directory. A missing or
/// mismatched artifact is an input-unavailable failure, not an empty period.
pub struct FileBountySource {
    report_dir: PathBuf,
    protocol: Protocol,
}

impl FileBountySource {
    pub fn new(report_dir: PathBuf, protocol: Protocol) -> Self {
        Self { report_dir, protocol }
    }
}

#[async_trait]
impl BountySource for FileBountySource {
    async fn fetch_bounties(&self, period: PeriodBoundary) -> anyhow::Result<Vec<Bounty>> {
        let path = bounty_file_path(&self.report_dir, period.start, self.protocol);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("missing bounty artifact {}", path.display()))?;
        let bounties: Vec<Bounty> = serde_json::from_slice(&bytes)
            .with_context(|| format!("malformed bounty artifact {}", path.display()))?;

        for bounty in &bounties {
            if bounty.protocol() != self.protocol {
                anyhow::bail!(
                    "bounty artifact {} contains a {} record, expected {}",
                    path.display(),
                    bounty.protocol(),
                    self.protocol
                );
            }
        }

        tracing::info!(
            count = bounties.len(),
            protocol = %self.protocol,
            "loaded normalized bounties from disk"
        );
        Ok(bounties)
    }
}
