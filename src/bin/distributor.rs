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

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy::{primitives::Address, providers::ProviderBuilder};
use anyhow::{bail, Context, Result};
use bounty_distributor::{
    chain::{ChainBalanceReader, ChainBountySource, ChainClaimStatusOracle},
    pipeline::{Deployment, DistributionService},
    snapshot::SnapshotClient,
    sources::RequestBudget,
    store::FileBountySource,
    types::Protocol,
    PeriodBoundary,
};
use clap::Parser;
use url::Url;

/// Mainnet block from before the Votemarket platform deployment.
const VOTEMARKET_FROM_BLOCK: u64 = 14_600_000;

/// Arguments of the weekly bounty distributor.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct MainArgs {
    /// Reward-market protocol to distribute for.
    #[clap(long, value_enum)]
    protocol: Protocol,
    /// Snapshot proposal id of the period's gauge-weight vote.
    #[clap(long)]
    proposal_id: String,
    /// Distribute for the period starting this many full weeks back.
    #[clap(long, default_value = "0")]
    periods_back: u64,
    /// URL of the Ethereum RPC endpoint.
    #[clap(short, long, env)]
    rpc_url: Url,
    /// Snapshot hub GraphQL endpoint.
    #[clap(long, env, default_value = "https://hub.snapshot.org/graphql")]
    snapshot_hub: Url,
    /// Snapshot delegation subgraph endpoint.
    #[clap(long, env)]
    delegation_subgraph: Url,
    /// Snapshot space of the gauge vote.
    #[clap(long, env)]
    space: String,
    /// The well-known delegation voter address.
    #[clap(long, env)]
    delegation_address: Address,
    /// Distributor contract holding frozen merkle roots.
    #[clap(long, env)]
    merkle_contract: Address,
    /// Votemarket platform contract (required for --protocol votemarket).
    #[clap(long, env)]
    platform: Option<Address>,
    /// Starting block number for platform log queries.
    #[clap(long, env, default_value_t = VOTEMARKET_FROM_BLOCK)]
    from_block: u64,
    /// Liquid-wrapper token the distribution is denominated in.
    #[clap(long, env)]
    sd_token: Address,
    #[clap(long, env)]
    sd_token_symbol: String,
    #[clap(long, env, default_value = "18")]
    sd_token_decimals: u8,
    #[clap(long, env, default_value = "1")]
    chain_id: u64,
    /// Directory holding the per-period artifacts.
    #[clap(long, env, default_value = "bounties-reports")]
    report_dir: PathBuf,
    /// Outbound requests allowed per second against external services.
    #[clap(long, default_value = "8")]
    requests_per_second: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded environment variables from {:?}", path),
        Err(e) if e.not_found() => tracing::debug!("No .env file found"),
        Err(e) => bail!("failed to load .env file: {}", e),
    }

    let args = MainArgs::parse();
    run(&args).await
}

async fn run(args: &MainArgs) -> Result<()> {
    let budget =
        Arc::new(RequestBudget::new(args.requests_per_second, Duration::from_secs(1)));
    let provider = ProviderBuilder::new().connect_http(args.rpc_url.clone());

    let snapshot = Arc::new(SnapshotClient::new(
        args.snapshot_hub.clone(),
        args.delegation_subgraph.clone(),
        budget.clone(),
    ));

    let bounties: Arc<dyn bounty_distributor::sources::BountySource> = match args.protocol {
        Protocol::Votemarket => {
            let platform = args
                .platform
                .context("--platform is required for the votemarket protocol")?;
            Arc::new(ChainBountySource::new(
                provider.clone(),
                platform,
                args.from_block,
                budget.clone(),
            ))
        }
        // API-derived protocols are normalized upstream and read from disk.
        Protocol::Warden | Protocol::Hiddenhand => {
            Arc::new(FileBountySource::new(args.report_dir.clone(), args.protocol))
        }
    };

    let service = DistributionService {
        deployment: Deployment {
            chain_id: args.chain_id,
            space: args.space.clone(),
            delegation_address: args.delegation_address,
            merkle_contract: args.merkle_contract,
            sd_token: args.sd_token,
            sd_token_symbol: args.sd_token_symbol.clone(),
            sd_token_decimals: args.sd_token_decimals,
            gauges: Vec::new(),
        },
        report_dir: args.report_dir.clone(),
        bounties,
        proposals: snapshot.clone(),
        delegators: snapshot,
        claims: Arc::new(ChainClaimStatusOracle::new(
            provider.clone(),
            args.merkle_contract,
            budget.clone(),
        )),
        balances: Arc::new(ChainBalanceReader::new(provider, budget)),
    };

    let now = SystemTime::now().duration_since(UNIX_EPOCH).expect("clock before epoch").as_secs();
    let period = PeriodBoundary::periods_back(now, args.periods_back);

    let summary = service
        .run(&args.proposal_id, period)
        .await
        .with_context(|| format!("distribution failed for {} / {}", args.protocol, args.space))?;

    println!("period start:      {}", summary.period.start);
    println!("merkle root:       {}", summary.merkle_root);
    println!("recipients:        {}", summary.recipients);
    println!("reported total:    {}", summary.reported_total);
    println!("distributed total: {}", summary.distributed_total);
    if summary.undistributed > 0.0 {
        println!("unassigned:        {}", summary.undistributed);
    }
    println!("record:            {}", summary.record_path.display());

    Ok(())
}
