//! Fixtures for contract tests on development chains.
//!
//! A [`Fixture`] refuses to run anywhere but on a development network, and every
//! [`Fixture::fixture`] call reverts the chain to the state it had when the fixture
//! connected, then deploys only the requested steps.

use std::fmt;

use alloy_core::primitives::U256;
use anyhow::{Context, Result};

use crate::{
    config::HarnessConfig,
    context::DeployContext,
    contract::ContractHandle,
    deployments::DeploymentRecord,
    kyc::Kyc,
    signer::Signer,
    steps::{DeployStep, default_steps, run_steps, select},
};

/// Tests were started against a network that is not a development chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotDevelopmentChain {
    pub network: String,
    pub development_chains: Vec<String>,
}

impl fmt::Display for NotDevelopmentChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "You need to be on a development chain to run tests: '{}' is not one of [{}]",
            self.network,
            self.development_chains.join(", ")
        )
    }
}

impl std::error::Error for NotDevelopmentChain {}

/// A development chain with the deployment steps of the project.
#[derive(Debug)]
pub struct Fixture {
    ctx: DeployContext,
    steps: Vec<DeployStep>,
    /// Snapshot of the chain before any fixture ran.
    snapshot: U256,
}

impl Fixture {
    /// Connect to the configured network, which must be a development network.
    ///
    /// Fails with [`NotDevelopmentChain`] before contacting any node otherwise.
    pub async fn new(config: &HarnessConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let registry = config.registry();
        let profile = registry.get(&config.network)?;
        if !profile.is_development {
            return Err(NotDevelopmentChain {
                network: profile.name.clone(),
                development_chains: registry
                    .development_chains()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            }
            .into());
        }

        let network = config.resolve(env)?;
        let ctx = DeployContext::connect_resolved(config, network).await?;
        let snapshot = ctx
            .rpc()
            .snapshot()
            .await
            .context("Failed to snapshot chain state")?;
        tracing::info!(network = %ctx.profile().name, %snapshot, "Test fixture ready");

        Ok(Self {
            steps: default_steps(ctx.naming()),
            ctx,
            snapshot,
        })
    }

    /// Replace the deployment steps.
    pub fn with_steps(mut self, steps: Vec<DeployStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn ctx(&self) -> &DeployContext {
        &self.ctx
    }

    /// Revert the chain to its initial state and run the steps matching `tags`.
    pub async fn fixture(&mut self, tags: &[&str]) -> Result<Vec<DeploymentRecord>> {
        let rpc = self.ctx.rpc();
        rpc.revert(self.snapshot)
            .await
            .context("Failed to reset chain state")?;
        // Reverting consumes the snapshot.
        self.snapshot = rpc
            .snapshot()
            .await
            .context("Failed to snapshot chain state")?;
        self.ctx.store_mut().clear()?;

        let tags: Vec<String> = tags.iter().map(|tag| tag.to_string()).collect();
        let selected = select(&self.steps, &tags);
        tracing::debug!(?tags, steps = selected.len(), "Running fixture");

        run_steps(&mut self.ctx, &selected).await
    }

    /// The deployed instance of `name`.
    pub fn contract(&self, name: &str) -> Result<ContractHandle> {
        self.ctx.contract(name)
    }

    /// The deployed KYC contract.
    pub fn kyc(&self) -> Result<Kyc<'_>> {
        Kyc::load(&self.ctx)
    }

    /// Signers of the chain's accounts. Index 0 is the deployer.
    pub async fn signers(&self) -> Result<Vec<Signer>> {
        let deployer = self.ctx.signer();
        Ok(self
            .ctx
            .accounts()
            .await?
            .into_iter()
            .map(|address| {
                if address == deployer.address() {
                    deployer.clone()
                } else {
                    Signer::Unlocked(address)
                }
            })
            .collect())
    }
}
