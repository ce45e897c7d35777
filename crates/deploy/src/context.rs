//! Everything a deployment operation needs, passed explicitly.

use std::time::Duration;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};

use crate::{
    artifacts::ArtifactStore,
    chain::LocalChain,
    config::{ContractNaming, HarnessConfig, ResolvedNetwork},
    contract::ContractHandle,
    deployments::DeploymentStore,
    frontend::FrontendSync,
    network::NetworkProfile,
    rpc::RpcClient,
    signer::{LocalSigner, Signer},
    verify::Verifier,
};

/// Poll interval on development chains, which mine instantly.
const DEV_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Connection to a network together with the deployer and the project's stores.
#[derive(Debug)]
pub struct DeployContext {
    network: ResolvedNetwork,
    rpc: RpcClient,
    signer: Signer,
    store: DeploymentStore,
    artifacts: ArtifactStore,
    verifier: Option<Verifier>,
    frontend: Option<FrontendSync>,
    naming: ContractNaming,
    confirmation_timeout: Duration,
    // Dropped last so the chain outlives every use of `rpc`.
    chain: Option<LocalChain>,
}

impl DeployContext {
    /// Resolve the configured network and connect to it.
    pub async fn connect(
        config: &HarnessConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let network = config.resolve(env)?;
        Self::connect_resolved(config, network).await
    }

    /// Connect to an already resolved network.
    ///
    /// Ephemeral networks get a fresh local chain. The node must report the chain ID
    /// of the profile.
    pub async fn connect_resolved(config: &HarnessConfig, network: ResolvedNetwork) -> Result<Self> {
        let profile = &network.profile;

        let (url, chain) = match (&network.rpc_url, profile.is_ephemeral()) {
            (Some(url), _) => (url.clone(), None),
            (None, true) => {
                let chain = LocalChain::start(&config.local_chain, profile.chain_id).await?;
                (chain.url().clone(), Some(chain))
            }
            (None, false) => anyhow::bail!("No RPC URL for network '{}'", profile.name),
        };

        let mut rpc = RpcClient::new(url.clone())?;
        if profile.is_development {
            rpc = rpc.with_poll_interval(DEV_POLL_INTERVAL);
        }

        let chain_id = rpc
            .chain_id()
            .await
            .with_context(|| format!("Failed to reach network '{}' at {}", profile.name, url))?;
        if chain_id != profile.chain_id {
            anyhow::bail!(
                "Network '{}' expects chain ID {}, but the node at {} reports {}",
                profile.name,
                profile.chain_id,
                url,
                chain_id
            );
        }

        let signer = match &config.private_key {
            Some(key) => Signer::Local(
                LocalSigner::from_private_key(key).context("Invalid deployer private key")?,
            ),
            None if profile.is_development => {
                let deployer = rpc
                    .accounts()
                    .await?
                    .first()
                    .copied()
                    .with_context(|| {
                        format!("Node of network '{}' has no unlocked accounts", profile.name)
                    })?;
                Signer::Unlocked(deployer)
            }
            None => anyhow::bail!("Network '{}' needs a deployer key", profile.name),
        };

        let store = if chain.is_some() {
            DeploymentStore::in_memory(&profile.name, chain_id)
        } else {
            DeploymentStore::open(&config.deployments_dir, &profile.name, chain_id)?
        };

        let verifier = match (&profile.explorer, &network.explorer_api_key) {
            (Some(explorer), Some(key)) if network.should_verify() => {
                Some(Verifier::new(explorer, key)?)
            }
            _ => None,
        };

        let frontend = config
            .update_frontend
            .then(|| FrontendSync::new(config.frontend.clone()));

        tracing::info!(
            network = %profile.name,
            chain_id,
            %url,
            deployer = %signer.address(),
            verify = verifier.is_some(),
            update_frontend = frontend.is_some(),
            "Connected"
        );

        Ok(Self {
            network,
            rpc,
            signer,
            store,
            artifacts: ArtifactStore::new(&config.artifacts_dir),
            verifier,
            frontend,
            naming: config.contract.clone(),
            confirmation_timeout: config.confirmation_timeout(),
            chain,
        })
    }

    pub fn network(&self) -> &ResolvedNetwork {
        &self.network
    }

    pub fn profile(&self) -> &NetworkProfile {
        &self.network.profile
    }

    pub fn chain_id(&self) -> u64 {
        self.network.profile.chain_id
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    /// The deployer.
    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    pub fn store(&self) -> &DeploymentStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut DeploymentStore {
        &mut self.store
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Set when deployments on this network are verified.
    pub fn verifier(&self) -> Option<&Verifier> {
        self.verifier.as_ref()
    }

    /// Set when the frontend files are kept in sync.
    pub fn frontend(&self) -> Option<&FrontendSync> {
        self.frontend.as_ref()
    }

    pub fn naming(&self) -> &ContractNaming {
        &self.naming
    }

    pub fn confirmation_timeout(&self) -> Duration {
        self.confirmation_timeout
    }

    /// The local chain this context started, if any.
    pub fn local_chain(&self) -> Option<&LocalChain> {
        self.chain.as_ref()
    }

    /// Accounts able to send transactions: the node's unlocked accounts on development
    /// chains, the deployer key otherwise. The deployer always comes first.
    pub async fn accounts(&self) -> Result<Vec<Address>> {
        let deployer = self.signer.address();
        if !self.profile().is_development {
            return Ok(vec![deployer]);
        }

        let mut accounts = self.rpc.accounts().await?;
        accounts.retain(|account| *account != deployer);
        accounts.insert(0, deployer);
        Ok(accounts)
    }

    /// Signer for the account at `index` of [`Self::accounts`]. Index 0 is the deployer.
    pub async fn signer_at(&self, index: usize) -> Result<Signer> {
        if index == 0 {
            return Ok(self.signer.clone());
        }

        let accounts = self.accounts().await?;
        let address = accounts.get(index).copied().with_context(|| {
            format!(
                "No account #{} on network '{}' ({} available)",
                index,
                self.profile().name,
                accounts.len()
            )
        })?;
        Ok(Signer::Unlocked(address))
    }

    /// Handle of the stored deployment of `name`.
    pub fn contract(&self, name: &str) -> Result<ContractHandle> {
        Ok(ContractHandle::from(self.store.get(name)?))
    }
}
