//! Startup configuration.
//!
//! Everything the harness needs is resolved once into a [`HarnessConfig`] before any
//! deployment action and passed explicitly to the operations that need it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    chain::LocalChainConfig,
    frontend::FrontendPaths,
    network::{HARDHAT_NETWORK, NetworkProfile, NetworkRegistry, RpcSource},
};

/// The default name for the harness configuration file.
pub const CONFIG_FILENAME: &str = "Kyc.toml";

/// Prefix of environment variables read into the configuration.
pub const ENV_PREFIX: &str = "KYC_";

/// Names of the contract and of the methods the harness interacts with.
///
/// The KYC contract went through revisions that renamed both the contract
/// (`KYC`, `KYCUpload`) and its methods (`getOwnEntityCount`, `getOwnUserCount`),
/// so these are configuration rather than constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractNaming {
    /// Contract deployed by the default steps and synced to the frontend.
    pub name: String,
    /// Constructor arguments of the contract.
    pub constructor_args: Vec<String>,
    /// View returning the contract owner.
    pub owner_method: String,
    /// Method registering the caller as a user: `(name, id, date of birth)`.
    pub register_method: String,
    /// View returning the number of records held by an account.
    pub count_method: String,
}

impl Default for ContractNaming {
    fn default() -> Self {
        Self {
            name: "KYC".to_string(),
            constructor_args: Vec::new(),
            owner_method: "getOwner".to_string(),
            register_method: "addUsers".to_string(),
            count_method: "getOwnEntityCount".to_string(),
        }
    }
}

/// Harness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Name of the target network.
    pub network: String,
    /// Extra network profiles, replacing built-ins with the same name.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkProfile>,
    /// RPC endpoint overriding the network's own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<Url>,
    /// Deployer private key. Never written back to disk.
    #[serde(skip_serializing)]
    pub private_key: Option<String>,
    /// Explorer API key overriding the network's environment variable. Never written back to disk.
    #[serde(skip_serializing)]
    pub explorer_api_key: Option<String>,
    /// Whether the frontend step writes the address and ABI files.
    pub update_frontend: bool,
    /// Frontend files written by the frontend step.
    pub frontend: FrontendPaths,
    /// Compiled artifacts directory.
    pub artifacts_dir: PathBuf,
    /// Root of the persisted deployment records.
    pub deployments_dir: PathBuf,
    /// Contract and method names.
    pub contract: ContractNaming,
    /// Maximum time to wait for a transaction to be included and confirmed.
    pub confirmation_timeout_secs: u64,
    /// Local chain started for ephemeral networks.
    pub local_chain: LocalChainConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            network: HARDHAT_NETWORK.to_string(),
            networks: Vec::new(),
            rpc_url: None,
            private_key: None,
            explorer_api_key: None,
            update_frontend: false,
            frontend: FrontendPaths::default(),
            artifacts_dir: PathBuf::from("artifacts"),
            deployments_dir: PathBuf::from("deployments"),
            contract: ContractNaming::default(),
            confirmation_timeout_secs: 600,
            local_chain: LocalChainConfig::default(),
        }
    }
}

/// A network profile together with the endpoint and secrets resolved for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNetwork {
    pub profile: NetworkProfile,
    /// `None` for ephemeral networks, whose endpoint is only known once the chain runs.
    pub rpc_url: Option<Url>,
    pub explorer_api_key: Option<String>,
}

impl ResolvedNetwork {
    /// Whether deployments on this network are submitted for verification.
    pub fn should_verify(&self) -> bool {
        !self.profile.is_development
            && self.profile.explorer.is_some()
            && self.explorer_api_key.is_some()
    }
}

impl HarnessConfig {
    /// Layer the defaults, an optional TOML file and `KYC_` environment variables.
    ///
    /// Without an explicit path, `Kyc.toml` in the working directory is used if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        match path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Configuration file not found: {}", path.display());
                }
                figment = figment.merge(Toml::file(path));
            }
            None if Path::new(CONFIG_FILENAME).exists() => {
                figment = figment.merge(Toml::file(CONFIG_FILENAME));
            }
            None => {}
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to load configuration")?;

        tracing::debug!(network = %config.network, "Configuration loaded");
        Ok(config)
    }

    /// Save the configuration to a TOML file. Secrets are left out.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Built-in networks plus the configured ones.
    pub fn registry(&self) -> NetworkRegistry {
        let mut registry = NetworkRegistry::builtin();
        registry.extend(self.networks.iter().cloned());
        registry
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    /// Resolve the target network, its endpoint and its secrets.
    ///
    /// `env` looks up environment variables named by the profile; it is the only way
    /// this reads the environment. Every configuration error surfaces here, before any
    /// chain is contacted.
    pub fn resolve(&self, env: impl Fn(&str) -> Option<String>) -> Result<ResolvedNetwork> {
        let lookup = |name: &str| env(name).filter(|value| !value.trim().is_empty());

        let profile = self.registry().get(&self.network)?.clone();

        let rpc_url = match &profile.rpc {
            RpcSource::Ephemeral => self.rpc_url.clone(),
            RpcSource::Url { url, env: var } => {
                let raw = match &self.rpc_url {
                    Some(url) => url.to_string(),
                    None => var
                        .as_deref()
                        .and_then(&lookup)
                        .or_else(|| url.clone())
                        .with_context(|| {
                            format!(
                                "No RPC URL for network '{}'. Set {} or pass --rpc-url.",
                                profile.name,
                                var.as_deref().unwrap_or("an RPC URL")
                            )
                        })?,
                };
                Some(Url::parse(&raw).with_context(|| {
                    format!("Invalid RPC URL for network '{}'", profile.name)
                })?)
            }
        };

        if !profile.is_development && self.private_key.is_none() {
            anyhow::bail!(
                "Network '{}' needs a deployer key. Set PRIVATE_KEY or pass --private-key.",
                profile.name
            );
        }

        let explorer_api_key = self.explorer_api_key.clone().or_else(|| {
            profile
                .explorer
                .as_ref()
                .and_then(|explorer| lookup(&explorer.api_key_env))
        });

        Ok(ResolvedNetwork {
            profile,
            rpc_url,
            explorer_api_key,
        })
    }
}
