//! Named network profiles.
//!
//! Every network a deployment or a verification can target is described by a
//! [`NetworkProfile`]. Profiles live in a [`NetworkRegistry`]; looking up a name that
//! is not registered fails before anything touches a chain.

use std::collections::BTreeMap;

use alloy_core::primitives::{Address, address};
use anyhow::Result;
use derive_more::Deref;
use serde::{Deserialize, Serialize};

/// Name of the in-process development network (an ephemeral local chain).
pub const HARDHAT_NETWORK: &str = "hardhat";
/// Name of the development network reachable on the local default RPC port.
pub const LOCALHOST_NETWORK: &str = "localhost";

/// Chain ID used by local development chains.
pub const DEV_CHAIN_ID: u64 = 31337;

/// Number of confirmations waited for on live networks.
pub const LIVE_BLOCK_CONFIRMATIONS: u64 = 6;

/// Where the RPC endpoint of a network comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RpcSource {
    /// A throwaway local chain is started for the lifetime of the command.
    Ephemeral,
    /// A fixed endpoint.
    Url {
        /// The default endpoint, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        /// Environment variable that overrides the default endpoint.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        env: Option<String>,
    },
}

/// Block-explorer verification settings for a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerConfig {
    /// Etherscan-compatible API endpoint.
    pub api_url: String,
    /// Human facing explorer URL, used to print links.
    pub browser_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl ExplorerConfig {
    fn new(api_url: &str, browser_url: &str, api_key_env: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            browser_url: browser_url.to_string(),
            api_key_env: api_key_env.to_string(),
        }
    }

    /// Link to an address page on the explorer.
    pub fn address_url(&self, address: &Address) -> String {
        format!("{}/address/{}", self.browser_url.trim_end_matches('/'), address)
    }
}

/// Chain parameters of a named network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkProfile {
    /// The network name, as passed on the command line.
    pub name: String,
    /// The chain ID the node must report.
    pub chain_id: u64,
    /// Confirmations to wait for after a deployment transaction is included.
    #[serde(default)]
    pub block_confirmations: u64,
    /// Development chains are local and disposable; they are never verified.
    #[serde(default)]
    pub is_development: bool,
    /// ETH/USD price feed on this chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_feed: Option<Address>,
    /// RPC endpoint source.
    pub rpc: RpcSource,
    /// Verification settings. Networks without one are never verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explorer: Option<ExplorerConfig>,
}

impl NetworkProfile {
    fn live(
        name: &str,
        chain_id: u64,
        rpc_env: &str,
        price_feed: Address,
        explorer: ExplorerConfig,
    ) -> Self {
        Self {
            name: name.to_string(),
            chain_id,
            block_confirmations: LIVE_BLOCK_CONFIRMATIONS,
            is_development: false,
            price_feed: Some(price_feed),
            rpc: RpcSource::Url {
                url: None,
                env: Some(rpc_env.to_string()),
            },
            explorer: Some(explorer),
        }
    }

    /// Whether the harness has to boot its own chain for this network.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self.rpc, RpcSource::Ephemeral)
    }
}

/// Registry of every known network, keyed by name.
#[derive(Debug, Clone, PartialEq, Eq, Deref)]
pub struct NetworkRegistry(BTreeMap<String, NetworkProfile>);

impl NetworkRegistry {
    /// The built-in network table.
    pub fn builtin() -> Self {
        let profiles = [
            NetworkProfile {
                name: HARDHAT_NETWORK.to_string(),
                chain_id: DEV_CHAIN_ID,
                block_confirmations: 0,
                is_development: true,
                price_feed: None,
                rpc: RpcSource::Ephemeral,
                explorer: None,
            },
            NetworkProfile {
                name: LOCALHOST_NETWORK.to_string(),
                chain_id: DEV_CHAIN_ID,
                block_confirmations: 0,
                is_development: true,
                price_feed: None,
                rpc: RpcSource::Url {
                    url: Some("http://127.0.0.1:8545".to_string()),
                    env: None,
                },
                explorer: None,
            },
            NetworkProfile::live(
                "goerli",
                5,
                "GOERLI_RPC_URL",
                address!("D4a33860578De61DBAbDc8BFdb98FD742fA7028e"),
                ExplorerConfig::new(
                    "https://api-goerli.etherscan.io/api",
                    "https://goerli.etherscan.io",
                    "ETHERSCAN_API_KEY",
                ),
            ),
            NetworkProfile::live(
                "sepolia",
                11155111,
                "SEPOLIA_RPC_URL",
                address!("694AA1769357215DE4FAC081bf1f309aDC325306"),
                ExplorerConfig::new(
                    "https://api-sepolia.etherscan.io/api",
                    "https://sepolia.etherscan.io",
                    "ETHERSCAN_API_KEY",
                ),
            ),
            NetworkProfile::live(
                "polygon_mumbai",
                80001,
                "POLYGON_MUMBAI_RPC_URL",
                address!("0715A7794a1dc8e42615F059dD6e406A6594651A"),
                ExplorerConfig::new(
                    "https://api-testnet.polygonscan.com/api",
                    "https://mumbai.polygonscan.com",
                    "POLYGONSCAN_API_KEY",
                ),
            ),
        ];

        Self(
            profiles
                .into_iter()
                .map(|profile| (profile.name.clone(), profile))
                .collect(),
        )
    }

    /// Add profiles, replacing built-ins that share a name.
    pub fn extend(&mut self, profiles: impl IntoIterator<Item = NetworkProfile>) {
        for profile in profiles {
            tracing::debug!(network = %profile.name, chain_id = profile.chain_id, "Registering network profile");
            self.0.insert(profile.name.clone(), profile);
        }
    }

    /// Look up a network by name.
    pub fn get(&self, name: &str) -> Result<&NetworkProfile> {
        self.0.get(name).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown network '{}'. Known networks: {}",
                name,
                self.0.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })
    }

    /// Names of the development networks.
    pub fn development_chains(&self) -> Vec<&str> {
        self.0
            .values()
            .filter(|p| p.is_development)
            .map(|p| p.name.as_str())
            .collect()
    }
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_network_fails() {
        let registry = NetworkRegistry::builtin();
        let err = registry.get("rinkeby").unwrap_err();
        assert!(err.to_string().contains("Unknown network 'rinkeby'"));
        assert!(err.to_string().contains("goerli"));
    }

    #[test]
    fn test_builtin_profiles() {
        let registry = NetworkRegistry::builtin();

        let hardhat = registry.get("hardhat").unwrap();
        assert_eq!(hardhat.chain_id, 31337);
        assert_eq!(hardhat.block_confirmations, 0);
        assert!(hardhat.is_development);
        assert!(hardhat.is_ephemeral());

        let mumbai = registry.get("polygon_mumbai").unwrap();
        assert_eq!(mumbai.chain_id, 80001);
        assert_eq!(mumbai.block_confirmations, 6);
        assert!(!mumbai.is_development);
        assert_eq!(
            mumbai.explorer.as_ref().unwrap().api_key_env,
            "POLYGONSCAN_API_KEY"
        );
    }

    #[test]
    fn test_development_chains() {
        let registry = NetworkRegistry::builtin();
        let dev = registry.development_chains();
        assert_eq!(dev, vec!["hardhat", "localhost"]);
    }

    #[test]
    fn test_extend_replaces_builtin() {
        let mut registry = NetworkRegistry::builtin();
        let mut localhost = registry.get("localhost").unwrap().clone();
        localhost.block_confirmations = 2;
        registry.extend([localhost]);

        assert_eq!(registry.get("localhost").unwrap().block_confirmations, 2);
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_profile_toml_roundtrip() {
        let profile = NetworkRegistry::builtin().get("sepolia").unwrap().clone();
        let encoded = toml::to_string(&profile).unwrap();
        let decoded: NetworkProfile = toml::from_str(&encoded).unwrap();
        assert_eq!(profile, decoded);
    }
}
