//! Deployment records.
//!
//! A record is created once per deployment and never mutated. Records are keyed by
//! contract name: deploying the same name again replaces the previous record, so a
//! name never maps to two divergent deployments.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use alloy_core::json_abi::JsonAbi;
use alloy_core::primitives::{Address, B256};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Marker file storing the chain ID a deployments directory belongs to.
const CHAIN_ID_FILE: &str = ".chainId";

/// A deployed contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub contract_name: String,
    pub address: Address,
    /// Constructor arguments as given to the deployer.
    pub constructor_args: Vec<String>,
    pub network: String,
    pub chain_id: u64,
    pub transaction_hash: B256,
    pub block_number: u64,
    pub deployer: Address,
    pub abi: JsonAbi,
    /// Unix timestamp of the deployment.
    pub deployed_at: i64,
}

/// Deployment records of one network.
///
/// Development networks that live only as long as the process keep their records in
/// memory. Other networks persist one JSON file per contract under
/// `<root>/<network>/`.
#[derive(Debug, Clone)]
pub struct DeploymentStore {
    network: String,
    chain_id: u64,
    dir: Option<PathBuf>,
    records: BTreeMap<String, DeploymentRecord>,
}

impl DeploymentStore {
    /// A store that is never written to disk.
    pub fn in_memory(network: impl Into<String>, chain_id: u64) -> Self {
        Self {
            network: network.into(),
            chain_id,
            dir: None,
            records: BTreeMap::new(),
        }
    }

    /// Open the persisted store of `network`, loading existing records.
    ///
    /// Fails if the directory was written for a different chain ID.
    pub fn open(root: &Path, network: impl Into<String>, chain_id: u64) -> Result<Self> {
        let network = network.into();
        let dir = root.join(&network);
        let mut records = BTreeMap::new();

        if dir.exists() {
            let chain_id_path = dir.join(CHAIN_ID_FILE);
            if let Ok(content) = std::fs::read_to_string(&chain_id_path) {
                let stored: u64 = content.trim().parse().with_context(|| {
                    format!("Invalid chain ID in {}", chain_id_path.display())
                })?;
                if stored != chain_id {
                    anyhow::bail!(
                        "Deployments in {} belong to chain {}, but network '{}' is chain {}",
                        dir.display(),
                        stored,
                        network,
                        chain_id
                    );
                }
            }

            for entry in std::fs::read_dir(&dir)
                .with_context(|| format!("Failed to read {}", dir.display()))?
            {
                let path = entry?.path();
                if path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let record: DeploymentRecord = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse deployment {}", path.display()))?;
                records.insert(record.contract_name.clone(), record);
            }

            tracing::debug!(
                network = %network,
                count = records.len(),
                dir = %dir.display(),
                "Loaded deployment records"
            );
        }

        Ok(Self {
            network,
            chain_id,
            dir: Some(dir),
            records,
        })
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Store a record, replacing any previous deployment of the same contract.
    ///
    /// Returns the replaced record.
    pub fn save(&mut self, record: DeploymentRecord) -> Result<Option<DeploymentRecord>> {
        if let Some(dir) = &self.dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            std::fs::write(dir.join(CHAIN_ID_FILE), self.chain_id.to_string())
                .context("Failed to write chain ID marker")?;

            let path = dir.join(format!("{}.json", record.contract_name));
            let content = serde_json::to_string_pretty(&record)
                .context("Failed to serialize deployment record")?;
            std::fs::write(&path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }

        let previous = self.records.insert(record.contract_name.clone(), record);
        if let Some(previous) = &previous {
            tracing::info!(
                contract = %previous.contract_name,
                previous = %previous.address,
                "Replaced existing deployment record"
            );
        }
        Ok(previous)
    }

    /// The deployment of `contract_name`.
    pub fn get(&self, contract_name: &str) -> Result<&DeploymentRecord> {
        self.records.get(contract_name).with_context(|| {
            format!(
                "No deployment found for '{}' on network '{}'",
                contract_name, self.network
            )
        })
    }

    /// All records, ordered by contract name.
    pub fn records(&self) -> impl Iterator<Item = &DeploymentRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forget every record, removing persisted files.
    pub fn clear(&mut self) -> Result<()> {
        if let Some(dir) = &self.dir {
            for name in self.records.keys() {
                let path = dir.join(format!("{}.json", name));
                if path.exists() {
                    std::fs::remove_file(&path)
                        .with_context(|| format!("Failed to remove {}", path.display()))?;
                }
            }
        }
        self.records.clear();
        Ok(())
    }
}
