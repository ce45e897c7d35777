//! Synchronization of the deployed address and ABI into the frontend project.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use alloy_core::json_abi::JsonAbi;
use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{deployments::DeploymentRecord, fs::FsHandler};

/// Frontend files kept in sync with deployments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendPaths {
    /// JSON object mapping chain IDs to the list of deployed addresses.
    pub addresses_file: PathBuf,
    /// JSON ABI of the contract.
    pub abi_file: PathBuf,
}

impl Default for FrontendPaths {
    fn default() -> Self {
        Self {
            addresses_file: PathBuf::from("../fyp_kyc/constants/contractAddresses.json"),
            abi_file: PathBuf::from("../fyp_kyc/constants/abi.json"),
        }
    }
}

/// Chain ID to deployed addresses, each list in insertion order.
type AddressBook = BTreeMap<ChainKey, Vec<String>>;

/// Key of the address book.
///
/// Keys order the way a JavaScript object enumerates them: integer keys first in
/// ascending numeric order, then any other key by string order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
struct ChainKey(String);

impl ChainKey {
    fn numeric(&self) -> Option<u64> {
        if self.0.len() > 1 && self.0.starts_with('0') {
            return None;
        }
        self.0.parse().ok()
    }
}

impl From<u64> for ChainKey {
    fn from(chain_id: u64) -> Self {
        Self(chain_id.to_string())
    }
}

impl Ord for ChainKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for ChainKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What a sync changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// The address was not yet listed for the chain and has been appended.
    pub address_appended: bool,
    /// The chain had no entry before this sync.
    pub new_chain: bool,
}

/// Writes deployments into the frontend's address and ABI files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendSync {
    paths: FrontendPaths,
}

impl FrontendSync {
    pub fn new(paths: FrontendPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &FrontendPaths {
        &self.paths
    }

    /// Record `record` for `chain_id` and replace the ABI file with its ABI.
    pub fn sync(&self, record: &DeploymentRecord, chain_id: u64) -> Result<SyncReport> {
        tracing::info!(
            contract = %record.contract_name,
            address = %record.address,
            chain_id,
            "Updating frontend..."
        );

        let report = self.update_addresses(record.address, chain_id)?;
        self.update_abi(&record.abi)?;
        Ok(report)
    }

    fn update_addresses(&self, address: Address, chain_id: u64) -> Result<SyncReport> {
        let path = &self.paths.addresses_file;
        let mut book = read_address_book(path)?;

        let key = ChainKey::from(chain_id);
        let new_chain = !book.contains_key(&key);
        let addresses = book.entry(key).or_default();

        let address_appended = !addresses.iter().any(|known| same_address(known, &address));
        if address_appended {
            addresses.push(address.to_string());
            tracing::info!(%address, chain_id, new_chain, "Recorded new contract address");
        } else {
            tracing::debug!(%address, chain_id, "Contract address already recorded");
        }

        let content =
            serde_json::to_string(&book).context("Failed to serialize contract addresses")?;
        FsHandler::write_file(path, content)?;

        Ok(SyncReport {
            address_appended,
            new_chain,
        })
    }

    fn update_abi(&self, abi: &JsonAbi) -> Result<()> {
        let content = serde_json::to_string(abi).context("Failed to serialize ABI")?;
        FsHandler::write_file(&self.paths.abi_file, content)?;
        tracing::info!(path = %self.paths.abi_file.display(), "ABI has been updated");
        Ok(())
    }
}

/// Read the address book. A missing file is an empty book.
fn read_address_book(path: &Path) -> Result<AddressBook> {
    if !path.exists() {
        return Ok(AddressBook::new());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(AddressBook::new());
    }

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse contract addresses in {}", path.display()))
}

fn same_address(known: &str, address: &Address) -> bool {
    match known.parse::<Address>() {
        Ok(known) => known == *address,
        Err(_) => known.eq_ignore_ascii_case(&address.to_string()),
    }
}
