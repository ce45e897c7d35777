//! kyc-deploy - Deployment and test harness for the KYC contracts.
//!
//! This crate deploys compiled contracts to named networks, records and verifies
//! the deployments, keeps a frontend project in sync with them and provides
//! fixtures for contract tests on development chains.

pub mod artifacts;
pub mod chain;
pub mod config;
pub mod context;
pub mod contract;
pub mod deployer;
pub mod deployments;
pub mod frontend;
pub mod harness;
pub mod kyc;
pub mod network;
pub mod rpc;
pub mod signer;
pub mod steps;
pub mod tasks;
pub mod verify;

mod fs;

pub use artifacts::{ArtifactStore, BuildInfo, ContractArtifact};
pub use chain::{AccountInfo, AnvilCmdBuilder, LocalChain, LocalChainConfig};
pub use config::{CONFIG_FILENAME, ContractNaming, HarnessConfig, ResolvedNetwork};
pub use context::DeployContext;
pub use contract::ContractHandle;
pub use deployer::deploy;
pub use deployments::{DeploymentRecord, DeploymentStore};
pub use frontend::{FrontendPaths, FrontendSync, SyncReport};
pub use harness::{Fixture, NotDevelopmentChain};
pub use kyc::Kyc;
pub use network::{
    DEV_CHAIN_ID, ExplorerConfig, HARDHAT_NETWORK, LOCALHOST_NETWORK, NetworkProfile,
    NetworkRegistry, RpcSource,
};
pub use rpc::{RpcClient, TransactionReceipt, TransactionRequest};
pub use signer::{LegacyTransaction, LocalSigner, Signer};
pub use steps::{DeployStep, StepAction, default_steps, run_steps, select};
pub use verify::{Verifier, VerifyOutcome};

/// Reads the process environment. Pass to [`HarnessConfig::resolve`] and friends.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}
