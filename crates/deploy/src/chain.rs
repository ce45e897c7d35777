//! Local development chain.
//!
//! Ephemeral networks run on an Anvil process owned by the harness. The process is
//! killed when the [`LocalChain`] handle is dropped, so the chain never outlives the
//! run that started it.

use std::net::TcpListener;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use alloy_core::primitives::{Address, B256};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use tempdir::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use url::Url;

use crate::{fs::FsHandler, rpc::RpcClient};

/// Default port for the local chain when it is served as `localhost`.
pub const DEFAULT_PORT: u16 = 8545;

/// Number of funded accounts, matching Hardhat's default.
pub const DEFAULT_ACCOUNTS: usize = 20;

/// Builder for Anvil command line arguments.
#[derive(Debug, Clone)]
pub struct AnvilCmdBuilder {
    host: String,
    port: u16,
    chain_id: u64,
    accounts: usize,
    block_time: Option<u64>,
    fork_url: Option<String>,
    config_out: Option<String>,
    extra_args: Vec<String>,
}

impl AnvilCmdBuilder {
    pub fn new(chain_id: u64) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            chain_id,
            accounts: DEFAULT_ACCOUNTS,
            block_time: None,
            fork_url: None,
            config_out: None,
            extra_args: Vec::new(),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn accounts(mut self, accounts: usize) -> Self {
        self.accounts = accounts;
        self
    }

    /// Mine on an interval instead of on every transaction.
    pub fn block_time(mut self, block_time: Option<u64>) -> Self {
        self.block_time = block_time;
        self
    }

    /// Fork the state of another chain.
    pub fn fork_url(mut self, url: Option<String>) -> Self {
        self.fork_url = url;
        self
    }

    /// File Anvil writes its accounts and keys to once started.
    pub fn config_out(mut self, path: impl AsRef<Path>) -> Self {
        self.config_out = Some(path.as_ref().display().to_string());
        self
    }

    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    pub fn build(self) -> Vec<String> {
        let mut cmd = vec![
            "--host".to_string(),
            self.host,
            "--port".to_string(),
            self.port.to_string(),
            "--chain-id".to_string(),
            self.chain_id.to_string(),
            "--accounts".to_string(),
            self.accounts.to_string(),
        ];

        if let Some(block_time) = self.block_time {
            cmd.push("--block-time".to_string());
            cmd.push(block_time.to_string());
        }

        if let Some(fork_url) = self.fork_url {
            cmd.push("--fork-url".to_string());
            cmd.push(fork_url);
        }

        if let Some(config_out) = self.config_out {
            cmd.push("--config-out".to_string());
            cmd.push(config_out);
        }

        cmd.extend(self.extra_args);

        cmd
    }
}

/// Configuration of the local chain process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalChainConfig {
    /// Anvil executable, resolved through `PATH` when not absolute.
    pub binary: String,
    pub host: String,
    /// Port to listen on. `0` picks a free port.
    pub port: u16,
    pub accounts: usize,
    /// Seconds between blocks. Unset mines one block per transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_time: Option<u64>,
    /// RPC URL of a chain to fork.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fork_url: Option<String>,
    /// Maximum time for the process to come up.
    pub startup_timeout_secs: u64,
    /// Extra arguments passed to Anvil.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

impl Default for LocalChainConfig {
    fn default() -> Self {
        Self {
            binary: "anvil".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            accounts: DEFAULT_ACCOUNTS,
            block_time: None,
            fork_url: None,
            startup_timeout_secs: 30,
            extra_args: Vec::new(),
        }
    }
}

/// A funded development account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub address: Address,
    pub private_key: B256,
}

/// Subset of the file written through `--config-out`.
#[derive(Debug, Clone, Deserialize)]
struct AnvilConfigOut {
    available_accounts: Vec<Address>,
    private_keys: Vec<B256>,
}

impl AnvilConfigOut {
    fn accounts(self) -> Vec<AccountInfo> {
        self.available_accounts
            .into_iter()
            .zip(self.private_keys)
            .map(|(address, private_key)| AccountInfo {
                address,
                private_key,
            })
            .collect()
    }
}

fn free_port(host: &str) -> anyhow::Result<u16> {
    let listener =
        TcpListener::bind((host, 0)).with_context(|| format!("Failed to bind {}:0", host))?;
    Ok(listener.local_addr()?.port())
}

/// A running local chain.
pub struct LocalChain {
    process: Child,
    url: Url,
    chain_id: u64,
    accounts: Vec<AccountInfo>,
    // Removed on drop, after the process is gone.
    _data_dir: TempDir,
}

impl LocalChain {
    /// Start a chain with `chain_id` and wait until it answers RPC requests.
    pub async fn start(config: &LocalChainConfig, chain_id: u64) -> anyhow::Result<Self> {
        let data_dir = TempDir::new("kyc-chain").context("Failed to create chain data directory")?;
        let config_out = data_dir.path().join("anvil.json");

        let port = match config.port {
            0 => free_port(&config.host)?,
            port => port,
        };

        let args = AnvilCmdBuilder::new(chain_id)
            .host(&config.host)
            .port(port)
            .accounts(config.accounts)
            .block_time(config.block_time)
            .fork_url(config.fork_url.clone())
            .config_out(&config_out)
            .extra_args(config.extra_args.clone())
            .build();

        tracing::debug!(binary = %config.binary, ?args, "Starting local chain");

        let mut process = Command::new(&config.binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to start '{}'. Is Foundry installed and on PATH?",
                    config.binary
                )
            })?;

        let mut stderr = process
            .stderr
            .take()
            .context("Local chain stderr was not captured")?;
        let timeout = Duration::from_secs(config.startup_timeout_secs);

        // A chain that fails to start exits long before the timeout.
        tokio::select! {
            written = FsHandler::wait_for_file(&config_out, timeout) => {
                written.context("Local chain did not write its account file in time")?;
            }
            status = process.wait() => {
                let status = status.context("Failed to wait for local chain")?;
                let mut output = String::new();
                if let Err(e) = stderr.read_to_string(&mut output).await {
                    tracing::debug!(err = ?e, "Failed to read local chain stderr");
                }
                anyhow::bail!(
                    "Local chain exited during startup ({}): {}",
                    status,
                    output.trim()
                );
            }
        }

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "local_chain", "{}", line);
            }
        });

        let accounts = serde_json::from_str::<AnvilConfigOut>(
            &tokio::fs::read_to_string(&config_out)
                .await
                .with_context(|| format!("Failed to read {}", config_out.display()))?,
        )
        .context("Failed to parse local chain account file")?
        .accounts();

        let url = Url::parse(&format!("http://{}:{}/", config.host, port))
            .context("Failed to build local chain URL")?;

        let rpc = RpcClient::new(url.clone())?;
        crate::rpc::wait_until_ready("local chain", timeout, || async {
            rpc.chain_id().await.map(|_| ())
        })
        .await?;

        tracing::info!(%url, chain_id, accounts = accounts.len(), "Local chain started");

        Ok(Self {
            process,
            url,
            chain_id,
            accounts,
            _data_dir: data_dir,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Funded accounts, in the order the chain reports them.
    pub fn accounts(&self) -> &[AccountInfo] {
        &self.accounts
    }

    /// Kill the process and wait for it to exit.
    pub async fn stop(mut self) -> anyhow::Result<()> {
        self.process
            .kill()
            .await
            .context("Failed to stop local chain")?;
        tracing::info!(url = %self.url, "Local chain stopped");
        Ok(())
    }
}

impl std::fmt::Debug for LocalChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalChain")
            .field("url", &self.url)
            .field("chain_id", &self.chain_id)
            .field("accounts", &self.accounts.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::address;

    #[test]
    fn test_anvil_cmd_builder() {
        let cmd = AnvilCmdBuilder::new(31337)
            .port(9545)
            .config_out("/tmp/anvil.json")
            .build();

        assert_eq!(
            cmd,
            vec![
                "--host",
                "127.0.0.1",
                "--port",
                "9545",
                "--chain-id",
                "31337",
                "--accounts",
                "20",
                "--config-out",
                "/tmp/anvil.json",
            ]
        );
    }

    #[test]
    fn test_block_time_is_optional() {
        let cmd = AnvilCmdBuilder::new(31337).block_time(Some(2)).build();
        let pos = cmd.iter().position(|arg| arg == "--block-time").unwrap();
        assert_eq!(cmd[pos + 1], "2");

        let cmd = AnvilCmdBuilder::new(31337).build();
        assert!(!cmd.contains(&"--block-time".to_string()));
        assert!(!cmd.contains(&"--fork-url".to_string()));
    }

    #[test]
    fn test_parse_config_out() {
        let content = r#"{
            "available_accounts": [
                "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
                "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
            ],
            "private_keys": [
                "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
                "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d"
            ],
            "base_fee": "0x3b9aca00",
            "gas_limit": "0x1c9c380"
        }"#;

        let accounts = serde_json::from_str::<AnvilConfigOut>(content)
            .unwrap()
            .accounts();
        assert_eq!(accounts.len(), 2);
        assert_eq!(
            accounts[1].address,
            address!("70997970C51812dc3A010C7d01b50e0d17dc79C8")
        );
    }

    #[test]
    fn test_free_port() {
        assert_ne!(free_port("127.0.0.1").unwrap(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_early_exit_fails_fast() {
        let config = LocalChainConfig {
            binary: "false".to_string(),
            startup_timeout_secs: 30,
            ..Default::default()
        };
        let err = tokio::time::timeout(Duration::from_secs(10), LocalChain::start(&config, 31337))
            .await
            .expect("start should fail before its startup timeout")
            .unwrap_err();
        assert!(err.to_string().contains("exited during startup"));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let config = LocalChainConfig {
            binary: "definitely-not-anvil".to_string(),
            ..Default::default()
        };
        let err = LocalChain::start(&config, 31337).await.unwrap_err();
        assert!(err.to_string().contains("definitely-not-anvil"));
    }
}
