//! Shared RPC utilities for interacting with Ethereum JSON-RPC endpoints.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes, U64, U256};
use anyhow::Context;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between polling attempts when waiting for readiness.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// # Arguments
/// * `client` - The HTTP client to use
/// * `url` - The RPC endpoint URL
/// * `method` - The RPC method name
/// * `params` - The method parameters
///
/// # Returns
/// The deserialized result, or an error if the request failed or returned an error response.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        anyhow::bail!(
            "RPC error in {}: {}",
            method,
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result_value = result
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Wait for a service to be ready by repeatedly calling a check function.
///
/// # Arguments
/// * `name` - Name of the service (for error messages)
/// * `timeout` - Maximum time to wait
/// * `check_fn` - Function that returns Ok(()) when the service is ready
///
/// # Returns
/// Ok(()) when the service is ready, or an error after timeout.
pub async fn wait_until_ready<F, Fut>(
    name: &str,
    timeout: Duration,
    check_fn: F,
) -> Result<(), anyhow::Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<(), anyhow::Error>>,
{
    poll_until(name, timeout, Duration::from_millis(250), || {
        let check = check_fn();
        async move {
            match check.await {
                Ok(()) => Ok(Some(())),
                Err(e) => {
                    tracing::trace!(error = %e, service = %name, "Readiness check failed, retrying...");
                    Ok(None)
                }
            }
        }
    })
    .await
}

/// Poll `poll_fn` until it yields a value.
///
/// Errors returned by `poll_fn` abort the wait immediately; `Ok(None)` means "not yet".
pub async fn poll_until<T, F, Fut>(
    name: &str,
    timeout: Duration,
    interval: Duration,
    poll_fn: F,
) -> Result<T, anyhow::Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>, anyhow::Error>>,
{
    let start = std::time::Instant::now();

    loop {
        if let Some(value) = poll_fn().await? {
            return Ok(value);
        }

        if start.elapsed() > timeout {
            anyhow::bail!("Timeout waiting for {} after {}s", name, timeout.as_secs());
        }

        tokio::time::sleep(interval).await;
    }
}

/// Transaction request as accepted by `eth_sendTransaction`, `eth_call` and `eth_estimateGas`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    /// `None` creates a contract.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<U64>,
}

/// The subset of a transaction receipt the harness cares about.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub block_number: Option<U64>,
    #[serde(default)]
    pub contract_address: Option<Address>,
    /// `0x1` on success, `0x0` on revert. Absent on pre-Byzantium chains.
    #[serde(default)]
    pub status: Option<U64>,
    #[serde(default)]
    pub gas_used: Option<U256>,
}

impl TransactionReceipt {
    /// Whether the transaction executed without reverting.
    pub fn succeeded(&self) -> bool {
        self.status.is_none_or(|s| s != U64::ZERO)
    }
}

/// A JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: reqwest::Client,
    url: Url,
    poll_interval: Duration,
}

impl RpcClient {
    /// Create a client for `url`.
    pub fn new(url: Url) -> Result<Self, anyhow::Error> {
        Ok(Self {
            client: create_client()?,
            url,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Set how often receipts and block numbers are polled.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The endpoint URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Interval between polls.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Raw JSON-RPC request.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, anyhow::Error> {
        tracing::trace!(method, url = %self.url, "JSON-RPC request");
        json_rpc_call(&self.client, self.url.as_str(), method, params).await
    }

    pub async fn chain_id(&self) -> Result<u64, anyhow::Error> {
        let id: U64 = self.request("eth_chainId", vec![]).await?;
        Ok(id.to())
    }

    pub async fn block_number(&self) -> Result<u64, anyhow::Error> {
        let number: U64 = self.request("eth_blockNumber", vec![]).await?;
        Ok(number.to())
    }

    /// Accounts managed by the node.
    pub async fn accounts(&self) -> Result<Vec<Address>, anyhow::Error> {
        self.request("eth_accounts", vec![]).await
    }

    /// Nonce of the next transaction sent by `address`.
    pub async fn transaction_count(&self, address: Address) -> Result<u64, anyhow::Error> {
        let count: U64 = self
            .request(
                "eth_getTransactionCount",
                vec![serde_json::json!(address), serde_json::json!("pending")],
            )
            .await?;
        Ok(count.to())
    }

    pub async fn gas_price(&self) -> Result<u128, anyhow::Error> {
        let price: U256 = self.request("eth_gasPrice", vec![]).await?;
        u128::try_from(price).map_err(|_| anyhow::anyhow!("Gas price {} does not fit in 128 bits", price))
    }

    pub async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, anyhow::Error> {
        let gas: U64 = self
            .request("eth_estimateGas", vec![serde_json::to_value(tx)?])
            .await?;
        Ok(gas.to())
    }

    /// Send a transaction signed by the node.
    pub async fn send_transaction(&self, tx: &TransactionRequest) -> Result<B256, anyhow::Error> {
        self.request("eth_sendTransaction", vec![serde_json::to_value(tx)?])
            .await
    }

    /// Broadcast an already signed transaction.
    pub async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, anyhow::Error> {
        self.request("eth_sendRawTransaction", vec![serde_json::json!(raw)])
            .await
    }

    /// Receipt of a transaction, `None` while it is pending.
    pub async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, anyhow::Error> {
        self.request("eth_getTransactionReceipt", vec![serde_json::json!(hash)])
            .await
    }

    /// Execute a read-only call against the latest block.
    pub async fn call(&self, tx: &TransactionRequest) -> Result<Bytes, anyhow::Error> {
        self.request(
            "eth_call",
            vec![serde_json::to_value(tx)?, serde_json::json!("latest")],
        )
        .await
    }

    /// Runtime bytecode at `address`.
    pub async fn code_at(&self, address: Address) -> Result<Bytes, anyhow::Error> {
        self.request(
            "eth_getCode",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await
    }

    /// Snapshot the state of a development node. Returns the snapshot id.
    pub async fn snapshot(&self) -> Result<U256, anyhow::Error> {
        self.request("evm_snapshot", vec![]).await
    }

    /// Revert a development node to snapshot `id`. The snapshot is consumed.
    pub async fn revert(&self, id: U256) -> Result<(), anyhow::Error> {
        let reverted: bool = self.request("evm_revert", vec![serde_json::json!(id)]).await?;
        if !reverted {
            anyhow::bail!("Node refused to revert to snapshot {}", id);
        }
        Ok(())
    }

    /// Wait until `hash` is included and return its receipt.
    pub async fn wait_for_receipt(
        &self,
        hash: B256,
        timeout: Duration,
    ) -> Result<TransactionReceipt, anyhow::Error> {
        poll_until(
            &format!("receipt of {}", hash),
            timeout,
            self.poll_interval,
            || self.transaction_receipt(hash),
        )
        .await
    }

    /// Block until `block` has `confirmations` confirmations (the inclusion block counts as one).
    pub async fn wait_for_confirmations(
        &self,
        block: u64,
        confirmations: u64,
        timeout: Duration,
    ) -> Result<(), anyhow::Error> {
        if confirmations <= 1 {
            return Ok(());
        }

        let target = block
            .checked_add(confirmations - 1)
            .with_context(|| {
                format!("{} confirmations of block {} overflow the block height", confirmations, block)
            })?;
        tracing::info!(block, confirmations, target, "Waiting for confirmations...");

        poll_until(
            &format!("{} confirmations of block {}", confirmations, block),
            timeout,
            self.poll_interval,
            || async move {
                let current = self.block_number().await?;
                tracing::debug!(current, target, "Polled block number");
                Ok((current >= target).then_some(()))
            },
        )
        .await
    }
}
