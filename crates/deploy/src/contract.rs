//! Interaction with a deployed contract through its JSON ABI.

use std::time::Duration;

use alloy_core::dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy_core::json_abi::{Function, JsonAbi};
use alloy_core::primitives::{Address, Bytes, U256};
use anyhow::{Context, Result};

use crate::{
    artifacts::coerce_args,
    deployments::DeploymentRecord,
    rpc::{RpcClient, TransactionReceipt, TransactionRequest},
    signer::Signer,
};

/// A deployed contract.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractHandle {
    name: String,
    address: Address,
    abi: JsonAbi,
}

impl From<&DeploymentRecord> for ContractHandle {
    fn from(record: &DeploymentRecord) -> Self {
        Self::new(record.contract_name.clone(), record.address, record.abi.clone())
    }
}

impl ContractHandle {
    pub fn new(name: impl Into<String>, address: Address, abi: JsonAbi) -> Self {
        Self {
            name: name.into(),
            address,
            abi,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    /// The overload of `method` taking `arity` arguments.
    fn function(&self, method: &str, arity: usize) -> Result<&Function> {
        let overloads = self
            .abi
            .function(method)
            .with_context(|| format!("{} has no method '{}'", self.name, method))?;

        overloads
            .iter()
            .find(|f| f.inputs.len() == arity)
            .with_context(|| {
                format!(
                    "{}.{} does not take {} arguments",
                    self.name, method, arity
                )
            })
    }

    /// Whether `method` has an overload taking `arity` arguments.
    pub fn has_method(&self, method: &str, arity: usize) -> bool {
        self.function(method, arity).is_ok()
    }

    /// Calldata of `method` with string arguments.
    pub fn encode_call(&self, method: &str, args: &[String]) -> Result<Bytes> {
        let function = self.function(method, args.len())?;
        let values = coerce_args(&function.inputs, args, &format!("{}.{}", self.name, method))?;
        let data = function
            .abi_encode_input(&values)
            .with_context(|| format!("Failed to encode {}.{}", self.name, method))?;
        Ok(data.into())
    }

    /// Read-only call returning the decoded outputs.
    pub async fn call(
        &self,
        rpc: &RpcClient,
        from: Option<Address>,
        method: &str,
        args: &[String],
    ) -> Result<Vec<DynSolValue>> {
        let function = self.function(method, args.len())?;
        let request = TransactionRequest {
            from,
            to: Some(self.address),
            data: Some(self.encode_call(method, args)?),
            ..Default::default()
        };

        let output = rpc
            .call(&request)
            .await
            .with_context(|| format!("Call to {}.{} failed", self.name, method))?;

        function
            .abi_decode_output(&output, true)
            .with_context(|| format!("Failed to decode {}.{} output", self.name, method))
    }

    /// Call a method returning a single `address`.
    pub async fn call_address(
        &self,
        rpc: &RpcClient,
        from: Option<Address>,
        method: &str,
        args: &[String],
    ) -> Result<Address> {
        match self.call(rpc, from, method, args).await?.first() {
            Some(value) => value
                .as_address()
                .with_context(|| format!("{}.{} did not return an address", self.name, method)),
            None => anyhow::bail!("{}.{} returned nothing", self.name, method),
        }
    }

    /// Call a method returning a single unsigned integer.
    pub async fn call_uint(
        &self,
        rpc: &RpcClient,
        from: Option<Address>,
        method: &str,
        args: &[String],
    ) -> Result<U256> {
        match self.call(rpc, from, method, args).await?.first() {
            Some(value) => value
                .as_uint()
                .map(|(value, _)| value)
                .with_context(|| format!("{}.{} did not return an integer", self.name, method)),
            None => anyhow::bail!("{}.{} returned nothing", self.name, method),
        }
    }

    /// Send a transaction calling `method` and wait for its receipt.
    ///
    /// Fails if the transaction reverts.
    pub async fn send(
        &self,
        rpc: &RpcClient,
        chain_id: u64,
        signer: &Signer,
        method: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<TransactionReceipt> {
        let data = self.encode_call(method, args)?;
        let hash = signer
            .send(rpc, chain_id, Some(self.address), data)
            .await
            .with_context(|| format!("Failed to send {}.{}", self.name, method))?;

        tracing::debug!(contract = %self.name, method, tx = %hash, "Transaction sent");

        let receipt = rpc.wait_for_receipt(hash, timeout).await?;
        if !receipt.succeeded() {
            anyhow::bail!("Transaction {} calling {}.{} reverted", hash, self.name, method);
        }

        tracing::info!(
            contract = %self.name,
            method,
            tx = %hash,
            from = %signer.address(),
            "Transaction confirmed"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::address;
    use serde_json::Value;
    use url::Url;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn kyc() -> ContractHandle {
        let abi = serde_json::from_value(serde_json::json!([
            {
                "type": "function",
                "name": "getOwner",
                "inputs": [],
                "outputs": [{"name": "", "type": "address"}],
                "stateMutability": "view"
            },
            {
                "type": "function",
                "name": "getOwnEntityCount",
                "inputs": [{"name": "_user", "type": "address"}],
                "outputs": [{"name": "", "type": "uint256"}],
                "stateMutability": "view"
            },
            {
                "type": "function",
                "name": "addUsers",
                "inputs": [
                    {"name": "_name", "type": "string"},
                    {"name": "_id", "type": "string"},
                    {"name": "_dob", "type": "string"}
                ],
                "outputs": [],
                "stateMutability": "nonpayable"
            }
        ]))
        .unwrap();
        ContractHandle::new(
            "KYC",
            address!("5FbDB2315678afecb367f032d93F642f64180aa3"),
            abi,
        )
    }

    fn rpc_result(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": result
        }))
    }

    #[test]
    fn test_encode_call_selector() {
        let data = kyc().encode_call("getOwner", &[]).unwrap();
        // keccak256("getOwner()")[..4]
        assert_eq!(data.as_ref(), &[0x89, 0x3d, 0x20, 0xe8]);

        let data = kyc()
            .encode_call(
                "addUsers",
                &["alice".to_string(), "id-1".to_string(), "1990-01-01".to_string()],
            )
            .unwrap();
        assert_eq!((data.len() - 4) % 32, 0);
    }

    #[test]
    fn test_unknown_method_and_arity() {
        let err = kyc().encode_call("getOwnUserCount", &[]).unwrap_err();
        assert!(err.to_string().contains("KYC has no method 'getOwnUserCount'"));

        assert!(kyc().has_method("getOwnEntityCount", 1));
        assert!(!kyc().has_method("getOwnEntityCount", 0));

        let err = kyc().encode_call("addUsers", &["alice".to_string()]).unwrap_err();
        assert!(err.to_string().contains("does not take 1 arguments"));
    }

    #[tokio::test]
    async fn test_call_decodes_outputs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "method": "eth_call",
                "params": [{"data": "0x893d20e8"}]
            })))
            .respond_with(rpc_result(serde_json::json!(
                "0x000000000000000000000000f39fd6e51aad88f6f4ce6ab8827279cfffb92266"
            )))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"method": "eth_call"})))
            .respond_with(rpc_result(serde_json::json!(
                "0x0000000000000000000000000000000000000000000000000000000000000003"
            )))
            .mount(&server)
            .await;

        let rpc = RpcClient::new(Url::parse(&server.uri()).unwrap()).unwrap();
        let owner = kyc().call_address(&rpc, None, "getOwner", &[]).await.unwrap();
        assert_eq!(owner, address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266"));

        let count = kyc()
            .call_uint(
                &rpc,
                None,
                "getOwnEntityCount",
                &["0x70997970C51812dc3A010C7d01b50e0d17dc79C8".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(count, U256::from(3));
    }

    #[tokio::test]
    async fn test_reverted_send_is_an_error() {
        let server = MockServer::start().await;
        let hash = format!("0x{}", "ab".repeat(32));
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"method": "eth_sendTransaction"})))
            .respond_with(rpc_result(serde_json::json!(hash)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"method": "eth_getTransactionReceipt"})))
            .respond_with(rpc_result(serde_json::json!({
                "transactionHash": hash,
                "blockNumber": "0x2",
                "contractAddress": null,
                "status": "0x0",
                "gasUsed": "0x5208"
            })))
            .mount(&server)
            .await;

        let rpc = RpcClient::new(Url::parse(&server.uri()).unwrap())
            .unwrap()
            .with_poll_interval(Duration::from_millis(10));
        let signer = Signer::Unlocked(address!("70997970C51812dc3A010C7d01b50e0d17dc79C8"));
        let err = kyc()
            .send(
                &rpc,
                31337,
                &signer,
                "addUsers",
                &["a".to_string(), "b".to_string(), "c".to_string()],
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("reverted"));
    }
}
