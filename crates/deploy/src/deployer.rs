//! Contract deployment.

use anyhow::{Context, Result};

use crate::{context::DeployContext, deployments::DeploymentRecord};

/// Deploy the contract `name` with string constructor arguments.
///
/// Blocks until the network's confirmation count is reached, then records the
/// deployment in the context's store, replacing any previous record of the same
/// contract. Submission and confirmation failures are returned as is.
pub async fn deploy(
    name: &str,
    constructor_args: &[String],
    ctx: &mut DeployContext,
) -> Result<DeploymentRecord> {
    let artifact = ctx.artifacts().find(name)?;
    let creation_code = artifact.creation_code(constructor_args)?;
    let profile = ctx.profile().clone();
    let deployer = ctx.signer().address();
    let timeout = ctx.confirmation_timeout();

    tracing::info!(
        contract = %artifact.contract_name,
        network = %profile.name,
        %deployer,
        confirmations = profile.block_confirmations,
        "Deploying contract and waiting for confirmations..."
    );

    let tx_hash = ctx
        .signer()
        .send(ctx.rpc(), profile.chain_id, None, creation_code)
        .await
        .with_context(|| format!("Failed to submit deployment of {}", artifact.contract_name))?;

    tracing::debug!(tx = %tx_hash, "Deployment transaction sent");

    let receipt = ctx
        .rpc()
        .wait_for_receipt(tx_hash, timeout)
        .await
        .with_context(|| format!("Deployment of {} was not mined", artifact.contract_name))?;

    if !receipt.succeeded() {
        anyhow::bail!(
            "Deployment of {} reverted (tx {})",
            artifact.contract_name,
            tx_hash
        );
    }

    let address = receipt.contract_address.with_context(|| {
        format!(
            "Receipt of {} deployment has no contract address (tx {})",
            artifact.contract_name, tx_hash
        )
    })?;
    let block_number: u64 = receipt
        .block_number
        .context("Mined receipt has no block number")?
        .to();

    ctx.rpc()
        .wait_for_confirmations(block_number, profile.block_confirmations, timeout)
        .await?;

    let record = DeploymentRecord {
        contract_name: artifact.contract_name.clone(),
        address,
        constructor_args: constructor_args.to_vec(),
        network: profile.name.clone(),
        chain_id: profile.chain_id,
        transaction_hash: tx_hash,
        block_number,
        deployer,
        abi: artifact.abi,
        deployed_at: chrono::Utc::now().timestamp(),
    };

    ctx.store_mut().save(record.clone())?;

    tracing::info!(
        contract = %record.contract_name,
        %address,
        block = block_number,
        gas_used = ?receipt.gas_used,
        "Contract deployed"
    );

    Ok(record)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::tests::{localhost_config, mock_dev_node, mock_rpc, rpc_result};
    use alloy_core::primitives::address;
    use std::path::Path;
    use tempdir::TempDir;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer};

    const TX_HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    pub(crate) fn write_kyc_artifact(root: &Path) {
        let dir = root.join("artifacts/contracts/KYC.sol");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("KYC.json"),
            serde_json::json!({
                "contractName": "KYC",
                "sourceName": "contracts/KYC.sol",
                "abi": [{
                    "type": "function",
                    "name": "getOwner",
                    "inputs": [],
                    "outputs": [{"name": "", "type": "address"}],
                    "stateMutability": "view"
                }],
                "bytecode": "0x6080604052"
            })
            .to_string(),
        )
        .unwrap();
    }

    async fn mock_deployment(server: &MockServer, status: &str, contract_address: Option<&str>) {
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "method": "eth_sendTransaction",
                "params": [{"data": "0x6080604052"}]
            })))
            .respond_with(rpc_result(serde_json::json!(TX_HASH)))
            .mount(server)
            .await;
        mock_rpc(
            server,
            "eth_getTransactionReceipt",
            serde_json::json!({
                "transactionHash": TX_HASH,
                "blockNumber": "0x1",
                "contractAddress": contract_address,
                "status": status,
                "gasUsed": "0x2dc6c0"
            }),
        )
        .await;
    }

    #[tokio::test]
    async fn test_deploy_records_contract() {
        let server = MockServer::start().await;
        mock_dev_node(&server).await;
        mock_deployment(
            &server,
            "0x1",
            Some("0x5fbdb2315678afecb367f032d93f642f64180aa3"),
        )
        .await;

        let tmp = TempDir::new("kyc-deployer").unwrap();
        write_kyc_artifact(tmp.path());
        let mut ctx = DeployContext::connect(&localhost_config(&server, tmp.path()), |_| None)
            .await
            .unwrap();

        let record = deploy("KYC", &[], &mut ctx).await.unwrap();
        assert_eq!(
            record.address,
            address!("5FbDB2315678afecb367f032d93F642f64180aa3")
        );
        assert_eq!(
            record.deployer,
            address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
        );
        assert_eq!(record.network, "localhost");
        assert_eq!(record.block_number, 1);
        assert!(record.abi.function("getOwner").is_some());
        assert_eq!(ctx.store().get("KYC").unwrap(), &record);
        assert!(tmp.path().join("deployments/localhost/KYC.json").exists());

        // Same name again: one record, the latest.
        deploy("KYC", &[], &mut ctx).await.unwrap();
        assert_eq!(ctx.store().len(), 1);
    }

    #[tokio::test]
    async fn test_reverted_deployment() {
        let server = MockServer::start().await;
        mock_dev_node(&server).await;
        mock_deployment(&server, "0x0", None).await;

        let tmp = TempDir::new("kyc-deployer").unwrap();
        write_kyc_artifact(tmp.path());
        let mut ctx = DeployContext::connect(&localhost_config(&server, tmp.path()), |_| None)
            .await
            .unwrap();

        let err = deploy("KYC", &[], &mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("reverted"));
        assert!(ctx.store().is_empty());
    }

    #[tokio::test]
    async fn test_missing_contract_address() {
        let server = MockServer::start().await;
        mock_dev_node(&server).await;
        mock_deployment(&server, "0x1", None).await;

        let tmp = TempDir::new("kyc-deployer").unwrap();
        write_kyc_artifact(tmp.path());
        let mut ctx = DeployContext::connect(&localhost_config(&server, tmp.path()), |_| None)
            .await
            .unwrap();

        let err = deploy("KYC", &[], &mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("has no contract address"));
    }

    #[tokio::test]
    async fn test_missing_artifact_sends_nothing() {
        let server = MockServer::start().await;
        mock_dev_node(&server).await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"method": "eth_sendTransaction"})))
            .respond_with(rpc_result(serde_json::json!(TX_HASH)))
            .expect(0)
            .mount(&server)
            .await;

        let tmp = TempDir::new("kyc-deployer").unwrap();
        std::fs::create_dir_all(tmp.path().join("artifacts")).unwrap();
        let mut ctx = DeployContext::connect(&localhost_config(&server, tmp.path()), |_| None)
            .await
            .unwrap();

        let err = deploy("KYC", &[], &mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("No artifact found for contract 'KYC'"));
    }
}
