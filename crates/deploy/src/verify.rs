//! Source verification on Etherscan-compatible block explorers.

use std::time::Duration;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use backon::{ConstantBuilder, Retryable};
use serde::Deserialize;
use url::Url;

use crate::{
    artifacts::ContractArtifact, deployments::DeploymentRecord, network::ExplorerConfig,
};

/// Explorer message while it has not indexed the deployed bytecode yet.
const UNINDEXED_MARKER: &str = "unable to locate contractcode";

/// Explorer messages meaning the contract is verified already.
const ALREADY_VERIFIED_MARKERS: [&str; 2] = ["already verified", "already been verified"];

/// Result of a successful verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum VerifyOutcome {
    Verified,
    AlreadyVerified,
}

/// Envelope of every explorer API response.
#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    #[serde(default)]
    message: String,
    result: String,
}

impl ExplorerResponse {
    fn is_ok(&self) -> bool {
        self.status == "1"
    }
}

fn is_already_verified(message: &str) -> bool {
    let message = message.to_lowercase();
    ALREADY_VERIFIED_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Submission error worth retrying.
#[derive(Debug)]
struct NotIndexedYet(String);

impl std::fmt::Display for NotIndexedYet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Explorer has not indexed the contract yet: {}", self.0)
    }
}

impl std::error::Error for NotIndexedYet {}

/// What a submission returned.
enum Submission {
    Guid(String),
    AlreadyVerified,
}

/// Client of an explorer verification API.
#[derive(Debug, Clone)]
pub struct Verifier {
    client: reqwest::Client,
    api_url: Url,
    api_key: String,
    browser_url: String,
    retry_delay: Duration,
    max_retries: usize,
    poll_interval: Duration,
    timeout: Duration,
}

impl Verifier {
    pub fn new(explorer: &ExplorerConfig, api_key: impl Into<String>) -> Result<Self> {
        let api_url = Url::parse(&explorer.api_url)
            .with_context(|| format!("Invalid explorer API URL '{}'", explorer.api_url))?;

        Ok(Self {
            client: crate::rpc::create_client()?,
            api_url,
            api_key: api_key.into(),
            browser_url: explorer.browser_url.clone(),
            retry_delay: Duration::from_secs(10),
            max_retries: 6,
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        })
    }

    /// Set the delay between submissions and between status polls.
    pub fn with_intervals(mut self, retry_delay: Duration, poll_interval: Duration) -> Self {
        self.retry_delay = retry_delay;
        self.poll_interval = poll_interval;
        self
    }

    /// Verify the source of a deployment.
    pub async fn verify(
        &self,
        record: &DeploymentRecord,
        artifact: &ContractArtifact,
    ) -> Result<VerifyOutcome> {
        tracing::info!(
            contract = %record.contract_name,
            address = %record.address,
            "Verifying contract..."
        );

        let build_info = artifact.build_info()?;
        let source_code = serde_json::to_string(&build_info.input)
            .context("Failed to serialize compiler input")?;
        let constructor_args = hex::encode(artifact.encode_constructor(&record.constructor_args)?);
        let address = record.address.to_string();
        let compiler_version = format!("v{}", build_info.solc_long_version);
        let contract_name = artifact.fully_qualified_name();

        let form = [
            ("apikey", self.api_key.as_str()),
            ("module", "contract"),
            ("action", "verifysourcecode"),
            ("contractaddress", address.as_str()),
            ("sourceCode", source_code.as_str()),
            ("codeformat", "solidity-standard-json-input"),
            ("contractname", contract_name.as_str()),
            ("compilerversion", compiler_version.as_str()),
            // Misspelled in the explorer API.
            ("constructorArguements", constructor_args.as_str()),
        ];

        let submission = (|| self.submit(&form))
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.retry_delay)
                    .with_max_times(self.max_retries),
            )
            .when(|e: &anyhow::Error| e.downcast_ref::<NotIndexedYet>().is_some())
            .notify(|e: &anyhow::Error, delay: Duration| {
                tracing::debug!(error = %e, ?delay, "Retrying verification submission");
            })
            .await?;

        let outcome = match submission {
            Submission::AlreadyVerified => VerifyOutcome::AlreadyVerified,
            Submission::Guid(guid) => self.wait_for_status(&guid).await?,
        };

        tracing::info!(
            contract = %record.contract_name,
            %outcome,
            url = %self.address_url(&record.address),
            "Contract verified"
        );
        Ok(outcome)
    }

    fn address_url(&self, address: &Address) -> String {
        format!("{}/address/{}", self.browser_url.trim_end_matches('/'), address)
    }

    async fn submit(&self, form: &[(&str, &str)]) -> Result<Submission> {
        let response: ExplorerResponse = self
            .client
            .post(self.api_url.clone())
            .form(form)
            .send()
            .await
            .context("Failed to send verification request")?
            .json()
            .await
            .context("Failed to parse verification response")?;

        if response.is_ok() {
            tracing::debug!(guid = %response.result, "Verification submitted");
            return Ok(Submission::Guid(response.result));
        }

        if is_already_verified(&response.result) {
            return Ok(Submission::AlreadyVerified);
        }

        if response.result.to_lowercase().contains(UNINDEXED_MARKER) {
            return Err(NotIndexedYet(response.result).into());
        }

        anyhow::bail!(
            "Verification rejected: {} ({})",
            response.result,
            response.message
        )
    }

    async fn wait_for_status(&self, guid: &str) -> Result<VerifyOutcome> {
        crate::rpc::poll_until(
            "verification status",
            self.timeout,
            self.poll_interval,
            || self.check_status(guid),
        )
        .await
    }

    async fn check_status(&self, guid: &str) -> Result<Option<VerifyOutcome>> {
        let response: ExplorerResponse = self
            .client
            .get(self.api_url.clone())
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("module", "contract"),
                ("action", "checkverifystatus"),
                ("guid", guid),
            ])
            .send()
            .await
            .context("Failed to send verification status request")?
            .json()
            .await
            .context("Failed to parse verification status response")?;

        let result = response.result.to_lowercase();
        tracing::debug!(guid, status = %response.result, "Verification status");

        if is_already_verified(&result) {
            return Ok(Some(VerifyOutcome::AlreadyVerified));
        }
        if response.is_ok() || result.starts_with("pass") {
            return Ok(Some(VerifyOutcome::Verified));
        }
        if result.contains("pending") || result.contains("in queue") {
            return Ok(None);
        }

        anyhow::bail!("Verification failed: {}", response.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::json_abi::JsonAbi;
    use alloy_core::primitives::{B256, Bytes, address};
    use std::path::Path;
    use tempdir::TempDir;
    use wiremock::matchers::{body_string_contains, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn explorer_reply(status: &str, result: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": status,
            "message": if status == "1" { "OK" } else { "NOTOK" },
            "result": result
        }))
    }

    /// Artifact with a debug file and build info, as Hardhat writes them.
    fn artifact_in(root: &Path) -> ContractArtifact {
        let dir = root.join("contracts/KYC.sol");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::create_dir_all(root.join("build-info")).unwrap();
        let path = dir.join("KYC.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "contractName": "KYC",
                "sourceName": "contracts/KYC.sol",
                "abi": [],
                "bytecode": "0x6080"
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.join("KYC.dbg.json"),
            r#"{"buildInfo":"../../build-info/b1.json"}"#,
        )
        .unwrap();
        std::fs::write(
            root.join("build-info/b1.json"),
            r#"{"solcLongVersion":"0.8.9+commit.e5eed63a","input":{"language":"Solidity"}}"#,
        )
        .unwrap();
        ContractArtifact::load(&path).unwrap()
    }

    fn record() -> DeploymentRecord {
        DeploymentRecord {
            contract_name: "KYC".to_string(),
            address: address!("5FbDB2315678afecb367f032d93F642f64180aa3"),
            constructor_args: vec![],
            network: "sepolia".to_string(),
            chain_id: 11155111,
            transaction_hash: B256::ZERO,
            block_number: 1,
            deployer: Address::ZERO,
            abi: JsonAbi::default(),
            deployed_at: 0,
        }
    }

    fn verifier(server: &MockServer) -> Verifier {
        let explorer = ExplorerConfig {
            api_url: format!("{}/api", server.uri()),
            browser_url: "https://sepolia.etherscan.io".to_string(),
            api_key_env: "ETHERSCAN_API_KEY".to_string(),
        };
        Verifier::new(&explorer, "KEY")
            .unwrap()
            .with_intervals(Duration::from_millis(10), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_verify_polls_until_pass() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("action=verifysourcecode"))
            .and(body_string_contains("contractname=contracts%2FKYC.sol%3AKYC"))
            .and(body_string_contains("compilerversion=v0.8.9%2Bcommit.e5eed63a"))
            .respond_with(explorer_reply("1", "guid-1"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("action", "checkverifystatus"))
            .and(query_param("guid", "guid-1"))
            .respond_with(explorer_reply("0", "Pending in queue"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("action", "checkverifystatus"))
            .respond_with(explorer_reply("1", "Pass - Verified"))
            .mount(&server)
            .await;

        let tmp = TempDir::new("kyc-verify").unwrap();
        let outcome = verifier(&server)
            .verify(&record(), &artifact_in(tmp.path()))
            .await
            .unwrap();
        assert_eq!(outcome, VerifyOutcome::Verified);
    }

    #[tokio::test]
    async fn test_already_verified_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(explorer_reply("0", "Contract source code already verified"))
            .mount(&server)
            .await;

        let tmp = TempDir::new("kyc-verify").unwrap();
        let outcome = verifier(&server)
            .verify(&record(), &artifact_in(tmp.path()))
            .await
            .unwrap();
        assert_eq!(outcome, VerifyOutcome::AlreadyVerified);
    }

    #[tokio::test]
    async fn test_submission_retried_until_indexed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(explorer_reply(
                "0",
                "Unable to locate ContractCode at 0x5fbdb2315678afecb367f032d93f642f64180aa3",
            ))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(explorer_reply("1", "guid-2"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(explorer_reply("0", "Already Verified"))
            .mount(&server)
            .await;

        let tmp = TempDir::new("kyc-verify").unwrap();
        let outcome = verifier(&server)
            .verify(&record(), &artifact_in(tmp.path()))
            .await
            .unwrap();
        assert_eq!(outcome, VerifyOutcome::AlreadyVerified);
    }

    #[tokio::test]
    async fn test_rejection_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(explorer_reply("0", "Invalid API Key"))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = TempDir::new("kyc-verify").unwrap();
        let err = verifier(&server)
            .verify(&record(), &artifact_in(tmp.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid API Key"));
    }

    #[tokio::test]
    async fn test_failed_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(explorer_reply("1", "guid-3"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(explorer_reply("0", "Fail - Unable to verify"))
            .mount(&server)
            .await;

        let tmp = TempDir::new("kyc-verify").unwrap();
        let err = verifier(&server)
            .verify(&record(), &artifact_in(tmp.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Fail - Unable to verify"));
    }

    #[test]
    fn test_missing_build_info() {
        let tmp = TempDir::new("kyc-verify").unwrap();
        let artifact = ContractArtifact {
            contract_name: "KYC".to_string(),
            source_name: None,
            abi: JsonAbi::default(),
            bytecode: Bytes::from_static(&[0x60]),
            path: tmp.path().join("KYC.json"),
        };
        assert!(artifact.build_info().is_err());
    }
}
