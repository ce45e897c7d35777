//! Tagged deployment steps.
//!
//! Steps run in declaration order. A run can be restricted to the steps carrying
//! any of a set of tags; the selection keeps declaration order.

use anyhow::{Context, Result};

use crate::{
    config::ContractNaming, context::DeployContext, deployer, deployments::DeploymentRecord,
};

/// Tag carried by every default step.
pub const TAG_ALL: &str = "all";

/// Tag of the frontend step.
pub const TAG_FRONTEND: &str = "frontend";

/// What a step does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Deploy a contract, then verify it when the network supports it.
    DeployContract { contract: String, args: Vec<String> },
    /// Sync the deployment of a contract into the frontend, when enabled.
    UpdateFrontend { contract: String },
}

/// A named deployment step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployStep {
    pub name: String,
    pub tags: Vec<String>,
    pub action: StepAction,
}

impl DeployStep {
    pub fn new(name: impl Into<String>, tags: &[&str], action: StepAction) -> Self {
        Self {
            name: name.into(),
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
            action,
        }
    }

    /// Whether the step carries any of `tags`.
    pub fn matches(&self, tags: &[String]) -> bool {
        tags.iter().any(|tag| self.tags.contains(tag))
    }
}

/// Deploy the contract, then update the frontend.
pub fn default_steps(naming: &ContractNaming) -> Vec<DeployStep> {
    vec![
        DeployStep::new(
            format!("02-deploy-{}", naming.name.to_lowercase()),
            &[TAG_ALL, naming.name.as_str()],
            StepAction::DeployContract {
                contract: naming.name.clone(),
                args: naming.constructor_args.clone(),
            },
        ),
        DeployStep::new(
            "99-update-frontend",
            &[TAG_ALL, TAG_FRONTEND, naming.name.as_str()],
            StepAction::UpdateFrontend {
                contract: naming.name.clone(),
            },
        ),
    ]
}

/// Steps matching any of `tags`, in declaration order. No tags selects every step.
pub fn select<'a>(steps: &'a [DeployStep], tags: &[String]) -> Vec<&'a DeployStep> {
    steps
        .iter()
        .filter(|step| tags.is_empty() || step.matches(tags))
        .collect()
}

/// Run `steps` one after another, stopping at the first failure.
///
/// Returns the deployments made.
pub async fn run_steps(
    ctx: &mut DeployContext,
    steps: &[&DeployStep],
) -> Result<Vec<DeploymentRecord>> {
    let mut deployed = Vec::new();

    for step in steps {
        tracing::info!(step = %step.name, "----------------------------------------------------");

        match &step.action {
            StepAction::DeployContract { contract, args } => {
                let record = deployer::deploy(contract, args, ctx)
                    .await
                    .with_context(|| format!("Step {} failed", step.name))?;
                verify_best_effort(ctx, contract, &record).await;
                deployed.push(record);
            }
            StepAction::UpdateFrontend { contract } => {
                let Some(frontend) = ctx.frontend() else {
                    tracing::debug!(step = %step.name, "Frontend update disabled, skipping");
                    continue;
                };
                let record = ctx
                    .store()
                    .get(contract)
                    .with_context(|| format!("Step {} failed", step.name))?;
                frontend
                    .sync(record, ctx.chain_id())
                    .with_context(|| format!("Step {} failed", step.name))?;
            }
        }
    }

    Ok(deployed)
}

/// Verify a fresh deployment when the context has a verifier. Failures are logged only.
async fn verify_best_effort(ctx: &DeployContext, contract: &str, record: &DeploymentRecord) {
    let Some(verifier) = ctx.verifier() else {
        return;
    };

    let result = match ctx.artifacts().find(contract) {
        Ok(artifact) => verifier.verify(record, &artifact).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        tracing::warn!(
            contract = %record.contract_name,
            address = %record.address,
            error = %format!("{:#}", e),
            "Verification failed, continuing"
        );
    }
}
