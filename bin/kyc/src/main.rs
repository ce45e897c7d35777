//! kyc is a CLI tool to deploy, verify and exercise the KYC contracts.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};

use cli::{Cli, Command, OutputFormat};
use kyc_deploy::{
    DeployContext, HarnessConfig, Kyc, LOCALHOST_NETWORK, LocalChain, default_steps, process_env,
    run_steps, select, tasks,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = cli.harness_config()?;

    match cli.command {
        Command::Deploy { tags } => deploy(&config, &tags).await,
        Command::Accounts => {
            let ctx = DeployContext::connect(&config, process_env).await?;
            for account in tasks::accounts(&ctx).await? {
                println!("{}", account);
            }
            Ok(())
        }
        Command::BlockNumber => {
            let ctx = DeployContext::connect(&config, process_env).await?;
            let block_number = tasks::block_number(&ctx).await?;
            println!("Current block number is: {}", block_number);
            Ok(())
        }
        Command::Node { port } => node(config, port).await,
        Command::Verify { name } => verify(&config, &name).await,
        Command::SyncFrontend { contract } => sync_frontend(config, contract).await,
        Command::Deployments { format } => deployments(&config, format).await,
        Command::AddUser {
            name,
            id,
            dob,
            account,
        } => add_user(&config, &name, &id, &dob, account).await,
        Command::Init { path } => config.save_to_file(&path),
    }
}

async fn deploy(config: &HarnessConfig, tags: &[String]) -> Result<()> {
    let mut ctx = DeployContext::connect(config, process_env).await?;
    let steps = default_steps(ctx.naming());
    let selected = select(&steps, tags);
    if selected.is_empty() {
        anyhow::bail!("No deployment step matches tags {:?}", tags);
    }

    let deployed = run_steps(&mut ctx, &selected).await?;
    for record in &deployed {
        println!("{} deployed at {}", record.contract_name, record.address);
    }
    Ok(())
}

async fn node(mut config: HarnessConfig, port: u16) -> Result<()> {
    config.network = LOCALHOST_NETWORK.to_string();
    config.local_chain.port = port;

    let profile = config.registry().get(LOCALHOST_NETWORK)?.clone();
    let chain = LocalChain::start(&config.local_chain, profile.chain_id).await?;

    println!("Started JSON-RPC server at {}", chain.url());
    println!();
    println!("Accounts");
    println!("========");
    for (index, account) in chain.accounts().iter().enumerate() {
        println!("Account #{}: {}", index, account.address);
        println!("Private Key: {}", account.private_key);
        println!();
    }

    config.rpc_url = Some(chain.url().clone());
    let mut ctx = DeployContext::connect(&config, process_env).await?;
    let steps = default_steps(ctx.naming());
    run_steps(&mut ctx, &select(&steps, &[])).await?;

    tracing::info!("Local chain running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    drop(ctx);
    chain.stop().await
}

async fn verify(config: &HarnessConfig, name: &str) -> Result<()> {
    let ctx = DeployContext::connect(config, process_env).await?;
    let verifier = ctx.verifier().with_context(|| {
        format!(
            "Verification is not available on network '{}' (development network or no explorer API key)",
            ctx.profile().name
        )
    })?;

    let record = ctx.store().get(name)?;
    let artifact = ctx.artifacts().find(name)?;
    let outcome = verifier.verify(record, &artifact).await?;
    println!("{}: {}", record.contract_name, outcome);
    Ok(())
}

async fn sync_frontend(mut config: HarnessConfig, contract: Option<String>) -> Result<()> {
    // Running this command is the opt-in.
    config.update_frontend = true;

    let ctx = DeployContext::connect(&config, process_env).await?;
    let name = contract.unwrap_or_else(|| ctx.naming().name.clone());
    let record = ctx.store().get(&name)?;
    let frontend = ctx
        .frontend()
        .context("Frontend sync is not configured")?;

    let report = frontend.sync(record, ctx.chain_id())?;
    if report.address_appended {
        println!("Recorded {} for chain {}", record.address, ctx.chain_id());
    } else {
        println!("{} was already recorded for chain {}", record.address, ctx.chain_id());
    }
    Ok(())
}

async fn deployments(config: &HarnessConfig, format: OutputFormat) -> Result<()> {
    let ctx = DeployContext::connect(config, process_env).await?;
    let records: Vec<_> = ctx.store().records().collect();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["Contract", "Address", "Block", "Deployer", "Deployed at"]);

            for record in records {
                let deployed_at = chrono::DateTime::from_timestamp(record.deployed_at, 0)
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| record.deployed_at.to_string());
                table.add_row(vec![
                    record.contract_name.clone(),
                    record.address.to_string(),
                    record.block_number.to_string(),
                    record.deployer.to_string(),
                    deployed_at,
                ]);
            }

            println!("Network: {} (chain {})", ctx.profile().name, ctx.chain_id());
            println!("{table}");
        }
    }
    Ok(())
}

async fn add_user(
    config: &HarnessConfig,
    name: &str,
    id: &str,
    dob: &str,
    account: usize,
) -> Result<()> {
    let ctx = DeployContext::connect(config, process_env).await?;
    let kyc = Kyc::load(&ctx)?;
    println!("Got contract {} at {}", ctx.naming().name, kyc.address());

    let signer = ctx.signer_at(account).await?;
    kyc.add_user(&signer, name, id, dob).await?;

    let count = kyc.record_count(signer.address()).await?;
    println!("Account {} now holds {} record(s)", signer.address(), count);
    Ok(())
}
