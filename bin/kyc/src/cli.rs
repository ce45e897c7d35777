use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, builder::FalseyValueParser};
use kyc_deploy::HarnessConfig;
use tracing::level_filters::LevelFilter;
use url::Url;

/// How stored deployments are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "kyc")]
#[command(
    author,
    version,
    about = "Deploy, verify and test the KYC contracts"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "KYC_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// The network to run against (hardhat, localhost, goerli, sepolia, polygon_mumbai or
    /// one declared in the configuration file).
    #[arg(short, long, global = true, env = "KYC_NETWORK")]
    pub network: Option<String>,

    /// Path to a Kyc.toml configuration file.
    ///
    /// Defaults to ./Kyc.toml when it exists.
    #[arg(long, alias = "conf", global = true, env = "KYC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Private key of the deployer. Required on live networks.
    #[arg(long, global = true, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// RPC endpoint overriding the network's own.
    #[arg(long, global = true, env = "RPC_URL")]
    pub rpc_url: Option<Url>,

    /// Explorer API key overriding the network's environment variable.
    #[arg(long, global = true, hide_env_values = true)]
    pub explorer_api_key: Option<String>,

    /// Write the deployed address and ABI into the frontend project.
    ///
    /// From the environment any value other than an empty or falsey one (`0`, `false`,
    /// `no`, `off`) enables it.
    #[arg(
        long,
        global = true,
        env = "UPDATE_FRONT_END",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new()
    )]
    pub update_frontend: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the deployment steps.
    Deploy {
        /// Only run the steps carrying one of these tags.
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Prints the list of accounts.
    Accounts,

    /// Prints the current block number.
    BlockNumber,

    /// Start a local chain, deploy every step to it and keep it running until Ctrl+C.
    Node {
        /// Port to listen on.
        #[arg(long, default_value_t = kyc_deploy::chain::DEFAULT_PORT)]
        port: u16,
    },

    /// Verify a stored deployment on the network's block explorer.
    Verify {
        /// Name of the deployed contract.
        name: String,
    },

    /// Write a stored deployment into the frontend project.
    SyncFrontend {
        /// Name of the deployed contract. Defaults to the configured contract.
        #[arg(long)]
        contract: Option<String>,
    },

    /// List the stored deployments of the network.
    Deployments {
        #[arg(long, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Register a user on the deployed KYC contract and print the account's record count.
    AddUser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        id: String,
        /// Date of birth.
        #[arg(long)]
        dob: String,
        /// Index of the sending account. Index 0 is the deployer.
        #[arg(long, default_value_t = 0)]
        account: usize,
    },

    /// Write the effective configuration to a TOML file.
    Init {
        /// Destination file.
        #[arg(default_value = kyc_deploy::CONFIG_FILENAME)]
        path: PathBuf,
    },
}

impl Cli {
    /// Load the configuration and apply the command line overrides.
    pub fn harness_config(&self) -> anyhow::Result<HarnessConfig> {
        let mut config = HarnessConfig::load(self.config.as_deref())?;

        if let Some(network) = &self.network {
            config.network = network.clone();
        }
        if let Some(private_key) = &self.private_key {
            config.private_key = Some(private_key.clone());
        }
        if let Some(rpc_url) = &self.rpc_url {
            config.rpc_url = Some(rpc_url.clone());
        }
        if let Some(api_key) = &self.explorer_api_key {
            config.explorer_api_key = Some(api_key.clone());
        }
        if self.update_frontend {
            config.update_frontend = true;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Held by tests that parse the command line, since parsing reads the environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_parse_deploy_tags() {
        let _env = ENV_LOCK.lock().unwrap();
        let cli = Cli::try_parse_from(["kyc", "--network", "localhost", "deploy", "--tags", "KYC,frontend"])
            .unwrap();
        assert_eq!(cli.network.as_deref(), Some("localhost"));
        match cli.command {
            Command::Deploy { tags } => assert_eq!(tags, vec!["KYC", "frontend"]),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_add_user() {
        let _env = ENV_LOCK.lock().unwrap();
        let cli = Cli::try_parse_from([
            "kyc",
            "add-user",
            "--name",
            "Muhammad Akmal bin Anuar",
            "--id",
            "lol",
            "--dob",
            "22/3/2000",
            "--account",
            "1",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::AddUser { account: 1, .. }));
    }

    #[test]
    fn test_update_frontend_from_env() {
        let _env = ENV_LOCK.lock().unwrap();
        // SAFETY: every test parsing the environment holds ENV_LOCK.
        unsafe { std::env::set_var("UPDATE_FRONT_END", "1") };
        let enabled = Cli::try_parse_from(["kyc", "accounts"]);

        unsafe { std::env::set_var("UPDATE_FRONT_END", "no") };
        let disabled = Cli::try_parse_from(["kyc", "accounts"]);

        unsafe { std::env::remove_var("UPDATE_FRONT_END") };

        assert!(enabled.unwrap().update_frontend);
        assert!(!disabled.unwrap().update_frontend);
    }

    #[test]
    fn test_output_format() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::Table.to_string(), "table");
    }
}
