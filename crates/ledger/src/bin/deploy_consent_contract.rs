//! Deploys the consent contract if none is configured and records its address.
//!
//! Reads `WEB3_PROVIDER`, `ADMIN_PRIVATE_KEY`, `CONTRACT_ADDRESS` and
//! `CONTRACT_ARTIFACT` from the environment, falling back to the env file for
//! unset variables. A second run therefore picks up the address the first
//! run persisted and skips deployment. The artifact must carry bytecode; the
//! embedded ABI alone cannot be deployed.
//!
//! Usage:
//!   deploy-consent-contract [--env-file <path>] [--no-persist]

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use ehealth_ledger::{
    LedgerGateway, ensure_deployed, load_gateway_config, persist_contract_address,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deploy-consent-contract")]
#[command(about = "Deploy the E-Health consent contract and persist its address", long_about = None)]
struct Cli {
    /// Env file read for unset variables and updated with `CONTRACT_ADDRESS=`
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Print the address without touching the env file
    #[arg(long)]
    no_persist: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "deployment aborted");
            eprintln!("ERROR: {e}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_gateway_config(&cli.env_file)?;
    let gateway = LedgerGateway::connect(config).await?;
    let address = ensure_deployed(&gateway).await?;

    if !cli.no_persist {
        persist_contract_address(&cli.env_file, address)?;
    }
    println!("DEPLOYED_ADDR:{}", address.to_checksum());
    Ok(())
}
