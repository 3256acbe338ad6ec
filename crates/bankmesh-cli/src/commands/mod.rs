mod aggregate;
mod consent;
mod providers;
mod token;

use bankmesh_core::{BankHub, BankHubBuilder, ProviderCode};
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<Value, CliError> {
    let hub = BankHubBuilder::new().with_env()?.build();

    match &cli.command {
        Command::Providers => providers::run(&hub),
        Command::Token(args) => token::run(args, &hub).await,
        Command::Consent(args) => consent::run(&args.command, &hub).await,
        Command::Aggregate(args) => aggregate::run(args, &hub).await,
    }
}

fn provider_code(hub: &BankHub, raw: &str) -> Result<ProviderCode, CliError> {
    let code = ProviderCode::parse(raw)?;
    hub.registry().require(&code)?;
    Ok(code)
}
