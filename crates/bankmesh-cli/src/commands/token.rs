use bankmesh_core::BankHub;
use serde_json::{json, Value};

use crate::cli::TokenArgs;
use crate::error::CliError;

use super::provider_code;

pub async fn run(args: &TokenArgs, hub: &BankHub) -> Result<Value, CliError> {
    let provider = provider_code(hub, &args.provider)?;
    hub.ensure_token(&provider).await?;
    let remaining = hub.tokens().remaining(&provider).await;

    Ok(json!({
        "provider": provider,
        "valid": remaining.is_some(),
        "expiresInSecs": remaining.map(|left| left.as_secs()),
    }))
}
