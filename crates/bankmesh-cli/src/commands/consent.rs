use bankmesh_core::{BankHub, RevokeOutcome, StatusCheck};
use serde_json::{json, Value};

use crate::cli::ConsentCommand;
use crate::error::CliError;

use super::provider_code;

pub async fn run(command: &ConsentCommand, hub: &BankHub) -> Result<Value, CliError> {
    match command {
        ConsentCommand::Create { provider, client } => {
            let provider = provider_code(hub, provider)?;
            let client = hub.resolve_client(client.as_deref());
            let record = hub.create_consent(&provider, &client).await?;
            Ok(serde_json::to_value(record)?)
        }
        ConsentCommand::Status {
            id,
            provider,
            client,
        } => {
            let check = match provider {
                // The store only lives as long as this process, so an explicit
                // provider lets operators check consents made elsewhere.
                Some(provider) => {
                    let provider = provider_code(hub, provider)?;
                    let client = hub.resolve_client(client.as_deref());
                    hub.fetch_consent_status(&provider, Some(id), &client, None)
                        .await?
                }
                None => hub.refresh_consent_status(id).await?,
            };
            status_json(&check)
        }
        ConsentCommand::Revoke { id, provider } => {
            let outcome = match provider {
                Some(provider) => {
                    let provider = provider_code(hub, provider)?;
                    hub.revoke_consent_remote(&provider, id).await
                }
                None => hub.revoke_consent(id).await?,
            };
            Ok(revoke_json(id, &outcome))
        }
    }
}

fn status_json(check: &StatusCheck) -> Result<Value, CliError> {
    let mut value = json!({ "consent": check.record() });
    if let StatusCheck::Degraded { reason, .. } = check {
        value["degraded"] = Value::Bool(true);
        value["reason"] = Value::String(reason.clone());
    }
    Ok(value)
}

fn revoke_json(consent_id: &str, outcome: &RevokeOutcome) -> Value {
    match outcome {
        RevokeOutcome::Revoked => json!({ "consentId": consent_id, "revoked": true }),
        RevokeOutcome::Failed { reason } => json!({
            "consentId": consent_id,
            "revoked": false,
            "reason": reason,
        }),
    }
}
