use bankmesh_core::BankHub;
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProviderRow<'a> {
    code: &'a str,
    name: &'a str,
    base_url: &'a str,
    auto_approve: bool,
    poll_interval_ms: u64,
    poll_attempts: u32,
}

pub fn run(hub: &BankHub) -> Result<Value, CliError> {
    let rows = hub
        .registry()
        .iter()
        .map(|provider| ProviderRow {
            code: provider.code.as_str(),
            name: &provider.name,
            base_url: &provider.base_url,
            auto_approve: provider.auto_approve,
            poll_interval_ms: provider.poll_interval_ms,
            poll_attempts: provider.poll_attempts,
        })
        .collect::<Vec<_>>();

    Ok(serde_json::to_value(rows)?)
}
