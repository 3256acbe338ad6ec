use bankmesh_core::{parse_mapping_entry, BankHub, ProviderCode};
use serde_json::Value;

use crate::cli::AggregateArgs;
use crate::error::CliError;

pub async fn run(args: &AggregateArgs, hub: &BankHub) -> Result<Value, CliError> {
    let mut mapping = hub.resolve_clients(args.client.as_deref());
    for raw in &args.mappings {
        let (provider, client) = parse_mapping_entry(raw)?;
        let provider = ProviderCode::parse(&provider)?;
        mapping.insert(provider.to_string(), client);
    }

    let result = hub.aggregate(&mapping, args.force_new).await;
    Ok(serde_json::to_value(result)?)
}
