//! Behavior tests for multi-provider aggregation.
//!
//! Verifies failure isolation between providers, tagging of merged records,
//! and the limits applied to one provider's share of the result.

use std::sync::Arc;

use bankmesh_core::{
    AggregationLimits, BankHub, BankHubBuilder, ClientMapping, ConsentStatus, HttpMethod,
    HubConfig, ProviderCode, ProviderOutcome, ProviderRegistry, ScriptedHttpClient,
};
use serde_json::{json, Value};

const VBANK: &str = "https://vbank.open.bankingapi.ru";
const ABANK: &str = "https://abank.open.bankingapi.ru";
const SBANK: &str = "https://sbank.open.bankingapi.ru";

fn hub(http: &Arc<ScriptedHttpClient>, limits: AggregationLimits) -> BankHub {
    BankHubBuilder::new()
        .with_registry(ProviderRegistry::sandbox("team042", "secret"))
        .with_config(HubConfig::for_party("team042").with_limits(limits))
        .with_http_client(http.clone())
        .build()
}

fn grant_tokens(http: &ScriptedHttpClient, base: &str) {
    http.respond_json(
        HttpMethod::Post,
        format!("{base}/auth/bank-token"),
        200,
        json!({ "access_token": "tok", "expires_in": 3600 }),
    );
}

fn approve_consents(http: &ScriptedHttpClient, base: &str, consent_id: &str) {
    http.respond_json(
        HttpMethod::Post,
        format!("{base}/account-consents/request"),
        200,
        json!({ "consentId": consent_id, "status": "approved" }),
    );
}

fn serve_accounts(http: &ScriptedHttpClient, base: &str, body: Value) {
    http.respond_json(HttpMethod::Get, format!("{base}/accounts"), 200, body);
}

fn serve_transactions(http: &ScriptedHttpClient, base: &str, account: &str, body: Value) {
    http.respond_json(
        HttpMethod::Get,
        format!("{base}/accounts/{account}/transactions"),
        200,
        body,
    );
}

/// Fully working vbank with two accounts and three transactions.
fn healthy_vbank(http: &ScriptedHttpClient) {
    grant_tokens(http, VBANK);
    approve_consents(http, VBANK, "vc1");
    serve_accounts(
        http,
        VBANK,
        json!({ "items": [
            { "accountId": "v-1", "currency": "RUB" },
            { "accountId": "v-2", "currency": "RUB" }
        ] }),
    );
    serve_transactions(
        http,
        VBANK,
        "v-1",
        json!({ "items": [{ "amount": 100 }, { "amount": -40 }] }),
    );
    serve_transactions(http, VBANK, "v-2", json!([{ "amount": 7 }]));
}

fn status_of<'a>(outcomes: &'a [ProviderOutcome], provider: &str) -> &'a ProviderOutcome {
    outcomes
        .iter()
        .find(|outcome| outcome.provider() == provider)
        .unwrap_or_else(|| panic!("no outcome for {provider}"))
}

// =============================================================================
// Failure isolation
// =============================================================================

#[tokio::test]
async fn when_one_provider_token_fails_other_providers_are_still_merged() {
    // Given: vbank works, abank rejects credentials, sbank approves manually
    let http = Arc::new(ScriptedHttpClient::new());
    healthy_vbank(&http);
    http.respond_json(
        HttpMethod::Post,
        format!("{ABANK}/auth/bank-token"),
        401,
        json!({ "detail": "bad secret" }),
    );
    grant_tokens(&http, SBANK);
    http.respond_json(
        HttpMethod::Post,
        format!("{SBANK}/account-consents/request"),
        200,
        json!({ "request_id": "r9", "status": "pending" }),
    );
    let hub = hub(&http, AggregationLimits::default());

    // When: All three providers are aggregated for one client
    let result = hub.aggregate(&hub.resolve_clients(None), false).await;

    // Then: One entry per provider, in registry order
    let providers = result
        .consents
        .iter()
        .map(ProviderOutcome::provider)
        .collect::<Vec<_>>();
    assert_eq!(providers, vec!["abank", "sbank", "vbank"]);

    // And: abank is reported as a failure instead of failing the call
    assert!(status_of(&result.consents, "abank").is_failed());

    // And: sbank contributes its pending status but no data
    assert_eq!(
        status_of(&result.consents, "sbank"),
        &ProviderOutcome::Status {
            provider: String::from("sbank"),
            status: ConsentStatus::Pending,
        }
    );

    // And: vbank data is merged and tagged
    assert_eq!(result.accounts.len(), 2);
    assert_eq!(result.transactions.len(), 3);
    assert!(result
        .accounts
        .iter()
        .all(|account| account.provider.as_str() == "vbank"));
    let account_tags = result
        .transactions
        .iter()
        .map(|tx| tx.account_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(account_tags, vec!["v-1", "v-1", "v-2"]);
}

#[tokio::test]
async fn when_provider_data_call_fails_provider_becomes_error_entry() {
    // Given: vbank works, abank has an approved consent but its accounts API is down
    let http = Arc::new(ScriptedHttpClient::new());
    healthy_vbank(&http);
    grant_tokens(&http, ABANK);
    approve_consents(&http, ABANK, "ac1");
    http.respond_json(HttpMethod::Get, format!("{ABANK}/accounts"), 502, json!({}));
    let hub = hub(&http, AggregationLimits::default());
    let mapping = ClientMapping::from([
        (String::from("vbank"), String::from("team042-1")),
        (String::from("abank"), String::from("team042-1")),
    ]);

    // When: Both are aggregated
    let result = hub.aggregate(&mapping, false).await;

    // Then: abank is an error entry, vbank data is intact
    match status_of(&result.consents, "abank") {
        ProviderOutcome::Failed { error, .. } => assert!(error.contains("502")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(result.accounts.len(), 2);
    assert_eq!(result.consents.len(), 2);
}

#[tokio::test]
async fn when_mapping_names_unknown_provider_it_is_reported_not_fetched() {
    // Given: A mapping with a registered and an unregistered provider
    let http = Arc::new(ScriptedHttpClient::new());
    healthy_vbank(&http);
    let hub = hub(&http, AggregationLimits::default());
    let mapping = ClientMapping::from([
        (String::from("vbank"), String::from("team042-1")),
        (String::from("zbank"), String::from("team042-1")),
    ]);

    // When: Aggregated
    let result = hub.aggregate(&mapping, false).await;

    // Then: zbank is a not-found entry and no request went to it
    match status_of(&result.consents, "zbank") {
        ProviderOutcome::Failed { error, .. } => assert!(error.contains("not found")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(http.calls().iter().all(|call| !call.url.contains("zbank")));
    assert_eq!(result.accounts.len(), 2);
}

#[tokio::test]
async fn when_client_id_is_empty_provider_is_skipped() {
    // Given: abank mapped to an empty client id
    let http = Arc::new(ScriptedHttpClient::new());
    healthy_vbank(&http);
    let hub = hub(&http, AggregationLimits::default());
    let mapping = ClientMapping::from([
        (String::from("vbank"), String::from("team042-1")),
        (String::from("abank"), String::from("  ")),
    ]);

    // When: Aggregated
    let result = hub.aggregate(&mapping, false).await;

    // Then: abank neither appears nor receives calls
    assert_eq!(result.consents.len(), 1);
    assert!(http.calls().iter().all(|call| !call.url.starts_with(ABANK)));
}

#[tokio::test]
async fn when_consent_is_not_active_no_account_data_is_requested() {
    // Given: sbank only has a pending consent
    let http = Arc::new(ScriptedHttpClient::new());
    grant_tokens(&http, SBANK);
    http.respond_json(
        HttpMethod::Post,
        format!("{SBANK}/account-consents/request"),
        200,
        json!({ "request_id": "r9", "status": "pending" }),
    );
    let hub = hub(&http, AggregationLimits::default());
    let mapping = ClientMapping::from([(String::from("sbank"), String::from("team042-1"))]);

    // When: Aggregated
    let result = hub.aggregate(&mapping, false).await;

    // Then: Status is reported and accounts were never requested
    assert!(result.accounts.is_empty());
    assert!(result.transactions.is_empty());
    assert_eq!(http.call_count(HttpMethod::Get, &format!("{SBANK}/accounts")), 0);
}

// =============================================================================
// Limits and output shape
// =============================================================================

#[tokio::test]
async fn when_provider_has_more_accounts_than_limit_extra_accounts_are_dropped() {
    // Given: vbank with three accounts and an account limit of two
    let http = Arc::new(ScriptedHttpClient::new());
    grant_tokens(&http, VBANK);
    approve_consents(&http, VBANK, "vc1");
    serve_accounts(&http, VBANK, json!([{ "id": "a" }, { "id": "b" }, { "id": "c" }]));
    for account in ["a", "b", "c"] {
        serve_transactions(&http, VBANK, account, json!([{ "amount": 1 }]));
    }
    let limits = AggregationLimits {
        account_limit: 2,
        transaction_limit: 25,
        transaction_concurrency: 2,
    };
    let hub = hub(&http, limits);
    let mapping = ClientMapping::from([(String::from("vbank"), String::from("team042-1"))]);

    // When: Aggregated
    let result = hub.aggregate(&mapping, false).await;

    // Then: Only the first two accounts and their transactions are kept
    assert_eq!(result.accounts.len(), 2);
    assert_eq!(result.transactions.len(), 2);
    let third = format!("{VBANK}/accounts/c/transactions");
    assert_eq!(http.call_count(HttpMethod::Get, &third), 0);

    // And: Transaction pages were requested with the configured limit
    let page = http
        .calls()
        .into_iter()
        .find(|call| call.url.ends_with("/accounts/a/transactions"))
        .expect("transactions requested");
    assert_eq!(page.query_value("limit"), Some("25"));
    assert_eq!(page.headers.get("x-consent-id").map(String::as_str), Some("vc1"));
}

#[tokio::test]
async fn when_result_is_serialized_consents_carry_status_or_error() {
    // Given: One healthy provider and one unknown one
    let http = Arc::new(ScriptedHttpClient::new());
    healthy_vbank(&http);
    let hub = hub(&http, AggregationLimits::default());
    let mapping = ClientMapping::from([
        (String::from("vbank"), String::from("team042-1")),
        (String::from("qbank"), String::from("team042-1")),
    ]);

    // When: The aggregate is serialized
    let value = serde_json::to_value(hub.aggregate(&mapping, false).await).expect("serializable");

    // Then: Each consent entry has provider plus status or error
    assert_eq!(value["consents"][0], json!({ "provider": "vbank", "status": "active" }));
    assert_eq!(value["consents"][1]["provider"], "qbank");
    assert!(value["consents"][1]["error"].is_string());

    // And: Records carry their provider and account tags
    assert_eq!(value["accounts"][0]["provider"], "vbank");
    assert_eq!(value["accounts"][0]["accountId"], "v-1");
    assert_eq!(value["accounts"][0]["currency"], "RUB");
    assert_eq!(value["transactions"][0]["accountId"], "v-1");
    assert_eq!(value["transactions"][0]["amount"], 100);
}

#[tokio::test]
async fn when_gathering_one_provider_snapshot_contains_consent_and_data() {
    // Given: A healthy vbank
    let http = Arc::new(ScriptedHttpClient::new());
    healthy_vbank(&http);
    let hub = hub(&http, AggregationLimits::default());

    // When: Only vbank is gathered
    let snapshot = hub
        .gather_provider(
            &ProviderCode::parse("vbank").expect("valid"),
            "team042-1",
            false,
        )
        .await
        .expect("snapshot");

    // Then: Consent, accounts, and transactions all belong to vbank
    assert_eq!(snapshot.consent.consent_id.as_deref(), Some("vc1"));
    assert_eq!(snapshot.accounts.len(), 2);
    assert_eq!(snapshot.transactions.len(), 3);
}
