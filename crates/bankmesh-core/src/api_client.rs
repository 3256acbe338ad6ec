//! Request adapter for the provider open-banking endpoints.
//!
//! | Operation | Method | Path |
//! |-----------|--------|------|
//! | token exchange | POST | `/auth/bank-token` |
//! | consent request | POST | `/account-consents/request` |
//! | consent status | GET | `/account-consents/{id}` |
//! | consent revoke | DELETE | `/account-consents/{id}` |
//! | accounts | GET | `/accounts` |
//! | transactions | GET | `/accounts/{id}/transactions` |

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::normalize::{self, ConsentPayload, NormalizeError, TokenGrant};
use crate::registry::ProviderDescriptor;
use crate::{Account, BankError, ProviderCode, Transaction};

/// Permission scope requested with every account consent.
pub const CONSENT_PERMISSIONS: [&str; 3] = ["ReadAccountsDetail", "ReadBalances", "ReadTransactions"];

const REQUESTING_PARTY_HEADER: &str = "X-Requesting-Bank";
const CONSENT_HEADER: &str = "X-Consent-Id";

/// Limit/offset window for transaction listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    pub const fn first(limit: usize) -> Self {
        Self { limit, offset: 0 }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::first(50)
    }
}

/// Credentials for one data call: bearer token plus the consent it runs under.
#[derive(Debug, Clone, Copy)]
pub struct Grant<'a> {
    pub token: &'a str,
    pub consent_id: &'a str,
    pub client_id: &'a str,
}

#[derive(Clone)]
pub struct ProviderApiClient {
    http: Arc<dyn HttpClient>,
    requesting_party: String,
    timeout_ms: u64,
}

impl ProviderApiClient {
    pub fn new(
        http: Arc<dyn HttpClient>,
        requesting_party: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        Self {
            http,
            requesting_party: requesting_party.into(),
            timeout_ms,
        }
    }

    /// Exchange client credentials for a provider access token.
    ///
    /// Credentials go out as query parameters first; a 4xx/5xx answer triggers
    /// one retry with the same credentials as a JSON body.
    pub async fn exchange_token(
        &self,
        provider: &ProviderDescriptor,
    ) -> Result<TokenGrant, BankError> {
        let url = provider.url("/auth/bank-token");
        let as_query = HttpRequest::post(&url)
            .with_query("client_id", &provider.client_id)
            .with_query("client_secret", &provider.client_secret)
            .with_timeout_ms(self.timeout_ms);

        let mut response = self.send(&provider.code, as_query).await?;
        if response.status >= 400 {
            warn!(
                provider = %provider.code,
                status = response.status,
                "token exchange with query credentials rejected, retrying with JSON body"
            );
            let as_body = HttpRequest::post(&url)
                .with_json(&json!({
                    "client_id": provider.client_id,
                    "client_secret": provider.client_secret,
                }))
                .with_timeout_ms(self.timeout_ms);
            response = self.send(&provider.code, as_body).await?;
        }

        if response.status >= 400 {
            return Err(BankError::Auth {
                provider: provider.code.clone(),
                status: Some(response.status),
                body: response.body,
            });
        }

        normalize::parse_body(&response.body)
            .and_then(|value| normalize::token_grant(&value))
            .map_err(|error| BankError::Auth {
                provider: provider.code.clone(),
                status: Some(response.status),
                body: error.to_string(),
            })
    }

    pub async fn request_consent(
        &self,
        provider: &ProviderDescriptor,
        token: &str,
        client_id: &str,
    ) -> Result<ConsentPayload, BankError> {
        let request = self
            .authorized(HttpRequest::post(provider.url("/account-consents/request")), token)
            .with_json(&json!({
                "client_id": client_id,
                "permissions": CONSENT_PERMISSIONS,
            }));

        let response = self.send(&provider.code, request).await?;
        if !response.is_success() {
            return Err(BankError::ConsentOperation {
                provider: provider.code.clone(),
                message: format!("consent request returned status {}: {}", response.status, response.body),
            });
        }

        parse_consent(&provider.code, &response)
    }

    /// Read a consent by consent id or request id.
    pub async fn consent_status(
        &self,
        provider: &ProviderDescriptor,
        token: &str,
        id: &str,
    ) -> Result<ConsentPayload, BankError> {
        let request = self.authorized(HttpRequest::get(consent_url(provider, id)), token);
        let response = self.send(&provider.code, request).await?;
        if !response.is_success() {
            return Err(BankError::Upstream {
                provider: provider.code.clone(),
                operation: "consent status",
                status: response.status,
            });
        }

        parse_consent(&provider.code, &response)
    }

    pub async fn revoke_consent(
        &self,
        provider: &ProviderDescriptor,
        token: &str,
        consent_id: &str,
    ) -> Result<(), BankError> {
        let request = self.authorized(HttpRequest::delete(consent_url(provider, consent_id)), token);
        let response = self.send(&provider.code, request).await?;
        if !response.is_success() {
            return Err(BankError::Upstream {
                provider: provider.code.clone(),
                operation: "consent revoke",
                status: response.status,
            });
        }
        Ok(())
    }

    pub async fn list_accounts(
        &self,
        provider: &ProviderDescriptor,
        grant: Grant<'_>,
    ) -> Result<Vec<Account>, BankError> {
        let request = self
            .data_request(HttpRequest::get(provider.url("/accounts")), grant)
            .with_query("client_id", grant.client_id);
        let body = self.fetch_list(&provider.code, request, "accounts").await?;

        Ok(normalize::object_items(body)
            .into_iter()
            .map(|fields| to_account(&provider.code, fields))
            .collect())
    }

    /// One page of transactions for a single account.
    pub async fn account_transactions(
        &self,
        provider: &ProviderDescriptor,
        grant: Grant<'_>,
        account_id: &str,
        page: Page,
    ) -> Result<Vec<Transaction>, BankError> {
        let path = format!("/accounts/{}/transactions", urlencoding::encode(account_id));
        let request = self
            .data_request(HttpRequest::get(provider.url(&path)), grant)
            .with_query("client_id", grant.client_id)
            .with_query("limit", page.limit.to_string())
            .with_query("offset", page.offset.to_string());
        let body = self.fetch_list(&provider.code, request, "transactions").await?;

        Ok(normalize::object_items(body)
            .into_iter()
            .map(|fields| to_transaction(&provider.code, account_id, fields))
            .collect())
    }

    /// Transactions for one account, or for every account when `account_id`
    /// is `None`.
    ///
    /// The all-accounts form lists accounts first, then fetches each account's
    /// page with at most `concurrency` calls in flight. Results keep account
    /// enumeration order.
    pub async fn transactions(
        &self,
        provider: &ProviderDescriptor,
        grant: Grant<'_>,
        account_id: Option<&str>,
        page: Page,
        concurrency: usize,
    ) -> Result<Vec<Transaction>, BankError> {
        if let Some(account_id) = account_id {
            return self
                .account_transactions(provider, grant, account_id, page)
                .await;
        }

        let account_ids = self
            .list_accounts(provider, grant)
            .await?
            .into_iter()
            .filter_map(|account| account.account_id)
            .collect::<Vec<_>>();

        self.transactions_for_accounts(provider, grant, &account_ids, page, concurrency)
            .await
    }

    /// Second phase of the two-phase fetch: per-account pages, bounded.
    pub async fn transactions_for_accounts(
        &self,
        provider: &ProviderDescriptor,
        grant: Grant<'_>,
        account_ids: &[String],
        page: Page,
        concurrency: usize,
    ) -> Result<Vec<Transaction>, BankError> {
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, account_id) in account_ids.iter().enumerate() {
            let client = self.clone();
            let provider = provider.clone();
            let permits = Arc::clone(&permits);
            let account_id = account_id.clone();
            let token = grant.token.to_owned();
            let consent_id = grant.consent_id.to_owned();
            let client_id = grant.client_id.to_owned();

            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|error| BankError::Internal(error.to_string()))?;
                let grant = Grant {
                    token: &token,
                    consent_id: &consent_id,
                    client_id: &client_id,
                };
                client
                    .account_transactions(&provider, grant, &account_id, page)
                    .await
                    .map(|transactions| (index, transactions))
            });
        }

        let mut pages = Vec::with_capacity(account_ids.len());
        while let Some(joined) = tasks.join_next().await {
            let chunk = joined.map_err(|error| BankError::Internal(error.to_string()))??;
            pages.push(chunk);
        }
        pages.sort_by_key(|(index, _)| *index);

        Ok(pages
            .into_iter()
            .flat_map(|(_, transactions)| transactions)
            .collect())
    }

    fn authorized(&self, request: HttpRequest, token: &str) -> HttpRequest {
        request
            .with_bearer(token)
            .with_header(REQUESTING_PARTY_HEADER, &self.requesting_party)
            .with_timeout_ms(self.timeout_ms)
    }

    fn data_request(&self, request: HttpRequest, grant: Grant<'_>) -> HttpRequest {
        self.authorized(request, grant.token)
            .with_header(CONSENT_HEADER, grant.consent_id)
    }

    async fn fetch_list(
        &self,
        provider: &ProviderCode,
        request: HttpRequest,
        operation: &'static str,
    ) -> Result<Value, BankError> {
        let response = self.send(provider, request).await?;
        if !response.is_success() {
            return Err(BankError::Upstream {
                provider: provider.clone(),
                operation,
                status: response.status,
            });
        }

        // A body that is not JSON at all is treated like any other
        // non-list shape.
        Ok(normalize::parse_body(&response.body).unwrap_or(Value::Null))
    }

    async fn send(
        &self,
        provider: &ProviderCode,
        request: HttpRequest,
    ) -> Result<HttpResponse, BankError> {
        debug!(
            provider = %provider,
            method = request.method.as_str(),
            url = %request.url,
            "upstream call"
        );
        self.http
            .execute(request)
            .await
            .map_err(|error| BankError::Transport {
                provider: provider.clone(),
                message: error.message().to_owned(),
                retryable: error.retryable(),
            })
    }
}

fn consent_url(provider: &ProviderDescriptor, id: &str) -> String {
    provider.url(&format!("/account-consents/{}", urlencoding::encode(id)))
}

fn parse_consent(
    provider: &ProviderCode,
    response: &HttpResponse,
) -> Result<ConsentPayload, BankError> {
    normalize::parse_body(&response.body)
        .and_then(|value| normalize::consent_payload(&value))
        .map_err(|error: NormalizeError| BankError::ConsentOperation {
            provider: provider.clone(),
            message: error.to_string(),
        })
}

fn to_account(provider: &ProviderCode, mut fields: Map<String, Value>) -> Account {
    let account_id = normalize::account_id(&fields);
    fields.remove("accountId");
    fields.remove("provider");
    Account {
        provider: provider.clone(),
        account_id,
        fields,
    }
}

fn to_transaction(
    provider: &ProviderCode,
    account_id: &str,
    mut fields: Map<String, Value>,
) -> Transaction {
    let account_id = normalize::pick_str(&fields, &["accountId", "account_id"])
        .unwrap_or_else(|| account_id.to_owned());
    fields.remove("accountId");
    fields.remove("provider");
    Transaction {
        provider: provider.clone(),
        account_id,
        fields,
    }
}
