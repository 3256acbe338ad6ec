//! Multi-provider fan-out.
//!
//! Every mapped provider runs as an independent unit
//! (token, consent, accounts, transactions). A failing unit turns into a
//! `{provider, error}` entry; the others merge normally.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::api_client::{Grant, Page, ProviderApiClient};
use crate::config::AggregationLimits;
use crate::consent::ConsentManager;
use crate::registry::ProviderRegistry;
use crate::token::TokenManager;
use crate::{
    Account, BankError, ConsentRecord, ConsentStatus, ProviderCode, Transaction, ValidationError,
};

/// Provider code to client id.
pub type ClientMapping = BTreeMap<String, String>;

/// Parse one `<provider>=<client>` mapping entry.
pub fn parse_mapping_entry(raw: &str) -> Result<(String, String), ValidationError> {
    let invalid = || ValidationError::InvalidMappingEntry {
        value: raw.to_owned(),
    };
    let (provider, client) = raw.split_once('=').ok_or_else(invalid)?;
    let (provider, client) = (provider.trim(), client.trim());
    if provider.is_empty() || client.is_empty() {
        return Err(invalid());
    }
    Ok((provider.to_owned(), client.to_owned()))
}

/// Consent state or failure for one provider in an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProviderOutcome {
    Status {
        provider: String,
        status: ConsentStatus,
    },
    Failed {
        provider: String,
        error: String,
    },
}

impl ProviderOutcome {
    pub fn provider(&self) -> &str {
        match self {
            Self::Status { provider, .. } | Self::Failed { provider, .. } => provider,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    fn failed(provider: impl Into<String>, error: &BankError) -> Self {
        Self::Failed {
            provider: provider.into(),
            error: error.to_string(),
        }
    }
}

/// One provider's contribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSnapshot {
    pub provider: ProviderCode,
    pub consent: ConsentRecord,
    pub accounts: Vec<Account>,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateResult {
    pub accounts: Vec<Account>,
    pub transactions: Vec<Transaction>,
    pub consents: Vec<ProviderOutcome>,
}

impl AggregateResult {
    fn merge(&mut self, snapshot: ProviderSnapshot) {
        self.consents.push(ProviderOutcome::Status {
            provider: snapshot.provider.to_string(),
            status: snapshot.consent.status,
        });
        self.accounts.extend(snapshot.accounts);
        self.transactions.extend(snapshot.transactions);
    }
}

#[derive(Clone)]
pub struct Aggregator {
    registry: ProviderRegistry,
    api: ProviderApiClient,
    tokens: Arc<TokenManager>,
    consents: Arc<ConsentManager>,
    limits: AggregationLimits,
}

impl Aggregator {
    pub fn new(
        registry: ProviderRegistry,
        api: ProviderApiClient,
        tokens: Arc<TokenManager>,
        consents: Arc<ConsentManager>,
        limits: AggregationLimits,
    ) -> Self {
        Self {
            registry,
            api,
            tokens,
            consents,
            limits,
        }
    }

    /// Fetch every mapped provider concurrently and merge the results.
    ///
    /// Providers with an empty client id are skipped. Codes absent from the
    /// registry are reported as failed entries. The merged lists follow
    /// registry order regardless of completion order.
    pub async fn aggregate(&self, mapping: &ClientMapping, force_new: bool) -> AggregateResult {
        let mut result = AggregateResult::default();
        let mut units = BTreeMap::new();
        let mut rejected = Vec::new();

        for (raw_code, client_id) in mapping {
            if client_id.trim().is_empty() {
                continue;
            }
            match ProviderCode::parse(raw_code) {
                Ok(code) if self.registry.get(&code).is_some() => {
                    units.insert(code, client_id.trim().to_owned());
                }
                _ => rejected.push(raw_code.clone()),
            }
        }

        let order = self
            .registry
            .codes()
            .filter(|code| units.contains_key(*code))
            .cloned()
            .collect::<Vec<_>>();

        let mut tasks = JoinSet::new();
        for (index, code) in order.iter().enumerate() {
            let engine = self.clone();
            let code = code.clone();
            let client_id = units.remove(&code).unwrap_or_default();
            tasks.spawn(async move {
                let outcome = engine.gather_provider(&code, &client_id, force_new).await;
                (index, outcome)
            });
        }

        let mut finished = Vec::with_capacity(order.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(unit) => finished.push(unit),
                Err(error) => warn!(%error, "aggregation unit did not complete"),
            }
        }
        finished.sort_by_key(|(index, _)| *index);

        let completed = finished
            .iter()
            .map(|(index, _)| *index)
            .collect::<BTreeSet<_>>();

        for (index, outcome) in finished {
            let code = &order[index];
            match outcome {
                Ok(snapshot) => result.merge(snapshot),
                Err(error) => {
                    warn!(provider = %code, error_code = error.code(), %error, "provider excluded from aggregate");
                    result.consents.push(ProviderOutcome::failed(code.as_str(), &error));
                }
            }
        }

        for (index, code) in order.iter().enumerate() {
            if !completed.contains(&index) {
                let error = BankError::Internal(String::from("aggregation unit aborted"));
                result.consents.push(ProviderOutcome::failed(code.as_str(), &error));
            }
        }

        for raw_code in rejected {
            let error = BankError::unknown_provider(raw_code.as_str());
            warn!(provider = %raw_code, "aggregation mapping names an unregistered provider");
            result.consents.push(ProviderOutcome::failed(raw_code, &error));
        }

        info!(
            providers = result.consents.len(),
            accounts = result.accounts.len(),
            transactions = result.transactions.len(),
            "aggregate assembled"
        );
        result
    }

    /// Token, consent, then data for a single provider.
    ///
    /// A consent that is not Active yields an empty snapshot carrying the
    /// consent state.
    pub async fn gather_provider(
        &self,
        provider: &ProviderCode,
        client_id: &str,
        force_new: bool,
    ) -> Result<ProviderSnapshot, BankError> {
        let descriptor = self.registry.require(provider)?;
        let token = self.tokens.ensure_token(provider).await?;
        let consent = self
            .consents
            .ensure_consent(provider, client_id, &token, force_new)
            .await?;

        let mut snapshot = ProviderSnapshot {
            provider: provider.clone(),
            consent,
            accounts: Vec::new(),
            transactions: Vec::new(),
        };

        if !snapshot.consent.is_active() {
            info!(
                provider = %provider,
                client_id,
                status = %snapshot.consent.status,
                "consent not active, skipping data"
            );
            return Ok(snapshot);
        }
        let Some(consent_id) = snapshot.consent.consent_id.clone() else {
            warn!(provider = %provider, client_id, "active consent without consent id, skipping data");
            return Ok(snapshot);
        };

        let grant = Grant {
            token: &token,
            consent_id: &consent_id,
            client_id,
        };

        let mut accounts = self.api.list_accounts(descriptor, grant).await?;
        accounts.truncate(self.limits.account_limit);
        let account_ids = accounts
            .iter()
            .filter_map(|account| account.account_id.clone())
            .collect::<Vec<_>>();

        snapshot.transactions = self
            .api
            .transactions_for_accounts(
                descriptor,
                grant,
                &account_ids,
                Page::first(self.limits.transaction_limit),
                self.limits.transaction_concurrency,
            )
            .await?;
        snapshot.accounts = accounts;

        info!(
            provider = %provider,
            accounts = snapshot.accounts.len(),
            transactions = snapshot.transactions.len(),
            "provider data gathered"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_entry_splits_on_first_equals() {
        assert_eq!(
            parse_mapping_entry(" vbank = team-1 ").expect("valid"),
            (String::from("vbank"), String::from("team-1"))
        );
        assert_eq!(
            parse_mapping_entry("abank=a=b").expect("valid"),
            (String::from("abank"), String::from("a=b"))
        );
    }

    #[test]
    fn mapping_entry_requires_both_sides() {
        for raw in ["vbank", "=team-1", "vbank=", "  =  "] {
            assert!(matches!(
                parse_mapping_entry(raw),
                Err(ValidationError::InvalidMappingEntry { .. })
            ));
        }
    }

    #[test]
    fn outcomes_serialize_as_status_or_error() {
        let ok = ProviderOutcome::Status {
            provider: String::from("vbank"),
            status: ConsentStatus::Active,
        };
        let failed = ProviderOutcome::Failed {
            provider: String::from("abank"),
            error: String::from("boom"),
        };

        assert_eq!(
            serde_json::to_value(&ok).expect("serializable"),
            serde_json::json!({ "provider": "vbank", "status": "active" })
        );
        assert_eq!(
            serde_json::to_value(&failed).expect("serializable"),
            serde_json::json!({ "provider": "abank", "error": "boom" })
        );
        assert!(failed.is_failed());
        assert_eq!(failed.provider(), "abank");
    }
}
