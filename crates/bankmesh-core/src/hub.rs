//! Entry point wiring registry, transport, managers, and the aggregator.

use std::sync::Arc;

use tracing::info;

use crate::aggregate::{AggregateResult, Aggregator, ClientMapping, ProviderSnapshot};
use crate::api_client::ProviderApiClient;
use crate::config::HubConfig;
use crate::consent::{ConsentManager, ConsentStore, RevokeOutcome, StatusCheck};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::registry::ProviderRegistry;
use crate::token::TokenManager;
use crate::{BankError, ConsentRecord, ProviderCode, ValidationError};

/// Builder for [`BankHub`].
///
/// Anything not supplied falls back to a default: the sandbox provider table
/// with demo credentials, [`HubConfig::default`], and a reqwest transport.
///
/// # Environment Variables
///
/// | Variable | Purpose |
/// |----------|---------|
/// | `BANKMESH_PROVIDERS_FILE` | JSON provider table |
/// | `BANKMESH_CLIENT_ID` / `BANKMESH_CLIENT_SECRET` | sandbox credentials |
/// | `BANKMESH_REQUESTING_PARTY` | `X-Requesting-Bank` value |
/// | `BANKMESH_DEFAULT_CLIENT` | client id used when none is given |
/// | `BANKMESH_TIMEOUT_MS` | per-request timeout |
/// | `BANKMESH_ACCOUNT_LIMIT`, `BANKMESH_TRANSACTION_LIMIT`, `BANKMESH_TRANSACTION_CONCURRENCY` | aggregation limits |
///
/// # Example
///
/// ```rust,ignore
/// use bankmesh_core::BankHubBuilder;
///
/// let hub = BankHubBuilder::new().with_env()?.build();
/// let mapping = hub.resolve_clients(None);
/// let view = hub.aggregate(&mapping, false).await;
/// ```
#[derive(Default)]
pub struct BankHubBuilder {
    registry: Option<ProviderRegistry>,
    config: Option<HubConfig>,
    http: Option<Arc<dyn HttpClient>>,
}

impl BankHubBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the provider table and hub settings from `BANKMESH_*` variables.
    pub fn with_env(mut self) -> Result<Self, ValidationError> {
        self.registry = Some(ProviderRegistry::from_env()?);
        self.config = Some(HubConfig::from_env()?);
        Ok(self)
    }

    pub fn with_registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_config(mut self, config: HubConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Swap the transport, typically for a scripted one in tests.
    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> BankHub {
        let registry = self
            .registry
            .unwrap_or_else(|| ProviderRegistry::sandbox("demo", "demo"));
        let config = self.config.unwrap_or_default();
        let http = self
            .http
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));

        let api = ProviderApiClient::new(
            http,
            config.requesting_party.clone(),
            config.request_timeout_ms,
        );
        let tokens = Arc::new(TokenManager::new(registry.clone(), api.clone()));
        let store = Arc::new(ConsentStore::new());
        let consents = Arc::new(ConsentManager::new(
            registry.clone(),
            api.clone(),
            Arc::clone(&store),
        ));
        let aggregator = Aggregator::new(
            registry.clone(),
            api,
            Arc::clone(&tokens),
            Arc::clone(&consents),
            config.limits,
        );

        info!(
            providers = registry.len(),
            requesting_party = %config.requesting_party,
            "bank hub ready"
        );

        BankHub {
            registry,
            config,
            tokens,
            consents,
            aggregator,
        }
    }
}

/// Process-wide handle; token cache and consent indices live as long as it.
pub struct BankHub {
    registry: ProviderRegistry,
    config: HubConfig,
    tokens: Arc<TokenManager>,
    consents: Arc<ConsentManager>,
    aggregator: Aggregator,
}

impl BankHub {
    pub fn builder() -> BankHubBuilder {
        BankHubBuilder::new()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn consents(&self) -> &ConsentManager {
        &self.consents
    }

    pub fn consent_store(&self) -> &ConsentStore {
        self.consents.store()
    }

    pub async fn ensure_token(&self, provider: &ProviderCode) -> Result<String, BankError> {
        self.tokens.ensure_token(provider).await
    }

    pub async fn ensure_consent(
        &self,
        provider: &ProviderCode,
        client_id: &str,
        force_new: bool,
    ) -> Result<ConsentRecord, BankError> {
        let token = self.tokens.ensure_token(provider).await?;
        self.consents
            .ensure_consent(provider, client_id, &token, force_new)
            .await
    }

    pub async fn fetch_consent_status(
        &self,
        provider: &ProviderCode,
        consent_id: Option<&str>,
        client_id: &str,
        request_id: Option<&str>,
    ) -> Result<StatusCheck, BankError> {
        let token = self.tokens.ensure_token(provider).await?;
        self.consents
            .fetch_consent_status(provider, consent_id, client_id, request_id, &token)
            .await
    }

    /// Best-effort remote revoke; a token failure is reported as a failed
    /// outcome like any other.
    pub async fn revoke_consent_remote(
        &self,
        provider: &ProviderCode,
        consent_id: &str,
    ) -> RevokeOutcome {
        match self.tokens.ensure_token(provider).await {
            Ok(token) => {
                self.consents
                    .revoke_consent_remote(provider, &token, consent_id)
                    .await
            }
            Err(error) => RevokeOutcome::Failed {
                reason: error.to_string(),
            },
        }
    }

    pub async fn aggregate(&self, mapping: &ClientMapping, force_new: bool) -> AggregateResult {
        self.aggregator.aggregate(mapping, force_new).await
    }

    pub async fn gather_provider(
        &self,
        provider: &ProviderCode,
        client_id: &str,
        force_new: bool,
    ) -> Result<ProviderSnapshot, BankError> {
        self.aggregator
            .gather_provider(provider, client_id, force_new)
            .await
    }

    /// Always creates a fresh consent, superseding any cached one.
    pub async fn create_consent(
        &self,
        provider: &ProviderCode,
        client_id: &str,
    ) -> Result<ConsentRecord, BankError> {
        self.registry.require(provider)?;
        self.ensure_consent(provider, client_id, true).await
    }

    /// Re-check a known consent by consent id or request id.
    pub async fn refresh_consent_status(&self, id: &str) -> Result<StatusCheck, BankError> {
        let record = self
            .consents
            .store()
            .lookup(id)
            .await
            .ok_or_else(|| BankError::unknown_consent(id))?;
        let token = self.tokens.ensure_token(&record.provider).await?;
        self.consents.refresh(&record, &token).await
    }

    /// Revoke a known consent and forget it locally, whatever the provider
    /// answers.
    pub async fn revoke_consent(&self, consent_id: &str) -> Result<RevokeOutcome, BankError> {
        let record = self
            .consents
            .store()
            .by_id(consent_id)
            .await
            .ok_or_else(|| BankError::unknown_consent(consent_id))?;

        let outcome = match self.tokens.ensure_token(&record.provider).await {
            Ok(token) => self.consents.revoke(&record, &token).await,
            Err(error) => {
                self.consents.forget(&record).await;
                RevokeOutcome::Failed {
                    reason: error.to_string(),
                }
            }
        };
        Ok(outcome)
    }

    /// Map every registered provider to `preferred`, or to the configured
    /// default client when no usable preference is given.
    pub fn resolve_clients(&self, preferred: Option<&str>) -> ClientMapping {
        let client = self.resolve_client(preferred);
        self.registry
            .codes()
            .map(|code| (code.to_string(), client.clone()))
            .collect()
    }

    pub fn resolve_client(&self, preferred: Option<&str>) -> String {
        preferred
            .map(str::trim)
            .filter(|client| !client.is_empty())
            .unwrap_or(self.config.default_client.as_str())
            .to_owned()
    }
}
