//! Per-provider access token cache.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::api_client::ProviderApiClient;
use crate::registry::ProviderRegistry;
use crate::{BankError, ProviderCode};

/// Seconds shaved off every provider-reported lifetime.
pub const EXPIRY_SAFETY_MARGIN_SECS: u64 = 60;

#[derive(Debug, Clone)]
struct TokenState {
    access_token: String,
    expires_at: Instant,
}

impl TokenState {
    fn is_valid(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

/// Caches one access token per provider and refreshes it on expiry.
///
/// Each provider has its own refresh lock, so a slow token endpoint at one
/// bank never delays another. Concurrent callers for the same provider
/// collapse into a single upstream exchange.
pub struct TokenManager {
    registry: ProviderRegistry,
    api: ProviderApiClient,
    cache: RwLock<HashMap<ProviderCode, TokenState>>,
    refresh_locks: HashMap<ProviderCode, Mutex<()>>,
}

impl TokenManager {
    pub fn new(registry: ProviderRegistry, api: ProviderApiClient) -> Self {
        let refresh_locks = registry
            .codes()
            .map(|code| (code.clone(), Mutex::new(())))
            .collect();

        Self {
            registry,
            api,
            cache: RwLock::new(HashMap::new()),
            refresh_locks,
        }
    }

    /// Return a valid access token for `provider`, exchanging credentials
    /// when the cached one is missing or expired.
    pub async fn ensure_token(&self, provider: &ProviderCode) -> Result<String, BankError> {
        let descriptor = self.registry.require(provider)?;

        if let Some(token) = self.cached(provider).await {
            debug!(provider = %provider, "token cache hit");
            return Ok(token);
        }

        let lock = self
            .refresh_locks
            .get(provider)
            .ok_or_else(|| BankError::unknown_provider(provider.as_str()))?;
        let _guard = lock.lock().await;

        if let Some(token) = self.cached(provider).await {
            debug!(provider = %provider, "token refreshed by a concurrent caller");
            return Ok(token);
        }

        let grant = self.api.exchange_token(descriptor).await?;
        let lifetime = grant.expires_in.saturating_sub(EXPIRY_SAFETY_MARGIN_SECS);
        let state = TokenState {
            access_token: grant.access_token,
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        };
        info!(
            provider = %provider,
            expires_in = grant.expires_in,
            "provider token refreshed"
        );

        let token = state.access_token.clone();
        self.cache.write().await.insert(provider.clone(), state);
        Ok(token)
    }

    /// Drop the cached token so the next call exchanges credentials again.
    pub async fn invalidate(&self, provider: &ProviderCode) {
        if self.cache.write().await.remove(provider).is_some() {
            info!(provider = %provider, "provider token invalidated");
        }
    }

    /// Remaining validity of the cached token, if one is still valid.
    pub async fn remaining(&self, provider: &ProviderCode) -> Option<Duration> {
        let cache = self.cache.read().await;
        cache
            .get(provider)
            .filter(|state| state.is_valid())
            .map(|state| state.expires_at.saturating_duration_since(Instant::now()))
    }

    async fn cached(&self, provider: &ProviderCode) -> Option<String> {
        let cache = self.cache.read().await;
        cache
            .get(provider)
            .filter(|state| state.is_valid())
            .map(|state| state.access_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::http_client::{HttpMethod, ScriptedHttpClient};

    const TOKEN_URL: &str = "https://vbank.open.bankingapi.ru/auth/bank-token";

    fn manager(http: &Arc<ScriptedHttpClient>) -> TokenManager {
        let registry = ProviderRegistry::sandbox("team", "secret");
        TokenManager::new(registry, ProviderApiClient::new(http.clone(), "team", 1_000))
    }

    fn vbank() -> ProviderCode {
        ProviderCode::parse("vbank").expect("valid")
    }

    #[tokio::test]
    async fn reuses_token_until_expiry() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.respond_json(
            HttpMethod::Post,
            TOKEN_URL,
            200,
            json!({ "access_token": "t1", "expires_in": 3600 }),
        );
        let tokens = manager(&http);

        assert_eq!(tokens.ensure_token(&vbank()).await.expect("token"), "t1");
        assert_eq!(tokens.ensure_token(&vbank()).await.expect("token"), "t1");
        assert_eq!(http.call_count(HttpMethod::Post, TOKEN_URL), 1);

        let remaining = tokens.remaining(&vbank()).await.expect("cached");
        assert!(remaining <= Duration::from_secs(3540));
    }

    #[tokio::test]
    async fn lifetime_inside_safety_margin_is_already_expired() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.respond_json(
            HttpMethod::Post,
            TOKEN_URL,
            200,
            json!({ "token": "short", "expires_in": 45 }),
        );
        let tokens = manager(&http);

        tokens.ensure_token(&vbank()).await.expect("token");
        tokens.ensure_token(&vbank()).await.expect("token");

        assert_eq!(http.call_count(HttpMethod::Post, TOKEN_URL), 2);
        assert!(tokens.remaining(&vbank()).await.is_none());
    }

    #[tokio::test]
    async fn invalidate_forces_new_exchange() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.respond_json(HttpMethod::Post, TOKEN_URL, 200, json!({ "token": "t" }));
        let tokens = manager(&http);

        tokens.ensure_token(&vbank()).await.expect("token");
        tokens.invalidate(&vbank()).await;
        tokens.ensure_token(&vbank()).await.expect("token");

        assert_eq!(http.call_count(HttpMethod::Post, TOKEN_URL), 2);
    }

    #[tokio::test]
    async fn unknown_provider_is_not_found() {
        let http = Arc::new(ScriptedHttpClient::new());
        let tokens = manager(&http);

        let err = tokens
            .ensure_token(&ProviderCode::parse("zbank").expect("valid"))
            .await
            .expect_err("must fail");

        assert_eq!(err.code(), "bank.not_found");
        assert!(http.calls().is_empty());
    }
}
