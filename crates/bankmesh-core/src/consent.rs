//! Consent state machine and its process-wide indices.
//!
//! ```text
//!            create                 poll / status check
//!   (none) ─────────▶ Pending ─────────────────────────▶ Active
//!      │                 │                                 │
//!      └────────────────────────────────▶ Active           │
//!                        │         explicit revoke         │
//!                        └──────────────▶ (removed) ◀──────┘
//! ```
//!
//! `Expired` and `Revoked` only ever come from provider-reported status.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex};

use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::api_client::ProviderApiClient;
use crate::normalize::ConsentPayload;
use crate::registry::{ProviderDescriptor, ProviderRegistry};
use crate::{BankError, ConsentRecord, ConsentStatus, ProviderCode, UtcDateTime, ValidationError};

type ConsentKey = (ProviderCode, String);

/// Result of a status check. Failures never propagate; they degrade to a
/// pending record that keeps the identifiers the caller already had.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCheck {
    Confirmed(ConsentRecord),
    Degraded {
        record: ConsentRecord,
        reason: String,
    },
}

impl StatusCheck {
    pub fn record(&self) -> &ConsentRecord {
        match self {
            Self::Confirmed(record) | Self::Degraded { record, .. } => record,
        }
    }

    pub fn into_record(self) -> ConsentRecord {
        match self {
            Self::Confirmed(record) | Self::Degraded { record, .. } => record,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Result of a best-effort remote revoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    Failed { reason: String },
}

#[derive(Debug, Default)]
struct ConsentIndex {
    by_key: HashMap<ConsentKey, ConsentRecord>,
    /// Consent id to primary key. Resolving through the primary index means
    /// both lookups always yield the same record.
    by_id: HashMap<String, ConsentKey>,
}

impl ConsentIndex {
    fn insert(&mut self, record: ConsentRecord) {
        let key = key_of(&record);

        if let Some(previous_id) = self
            .by_key
            .get(&key)
            .and_then(|previous| previous.consent_id.clone())
        {
            if record.consent_id.as_ref() != Some(&previous_id) {
                self.by_id.remove(&previous_id);
            }
        }

        if let Some(consent_id) = &record.consent_id {
            if let Some(other_key) = self.by_id.insert(consent_id.clone(), key.clone()) {
                if other_key != key {
                    // The provider reassigned this id; the other entry is stale.
                    warn!(
                        consent_id = %consent_id,
                        provider = %other_key.0,
                        evicted_client_id = %other_key.1,
                        client_id = %key.1,
                        "consent id moved to another client, dropping stale record"
                    );
                    self.by_key.remove(&other_key);
                }
            }
        }

        self.by_key.insert(key, record);
    }

    fn remove(&mut self, key: &ConsentKey) -> Option<ConsentRecord> {
        let removed = self.by_key.remove(key)?;
        if let Some(consent_id) = &removed.consent_id {
            if self.by_id.get(consent_id) == Some(key) {
                self.by_id.remove(consent_id);
            }
        }
        Some(removed)
    }

    /// Whether `expected` is still the record stored under its key.
    fn holds(&self, expected: &ConsentRecord) -> bool {
        self.by_key
            .get(&key_of(expected))
            .is_some_and(|current| same_consent(current, expected))
    }

    fn by_id(&self, consent_id: &str) -> Option<&ConsentRecord> {
        self.by_id
            .get(consent_id)
            .and_then(|key| self.by_key.get(key))
    }

    fn by_request_id(&self, request_id: &str) -> Option<&ConsentRecord> {
        self.by_key
            .values()
            .find(|record| record.request_id.as_deref() == Some(request_id))
    }
}

/// Shared consent indices with one lock per (provider, client) pair.
#[derive(Debug, Default)]
pub struct ConsentStore {
    index: RwLock<ConsentIndex>,
    key_locks: SyncMutex<HashMap<ConsentKey, Arc<Mutex<()>>>>,
}

impl ConsentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn by_key(&self, provider: &ProviderCode, client_id: &str) -> Option<ConsentRecord> {
        let index = self.index.read().await;
        index
            .by_key
            .get(&(provider.clone(), client_id.to_owned()))
            .cloned()
    }

    pub async fn by_id(&self, consent_id: &str) -> Option<ConsentRecord> {
        self.index.read().await.by_id(consent_id).cloned()
    }

    pub async fn by_request_id(&self, request_id: &str) -> Option<ConsentRecord> {
        self.index.read().await.by_request_id(request_id).cloned()
    }

    /// Resolve a consent id first, then fall back to a request id.
    pub async fn lookup(&self, id: &str) -> Option<ConsentRecord> {
        let index = self.index.read().await;
        index
            .by_id(id)
            .or_else(|| index.by_request_id(id))
            .cloned()
    }

    /// Insert or replace the record for its (provider, client) key.
    pub async fn put(&self, record: ConsentRecord) {
        self.index.write().await.insert(record);
    }

    pub async fn remove(&self, provider: &ProviderCode, client_id: &str) -> Option<ConsentRecord> {
        self.index
            .write()
            .await
            .remove(&(provider.clone(), client_id.to_owned()))
    }

    /// Store `record` only if `expected` is still the record under its key.
    pub async fn replace_if_current(&self, expected: &ConsentRecord, record: ConsentRecord) -> bool {
        let mut index = self.index.write().await;
        if !index.holds(expected) {
            return false;
        }
        index.insert(record);
        true
    }

    /// Remove `expected` only if it has not been replaced in the meantime.
    pub async fn remove_if_current(&self, expected: &ConsentRecord) -> Option<ConsentRecord> {
        let mut index = self.index.write().await;
        if !index.holds(expected) {
            return None;
        }
        index.remove(&key_of(expected))
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.by_key.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn lease(&self, key: ConsentKey) -> KeyLease<'_> {
        let lock = {
            let mut locks = self
                .key_locks
                .lock()
                .expect("consent key lock table is not poisoned");
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        KeyLease {
            table: &self.key_locks,
            key,
            lock,
        }
    }

    #[cfg(test)]
    fn lock_table_len(&self) -> usize {
        self.key_locks
            .lock()
            .expect("consent key lock table is not poisoned")
            .len()
    }

    #[cfg(test)]
    async fn is_consistent(&self) -> bool {
        let index = self.index.read().await;
        let ids_resolve = index.by_id.iter().all(|(id, key)| {
            index
                .by_key
                .get(key)
                .is_some_and(|record| record.consent_id.as_deref() == Some(id.as_str()))
        });
        let records_indexed = index.by_key.iter().all(|(key, record)| match &record.consent_id {
            Some(id) => index.by_id.get(id) == Some(key),
            None => true,
        });
        ids_resolve && records_indexed
    }
}

/// Claim on the per-key lock. The table entry goes away with the last lease
/// for its key, so the table only holds keys that are in use.
struct KeyLease<'a> {
    table: &'a SyncMutex<HashMap<ConsentKey, Arc<Mutex<()>>>>,
    key: ConsentKey,
    lock: Arc<Mutex<()>>,
}

impl KeyLease<'_> {
    async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for KeyLease<'_> {
    fn drop(&mut self) {
        let Ok(mut locks) = self.table.lock() else {
            return;
        };
        // Leases are only handed out under the table lock, so a count of two
        // (table + this lease) cannot grow while we hold it.
        let ours = locks
            .get(&self.key)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock));
        if ours && Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}

/// Drives consent creation, approval polling, status checks, and revokes.
pub struct ConsentManager {
    registry: ProviderRegistry,
    api: ProviderApiClient,
    store: Arc<ConsentStore>,
}

impl ConsentManager {
    pub fn new(registry: ProviderRegistry, api: ProviderApiClient, store: Arc<ConsentStore>) -> Self {
        Self {
            registry,
            api,
            store,
        }
    }

    pub fn store(&self) -> &ConsentStore {
        &self.store
    }

    /// Return a usable consent for (provider, client), creating one if needed.
    ///
    /// Cached Active and Pending records are returned as is unless
    /// `force_new` is set. Forcing a new consent revokes the old consent id
    /// first on a best-effort basis; a failed revoke never blocks creation.
    pub async fn ensure_consent(
        &self,
        provider: &ProviderCode,
        client_id: &str,
        token: &str,
        force_new: bool,
    ) -> Result<ConsentRecord, BankError> {
        let descriptor = self.registry.require(provider)?;
        if client_id.trim().is_empty() {
            return Err(ValidationError::EmptyClientId.into());
        }

        if !force_new {
            if let Some(existing) = self.reusable(provider, client_id).await {
                return Ok(existing);
            }
        }

        let lease = self.store.lease((provider.clone(), client_id.to_owned()));
        let _guard = lease.acquire().await;

        if force_new {
            self.supersede(descriptor, client_id, token).await;
        } else if let Some(existing) = self.reusable(provider, client_id).await {
            return Ok(existing);
        }

        let payload = self
            .api
            .request_consent(descriptor, token, client_id)
            .await?;
        let mut record = record_from_payload(payload, provider, client_id);
        info!(
            provider = %provider,
            client_id,
            status = %record.status,
            consent_id = record.consent_id.as_deref().unwrap_or("-"),
            request_id = record.request_id.as_deref().unwrap_or("-"),
            "consent requested"
        );

        if descriptor.auto_approve && !record.is_active() {
            record = self.await_approval(descriptor, token, record).await;
        }

        self.store.put(record.clone()).await;
        Ok(record)
    }

    /// Query the provider for the current state of a consent.
    ///
    /// Only an unknown provider is an error; upstream failures come back as
    /// [`StatusCheck::Degraded`].
    pub async fn fetch_consent_status(
        &self,
        provider: &ProviderCode,
        consent_id: Option<&str>,
        client_id: &str,
        request_id: Option<&str>,
        token: &str,
    ) -> Result<StatusCheck, BankError> {
        let descriptor = self.registry.require(provider)?;
        Ok(self
            .check_status(descriptor, token, consent_id, client_id, request_id)
            .await)
    }

    /// Re-check a cached record and store the provider's answer.
    ///
    /// Degraded checks leave the stored record untouched, and so does a
    /// confirmed one if the record was replaced or revoked meanwhile.
    pub async fn refresh(
        &self,
        record: &ConsentRecord,
        token: &str,
    ) -> Result<StatusCheck, BankError> {
        let lease = self.store.lease(key_of(record));
        let _guard = lease.acquire().await;

        let check = self
            .fetch_consent_status(
                &record.provider,
                record.consent_id.as_deref(),
                &record.client_id,
                record.request_id.as_deref(),
                token,
            )
            .await?;

        if let StatusCheck::Confirmed(updated) = &check {
            if self.store.replace_if_current(record, updated.clone()).await {
                info!(
                    provider = %updated.provider,
                    client_id = %updated.client_id,
                    status = %updated.status,
                    "consent status refreshed"
                );
            } else {
                debug!(
                    provider = %updated.provider,
                    client_id = %updated.client_id,
                    "consent replaced during refresh, discarding status"
                );
            }
        }
        Ok(check)
    }

    /// Ask the provider to delete a consent. Never fails.
    pub async fn revoke_consent_remote(
        &self,
        provider: &ProviderCode,
        token: &str,
        consent_id: &str,
    ) -> RevokeOutcome {
        let result = match self.registry.require(provider) {
            Ok(descriptor) => self.api.revoke_consent(descriptor, token, consent_id).await,
            Err(error) => Err(error),
        };

        match result {
            Ok(()) => {
                info!(provider = %provider, consent_id, "consent revoked");
                RevokeOutcome::Revoked
            }
            Err(error) => {
                warn!(provider = %provider, consent_id, %error, "consent revoke failed, ignoring");
                RevokeOutcome::Failed {
                    reason: error.to_string(),
                }
            }
        }
    }

    /// Revoke remotely (best effort) and drop the record from both indices.
    ///
    /// A record that was superseded meanwhile is revoked upstream but its
    /// replacement stays in the store.
    pub async fn revoke(&self, record: &ConsentRecord, token: &str) -> RevokeOutcome {
        let lease = self.store.lease(key_of(record));
        let _guard = lease.acquire().await;

        let outcome = match record.consent_id.as_deref() {
            Some(consent_id) => {
                self.revoke_consent_remote(&record.provider, token, consent_id)
                    .await
            }
            None => RevokeOutcome::Failed {
                reason: String::from("consent has no id yet"),
            },
        };
        self.store.remove_if_current(record).await;
        outcome
    }

    /// Drop a record locally without contacting the provider.
    pub async fn forget(&self, record: &ConsentRecord) -> bool {
        let lease = self.store.lease(key_of(record));
        let _guard = lease.acquire().await;
        self.store.remove_if_current(record).await.is_some()
    }

    async fn reusable(&self, provider: &ProviderCode, client_id: &str) -> Option<ConsentRecord> {
        let existing = self.store.by_key(provider, client_id).await?;
        match existing.status {
            ConsentStatus::Active => {
                debug!(provider = %provider, client_id, "reusing active consent");
                Some(existing)
            }
            ConsentStatus::Pending => {
                debug!(
                    provider = %provider,
                    client_id,
                    request_id = existing.request_id.as_deref().unwrap_or("-"),
                    "reusing pending consent"
                );
                Some(existing)
            }
            ConsentStatus::Expired | ConsentStatus::Revoked => None,
        }
    }

    async fn supersede(&self, descriptor: &ProviderDescriptor, client_id: &str, token: &str) {
        let Some(existing) = self.store.by_key(&descriptor.code, client_id).await else {
            return;
        };
        let Some(consent_id) = existing.consent_id.as_deref() else {
            return;
        };

        info!(provider = %descriptor.code, client_id, consent_id, "superseding consent");
        let _ = self
            .revoke_consent_remote(&descriptor.code, token, consent_id)
            .await;
        self.store.remove(&descriptor.code, client_id).await;
    }

    async fn await_approval(
        &self,
        descriptor: &ProviderDescriptor,
        token: &str,
        mut record: ConsentRecord,
    ) -> ConsentRecord {
        if record.lookup_id().is_none() {
            warn!(
                provider = %descriptor.code,
                client_id = %record.client_id,
                "provider returned neither consent id nor request id, nothing to poll"
            );
            return record;
        }

        for attempt in 1..=descriptor.poll_attempts {
            tokio::time::sleep(descriptor.poll_interval()).await;
            record = self
                .check_status(
                    descriptor,
                    token,
                    record.consent_id.as_deref(),
                    &record.client_id,
                    record.request_id.as_deref(),
                )
                .await
                .into_record();

            if record.is_active() {
                info!(provider = %descriptor.code, attempt, "consent approved");
                return record;
            }
            debug!(
                provider = %descriptor.code,
                attempt,
                max_attempts = descriptor.poll_attempts,
                status = %record.status,
                "consent still awaiting approval"
            );
        }

        warn!(
            provider = %descriptor.code,
            client_id = %record.client_id,
            status = %record.status,
            "consent polling exhausted, keeping last observed state"
        );
        record
    }

    async fn check_status(
        &self,
        descriptor: &ProviderDescriptor,
        token: &str,
        consent_id: Option<&str>,
        client_id: &str,
        request_id: Option<&str>,
    ) -> StatusCheck {
        let degraded = |reason: String| StatusCheck::Degraded {
            record: ConsentRecord::pending(
                descriptor.code.clone(),
                client_id,
                consent_id.map(str::to_owned),
                request_id.map(str::to_owned),
            ),
            reason,
        };

        let Some(check_id) = consent_id.or(request_id) else {
            return degraded(String::from("no consent id or request id to check"));
        };

        match self.api.consent_status(descriptor, token, check_id).await {
            Ok(payload) => StatusCheck::Confirmed(ConsentRecord {
                consent_id: payload.consent_id.or_else(|| consent_id.map(str::to_owned)),
                request_id: payload.request_id.or_else(|| request_id.map(str::to_owned)),
                status: payload.status,
                provider: descriptor.code.clone(),
                client_id: client_id.to_owned(),
                expires_at: payload.expires_at,
                last_synced_at: UtcDateTime::now(),
            }),
            Err(error) => {
                warn!(
                    provider = %descriptor.code,
                    check_id,
                    %error,
                    "consent status check failed, treating as pending"
                );
                degraded(error.to_string())
            }
        }
    }
}

fn key_of(record: &ConsentRecord) -> ConsentKey {
    (record.provider.clone(), record.client_id.clone())
}

fn same_consent(a: &ConsentRecord, b: &ConsentRecord) -> bool {
    a.consent_id == b.consent_id && a.request_id == b.request_id
}

fn record_from_payload(
    payload: ConsentPayload,
    provider: &ProviderCode,
    client_id: &str,
) -> ConsentRecord {
    ConsentRecord {
        consent_id: payload.consent_id,
        request_id: payload.request_id,
        status: payload.status,
        provider: provider.clone(),
        client_id: client_id.to_owned(),
        expires_at: payload.expires_at,
        last_synced_at: UtcDateTime::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(provider: &str, client: &str, consent_id: Option<&str>) -> ConsentRecord {
        let mut record = ConsentRecord::pending(
            ProviderCode::parse(provider).expect("valid"),
            client,
            consent_id.map(str::to_owned),
            None,
        );
        record.status = ConsentStatus::Active;
        record
    }

    #[tokio::test]
    async fn replacing_a_record_drops_its_old_id() {
        let store = ConsentStore::new();
        store.put(record("vbank", "team-1", Some("c1"))).await;
        store.put(record("vbank", "team-1", Some("c2"))).await;

        assert!(store.by_id("c1").await.is_none());
        assert_eq!(
            store.by_id("c2").await.and_then(|r| r.consent_id),
            Some(String::from("c2"))
        );
        assert_eq!(store.len().await, 1);
        assert!(store.is_consistent().await);
    }

    #[tokio::test]
    async fn removal_clears_both_indices() {
        let store = ConsentStore::new();
        let vbank = ProviderCode::parse("vbank").expect("valid");
        store.put(record("vbank", "team-1", Some("c1"))).await;

        let removed = store.remove(&vbank, "team-1").await;

        assert!(removed.is_some());
        assert!(store.by_id("c1").await.is_none());
        assert!(store.is_empty().await);
        assert!(store.is_consistent().await);
    }

    #[tokio::test]
    async fn reassigned_id_evicts_stale_owner() {
        let store = ConsentStore::new();
        store.put(record("vbank", "team-1", Some("shared"))).await;
        store.put(record("vbank", "team-2", Some("shared"))).await;

        let owner = store.by_id("shared").await.expect("indexed");
        assert_eq!(owner.client_id, "team-2");
        assert_eq!(store.len().await, 1);
        assert!(store.is_consistent().await);
    }

    #[tokio::test]
    async fn lookup_falls_back_to_request_id() {
        let store = ConsentStore::new();
        let sbank = ProviderCode::parse("sbank").expect("valid");
        store
            .put(ConsentRecord::pending(sbank, "team-1", None, Some("r9".into())))
            .await;

        let found = store.lookup("r9").await.expect("found by request id");
        assert_eq!(found.request_id.as_deref(), Some("r9"));
        assert!(store.by_id("r9").await.is_none());
    }

    #[tokio::test]
    async fn stale_snapshot_does_not_overwrite_replacement() {
        let store = ConsentStore::new();
        let stale = record("vbank", "team-1", Some("c1"));
        store.put(stale.clone()).await;
        store.put(record("vbank", "team-1", Some("c2"))).await;

        let mut refreshed = stale.clone();
        refreshed.status = ConsentStatus::Active;

        assert!(!store.replace_if_current(&stale, refreshed).await);
        assert!(store.remove_if_current(&stale).await.is_none());
        let vbank = ProviderCode::parse("vbank").expect("valid");
        assert_eq!(
            store.by_key(&vbank, "team-1").await.and_then(|r| r.consent_id),
            Some(String::from("c2"))
        );
        assert!(store.is_consistent().await);
    }

    #[tokio::test]
    async fn current_snapshot_is_replaced_and_removed() {
        let store = ConsentStore::new();
        let current = ConsentRecord::pending(
            ProviderCode::parse("sbank").expect("valid"),
            "team-1",
            None,
            Some(String::from("r9")),
        );
        store.put(current.clone()).await;

        let mut approved = current.clone();
        approved.consent_id = Some(String::from("c9"));
        approved.status = ConsentStatus::Active;

        assert!(store.replace_if_current(&current, approved.clone()).await);
        assert!(store.remove_if_current(&current).await.is_none());
        assert_eq!(store.remove_if_current(&approved).await, Some(approved));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn key_lock_entries_are_released_with_last_lease() {
        let store = ConsentStore::new();
        let key = (ProviderCode::parse("vbank").expect("valid"), String::from("team-1"));

        let first = store.lease(key.clone());
        let second = store.lease(key.clone());
        {
            let _guard = first.acquire().await;
        }
        drop(first);
        assert_eq!(store.lock_table_len(), 1);

        drop(second);
        assert_eq!(store.lock_table_len(), 0);

        let failed = store.lease((ProviderCode::parse("abank").expect("valid"), String::from("x")));
        drop(failed);
        assert_eq!(store.lock_table_len(), 0);
    }

    #[test]
    fn status_check_exposes_degraded_path() {
        let sbank = ProviderCode::parse("sbank").expect("valid");
        let check = StatusCheck::Degraded {
            record: ConsentRecord::pending(sbank, "team-1", Some("c1".into()), None),
            reason: String::from("503"),
        };

        assert!(check.is_degraded());
        assert_eq!(check.record().status, ConsentStatus::Pending);
        assert_eq!(check.into_record().consent_id.as_deref(), Some("c1"));
    }
}
