use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ProviderCode, UtcDateTime};

/// Consent lifecycle state as reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Pending,
    Active,
    Expired,
    Revoked,
}

impl ConsentStatus {
    /// Map a provider status string onto the canonical vocabulary.
    ///
    /// Unknown or missing values are treated as `Pending`; `Expired` is only
    /// ever produced from an explicit provider value.
    pub fn normalize(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::Pending;
        };

        match raw.trim().to_ascii_lowercase().as_str() {
            "active" | "approved" | "granted" => Self::Active,
            "pending" | "awaiting" | "created" => Self::Pending,
            "revoked" | "cancelled" => Self::Revoked,
            "expired" => Self::Expired,
            _ => Self::Pending,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

impl Display for ConsentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Locally cached view of one (provider, client) consent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    pub consent_id: Option<String>,
    /// Interim identifier issued by providers that approve asynchronously.
    pub request_id: Option<String>,
    pub status: ConsentStatus,
    pub provider: ProviderCode,
    pub client_id: String,
    pub expires_at: Option<UtcDateTime>,
    pub last_synced_at: UtcDateTime,
}

impl ConsentRecord {
    /// Placeholder used when a status check could not reach the provider.
    pub fn pending(
        provider: ProviderCode,
        client_id: impl Into<String>,
        consent_id: Option<String>,
        request_id: Option<String>,
    ) -> Self {
        Self {
            consent_id,
            request_id,
            status: ConsentStatus::Pending,
            provider,
            client_id: client_id.into(),
            expires_at: None,
            last_synced_at: UtcDateTime::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ConsentStatus::Active
    }

    /// Identifier to query the provider with: the consent id once approved,
    /// otherwise the request id.
    pub fn lookup_id(&self) -> Option<&str> {
        self.consent_id
            .as_deref()
            .or(self.request_id.as_deref())
    }
}

/// Provider account, kept loosely typed apart from the fields the engine
/// relies on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub provider: ProviderCode,
    pub account_id: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Provider transaction stamped with its source provider and account.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub provider: ProviderCode,
    pub account_id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_vocabulary_is_case_insensitive() {
        assert_eq!(ConsentStatus::normalize(Some("APPROVED")), ConsentStatus::Active);
        assert_eq!(ConsentStatus::normalize(Some("Granted")), ConsentStatus::Active);
        assert_eq!(ConsentStatus::normalize(Some("awaiting")), ConsentStatus::Pending);
        assert_eq!(ConsentStatus::normalize(Some("created")), ConsentStatus::Pending);
        assert_eq!(ConsentStatus::normalize(Some("Cancelled")), ConsentStatus::Revoked);
        assert_eq!(ConsentStatus::normalize(Some("expired")), ConsentStatus::Expired);
    }

    #[test]
    fn unknown_or_missing_status_is_pending() {
        assert_eq!(ConsentStatus::normalize(Some("on_hold")), ConsentStatus::Pending);
        assert_eq!(ConsentStatus::normalize(None), ConsentStatus::Pending);
    }

    #[test]
    fn lookup_prefers_consent_id() {
        let provider = ProviderCode::parse("sbank").expect("valid code");
        let mut record = ConsentRecord::pending(provider, "team-1", None, Some("r9".into()));
        assert_eq!(record.lookup_id(), Some("r9"));

        record.consent_id = Some(String::from("c9"));
        assert_eq!(record.lookup_id(), Some("c9"));
    }

    #[test]
    fn transaction_serializes_provider_and_account() {
        let mut fields = Map::new();
        fields.insert(String::from("amount"), Value::from(-120.5));
        let tx = Transaction {
            provider: ProviderCode::parse("abank").expect("valid code"),
            account_id: String::from("acc-1"),
            fields,
        };

        let json = serde_json::to_value(&tx).expect("serializable");
        assert_eq!(json["provider"], "abank");
        assert_eq!(json["accountId"], "acc-1");
        assert_eq!(json["amount"], -120.5);
    }
}
