//! Static table of bank providers.
//!
//! The registry is built once at startup and never mutated; every manager
//! holds a cheap clone of it.

use std::collections::BTreeMap;
use std::env;
use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BankError, ProviderCode, ValidationError};

/// Upper bound on consent status checks for auto-approving providers.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 40;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

const fn default_auto_approve() -> bool {
    true
}

const fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

const fn default_poll_attempts() -> u32 {
    DEFAULT_POLL_ATTEMPTS
}

/// Connection and consent-approval settings for one provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub code: ProviderCode,
    pub name: String,
    pub base_url: String,
    pub client_id: String,
    #[serde(skip_serializing, default)]
    pub client_secret: String,
    /// `false` means consents are approved out of band and must be polled by
    /// the caller through an explicit status check.
    #[serde(default = "default_auto_approve")]
    pub auto_approve: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
}

impl ProviderDescriptor {
    pub fn new(
        code: ProviderCode,
        name: impl Into<String>,
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            code,
            name: name.into(),
            base_url: base_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auto_approve: true,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
        }
    }

    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }

    pub fn with_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.poll_interval_ms = interval.as_millis().min(u128::from(u64::MAX)) as u64;
        self.poll_attempts = attempts;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Absolute URL for a provider path such as `/accounts`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let base = self.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ValidationError::InvalidBaseUrl {
                provider: self.code.to_string(),
                value: self.base_url.clone(),
            });
        }
        if self.auto_approve && self.poll_attempts == 0 {
            return Err(ValidationError::ZeroPollAttempts {
                provider: self.code.to_string(),
            });
        }
        if self.poll_attempts > DEFAULT_POLL_ATTEMPTS {
            return Err(ValidationError::TooManyPollAttempts {
                provider: self.code.to_string(),
                attempts: self.poll_attempts,
                max: DEFAULT_POLL_ATTEMPTS,
            });
        }
        Ok(())
    }
}

impl Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("code", &self.code)
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("auto_approve", &self.auto_approve)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("poll_attempts", &self.poll_attempts)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    providers: Vec<ProviderDescriptor>,
}

/// Immutable provider table keyed by provider code.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Arc<BTreeMap<ProviderCode, ProviderDescriptor>>,
}

impl ProviderRegistry {
    pub fn new(descriptors: Vec<ProviderDescriptor>) -> Result<Self, ValidationError> {
        let mut providers = BTreeMap::new();
        for descriptor in descriptors {
            descriptor.validate()?;
            let code = descriptor.code.clone();
            if providers.insert(code.clone(), descriptor).is_some() {
                return Err(ValidationError::DuplicateProvider {
                    provider: code.to_string(),
                });
            }
        }

        Ok(Self {
            providers: Arc::new(providers),
        })
    }

    /// The three open-banking sandbox banks sharing one set of team credentials.
    pub fn sandbox(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        let bank = |code: &str, name: &str| {
            ProviderDescriptor::new(
                ProviderCode::parse(code).expect("sandbox provider codes are valid"),
                name,
                format!("https://{code}.open.bankingapi.ru"),
                client_id.clone(),
                client_secret.clone(),
            )
        };

        let providers = vec![
            bank("vbank", "VBank"),
            bank("abank", "ABank"),
            bank("sbank", "SBank")
                .with_auto_approve(false)
                .with_polling(Duration::from_secs(3), DEFAULT_POLL_ATTEMPTS),
        ];

        Self::new(providers).expect("sandbox registry is valid")
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ValidationError> {
        let file: RegistryFile =
            serde_json::from_str(raw).map_err(|error| ValidationError::RegistryFile {
                path: String::from("<inline>"),
                message: error.to_string(),
            })?;
        Self::new(file.providers)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|error| ValidationError::RegistryFile {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        Self::from_json_str(&raw).map_err(|error| match error {
            ValidationError::RegistryFile { message, .. } => ValidationError::RegistryFile {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Load `BANKMESH_PROVIDERS_FILE` when set, otherwise the sandbox table
    /// with `BANKMESH_CLIENT_ID` / `BANKMESH_CLIENT_SECRET` credentials.
    pub fn from_env() -> Result<Self, ValidationError> {
        if let Ok(path) = env::var("BANKMESH_PROVIDERS_FILE") {
            return Self::from_json_file(path);
        }

        let client_id = env::var("BANKMESH_CLIENT_ID").unwrap_or_else(|_| String::from("demo"));
        let client_secret =
            env::var("BANKMESH_CLIENT_SECRET").unwrap_or_else(|_| String::from("demo"));
        Ok(Self::sandbox(client_id, client_secret))
    }

    pub fn get(&self, code: &ProviderCode) -> Option<&ProviderDescriptor> {
        self.providers.get(code)
    }

    pub fn require(&self, code: &ProviderCode) -> Result<&ProviderDescriptor, BankError> {
        self.get(code)
            .ok_or_else(|| BankError::unknown_provider(code.as_str()))
    }

    pub fn codes(&self) -> impl Iterator<Item = &ProviderCode> {
        self.providers.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
