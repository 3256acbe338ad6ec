//! Runtime settings for the hub.
//!
//! # Environment Variables
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `BANKMESH_REQUESTING_PARTY` | `BANKMESH_CLIENT_ID`, then `bankmesh` | `X-Requesting-Bank` header value |
//! | `BANKMESH_DEFAULT_CLIENT` | `<requesting party>-1` | client id used when a caller names none |
//! | `BANKMESH_TIMEOUT_MS` | `30000` | per-request timeout |
//! | `BANKMESH_ACCOUNT_LIMIT` | `50` | accounts kept per provider |
//! | `BANKMESH_TRANSACTION_LIMIT` | `100` | transactions requested per account |
//! | `BANKMESH_TRANSACTION_CONCURRENCY` | `4` | parallel per-account transaction calls |

use std::env;
use std::str::FromStr;

use crate::http_client::DEFAULT_TIMEOUT_MS;
use crate::ValidationError;

/// Caps applied to one provider's share of an aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationLimits {
    pub account_limit: usize,
    pub transaction_limit: usize,
    pub transaction_concurrency: usize,
}

impl Default for AggregationLimits {
    fn default() -> Self {
        Self {
            account_limit: 50,
            transaction_limit: 100,
            transaction_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    pub requesting_party: String,
    pub default_client: String,
    pub request_timeout_ms: u64,
    pub limits: AggregationLimits,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::for_party("bankmesh")
    }
}

impl HubConfig {
    pub fn for_party(requesting_party: impl Into<String>) -> Self {
        let requesting_party = requesting_party.into();
        Self {
            default_client: format!("{requesting_party}-1"),
            requesting_party,
            request_timeout_ms: DEFAULT_TIMEOUT_MS,
            limits: AggregationLimits::default(),
        }
    }

    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let party = lookup("BANKMESH_REQUESTING_PARTY")
            .or_else(|| lookup("BANKMESH_CLIENT_ID"))
            .unwrap_or_else(|| String::from("bankmesh"));
        let mut config = Self::for_party(party);

        if let Some(client) = lookup("BANKMESH_DEFAULT_CLIENT") {
            if client.trim().is_empty() {
                return Err(ValidationError::EmptyClientId);
            }
            config.default_client = client.trim().to_owned();
        }

        config.request_timeout_ms = parse_var(&lookup, "BANKMESH_TIMEOUT_MS", config.request_timeout_ms)?;
        config.limits.account_limit =
            parse_var(&lookup, "BANKMESH_ACCOUNT_LIMIT", config.limits.account_limit)?;
        config.limits.transaction_limit = parse_var(
            &lookup,
            "BANKMESH_TRANSACTION_LIMIT",
            config.limits.transaction_limit,
        )?;
        config.limits.transaction_concurrency = parse_var(
            &lookup,
            "BANKMESH_TRANSACTION_CONCURRENCY",
            config.limits.transaction_concurrency,
        )?
        .max(1);

        Ok(config)
    }

    pub fn with_limits(mut self, limits: AggregationLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ValidationError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ValidationError::InvalidEnvValue { name, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = HubConfig::from_lookup(lookup_from(&[])).expect("defaults");

        assert_eq!(config.requesting_party, "bankmesh");
        assert_eq!(config.default_client, "bankmesh-1");
        assert_eq!(config.request_timeout_ms, 30_000);
        assert_eq!(config.limits, AggregationLimits::default());
    }

    #[test]
    fn party_falls_back_to_client_id() {
        let config = HubConfig::from_lookup(lookup_from(&[("BANKMESH_CLIENT_ID", "team217")]))
            .expect("valid");

        assert_eq!(config.requesting_party, "team217");
        assert_eq!(config.default_client, "team217-1");
    }

    #[test]
    fn invalid_number_is_reported_with_variable_name() {
        let err = HubConfig::from_lookup(lookup_from(&[("BANKMESH_ACCOUNT_LIMIT", "lots")]))
            .expect_err("must fail");

        assert_eq!(
            err,
            ValidationError::InvalidEnvValue {
                name: "BANKMESH_ACCOUNT_LIMIT",
                value: String::from("lots"),
            }
        );
    }

    #[test]
    fn zero_concurrency_is_raised_to_one() {
        let config = HubConfig::from_lookup(lookup_from(&[(
            "BANKMESH_TRANSACTION_CONCURRENCY",
            "0",
        )]))
        .expect("valid");

        assert_eq!(config.limits.transaction_concurrency, 1);
    }
}
