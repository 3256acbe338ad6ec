//! Tolerant parsing of provider payloads.
//!
//! Providers disagree on envelope shape (`[..]` vs `{"items": [..]}`) and on
//! field names for the same logical value. Each logical field has an ordered
//! list of candidate names; the first present, non-empty candidate wins.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::{ConsentStatus, UtcDateTime};

pub const TOKEN_FIELDS: &[&str] = &["access_token", "token"];
pub const TOKEN_LIFETIME_FIELDS: &[&str] = &["expires_in"];
pub const CONSENT_ID_FIELDS: &[&str] = &["consent_id", "id", "consentId"];
pub const REQUEST_ID_FIELDS: &[&str] = &["request_id", "requestId"];
pub const STATUS_FIELDS: &[&str] = &["status"];
pub const CONSENT_EXPIRY_FIELDS: &[&str] =
    &["expires_at", "expirationDateTime", "expiration_date_time"];
pub const ACCOUNT_ID_FIELDS: &[&str] = &["id", "account_id", "accountId"];

/// Token lifetime assumed when the provider omits one.
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3_600;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("response body is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("response is not a JSON object")]
    NotAnObject,
    #[error("response has no {field} (tried {candidates:?})")]
    MissingField {
        field: &'static str,
        candidates: &'static [&'static str],
    },
}

/// Parsed token exchange response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: u64,
}

/// Parsed consent creation or status response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentPayload {
    pub consent_id: Option<String>,
    pub request_id: Option<String>,
    pub status: ConsentStatus,
    pub expires_at: Option<UtcDateTime>,
}

pub fn parse_body(body: &str) -> Result<Value, NormalizeError> {
    serde_json::from_str(body).map_err(|error| NormalizeError::InvalidJson(error.to_string()))
}

/// First candidate present as a non-empty string or a number.
pub fn pick_str(object: &Map<String, Value>, candidates: &[&str]) -> Option<String> {
    candidates.iter().find_map(|name| match object.get(*name)? {
        Value::String(value) if !value.is_empty() => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    })
}

fn pick_u64(object: &Map<String, Value>, candidates: &[&str]) -> Option<u64> {
    candidates.iter().find_map(|name| match object.get(*name)? {
        Value::Number(value) => value
            .as_u64()
            .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64)),
        Value::String(value) => value.trim().parse().ok(),
        _ => None,
    })
}

/// Unwrap a list-shaped response: `{"items": [..]}` yields the items, a bare
/// list is used as is, anything else is empty.
pub fn list_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("items") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Like [`list_items`] but keeps only JSON objects.
pub fn object_items(value: Value) -> Vec<Map<String, Value>> {
    list_items(value)
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(object) => Some(object),
            _ => None,
        })
        .collect()
}

pub fn token_grant(value: &Value) -> Result<TokenGrant, NormalizeError> {
    let object = value.as_object().ok_or(NormalizeError::NotAnObject)?;
    let access_token =
        pick_str(object, TOKEN_FIELDS).ok_or(NormalizeError::MissingField {
            field: "access token",
            candidates: TOKEN_FIELDS,
        })?;
    let expires_in = pick_u64(object, TOKEN_LIFETIME_FIELDS)
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

    Ok(TokenGrant {
        access_token,
        expires_in,
    })
}

pub fn consent_payload(value: &Value) -> Result<ConsentPayload, NormalizeError> {
    let object = value.as_object().ok_or(NormalizeError::NotAnObject)?;
    let status = pick_str(object, STATUS_FIELDS);

    Ok(ConsentPayload {
        consent_id: pick_str(object, CONSENT_ID_FIELDS),
        request_id: pick_str(object, REQUEST_ID_FIELDS),
        status: ConsentStatus::normalize(status.as_deref()),
        expires_at: pick_str(object, CONSENT_EXPIRY_FIELDS)
            .and_then(|raw| UtcDateTime::parse(&raw).ok()),
    })
}

pub fn account_id(object: &Map<String, Value>) -> Option<String> {
    pick_str(object, ACCOUNT_ID_FIELDS)
}
