//! # Domain Models
//!
//! Canonical types shared by the token, consent, and aggregation layers.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ProviderCode`] | Normalized registry key of a bank provider |
//! | [`ConsentStatus`] | Pending / Active / Expired / Revoked |
//! | [`ConsentRecord`] | Cached consent for one (provider, client) pair |
//! | [`Account`] | Provider account tagged with its provider |
//! | [`Transaction`] | Provider transaction tagged with provider and account |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! Accounts and transactions keep the provider's original fields in a JSON
//! map; only the identifiers the engine needs are lifted into typed fields.

mod models;
mod provider_code;
mod timestamp;

pub use models::{Account, ConsentRecord, ConsentStatus, Transaction};
pub use provider_code::ProviderCode;
pub use timestamp::UtcDateTime;
