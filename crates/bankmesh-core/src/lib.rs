//! # Bankmesh Core
//!
//! Token, consent, and aggregation engine for reading account data from
//! several open-banking providers at once.
//!
//! ## Overview
//!
//! - **Provider registry** of base URLs, credentials, and approval policy
//! - **Token manager** caching one access token per provider
//! - **Consent manager** with creation, approval polling, status checks, and
//!   best-effort revokes
//! - **Aggregation engine** fanning out one unit per provider and isolating
//!   failures
//! - **Tolerant normalization** of provider payload shapes
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`aggregate`] | Multi-provider fan-out and merged result |
//! | [`api_client`] | Provider endpoint adapter |
//! | [`config`] | Hub settings and aggregation limits |
//! | [`consent`] | Consent state machine and indices |
//! | [`domain`] | Domain models (ProviderCode, ConsentRecord, Account, Transaction) |
//! | [`error`] | Error taxonomy |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`hub`] | Facade and builder |
//! | [`normalize`] | Candidate-field payload parsing |
//! | [`registry`] | Provider table |
//! | [`token`] | Token cache |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bankmesh_core::{BankHubBuilder, ProviderCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = BankHubBuilder::new().with_env()?.build();
//!
//!     let vbank = ProviderCode::parse("vbank")?;
//!     let consent = hub.ensure_consent(&vbank, "team042-1", false).await?;
//!     println!("consent {} is {}", consent.lookup_id().unwrap_or("-"), consent.status);
//!
//!     let view = hub.aggregate(&hub.resolve_clients(None), false).await;
//!     println!("{} accounts", view.accounts.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  CLI / Caller   │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │    BankHub      │────▶│   Aggregator     │  one task per provider
//! └────────┬────────┘     └────────┬─────────┘
//!          │                       │
//!          ▼                       ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │  TokenManager   │     │ ConsentManager   │
//! │ (per-provider   │     │ (per-client lock,│
//! │  refresh lock)  │     │  polling)        │
//! └────────┬────────┘     └────────┬─────────┘
//!          └───────────┬───────────┘
//!                      ▼
//!          ┌──────────────────────┐     ┌──────────────────┐
//!          │  ProviderApiClient   │────▶│ HttpClient       │
//!          │  + normalize         │     │ (reqwest/script) │
//!          └──────────────────────┘     └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use bankmesh_core::{BankError, BankErrorKind};
//!
//! fn describe(error: &BankError) -> &'static str {
//!     match error.kind() {
//!         BankErrorKind::Auth => "check provider credentials",
//!         BankErrorKind::NotFound => "unknown provider or consent",
//!         _ if error.retryable() => "try again later",
//!         _ => "giving up",
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - Client secrets are never serialized or printed by `Debug`
//! - Access tokens are never logged
//! - All HTTP requests use TLS via rustls

pub mod aggregate;
pub mod api_client;
pub mod config;
pub mod consent;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod hub;
pub mod normalize;
pub mod registry;
pub mod token;

// Aggregation
pub use aggregate::{
    parse_mapping_entry, AggregateResult, Aggregator, ClientMapping, ProviderOutcome,
    ProviderSnapshot,
};

// Provider endpoints
pub use api_client::{Grant, Page, ProviderApiClient, CONSENT_PERMISSIONS};

// Configuration
pub use config::{AggregationLimits, HubConfig};

// Consent lifecycle
pub use consent::{ConsentManager, ConsentStore, RevokeOutcome, StatusCheck};

// Domain models
pub use domain::{Account, ConsentRecord, ConsentStatus, ProviderCode, Transaction, UtcDateTime};

// Error types
pub use error::{BankError, BankErrorKind, ValidationError};

// HTTP client types
pub use http_client::{
    HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};

// Facade
pub use hub::{BankHub, BankHubBuilder};

// Registry
pub use registry::{ProviderDescriptor, ProviderRegistry};

// Tokens
pub use token::TokenManager;
