//! CLI argument definitions for bankmesh.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `providers` | List the provider registry |
//! | `token` | Obtain a provider access token |
//! | `consent` | Create, check, or revoke consents |
//! | `aggregate` | Merged accounts and transactions across providers |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `-v` | warn+info | Raise log verbosity (repeatable) |
//!
//! # Examples
//!
//! ```bash
//! bankmesh providers --pretty
//! bankmesh consent create vbank --client team042-1
//! bankmesh consent status r9 --provider sbank --client team042-1
//! bankmesh aggregate --client team042-1 --map sbank=team042-2
//! ```

use clap::{Args, Parser, Subcommand};

/// Multi-bank open banking access: tokens, consents, aggregated data.
///
/// Providers and credentials come from `BANKMESH_*` environment variables.
#[derive(Debug, Parser)]
#[command(name = "bankmesh", author, version, about = "Multi-bank open banking CLI")]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` wins when set.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List registered providers and their approval policy.
    Providers,

    /// Obtain (or reuse) an access token. The token itself is never printed.
    ///
    ///   bankmesh token vbank
    Token(TokenArgs),

    /// Consent lifecycle commands.
    Consent(ConsentArgs),

    /// Fetch accounts and transactions from every mapped provider.
    ///
    ///   bankmesh aggregate
    ///   bankmesh aggregate --client team042-3
    ///   bankmesh aggregate --map vbank=team042-1 --map sbank=team042-2 --force-new
    Aggregate(AggregateArgs),
}

#[derive(Debug, Args)]
pub struct TokenArgs {
    /// Provider code (e.g. vbank).
    pub provider: String,
}

#[derive(Debug, Args)]
pub struct ConsentArgs {
    #[command(subcommand)]
    pub command: ConsentCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConsentCommand {
    /// Request a fresh consent, revoking any cached one first.
    Create {
        provider: String,
        /// Client id; defaults to `BANKMESH_DEFAULT_CLIENT`.
        #[arg(long)]
        client: Option<String>,
    },

    /// Check a consent by consent id or request id.
    ///
    /// Without `--provider` the id must be known to this process.
    Status {
        id: String,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        client: Option<String>,
    },

    /// Revoke a consent at the provider.
    Revoke {
        id: String,
        #[arg(long)]
        provider: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct AggregateArgs {
    /// Client id used for every provider not listed in `--map`.
    #[arg(long)]
    pub client: Option<String>,

    /// Per-provider client override, `<provider>=<client>`. Repeatable.
    #[arg(long = "map", value_name = "PROVIDER=CLIENT")]
    pub mappings: Vec<String>,

    /// Replace cached consents with new ones.
    #[arg(long, default_value_t = false)]
    pub force_new: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aggregate_mappings() {
        let cli = Cli::try_parse_from([
            "bankmesh",
            "--pretty",
            "aggregate",
            "--map",
            "vbank=team-1",
            "--map",
            "sbank=team-2",
            "--force-new",
        ])
        .expect("valid arguments");

        assert!(cli.pretty);
        match cli.command {
            Command::Aggregate(args) => {
                assert_eq!(args.mappings, vec!["vbank=team-1", "sbank=team-2"]);
                assert!(args.force_new);
                assert!(args.client.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_consent_status_with_provider() {
        let cli = Cli::try_parse_from([
            "bankmesh", "consent", "status", "r9", "--provider", "sbank",
        ])
        .expect("valid arguments");

        match cli.command {
            Command::Consent(ConsentArgs {
                command: ConsentCommand::Status { id, provider, client },
            }) => {
                assert_eq!(id, "r9");
                assert_eq!(provider.as_deref(), Some("sbank"));
                assert!(client.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn token_requires_provider() {
        assert!(Cli::try_parse_from(["bankmesh", "token"]).is_err());
    }
}
