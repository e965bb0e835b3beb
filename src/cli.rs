//!
//! Command-line interface. Every flag falls back to an environment variable.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{ServerConfig, DEFAULT_HOST, DEFAULT_PORT};
use crate::diagnostics::DEFAULT_ERROR_LOG_PATH;
use crate::knowledge::DEFAULT_API_HOST;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "MCP server for searching a Fondu knowledge vault", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub server: ServerArgs,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Serve MCP over HTTP: SSE, the legacy JSON endpoint, and DID profile auth (default).
    Http,
    /// Serve MCP as newline-delimited JSON-RPC over stdin/stdout.
    Stdio,
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Interface to bind.
    #[arg(long, env = "HOST", default_value = DEFAULT_HOST, global = true)]
    pub host: String,

    /// Port to bind.
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT, global = true)]
    pub port: u16,

    /// Knowledge API base URL.
    #[arg(long, env = "FONDU_API_HOST", default_value = DEFAULT_API_HOST, global = true)]
    pub api_host: String,

    /// Deployment environment; `development` enables debug logs.
    #[arg(long, env = "ENVIRONMENT", default_value = "production", global = true)]
    pub environment: String,

    /// Universal resolver used for DID methods other than did:key.
    #[arg(long, env = "FONDU_DID_RESOLVER_URL", global = true)]
    pub did_resolver_url: Option<String>,

    /// Expire unanswered DID challenges after this many seconds.
    #[arg(long, env = "FONDU_SESSION_TTL_SECS", global = true)]
    pub session_ttl_secs: Option<u64>,

    #[arg(long, env = "FONDU_ERROR_LOG", default_value = DEFAULT_ERROR_LOG_PATH, global = true)]
    pub error_log: PathBuf,
}

impl Cli {
    pub fn transport(&self) -> Command {
        self.command.clone().unwrap_or(Command::Http)
    }
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            api_host: args.api_host,
            environment: args.environment,
            did_resolver_url: args.did_resolver_url.filter(|u| !u.trim().is_empty()),
            session_ttl_secs: args.session_ttl_secs,
            error_log: args.error_log,
        }
    }
}
