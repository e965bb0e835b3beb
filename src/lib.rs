//! `fondu-mcp` exposes a Fondu knowledge vault as a Model Context Protocol tool.
//!
//! It provides:
//! - The `gather_relevant_user_knowledge` tool (`knowledge`) and the
//!   multi-source token lookup it relies on (`credentials`)
//! - A JSON-RPC dispatcher (`server`, `mcp`, `handlers`) served over stdio or HTTP
//! - HTTP routes for SSE sessions, the legacy `/api/mcp` endpoint and health (`http_transport`)
//! - DID challenge/response authentication on `/v1/profile` (`session`, `did`, `auth`)
//! - A best-effort failure log (`diagnostics`)

pub mod auth;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod diagnostics;
pub mod did;
pub mod error;
pub mod handlers;
pub mod http_transport;
pub mod knowledge;
pub mod mcp;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use credentials::CredentialResolver;
pub use error::{AuthError, DidError, SearchError};
pub use server::Server;
