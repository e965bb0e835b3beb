//!
//! Resolves the bearer token used against the knowledge API.
//!
//! Sources are consulted in a fixed order: an explicit token passed with the
//! tool call, the environment, the first config file that exists, and finally
//! the first token file that exists. Failures reading or parsing the lower
//! priority sources are logged and skipped, never returned.

use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Environment variables checked for a token, in order.
pub const TOKEN_ENV_VARS: [&str; 2] = ["FONDU_AUTH_TOKEN", "FONDU_API_TOKEN"];

const CONFIG_SECTION: &str = "fondu";
const TOKEN_KEY: &str = "auth_token";

/// Where a resolved token came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Explicit,
    Environment(String),
    ConfigFile(PathBuf),
    TokenFile(PathBuf),
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Explicit => write!(f, "explicit argument"),
            CredentialSource::Environment(name) => write!(f, "environment variable {name}"),
            CredentialSource::ConfigFile(path) => write!(f, "config file {}", path.display()),
            CredentialSource::TokenFile(path) => write!(f, "token file {}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCredential {
    pub token: String,
    pub source: CredentialSource,
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct CredentialResolver {
    env_vars: Vec<String>,
    config_paths: Vec<PathBuf>,
    token_paths: Vec<PathBuf>,
    env_lookup: EnvLookup,
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("env_vars", &self.env_vars)
            .field("config_paths", &self.config_paths)
            .field("token_paths", &self.token_paths)
            .finish_non_exhaustive()
    }
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::from_environment()
    }
}

impl CredentialResolver {
    /// Builds a resolver over the standard search paths, relative to the
    /// working directory and the user's home directory.
    pub fn from_environment() -> Self {
        let home = dirs::home_dir();

        let mut config_paths = vec![PathBuf::from("config.yaml"), PathBuf::from("config.json")];
        let mut token_paths = Vec::new();
        if let Some(home) = &home {
            config_paths.push(home.join(".fondu").join("config.yaml"));
            config_paths.push(home.join(".config").join("fondu").join("config.yaml"));
            token_paths.push(home.join(".fondu").join("token"));
            token_paths.push(home.join(".config").join("fondu").join("token"));
        }
        token_paths.push(PathBuf::from(".fondu_token"));

        Self::new(config_paths, token_paths)
    }

    /// Builds a resolver over explicit candidate paths, reading the process environment.
    pub fn new(config_paths: Vec<PathBuf>, token_paths: Vec<PathBuf>) -> Self {
        Self {
            env_vars: TOKEN_ENV_VARS.iter().map(|v| v.to_string()).collect(),
            config_paths,
            token_paths,
            env_lookup: Arc::new(|name| std::env::var(name).ok()),
        }
    }

    /// Replaces the environment lookup. Tests use this instead of mutating process env.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env_lookup = Arc::new(lookup);
        self
    }

    pub fn config_paths(&self) -> &[PathBuf] {
        &self.config_paths
    }

    pub fn token_paths(&self) -> &[PathBuf] {
        &self.token_paths
    }

    pub fn env_vars(&self) -> &[String] {
        &self.env_vars
    }

    pub fn resolve(&self, explicit: Option<&str>) -> Option<String> {
        self.resolve_with_source(explicit).map(|c| c.token)
    }

    pub fn resolve_with_source(&self, explicit: Option<&str>) -> Option<ResolvedCredential> {
        if let Some(token) = explicit.filter(|t| !t.is_empty()) {
            return Some(ResolvedCredential {
                token: token.to_string(),
                source: CredentialSource::Explicit,
            });
        }

        self.lookup_env()
            .or_else(|| self.lookup_config_file())
            .or_else(|| self.lookup_token_file())
    }

    fn lookup_env(&self) -> Option<ResolvedCredential> {
        self.env_vars.iter().find_map(|name| {
            (self.env_lookup)(name)
                .filter(|value| !value.is_empty())
                .map(|token| ResolvedCredential {
                    token,
                    source: CredentialSource::Environment(name.clone()),
                })
        })
    }

    // Only the first existing config file is consulted.
    fn lookup_config_file(&self) -> Option<ResolvedCredential> {
        let path = self.config_paths.iter().find(|p| p.is_file())?;
        match read_config_token(path) {
            Ok(Some(token)) => Some(ResolvedCredential {
                token,
                source: CredentialSource::ConfigFile(path.clone()),
            }),
            Ok(None) => {
                debug!(path = %path.display(), "Config file has no auth token");
                None
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                None
            }
        }
    }

    fn lookup_token_file(&self) -> Option<ResolvedCredential> {
        let path = self.token_paths.iter().find(|p| p.is_file())?;
        match fs::read_to_string(path) {
            Ok(content) => {
                let token = content.trim();
                if token.is_empty() {
                    debug!(path = %path.display(), "Token file is empty");
                    return None;
                }
                Some(ResolvedCredential {
                    token: token.to_string(),
                    source: CredentialSource::TokenFile(path.clone()),
                })
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Ignoring unreadable token file");
                None
            }
        }
    }
}

fn read_config_token(path: &Path) -> anyhow::Result<Option<String>> {
    let content = fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let doc: Value = if is_json {
        serde_json::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };

    Ok(token_from_document(&doc))
}

/// Looks for `fondu.auth_token` first, then a top-level `auth_token`.
fn token_from_document(doc: &Value) -> Option<String> {
    let nested = doc.get(CONFIG_SECTION).and_then(|section| section.get(TOKEN_KEY));
    let flat = doc.get(TOKEN_KEY);

    [nested, flat]
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|token| !token.is_empty())
        .map(str::to_string)
}
