//!
//! The `gather_relevant_user_knowledge` tool: resolves a token, queries the
//! remote knowledge vault search API, and renders the results as text.

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::credentials::CredentialResolver;
use crate::diagnostics::ErrorLog;
use crate::error::SearchError;

pub const DEFAULT_API_HOST: &str = "https://api.youfondu.com";
pub const SEARCH_PATH: &str = "/v1/knowledge/search_knowledge_vault";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_TOP_K: u32 = 10;

pub const NO_RESULTS_MESSAGE: &str = "No relevant information found in your knowledge vault.";
pub const API_FAILURE_MESSAGE: &str = "Error: Failed to get a response from the knowledge vault API.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub keywords: String,
    pub top_k: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<SearchResult>,
    #[serde(default)]
    pub count: u64,
}

/// A single hit. Objects decode as [`SearchResult::Structured`], anything else as a scalar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SearchResult {
    Structured(StructuredResult),
    Scalar(Value),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StructuredResult {
    #[serde(default)]
    pub text: Option<Value>,
    #[serde(default)]
    pub source: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    async fn search(&self, token: &str, request: &SearchRequest) -> Result<SearchResponse, SearchError>;

    /// Endpoint description used in logs.
    fn endpoint(&self) -> String;
}

/// Calls the knowledge API over HTTPS.
pub struct HttpKnowledgeSearch {
    client: HttpClient,
    endpoint: String,
}

impl HttpKnowledgeSearch {
    pub fn new(api_host: &str) -> Self {
        Self {
            client: HttpClient::new(),
            endpoint: format!("{}{}", api_host.trim_end_matches('/'), SEARCH_PATH),
        }
    }
}

#[async_trait]
impl KnowledgeSearch for HttpKnowledgeSearch {
    async fn search(&self, token: &str, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::HttpStatus(status.as_u16()));
        }
        Ok(response.json::<SearchResponse>().await?)
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

/// Arguments of the `gather_relevant_user_knowledge` tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatherKnowledgeParams {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
}

fn default_top_k() -> u32 {
    DEFAULT_TOP_K
}

pub struct SearchToolInvoker {
    credentials: CredentialResolver,
    backend: Arc<dyn KnowledgeSearch>,
    error_log: Arc<ErrorLog>,
}

impl SearchToolInvoker {
    pub fn new(credentials: CredentialResolver, backend: Arc<dyn KnowledgeSearch>, error_log: Arc<ErrorLog>) -> Self {
        Self {
            credentials,
            backend,
            error_log,
        }
    }

    /// Runs a search and returns the text shown to the model. Never fails:
    /// missing credentials and API errors come back as explanatory strings.
    #[instrument(skip(self, params), fields(top_k = params.top_k))]
    pub async fn invoke(&self, params: &GatherKnowledgeParams) -> String {
        let resolved = tokio::task::spawn_blocking({
            let credentials = self.credentials.clone();
            let explicit = params.auth_token.clone();
            move || credentials.resolve_with_source(explicit.as_deref())
        })
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, "Credential lookup task failed");
            None
        });

        let Some(credential) = resolved else {
            info!("No auth token available for knowledge search");
            return self.missing_token_message();
        };
        info!(source = %credential.source, "Resolved knowledge API token");

        let request = SearchRequest {
            query: params.query.clone(),
            keywords: params.keywords.clone().unwrap_or_default(),
            top_k: params.top_k,
        };

        let endpoint = self.backend.endpoint();
        info!(%endpoint, "Calling knowledge API");

        match self.backend.search(&credential.token, &request).await {
            Ok(response) => {
                info!(%endpoint, count = response.count, "Knowledge search completed");
                format_results(&response)
            }
            Err(e) => {
                error!(%endpoint, error = %e, "Knowledge search failed");
                let message = format!("knowledge search via {endpoint} failed: {e}");
                let error_log = Arc::clone(&self.error_log);
                if let Err(e) = tokio::task::spawn_blocking(move || error_log.record(&message)).await {
                    error!(error = %e, "Error log task failed");
                }
                API_FAILURE_MESSAGE.to_string()
            }
        }
    }

    fn missing_token_message(&self) -> String {
        let list = |paths: &[std::path::PathBuf]| {
            paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "Error: No authentication token found for the knowledge vault. Provide one in any of these ways:\n\
             1. Pass the `auth_token` argument to this tool.\n\
             2. Set the {} environment variable.\n\
             3. Add `fondu.auth_token` (or a top-level `auth_token`) to a config file: {}.\n\
             4. Save the token in a token file: {}.",
            self.credentials.env_vars().join(" or "),
            list(self.credentials.config_paths()),
            list(self.credentials.token_paths()),
        )
    }
}

/// Renders a search response as a numbered digest.
pub fn format_results(response: &SearchResponse) -> String {
    if response.count == 0 {
        return NO_RESULTS_MESSAGE.to_string();
    }

    let mut out = format!("Found {} relevant results in your knowledge vault:\n\n", response.count);
    for (i, result) in response.results.iter().enumerate() {
        let n = i + 1;
        match result {
            SearchResult::Structured(item) => {
                out.push_str(&format!("{n}. "));
                if let Some(text) = item.text.as_ref().filter(|t| !is_empty_value(t)) {
                    out.push_str(&format!("{}\n", scalar_text(text)));
                }
                if let Some(source) = item.source.as_ref().filter(|s| !is_empty_value(s)) {
                    out.push_str(&format!("Source: {}\n", scalar_text(source)));
                }
                if let Some(metadata) = item.metadata.as_ref().filter(|m| !is_empty_value(m)) {
                    out.push_str(&format!("Metadata: {metadata}\n"));
                }
            }
            SearchResult::Scalar(value) => {
                out.push_str(&format!("{n}. {}\n", scalar_text(value)));
            }
        }
        out.push('\n');
    }
    out
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
