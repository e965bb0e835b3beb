use crate::handlers::tool::get_tool_definitions;
use crate::mcp::types::{
    ErrorObject, InitializeParams, InitializeResult, ServerCapabilities, ServerInfo, PROTOCOL_VERSION,
};
use std::collections::HashMap;
use tracing::info;

pub const SERVER_NAME: &str = "fondu-mcp";

/// Handles the MCP initialize request.
pub async fn handle_initialize(params: InitializeParams) -> Result<InitializeResult, ErrorObject> {
    let client = params.client_info.as_ref().and_then(|c| c.name.as_deref()).unwrap_or("unknown");
    info!(%client, protocol_version = %params.protocol_version, "Client initializing");

    let tools = get_tool_definitions()
        .into_iter()
        .map(|tool| (tool.name.clone(), tool))
        .collect::<HashMap<_, _>>();

    // Echo the client's version; fall back to ours when it sent none.
    let protocol_version = if params.protocol_version.is_empty() {
        PROTOCOL_VERSION.to_string()
    } else {
        params.protocol_version
    };

    Ok(InitializeResult {
        protocol_version,
        server_info: ServerInfo {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        capabilities: ServerCapabilities { tools },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tool::GATHER_KNOWLEDGE_TOOL;

    #[tokio::test]
    async fn test_initialize_echoes_version_and_lists_tool() {
        let params = InitializeParams {
            protocol_version: "2025-03-26".to_string(),
            ..Default::default()
        };
        let result = handle_initialize(params).await.unwrap();

        assert_eq!(result.protocol_version, "2025-03-26");
        assert_eq!(result.server_info.name, SERVER_NAME);
        assert!(result.capabilities.tools.contains_key(GATHER_KNOWLEDGE_TOOL));
    }

    #[tokio::test]
    async fn test_initialize_defaults_protocol_version() {
        let result = handle_initialize(InitializeParams::default()).await.unwrap();
        assert_eq!(result.protocol_version, PROTOCOL_VERSION);
    }
}
