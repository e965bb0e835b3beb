use crate::knowledge::{GatherKnowledgeParams, SearchToolInvoker, DEFAULT_TOP_K};
use crate::mcp::{
    error_codes,
    types::{CallToolParams, CallToolResult, ContentBlock, ErrorObject, ToolAnnotations, ToolDefinition},
};
use crate::server::{deserialize_value, ok_some};
use serde_json::json;
use tracing::instrument;

pub const GATHER_KNOWLEDGE_TOOL: &str = "gather_relevant_user_knowledge";

#[instrument(skip(params, invoker), fields(tool_name = %params.name))]
pub async fn handle_tools_call(
    params: CallToolParams,
    invoker: &SearchToolInvoker,
) -> Result<Option<serde_json::Value>, ErrorObject> {
    let tool_name = params.name.as_str();
    let arguments = params.arguments;

    let result: Result<CallToolResult, ErrorObject> = match tool_name {
        GATHER_KNOWLEDGE_TOOL => match deserialize_value::<GatherKnowledgeParams>(arguments, tool_name) {
            Ok(search_params) if search_params.top_k == 0 => Err(ErrorObject {
                code: error_codes::INVALID_PARAMS,
                message: format!("Invalid arguments for {tool_name}: top_k must be at least 1"),
                data: None,
            }),
            Ok(search_params) => {
                let text = invoker.invoke(&search_params).await;
                Ok(CallToolResult {
                    is_error: Some(false),
                    content: vec![ContentBlock::text(text)],
                })
            }
            Err(e) => Err(e),
        },
        _ => Err(ErrorObject {
            code: error_codes::TOOL_NOT_FOUND,
            message: format!("Tool '{tool_name}' not found or not callable via tools/call"),
            data: None,
        }),
    };

    match result {
        Ok(call_tool_res) => ok_some(call_tool_res),
        Err(err_obj) => ok_some(CallToolResult {
            is_error: Some(true),
            content: vec![ContentBlock::text(err_obj.message)],
        }),
    }
}

pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    vec![ToolDefinition {
        name: GATHER_KNOWLEDGE_TOOL.to_string(),
        description: Some(
            "Search your knowledge vault using hybrid semantic and keyword matching. \
             Candidate matches from semantic and keyword relevance are reranked and the most \
             relevant results are returned as a formatted digest."
                .to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Natural language query for semantic search and reranking" },
                "auth_token": { "type": "string", "description": "Optional Fondu API token; falls back to environment, config file, then token file" },
                "keywords": { "type": "string", "description": "Specific terms to prioritize in keyword matching" },
                "top_k": { "type": "integer", "minimum": 1, "default": DEFAULT_TOP_K, "description": "Number of results to return" }
            },
            "required": ["query"]
        }),
        annotations: Some(ToolAnnotations {
            title: Some("Gather Relevant User Knowledge".to_string()),
            read_only_hint: Some(true),
            destructive_hint: Some(false),
            idempotent_hint: Some(true),
            open_world_hint: Some(true),
        }),
    }]
}
