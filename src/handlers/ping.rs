use crate::mcp::types::{ErrorObject, PingParams, PingResult};

pub async fn handle_ping(_params: PingParams) -> Result<PingResult, ErrorObject> {
    Ok(PingResult { message: "pong".to_string() })
}
