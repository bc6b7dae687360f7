//! `POST /tools/invoke` — direct tool invocation over HTTP, gated by
//! the same pipeline as model-driven calls (hooks + approval).

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::runtime::executor;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ToolsInvokeBody {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
    /// Optional session the call runs under (approval stickiness).
    #[serde(default)]
    pub context: Option<InvokeContext>,
}

#[derive(Debug, Deserialize)]
pub struct InvokeContext {
    #[serde(rename = "sessionKey")]
    pub session_key: Option<String>,
}

pub async fn invoke(State(state): State<AppState>, Json(body): Json<ToolsInvokeBody>) -> Response {
    let call_id = format!("http_{}", uuid::Uuid::new_v4().simple());
    let session_key = body.context.as_ref().and_then(|c| c.session_key.as_deref());

    match executor::invoke_tool(
        &state,
        session_key,
        &body.tool,
        &call_id,
        body.params,
        &CancellationToken::new(),
        None,
    )
    .await
    {
        Ok(output) => Json(serde_json::json!({
            "ok": true,
            "result": output.content,
            "details": output.details,
        }))
        .into_response(),
        Err(e) => {
            let status = match &e {
                ag_domain::Error::ToolBlocked(_) | ag_domain::Error::ApprovalRequired(_) => {
                    axum::http::StatusCode::FORBIDDEN
                }
                _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(serde_json::json!({
                    "ok": false,
                    "error": { "code": e.code(), "message": e.to_string() },
                })),
            )
                .into_response()
        }
    }
}
