//! HTTP façade.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Version and corpus sync state |
//! | `GET`  | `/search` | Search with query-string arguments |
//! | `POST` | `/search` | Search with a JSON body |
//! | `GET`  | `/tools/list` | Registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a tool by name |
//! | `*`    | `/mcp` | MCP streamable HTTP endpoint |
//!
//! Search arguments use the tool's camelCase names (`query`, `page`,
//! `includeContent`, `maxResults`, `filesOnly`, `useJson`, `sessionId`,
//! `fullContent`, `filePath`). A missing or blank `query` is rejected with
//! `400` before any search runs.
//!
//! Errors use one shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query is required" } }
//! ```

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::mcp::McpBridge;
use crate::orchestrator::SearchArgs;
use crate::sync::{CorpusState, CorpusSynchronizer};
use crate::tool::{validate_params, ToolContext, ToolInfo, ToolRegistry};

#[derive(Clone)]
struct AppState {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
    synchronizer: Arc<CorpusSynchronizer>,
}

/// Builds the router; callers decide where it listens.
pub fn build_router(
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
    synchronizer: Arc<CorpusSynchronizer>,
) -> Router {
    let bridge = McpBridge::new(tools.clone(), ctx.clone());
    let mcp = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", get(handle_search_get).post(handle_search_post))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .nest_service("/mcp", mcp)
        .layer(cors)
        .with_state(AppState {
            tools,
            ctx,
            synchronizer,
        })
}

/// Serves `router` on an already-bound listener until the process stops.
pub async fn serve(listener: TcpListener, router: Router) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, router).await?;
    Ok(())
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn tool_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "tool_error",
        message: message.into(),
    }
}

/// Maps tool failures to client errors where the message says the caller
/// got something wrong.
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    let msg = format!("{:#}", err);
    if msg.contains("must not be empty")
        || msg.contains("invalid")
        || msg.contains("outside the documentation root")
    {
        bad_request(format!("{}: {}", tool_name, msg))
    } else if msg.contains("Failed to read") {
        not_found(format!("{}: {}", tool_name, msg))
    } else {
        tool_error(format!("{}: {}", tool_name, msg))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    corpus: CorpusState,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        corpus: state.synchronizer.state(),
    })
}

async fn run_search(state: &AppState, args: SearchArgs) -> Result<Response, AppError> {
    if args.query.trim().is_empty() {
        return Err(bad_request("query is required"));
    }
    let text = state.ctx.orchestrator().execute(&args).await;
    let content_type = if args.use_json && args.file_path.is_none() {
        "application/json"
    } else {
        "text/plain; charset=utf-8"
    };
    Ok(([(header::CONTENT_TYPE, content_type)], text).into_response())
}

async fn handle_search_get(
    State(state): State<AppState>,
    Query(args): Query<SearchArgs>,
) -> Result<Response, AppError> {
    run_search(&state, args).await
}

async fn handle_search_post(
    State(state): State<AppState>,
    Json(args): Json<SearchArgs>,
) -> Result<Response, AppError> {
    run_search(&state, args).await
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state
            .tools
            .tools()
            .iter()
            .map(|t| ToolInfo::from_tool(t.as_ref()))
            .collect(),
    })
}

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    let params = validate_params(&tool.parameters_schema(), &params)
        .map_err(|e| bad_request(e.to_string()))?;

    let result = tool
        .execute(params, &state.ctx)
        .await
        .map_err(|e| classify_tool_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}
