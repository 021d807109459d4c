//! MCP tool surface: seven verbs, each a thin projection over the
//! supervisor, state store, and tool registry.
//!
//! Every verb returns a `{ok: bool, ...}` JSON object; failures carry a
//! machine-readable `kind` and a human-readable `message`.

use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    schemars, tool, tool_handler, tool_router, ServerHandler,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use registry::ToolFilter;
use workflow::{WebhookRequest, WorkflowError, WorkflowSupervisor};

use crate::AppState;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct WebhookParam {
    #[schemars(description = "URL receiving every stream event as an HTTP POST")]
    pub url: String,
    #[schemars(description = "Shared secret for the HMAC-SHA256 signature header")]
    pub secret: Option<String>,
}

impl From<WebhookParam> for WebhookRequest {
    fn from(param: WebhookParam) -> Self {
        Self {
            url: param.url,
            secret: param.secret,
        }
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct StartHierarchicalRequest {
    #[schemars(description = "Task to research")]
    pub task: String,
    #[schemars(description = "Beltalowda configuration overrides")]
    pub config: Option<Value>,
    pub webhook: Option<WebhookParam>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct StartSwarmRequest {
    #[schemars(description = "Query to investigate")]
    pub query: String,
    #[schemars(description = "Swarm configuration overrides")]
    pub config: Option<Value>,
    pub webhook: Option<WebhookParam>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct WorkflowIdRequest {
    pub workflow_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ListToolsRequest {
    pub category: Option<String>,
    #[schemars(description = "Tools must carry every listed tag")]
    pub tags: Option<Vec<String>>,
    pub enabled: Option<bool>,
    pub namespace: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ExecuteToolRequest {
    pub name: String,
    pub namespace: Option<String>,
    pub arguments: Option<Value>,
}

/// MCP server handler exposing the Dreamwalker verbs.
#[derive(Clone)]
pub struct DreamwalkerMcp {
    state: Arc<AppState>,
    tool_router: ToolRouter<DreamwalkerMcp>,
}

#[tool_router]
impl DreamwalkerMcp {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Start a hierarchical (Beltalowda) research workflow")]
    async fn start_hierarchical(
        &self,
        Parameters(request): Parameters<StartHierarchicalRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let outcome = self
            .state
            .supervisor
            .submit(
                "beltalowda",
                &request.task,
                request.config.unwrap_or(Value::Null),
                request.webhook.map(Into::into),
            )
            .await;
        Ok(match outcome {
            Ok(id) => verb_ok(json!({ "workflow_id": id, "pattern": "beltalowda" })),
            Err(err) => verb_err(&err),
        })
    }

    #[tool(description = "Start a typed-swarm search workflow")]
    async fn start_swarm(
        &self,
        Parameters(request): Parameters<StartSwarmRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let outcome = self
            .state
            .supervisor
            .submit(
                "swarm",
                &request.query,
                request.config.unwrap_or(Value::Null),
                request.webhook.map(Into::into),
            )
            .await;
        Ok(match outcome {
            Ok(id) => verb_ok(json!({ "workflow_id": id, "pattern": "swarm" })),
            Err(err) => verb_err(&err),
        })
    }

    #[tool(description = "Fetch a workflow's record and, when completed, its result")]
    async fn status(
        &self,
        Parameters(request): Parameters<WorkflowIdRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workflow_id(&request.workflow_id) {
            Ok(id) => id,
            Err(err) => return Ok(verb_err(&err)),
        };
        Ok(match self.state.supervisor.status(id) {
            Ok(record) => {
                let result = self
                    .state
                    .supervisor
                    .result(id)
                    .ok()
                    .flatten()
                    .map(|r| serde_json::to_value(r).unwrap_or(Value::Null));
                verb_ok(json!({ "workflow": record, "result": result }))
            }
            Err(err) => verb_err(&err),
        })
    }

    #[tool(description = "Cancel a running workflow (idempotent)")]
    async fn cancel(
        &self,
        Parameters(request): Parameters<WorkflowIdRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workflow_id(&request.workflow_id) {
            Ok(id) => id,
            Err(err) => return Ok(verb_err(&err)),
        };
        Ok(match self.state.supervisor.cancel(id).await {
            Ok(()) => verb_ok(json!({ "workflow_id": id, "cancelled": true })),
            Err(err) => verb_err(&err),
        })
    }

    #[tool(description = "List the available orchestration patterns and their defaults")]
    async fn list_patterns(&self) -> Result<CallToolResult, ErrorData> {
        let patterns = WorkflowSupervisor::list_patterns();
        Ok(verb_ok(json!({ "patterns": patterns })))
    }

    #[tool(description = "List registered tools, optionally filtered")]
    async fn list_tools(
        &self,
        Parameters(request): Parameters<ListToolsRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let filter = ToolFilter {
            category: request.category,
            tags: request.tags.unwrap_or_default(),
            enabled: request.enabled,
            namespace: request.namespace,
        };
        let tools: Vec<Value> = self
            .state
            .registry
            .list(&filter)
            .into_iter()
            .map(|descriptor| {
                json!({
                    "name": descriptor.name,
                    "namespace": descriptor.namespace,
                    "description": descriptor.description,
                    "schema": descriptor.schema,
                    "category": descriptor.category,
                    "tags": descriptor.tags,
                    "enabled": descriptor.enabled,
                })
            })
            .collect();
        Ok(verb_ok(json!({ "tools": tools })))
    }

    #[tool(description = "Execute a registered tool by name")]
    async fn execute_tool(
        &self,
        Parameters(request): Parameters<ExecuteToolRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let outcome = self
            .state
            .registry
            .execute(
                &request.name,
                request.namespace.as_deref(),
                request.arguments.unwrap_or(Value::Null),
            )
            .await;
        Ok(match outcome {
            Ok(value) => verb_ok(json!({ "output": value })),
            Err(err) => verb_err(&WorkflowError::from(err)),
        })
    }
}

#[tool_handler]
impl ServerHandler for DreamwalkerMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "dreamwalker".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "Dreamwalker orchestration server. Start hierarchical (Beltalowda) or \
                 typed-swarm workflows, stream progress from /v1/workflows/{id}/events, \
                 and query status or cancel by workflow id."
                    .to_string(),
            ),
        }
    }
}

fn parse_workflow_id(raw: &str) -> Result<Uuid, WorkflowError> {
    raw.parse::<Uuid>().map_err(|_| {
        WorkflowError::invalid_arguments("workflow_id", format!("'{raw}' is not a valid workflow id"))
    })
}

/// Wrap a successful verb payload as `{ok: true, ...}`.
fn verb_ok(mut payload: Value) -> CallToolResult {
    if let Value::Object(map) = &mut payload {
        map.insert("ok".to_string(), Value::Bool(true));
    }
    CallToolResult::success(vec![Content::text(payload.to_string())])
}

/// Wrap a failure as `{ok: false, kind, message, detail?}`.
fn verb_err(err: &WorkflowError) -> CallToolResult {
    CallToolResult::success(vec![Content::text(verb_err_value(err).to_string())])
}

fn verb_err_value(err: &WorkflowError) -> Value {
    let mut payload = json!({
        "ok": false,
        "kind": err.kind(),
        "message": err.to_string(),
    });
    if let Some(field) = err.field() {
        payload["detail"] = json!({ "field": field });
    }
    payload
}
