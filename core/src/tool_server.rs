/// Thin adapter exposing `QueueService` over the six-tool JSON protocol of
/// §4.5/§6. Transport-agnostic: `dispatch` takes a parsed request and
/// returns a response value; the binary crate owns the actual stdio
/// line-framing loop and deadline enforcement (`tokio::time::timeout`).
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::QueueError;
use crate::queue_service::QueueService;
use crate::types::{EnqueueInput, TaskFilter, TaskSource, TaskStatus, MAX_DESCRIPTION_LEN};

pub const TOOL_NAMES: [&str; 6] = [
    "task_enqueue",
    "task_get",
    "task_list",
    "task_queue_status",
    "task_cancel",
    "task_execution_plan",
];

#[derive(Debug, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ToolResponse {
    Ok { ok: bool, result: Value },
    Err(ErrorResponse),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub timestamp: String,
}

impl ToolResponse {
    pub fn success(result: Value) -> Self {
        ToolResponse::Ok { ok: true, result }
    }

    pub fn failure(err: QueueError) -> Self {
        ToolResponse::Err(ErrorResponse {
            ok: false,
            error: err.kind().to_string(),
            message: err.to_string(),
            details: err.details(),
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub arguments_schema: Value,
}

pub fn list_tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "task_enqueue",
            description: "Enqueue a new task, optionally depending on existing tasks.",
            arguments_schema: serde_json::json!({
                "type": "object",
                "required": ["description", "source"],
                "properties": {
                    "description": {"type": "string", "maxLength": MAX_DESCRIPTION_LEN},
                    "source": {"type": "string", "enum": ["human", "agent_requirements", "agent_planner", "agent_implementation"]},
                    "summary": {"type": "string", "maxLength": 500},
                    "agent_type": {"type": "string"},
                    "base_priority": {"type": "number", "minimum": 0, "maximum": 10},
                    "prerequisites": {"type": "array", "items": {"type": "string"}, "maxItems": 100},
                    "parent_task_id": {"type": "string"},
                    "deadline": {"type": "string"},
                    "estimated_duration_seconds": {"type": "integer"},
                    "session_id": {"type": "string"},
                    "input_data": {"type": "object"}
                }
            }),
        },
        ToolDescriptor {
            name: "task_get",
            description: "Fetch the full record for a single task.",
            arguments_schema: serde_json::json!({
                "type": "object",
                "required": ["task_id"],
                "properties": {"task_id": {"type": "string"}}
            }),
        },
        ToolDescriptor {
            name: "task_list",
            description: "List tasks, optionally filtered by status, source, or agent_type.",
            arguments_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string"},
                    "source": {"type": "string"},
                    "agent_type": {"type": "string"},
                    "limit": {"type": "integer", "maximum": 500, "default": 50}
                }
            }),
        },
        ToolDescriptor {
            name: "task_queue_status",
            description: "Aggregate queue statistics.",
            arguments_schema: serde_json::json!({"type": "object", "properties": {}}),
        },
        ToolDescriptor {
            name: "task_cancel",
            description: "Cancel a task and cascade-cancel its transitive dependents.",
            arguments_schema: serde_json::json!({
                "type": "object",
                "required": ["task_id"],
                "properties": {"task_id": {"type": "string"}}
            }),
        },
        ToolDescriptor {
            name: "task_execution_plan",
            description: "Compute a layered execution plan for a set of tasks.",
            arguments_schema: serde_json::json!({
                "type": "object",
                "required": ["task_ids"],
                "properties": {
                    "task_ids": {"type": "array", "items": {"type": "string"}, "minItems": 1}
                }
            }),
        },
    ]
}

/// Dispatches one parsed request to `service`, performing ToolServer-level
/// input validation (UUID parsing, enum values, integer ranges) before
/// ever reaching QueueService, per §7's propagation policy.
pub async fn dispatch(service: &QueueService, request: ToolRequest) -> ToolResponse {
    let result = match request.tool.as_str() {
        "list_tools" => Ok(serde_json::json!(list_tools()
            .into_iter()
            .map(|d| serde_json::json!({
                "name": d.name,
                "description": d.description,
                "arguments_schema": d.arguments_schema,
            }))
            .collect::<Vec<_>>())),
        "task_enqueue" => handle_enqueue(service, request.arguments).await,
        "task_get" => handle_get(service, request.arguments).await,
        "task_list" => handle_list(service, request.arguments).await,
        "task_queue_status" => handle_status(service).await,
        "task_cancel" => handle_cancel(service, request.arguments).await,
        "task_execution_plan" => handle_execution_plan(service, request.arguments).await,
        other => Err(QueueError::Validation(format!("unknown tool: {other}"))),
    };

    match result {
        Ok(value) => ToolResponse::success(value),
        Err(err) => ToolResponse::failure(err),
    }
}

fn parse_uuid_field(args: &Value, field: &str) -> Result<Uuid, QueueError> {
    let raw = args
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| QueueError::Validation(format!("missing field: {field}")))?;
    Uuid::parse_str(raw).map_err(|_| QueueError::Validation(format!("invalid uuid in {field}: {raw}")))
}

async fn handle_enqueue(service: &QueueService, args: Value) -> Result<Value, QueueError> {
    let description = args
        .get("description")
        .and_then(Value::as_str)
        .ok_or_else(|| QueueError::Validation("missing field: description".to_string()))?
        .to_string();
    let source: TaskSource = args
        .get("source")
        .and_then(Value::as_str)
        .ok_or_else(|| QueueError::Validation("missing field: source".to_string()))?
        .parse()?;
    let summary = args.get("summary").and_then(Value::as_str).map(str::to_string);
    let agent_type = args
        .get("agent_type")
        .and_then(Value::as_str)
        .unwrap_or(crate::types::DEFAULT_AGENT_TYPE)
        .to_string();
    let base_priority = args
        .get("base_priority")
        .and_then(Value::as_f64)
        .unwrap_or(crate::types::DEFAULT_BASE_PRIORITY);

    let mut prerequisites = Vec::new();
    if let Some(arr) = args.get("prerequisites").and_then(Value::as_array) {
        for v in arr {
            let raw = v
                .as_str()
                .ok_or_else(|| QueueError::Validation("prerequisites must be strings".to_string()))?;
            let id = Uuid::parse_str(raw)
                .map_err(|_| QueueError::Validation(format!("invalid prerequisite uuid: {raw}")))?;
            prerequisites.push(id);
        }
    }

    let parent_task_id = match args.get("parent_task_id").and_then(Value::as_str) {
        Some(raw) => Some(
            Uuid::parse_str(raw)
                .map_err(|_| QueueError::Validation("invalid parent_task_id".to_string()))?,
        ),
        None => None,
    };

    let deadline = match args.get("deadline").and_then(Value::as_str) {
        Some(raw) => Some(
            chrono::DateTime::parse_from_rfc3339(raw)
                .map_err(|_| QueueError::Validation("invalid deadline timestamp".to_string()))?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    let estimated_duration_seconds = args.get("estimated_duration_seconds").and_then(Value::as_i64);
    let session_id = args.get("session_id").and_then(Value::as_str).map(str::to_string);
    let input_data = args.get("input_data").cloned().unwrap_or(serde_json::json!({}));

    let input = EnqueueInput {
        description,
        source,
        summary,
        agent_type,
        base_priority,
        prerequisites,
        parent_task_id,
        deadline,
        estimated_duration_seconds,
        session_id,
        input_data,
        max_retries: crate::types::DEFAULT_MAX_RETRIES,
        execution_timeout_seconds: crate::types::DEFAULT_EXECUTION_TIMEOUT_SECONDS,
    };

    input.validate()?;
    let task = service.enqueue(input).await?;
    Ok(serde_json::json!({
        "task_id": task.id,
        "status": task.status.as_str(),
        "calculated_priority": task.calculated_priority,
        "dependency_depth": task.dependency_depth,
        "submitted_at": task.submitted_at.to_rfc3339(),
    }))
}

async fn handle_get(service: &QueueService, args: Value) -> Result<Value, QueueError> {
    let id = parse_uuid_field(&args, "task_id")?;
    let task = service.get(id).await?;
    Ok(serde_json::to_value(task).map_err(|e| QueueError::Internal(e.to_string()))?)
}

async fn handle_list(service: &QueueService, args: Value) -> Result<Value, QueueError> {
    let status = match args.get("status").and_then(Value::as_str) {
        Some(s) => Some(s.parse::<TaskStatus>()?),
        None => None,
    };
    let source = match args.get("source").and_then(Value::as_str) {
        Some(s) => Some(s.parse::<TaskSource>()?),
        None => None,
    };
    let agent_type = args.get("agent_type").and_then(Value::as_str).map(str::to_string);
    let limit = args.get("limit").and_then(Value::as_i64).unwrap_or(50);
    if !(1..=500).contains(&limit) {
        return Err(QueueError::Validation("limit must be in 1..=500".to_string()));
    }

    let filter = TaskFilter {
        status,
        source,
        agent_type,
    };
    let tasks = service.list(filter, limit).await?;
    Ok(serde_json::to_value(tasks).map_err(|e| QueueError::Internal(e.to_string()))?)
}

async fn handle_status(service: &QueueService) -> Result<Value, QueueError> {
    let status = service.status().await?;
    Ok(serde_json::to_value(status).map_err(|e| QueueError::Internal(e.to_string()))?)
}

async fn handle_cancel(service: &QueueService, args: Value) -> Result<Value, QueueError> {
    let id = parse_uuid_field(&args, "task_id")?;
    let cancelled = service.cancel(id).await?;
    let cascaded: Vec<Uuid> = cancelled.iter().skip(1).copied().collect();
    Ok(serde_json::json!({
        "cancelled_task_id": id,
        "cascaded_task_ids": cascaded,
        "total_cancelled": cancelled.len(),
    }))
}

async fn handle_execution_plan(service: &QueueService, args: Value) -> Result<Value, QueueError> {
    let arr = args
        .get("task_ids")
        .and_then(Value::as_array)
        .ok_or_else(|| QueueError::Validation("missing field: task_ids".to_string()))?;
    if arr.is_empty() {
        return Err(QueueError::Validation("task_ids must be non-empty".to_string()));
    }
    let mut ids = Vec::with_capacity(arr.len());
    for v in arr {
        let raw = v
            .as_str()
            .ok_or_else(|| QueueError::Validation("task_ids must be strings".to_string()))?;
        ids.push(
            Uuid::parse_str(raw)
                .map_err(|_| QueueError::Validation(format!("invalid uuid in task_ids: {raw}")))?,
        );
    }

    let batches = service.execution_plan(ids).await?;
    let max_parallelism = batches.iter().map(Vec::len).max().unwrap_or(0);
    Ok(serde_json::json!({
        "batches": batches,
        "total_batches": batches.len(),
        "max_parallelism": max_parallelism,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn service() -> QueueService {
        QueueService::in_memory(Config::default()).await.unwrap()
    }

    #[tokio::test]
    async fn enqueue_then_get_round_trips() {
        let svc = service().await;
        let enqueue_resp = dispatch(
            &svc,
            ToolRequest {
                tool: "task_enqueue".to_string(),
                arguments: serde_json::json!({"description": "do a thing", "source": "human"}),
            },
        )
        .await;

        let ToolResponse::Ok { result, .. } = enqueue_resp else {
            panic!("expected success");
        };
        let task_id = result["task_id"].as_str().unwrap().to_string();

        let get_resp = dispatch(
            &svc,
            ToolRequest {
                tool: "task_get".to_string(),
                arguments: serde_json::json!({"task_id": task_id}),
            },
        )
        .await;
        let ToolResponse::Ok { result, .. } = get_resp else {
            panic!("expected success");
        };
        assert_eq!(result["description"], "do a thing");
        assert_eq!(result["status"], "ready");
    }

    #[tokio::test]
    async fn unknown_tool_is_validation_error() {
        let svc = service().await;
        let resp = dispatch(
            &svc,
            ToolRequest {
                tool: "task_frobnicate".to_string(),
                arguments: serde_json::json!({}),
            },
        )
        .await;
        let ToolResponse::Err(err) = resp else {
            panic!("expected error");
        };
        assert_eq!(err.error, "Validation");
    }

    #[tokio::test]
    async fn missing_task_get_is_not_found() {
        let svc = service().await;
        let resp = dispatch(
            &svc,
            ToolRequest {
                tool: "task_get".to_string(),
                arguments: serde_json::json!({"task_id": Uuid::new_v4().to_string()}),
            },
        )
        .await;
        let ToolResponse::Err(err) = resp else {
            panic!("expected error");
        };
        assert_eq!(err.error, "NotFound");
    }

    #[tokio::test]
    async fn list_tools_returns_all_six_plus_discovery() {
        assert_eq!(list_tools().len(), 6);
    }
}
