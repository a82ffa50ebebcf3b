//! Request handlers for the REST API.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use coderoom_core::wire::{ServerEvent, TreeUpdatePayload};
use coderoom_core::{
    interpret, AiCollaborator, ChatMessage, FlatTree, GenerationError, Identity, IdentityVerifier,
    PatchEnvelope, Project, ProjectId, ProjectStore, Sender, StoreError, UserId,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::state::AppState;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

// --- Response types ---

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: Option<String>,
}

fn api_error(status: StatusCode, error: &str, detail: impl Into<Option<String>>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            detail: detail.into(),
        }),
    )
}

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound(detail) => api_error(StatusCode::NOT_FOUND, "Not found", detail),
        StoreError::Conflict(detail) => api_error(StatusCode::CONFLICT, "Conflict", detail),
        StoreError::InvalidInput(detail) => {
            api_error(StatusCode::BAD_REQUEST, "Invalid input", detail)
        }
        other => {
            error!(error = %other, "store failure");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Store error",
                other.to_string(),
            )
        }
    }
}

fn generation_error(e: GenerationError) -> ApiError {
    let status = match &e {
        GenerationError::RateLimited(_) | GenerationError::QuotaExceeded(_) => {
            StatusCode::TOO_MANY_REQUESTS
        }
        GenerationError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_GATEWAY,
    };
    error!(error = %e, status = %status, "assistant request failed");
    api_error(status, "Generation failed", e.to_string())
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeResponse {
    pub project_id: ProjectId,
    pub file_tree: FlatTree,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub project_id: ProjectId,
    pub deleted: bool,
}

// --- Request types ---

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUsersRequest {
    pub project_id: String,
    pub users: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTreeRequest {
    pub project_id: String,
    pub file_tree: FlatTree,
}

#[derive(Deserialize)]
pub struct AiQuery {
    #[serde(default)]
    pub prompt: String,
}

// --- Auth helper ---

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let credential = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    state.verifier().verify(credential).await.map_err(|e| {
        api_error(StatusCode::UNAUTHORIZED, "Unauthorized", e.to_string())
    })
}

fn parse_project_id(raw: &str) -> Result<ProjectId, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "Invalid project id", raw.to_string()))
}

/// Load a project the caller belongs to. Non-members get the same 404 as a
/// missing project.
async fn member_project(
    state: &AppState,
    id: ProjectId,
    identity: &Identity,
) -> Result<Project, ApiError> {
    let project = state.store().get_project(id).await.map_err(store_error)?;
    if !project.is_member(&identity.user_id) {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            "Not found",
            format!("project {id}"),
        ));
    }
    Ok(project)
}

// --- Handlers ---

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Lightweight liveness check.
pub async fn health_live() -> StatusCode {
    StatusCode::OK
}

/// Readiness check: the store answers a query.
pub async fn health_ready(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let checker = UserId::new("health-check");
    match tokio::time::timeout(
        std::time::Duration::from_secs(5),
        state.store().list_projects(&checker),
    )
    .await
    {
        Ok(Ok(_)) => Ok(Json(serde_json::json!({
            "status": "ready",
            "uptime_secs": state.uptime_secs(),
            "rooms": state.rooms().room_count(),
        }))),
        Ok(Err(e)) => Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Not ready",
            format!("Store check failed: {e}"),
        )),
        Err(_) => Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Not ready",
            "Store check timed out".to_string(),
        )),
    }
}

pub async fn create_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    let identity = authenticate(&state, &headers).await?;
    let project = state
        .store()
        .create_project(&req.name, &identity.user_id)
        .await
        .map_err(store_error)?;
    info!(project_id = %project.id, owner = %identity.user_id, "project created");
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn list_projects(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Project>>, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    let projects = state
        .store()
        .list_projects(&identity.user_id)
        .await
        .map_err(store_error)?;
    Ok(Json(projects))
}

pub async fn get_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> Result<Json<Project>, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    let id = parse_project_id(&project_id)?;
    Ok(Json(member_project(&state, id, &identity).await?))
}

pub async fn add_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AddUsersRequest>,
) -> Result<Json<Project>, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    let id = parse_project_id(&req.project_id)?;

    let users: Vec<UserId> = req
        .users
        .iter()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .map(UserId::new)
        .collect();
    if users.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Invalid input",
            "users must be a non-empty list".to_string(),
        ));
    }

    member_project(&state, id, &identity).await?;
    let project = state
        .store()
        .add_collaborators(id, &users)
        .await
        .map_err(store_error)?;
    info!(project_id = %id, added = users.len(), "collaborators added");
    Ok(Json(project))
}

pub async fn update_file_tree(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UpdateTreeRequest>,
) -> Result<Json<TreeResponse>, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    let id = parse_project_id(&req.project_id)?;
    member_project(&state, id, &identity).await?;

    let tree = state
        .sync()
        .replace(id, &req.file_tree)
        .await
        .map_err(store_error)?;

    state.rooms().publish(
        id,
        &ServerEvent::FileTreeUpdated(TreeUpdatePayload {
            project_id: id,
            patch: tree.clone(),
            origin: Sender::from(&identity),
        }),
    );
    Ok(Json(TreeResponse {
        project_id: id,
        file_tree: tree,
    }))
}

pub async fn delete_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    let id = parse_project_id(&project_id)?;
    let project = member_project(&state, id, &identity).await?;
    if project.owner_id != identity.user_id {
        return Err(api_error(
            StatusCode::FORBIDDEN,
            "Forbidden",
            "only the owner can delete a project".to_string(),
        ));
    }

    state.store().delete_project(id).await.map_err(store_error)?;
    state.rooms().close_room(id);
    info!(project_id = %id, "project deleted");
    Ok(Json(DeleteResponse {
        project_id: id,
        deleted: true,
    }))
}

pub async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    let id = parse_project_id(&project_id)?;
    member_project(&state, id, &identity).await?;
    let messages = state.store().list_messages(id).await.map_err(store_error)?;
    Ok(Json(messages))
}

/// One-off assistant call outside any room. The reply is interpreted but
/// nothing is applied or persisted.
pub async fn ai_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AiQuery>,
) -> Result<Json<PatchEnvelope>, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    let prompt = query.prompt.trim();
    if prompt.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Invalid input",
            "prompt is required".to_string(),
        ));
    }

    let raw = state.ai().generate(prompt).await.map_err(generation_error)?;
    let envelope = interpret(&raw);
    info!(user = %identity.user_id, structured = envelope.is_structured(), "assistant result");
    Ok(Json(envelope))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_serialization() {
        let (status, Json(body)) = api_error(StatusCode::CONFLICT, "Conflict", "dup".to_string());
        assert_eq!(status, StatusCode::CONFLICT);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "Conflict");
        assert_eq!(json["detail"], "dup");
    }

    #[test]
    fn test_store_error_mapping() {
        assert_eq!(
            store_error(StoreError::NotFound("x".into())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            store_error(StoreError::Conflict("x".into())).0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            store_error(StoreError::InvalidInput("x".into())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            store_error(StoreError::Other("x".into())).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_generation_error_mapping() {
        let status = |e| generation_error(e).0;
        assert_eq!(
            status(GenerationError::RateLimited("x".into())),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status(GenerationError::QuotaExceeded("x".into())),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(status(GenerationError::Timeout), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status(GenerationError::Transport("x".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(GenerationError::InvalidResponse("x".into())),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_update_tree_request_deserialization() {
        let json = r#"{"projectId":"abc","fileTree":{"a.js":{"file":{"contents":"1"}},"dir":{"directory":true}}}"#;
        let req: UpdateTreeRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.project_id, "abc");
        assert_eq!(req.file_tree.len(), 2);
    }

    #[test]
    fn test_add_users_request_deserialization() {
        let req: AddUsersRequest =
            serde_json::from_str(r#"{"projectId":"p","users":["bob","carol"]}"#).unwrap();
        assert_eq!(req.users, vec!["bob", "carol"]);
    }

    #[test]
    fn test_parse_project_id() {
        assert!(parse_project_id("nope").is_err());
        let id = ProjectId::new();
        assert_eq!(parse_project_id(&format!(" {id} ")).unwrap(), id);
    }
}
