//! 实时通道的 HTTP 入口：连接升级、令牌签发、会话查询与订单推送

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use application::{ApplicationError, DeliveryReport, RealtimeSubject, SessionInfo};
use domain::{Email, HubRole};

use crate::{
    auth::{AdminUser, AuthenticatedUser},
    error::ApiError,
    extract::{ok, ApiJson, ApiPath, ApiQuery, ApiResponse},
    state::AppState,
    ws_connection::run_session,
};

pub fn realtime_routes() -> Router<AppState> {
    Router::new()
        .route("/api/ws-auth", post(issue_realtime_token))
        .route("/api/clients", get(list_clients))
        .route("/api/orders", post(push_order))
        .route("/{role}/{id}", get(upgrade))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpgradeQuery {
    #[serde(default)]
    email: Option<String>,
    #[serde(default, alias = "room")]
    room_id: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    table_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeTokenPayload {
    user_id: String,
    email: String,
    role: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
    role: HubRole,
    user_id: String,
    email: String,
}

#[derive(Debug, Serialize)]
struct ClientsResponse {
    total: usize,
    counts: BTreeMap<String, usize>,
    sessions: Vec<SessionInfo>,
}

/// 升级前校验角色、身份标识和可选的访问令牌
async fn upgrade(
    State(state): State<AppState>,
    ApiPath((role, id)): ApiPath<(String, String)>,
    ApiQuery(query): ApiQuery<UpgradeQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let role: HubRole = role
        .parse()
        .map_err(|err: domain::DomainError| ApiError::bad_request(err.to_string()))?;

    let id = id.trim().to_string();
    if id.is_empty() {
        return Err(ApiError::bad_request("session id is required"));
    }

    let email = query
        .email
        .as_deref()
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .ok_or_else(|| ApiError::bad_request("email query parameter is required"))?
        .to_string();

    if let Some(token) = query.token.as_deref().filter(|token| !token.is_empty()) {
        if let Err(err) = state.credential_service.authenticate(token) {
            tracing::warn!(session_id = %id, role = %role, "invalid realtime token, upgrade refused");
            return Err(err.into());
        }
    }

    let mut info = SessionInfo::new(id, role, query.room_id, Utc::now()).with_metadata("email", email);
    if let Some(token) = query.token.filter(|token| !token.is_empty()) {
        info = info.with_metadata("token", token);
    }
    if let Some(table_token) = query.table_token.filter(|token| !token.is_empty()) {
        info = info.with_metadata("tableToken", table_token);
    }

    tracing::debug!(session_id = %info.id, role = %info.role, "WebSocket upgrade accepted");
    Ok(ws.on_upgrade(move |socket| run_session(socket, state, info)))
}

async fn issue_realtime_token(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RealtimeTokenPayload>,
) -> Result<Json<ApiResponse<RealtimeTokenResponse>>, ApiError> {
    let role: HubRole = payload
        .role
        .parse()
        .map_err(|err: domain::DomainError| ApiError::from(ApplicationError::from(err)))?;
    if !role.is_issuable() {
        return Err(ApplicationError::validation(
            "role",
            format!("role '{role}' cannot receive a realtime token"),
        )
        .into());
    }

    let user_id = payload.user_id.trim().to_string();
    if user_id.is_empty() {
        return Err(ApplicationError::validation("userId", "cannot be empty").into());
    }
    let email = Email::parse(payload.email).map_err(ApplicationError::from)?;

    let hours = state.config.current().realtime.ws_token_hours;
    let subject = RealtimeSubject {
        user_id: user_id.clone(),
        email: email.clone(),
        role,
    };
    let issued = state
        .token_maker
        .create_realtime(&subject, Duration::from_secs(hours * 3600))
        .map_err(ApplicationError::from)?;

    tracing::info!(user_id = %user_id, role = %role, "realtime token issued");
    Ok(ok(RealtimeTokenResponse {
        expires_at: issued.expires_at(),
        token: issued.token,
        role,
        user_id,
        email: email.to_string(),
    }))
}

async fn list_clients(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<ApiResponse<ClientsResponse>>, ApiError> {
    let sessions = state.hub.list_sessions().await.map_err(ApplicationError::from)?;
    let counts = state.hub.counts_by_role().await.map_err(ApplicationError::from)?;
    Ok(ok(ClientsResponse {
        total: sessions.len(),
        counts,
        sessions,
    }))
}

/// 外部系统创建订单后推送给员工
async fn push_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(order): ApiJson<Value>,
) -> Result<Json<ApiResponse<DeliveryReport>>, ApiError> {
    let report = state
        .hub
        .notify_staff_order(order)
        .await
        .map_err(ApplicationError::from)?;
    tracing::info!(
        account_id = %user.account_id(),
        delivered = report.delivered,
        "order event pushed to staff"
    );
    Ok(ok(report))
}
