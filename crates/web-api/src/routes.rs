use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use application::{
    AccountSummary, AuthResult, ChangePasswordRequest, CreateAccountRequest, LoginRequest, Paged,
    RegisterRequest, SearchAccountsRequest, TokenValidation, UpdateAccountRequest,
};
use domain::AccountId;

use crate::{
    auth::{AuthenticatedUser, BearerToken},
    error::ApiError,
    extract::{ok, ApiJson, ApiPath, ApiQuery, ApiResponse},
    state::AppState,
    websocket::realtime_routes,
};

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterPayload {
    name: String,
    email: String,
    password: String,
    #[serde(default)]
    branch_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    email: String,
    password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogoutPayload {
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshPayload {
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordPayload {
    current_password: String,
    new_password: String,
}

#[derive(Debug, Deserialize)]
struct EmailPayload {
    email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResetPasswordPayload {
    token: String,
    new_password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAccountPayload {
    name: String,
    email: String,
    password: String,
    role: Option<String>,
    status: Option<String>,
    branch_id: Option<i64>,
    owner_id: Option<i64>,
    avatar: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateAccountPayload {
    name: Option<String>,
    email: Option<String>,
    avatar: Option<String>,
    title: Option<String>,
    role: Option<String>,
    owner_id: Option<i64>,
    branch_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchQuery {
    #[serde(alias = "q")]
    query: Option<String>,
    role: Option<String>,
    branch_id: Option<i64>,
    /// 逗号分隔的状态列表
    status: Option<String>,
    page: Option<u32>,
    page_size: Option<u32>,
    sort_by: Option<String>,
    sort_order: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageQuery {
    page: Option<u32>,
    page_size: Option<u32>,
}

pub fn router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.current().server.request_timeout_secs);
    let cors = cors_layer(&state.config.current().server.cors_origins);

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .nest("/ws", realtime_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            render_debug_errors,
        ))
        .layer(TimeoutLayer::new(timeout))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/refresh", post(refresh))
        .route("/auth/validate", post(validate))
        .route("/auth/password/change", post(change_password))
        .route("/auth/password/forgot", post(forgot_password))
        .route("/auth/password/reset", post(reset_password))
        .route("/auth/email/verify", post(verify_email))
        .route("/auth/email/resend", post(resend_verification))
        .route("/accounts", post(create_account).get(list_accounts))
        .route("/accounts/search", get(search_accounts))
        .route(
            "/accounts/{id}",
            get(get_account).put(update_account).delete(delete_account),
        )
        .route("/accounts/{id}/status", patch(update_account_status))
        .route("/accounts/by-email/{email}", get(accounts_by_email))
        .route("/accounts/by-role/{role}", get(accounts_by_role))
        .route("/accounts/by-branch/{branch_id}", get(accounts_by_branch))
        .route("/accounts/by-owner/{owner_id}", get(accounts_by_owner))
        .route("/branches/{branch_id}/accounts", get(branch_accounts_paged))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<_> = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    layer.allow_origin(origins)
}

/// debug 模式下把内部错误链附在错误响应里
async fn render_debug_errors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    if !state.config.current().server.debug {
        return response;
    }
    match response.extensions().get::<ApiError>().cloned() {
        Some(error) => error.render(true),
        None => response,
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state
        .credential_service
        .register(RegisterRequest {
            name: payload.name,
            email: payload.email,
            password: payload.password,
            branch_id: payload.branch_id,
        })
        .await?;

    Ok((StatusCode::CREATED, ok(account)))
}

async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginPayload>,
) -> ApiResult<AuthResult> {
    let result = state
        .credential_service
        .login(LoginRequest {
            email: payload.email,
            password: payload.password,
        })
        .await?;

    Ok(ok(result))
}

/// 请求体可以为空；只有刷新令牌需要一并作废时才带上
async fn logout(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    body: Bytes,
) -> ApiResult<Value> {
    let payload: LogoutPayload = if body.iter().all(u8::is_ascii_whitespace) {
        LogoutPayload::default()
    } else {
        serde_json::from_slice(&body).map_err(|err| ApiError::bad_request(err.to_string()))?
    };

    state
        .credential_service
        .logout(&token, payload.refresh_token.as_deref())
        .await?;

    Ok(ok(json!({ "message": "logged out" })))
}

async fn refresh(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RefreshPayload>,
) -> ApiResult<AuthResult> {
    let result = state.credential_service.refresh(&payload.refresh_token).await?;
    Ok(ok(result))
}

async fn validate(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<TokenPayload>,
) -> ApiResult<TokenValidation> {
    Ok(ok(state.credential_service.validate(&payload.token).await))
}

async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(payload): ApiJson<ChangePasswordPayload>,
) -> ApiResult<Value> {
    state
        .credential_service
        .change_password(
            user.account_id(),
            ChangePasswordRequest {
                current_password: payload.current_password,
                new_password: payload.new_password,
            },
        )
        .await?;

    Ok(ok(json!({ "message": "password changed" })))
}

async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<EmailPayload>,
) -> ApiResult<Value> {
    state.credential_service.forgot_password(&payload.email).await?;
    Ok(ok(json!({
        "message": "if the email is registered, a reset link has been sent"
    })))
}

async fn reset_password(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ResetPasswordPayload>,
) -> ApiResult<Value> {
    state
        .credential_service
        .reset_password(&payload.token, &payload.new_password)
        .await?;
    Ok(ok(json!({ "message": "password reset" })))
}

async fn verify_email(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<TokenPayload>,
) -> ApiResult<Value> {
    state.credential_service.verify_email(&payload.token).await?;
    Ok(ok(json!({ "message": "email verified" })))
}

async fn resend_verification(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<EmailPayload>,
) -> ApiResult<Value> {
    state
        .credential_service
        .resend_verification(&payload.email)
        .await?;
    Ok(ok(json!({
        "message": "if the email is registered and unverified, a verification link has been sent"
    })))
}

async fn create_account(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(payload): ApiJson<CreateAccountPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state
        .account_service
        .create_user(
            &user.actor,
            CreateAccountRequest {
                name: payload.name,
                email: payload.email,
                password: payload.password,
                role: payload.role,
                status: payload.status,
                branch_id: payload.branch_id,
                owner_id: payload.owner_id,
                avatar: payload.avatar,
                title: payload.title,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, ok(account)))
}

async fn list_accounts(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> ApiResult<Vec<AccountSummary>> {
    Ok(ok(state.account_service.find_all().await?))
}

async fn search_accounts(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> ApiResult<Paged<AccountSummary>> {
    let statuses = query
        .status
        .as_deref()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|status| !status.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let page = state
        .account_service
        .search(SearchAccountsRequest {
            query: query.query,
            role: query.role,
            branch_id: query.branch_id,
            statuses,
            page: query.page,
            page_size: query.page_size,
            sort_by: query.sort_by,
            sort_order: query.sort_order,
        })
        .await?;

    Ok(ok(page))
}

async fn get_account(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<AccountSummary> {
    Ok(ok(state.account_service.find_by_id(AccountId(id)).await?))
}

async fn update_account(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(payload): ApiJson<UpdateAccountPayload>,
) -> ApiResult<AccountSummary> {
    let account = state
        .account_service
        .update_user(
            &user.actor,
            AccountId(id),
            UpdateAccountRequest {
                name: payload.name,
                email: payload.email,
                avatar: payload.avatar,
                title: payload.title,
                role: payload.role,
                owner_id: payload.owner_id,
                branch_id: payload.branch_id,
            },
        )
        .await?;

    Ok(ok(account))
}

async fn delete_account(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Value> {
    state
        .account_service
        .delete_user(&user.actor, AccountId(id))
        .await?;
    Ok(ok(json!({ "message": "account deleted" })))
}

async fn update_account_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(payload): ApiJson<StatusPayload>,
) -> ApiResult<AccountSummary> {
    let account = state
        .account_service
        .update_account_status(&user.actor, AccountId(id), &payload.status)
        .await?;
    Ok(ok(account))
}

async fn accounts_by_email(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(email): ApiPath<String>,
) -> ApiResult<AccountSummary> {
    Ok(ok(state.account_service.find_by_email(&email).await?))
}

async fn accounts_by_role(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(role): ApiPath<String>,
) -> ApiResult<Vec<AccountSummary>> {
    Ok(ok(state.account_service.find_by_role(&role).await?))
}

async fn accounts_by_branch(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(branch_id): ApiPath<i64>,
) -> ApiResult<Vec<AccountSummary>> {
    Ok(ok(state.account_service.find_by_branch(branch_id).await?))
}

async fn accounts_by_owner(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(owner_id): ApiPath<i64>,
) -> ApiResult<Vec<AccountSummary>> {
    Ok(ok(state.account_service.find_by_owner(owner_id).await?))
}

async fn branch_accounts_paged(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(branch_id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> ApiResult<Paged<AccountSummary>> {
    let page = state
        .account_service
        .get_users_by_branch(branch_id, query.page, query.page_size)
        .await?;
    Ok(ok(page))
}
