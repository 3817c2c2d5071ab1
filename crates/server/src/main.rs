use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use server_api::{
    accept_connection, authenticate, cancel_connection, list_profiles, load_member, login,
    member_connections, register, request_connection, update_profile, verify_access_token,
    ApiContext, TokenConfig,
};
use shared::{
    domain::{Member, MemberId},
    error::{ApiError, ErrorCode},
    protocol::{
        ConnectionActionRequest, Credentials, MemberConnectionsResponse, ProfileUpdateRequest,
        Registration, TokenPair,
    },
};
use storage::Storage;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, normalize_database_url};

const MAX_BODY_BYTES: usize = 64 * 1024;

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings();
    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; check the path and its permissions"
        );
        error
    })?;
    let api = ApiContext {
        storage,
        tokens: TokenConfig {
            secret: settings.token_secret,
            access_ttl_seconds: settings.access_token_ttl_seconds,
            refresh_ttl_seconds: settings.refresh_token_ttl_seconds,
        },
    };

    let app = build_router(Arc::new(AppState { api }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "member server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/login", post(http_login))
        .route("/api/login/verify-access-token", post(http_verify_access_token))
        .route("/api/members", post(http_register))
        .route("/api/members/profile", get(http_own_profile))
        .route("/api/members/profile", put(http_update_profile))
        .route("/api/members/profiles", get(http_list_profiles))
        .route("/api/members/connections/request", post(http_request_connection))
        .route("/api/members/connections/accept", put(http_accept_connection))
        .route("/api/members/connections/cancel", delete(http_cancel_connection))
        .route(
            "/api/members/connections/:member_id",
            get(http_member_connections),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> ApiResult<&'static str> {
    state
        .api
        .storage
        .health_check()
        .await
        .map_err(|e| api_error(ApiError::new(ErrorCode::Internal, e.to_string())))?;
    Ok("ok")
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = status_for(err.code);
    if status.is_server_error() {
        error!(message = %err.error, "request failed");
    }
    (status, Json(err))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

async fn http_login(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<Credentials>,
) -> ApiResult<Json<TokenPair>> {
    let pair = login(&state.api, &credentials).await.map_err(api_error)?;
    Ok(Json(pair))
}

async fn http_verify_access_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Member>> {
    let member = verify_access_token(&state.api, bearer_token(&headers))
        .await
        .map_err(api_error)?;
    Ok(Json(member))
}

async fn http_register(
    State(state): State<Arc<AppState>>,
    Json(registration): Json<Registration>,
) -> ApiResult<(StatusCode, Json<Member>)> {
    let member = register(&state.api, &registration)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(member)))
}

async fn http_own_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Member>> {
    let member_id = authenticate(&state.api, bearer_token(&headers))
        .await
        .map_err(api_error)?;
    let member = load_member(&state.api, member_id)
        .await
        .map_err(api_error)?;
    Ok(Json(member))
}

async fn http_update_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ProfileUpdateRequest>,
) -> ApiResult<Json<Member>> {
    let member_id = authenticate(&state.api, bearer_token(&headers))
        .await
        .map_err(api_error)?;
    let member = update_profile(&state.api, member_id, &req.member_profile)
        .await
        .map_err(api_error)?;
    Ok(Json(member))
}

async fn http_list_profiles(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Member>>> {
    let members = list_profiles(&state.api).await.map_err(api_error)?;
    Ok(Json(members))
}

async fn http_member_connections(
    State(state): State<Arc<AppState>>,
    Path(member_id): Path<i64>,
) -> ApiResult<Json<MemberConnectionsResponse>> {
    let connections = member_connections(&state.api, MemberId(member_id))
        .await
        .map_err(api_error)?;
    Ok(Json(MemberConnectionsResponse { connections }))
}

async fn http_request_connection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ConnectionActionRequest>,
) -> ApiResult<StatusCode> {
    let actor = authenticate(&state.api, bearer_token(&headers))
        .await
        .map_err(api_error)?;
    request_connection(&state.api, actor, req)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::CREATED)
}

async fn http_accept_connection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ConnectionActionRequest>,
) -> ApiResult<StatusCode> {
    let actor = authenticate(&state.api, bearer_token(&headers))
        .await
        .map_err(api_error)?;
    accept_connection(&state.api, actor, req)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::OK)
}

async fn http_cancel_connection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ConnectionActionRequest>,
) -> ApiResult<StatusCode> {
    let actor = authenticate(&state.api, bearer_token(&headers))
        .await
        .map_err(api_error)?;
    cancel_connection(&state.api, actor, req)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
