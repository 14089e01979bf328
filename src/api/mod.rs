// HTTP boundary for the auth core

use axum::{
    Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::account::Account;
use crate::auth::{
    AuthError, AuthenticationService, CredentialsPatch, FederatedIdentityService, JwksDocument, KeyProvider, NewAccount,
    Principal, TokenPair,
};
use crate::types::AccountId;

/// Permit that allows changing another account's credentials.
pub const MANAGE_ACCOUNTS_PERMIT: &str = "user:delete";

const JWKS_CACHE_CONTROL: &str = "public, max-age=86400";

const MALFORMED_BODY: &str = "Malformed request body";

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthenticationService>,
    pub federation: Arc<FederatedIdentityService>,
    pub keys: Arc<KeyProvider>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/.well-known/jwks.json", get(jwks))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/exchange/{provider}", post(exchange))
        .route("/auth/register", post(register))
        .route("/auth/accounts/{id}/credentials", put(update_credentials))
        .route("/auth/me", get(me))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Error response carrying only the public message of an [`AuthError`].
#[derive(Debug)]
pub struct ApiError(pub AuthError);

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!(detail = %rejection.body_text(), "Rejected request body");
        Self(AuthError::InvalidParameters(MALFORMED_BODY.to_string()))
    }
}

pub fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidCredentials
        | AuthError::TokenExpired
        | AuthError::MalformedToken
        | AuthError::InvalidSignature
        | AuthError::RefreshTokenMismatch
        | AuthError::AccountDisabled
        | AuthError::ExchangeFailure { .. } => StatusCode::UNAUTHORIZED,
        AuthError::UserNotFound => StatusCode::NOT_FOUND,
        AuthError::InvalidParameters(_) | AuthError::InvalidUsername | AuthError::InvalidPassword => {
            StatusCode::BAD_REQUEST
        }
        AuthError::UsernameTaken => StatusCode::CONFLICT,
        AuthError::Forbidden => StatusCode::FORBIDDEN,
        AuthError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        match &self.0 {
            AuthError::Internal(detail) => error!(%detail, "Request failed with internal error"),
            AuthError::UpstreamUnavailable(detail) => error!(%detail, "Request failed: upstream unavailable"),
            _ => {}
        }
        (status, Json(serde_json::json!({ "message": self.0.to_string() }))).into_response()
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError(AuthError::InvalidCredentials))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    #[serde(alias = "token")]
    pub provider_token: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub account_id: AccountId,
    pub username: String,
    pub email: Option<String>,
    pub profile: String,
    pub created_at: String,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.id,
            username: account.username.to_string(),
            email: account.email.clone(),
            profile: account.profile.to_string(),
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

async fn jwks(State(state): State<AppState>) -> ([(header::HeaderName, HeaderValue); 1], Json<JwksDocument>) {
    (
        [(header::CACHE_CONTROL, HeaderValue::from_static(JWKS_CACHE_CONTROL))],
        Json(state.keys.jwks()),
    )
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenPair>, ApiError> {
    let Json(request) = payload?;
    let pair = state.auth.login(&request.username, &request.password).await?;
    Ok(Json(pair))
}

async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<TokenPair>, ApiError> {
    let Json(request) = payload?;
    let pair = state.auth.refresh(&request.refresh_token).await?;
    Ok(Json(pair))
}

async fn exchange(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    payload: Result<Json<ExchangeRequest>, JsonRejection>,
) -> Result<Json<TokenPair>, ApiError> {
    let Json(request) = payload?;
    let pair = state.federation.exchange(&provider, &request.provider_token).await?;
    Ok(Json(pair))
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AccountSummary>), ApiError> {
    let Json(request) = payload?;
    // Self-registration always gets the default profile and no extra roles.
    let account = state
        .auth
        .add_account(NewAccount {
            username: request.username,
            password: request.password,
            email: request.email,
            ..Default::default()
        })
        .await?;
    Ok((StatusCode::CREATED, Json(AccountSummary::from(&account))))
}

async fn update_credentials(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<CredentialsPatch>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let principal = state.auth.introspect(bearer_token(&headers)?).await?;
    let id: AccountId = id.parse().map_err(|_| ApiError(AuthError::UserNotFound))?;
    if !principal.may_manage(id, MANAGE_ACCOUNTS_PERMIT) {
        return Err(ApiError(AuthError::Forbidden));
    }

    let Json(patch) = payload?;
    state.auth.update_credentials(id, patch).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Principal>, ApiError> {
    let principal = state.auth.introspect(bearer_token(&headers)?).await?;
    Ok(Json(principal))
}
