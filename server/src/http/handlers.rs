//! HTTP route handlers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use kvs::Record;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::ApiError;
use super::AppState;
use crate::auth::{AuthError, RegisterRequest, TokenKind, TokenPair, UserProfile};
use crate::service::UpsertRequest;
use crate::{Error, FieldErrors, Result};

/// Login body
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Refresh body
#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Refresh response
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessToken {
    pub access: String,
}

/// Handle GET /api/kv
pub async fn handle_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Json<Vec<Record>>, ApiError> {
    let authorization = authorization(&headers);
    let service = state.service.clone();

    let records = blocking(move || {
        let principal = service.authenticate(authorization.as_deref())?;
        service.list(&principal)
    })
    .await?;

    Ok(Json(records))
}

/// Handle GET /api/kv/:key
pub async fn handle_retrieve(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> std::result::Result<Json<Record>, ApiError> {
    let authorization = authorization(&headers);
    let service = state.service.clone();

    let record = blocking(move || {
        let principal = service.authenticate(authorization.as_deref())?;
        service.retrieve(&principal, &key)
    })
    .await?;

    Ok(Json(record))
}

/// Handle PUT /api/kv/:key
///
/// Responds 201 when the record was created and 200 when it was replaced.
pub async fn handle_upsert(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<(StatusCode, Json<Record>), ApiError> {
    let authorization = authorization(&headers);
    let service = state.service.clone();

    let (record, outcome) = blocking(move || {
        let principal = service.authenticate(authorization.as_deref())?;
        let request = UpsertRequest::from_slice(&body)?;
        service.upsert(&principal, &key, request)
    })
    .await?;

    let status = if outcome.is_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(record)))
}

/// Handle POST /api/auth/register
pub async fn handle_register(
    State(state): State<AppState>,
    body: Bytes,
) -> std::result::Result<(StatusCode, Json<UserProfile>), ApiError> {
    let request: RegisterRequest = parse_body(&body)?;
    let users = state.users.clone();

    let user = blocking(move || users.register(request)).await?;

    Ok((StatusCode::CREATED, Json(UserProfile::from(&user))))
}

/// Handle POST /api/auth/token
pub async fn handle_token(
    State(state): State<AppState>,
    body: Bytes,
) -> std::result::Result<Json<TokenPair>, ApiError> {
    let request: TokenRequest = parse_body(&body)?;

    let mut errors = FieldErrors::new();
    for (field, present) in [
        ("username", request.username.is_some()),
        ("password", request.password.is_some()),
    ] {
        if !present {
            errors.insert(field.to_owned(), vec!["This field is required.".to_owned()]);
        }
    }
    let (Some(username), Some(password)) = (request.username, request.password) else {
        return Err(Error::Validation(errors).into());
    };

    let users = state.users.clone();
    let tokens = state.tokens.clone();
    let pair = blocking(move || {
        let user = users.authenticate(&username, &password)?;
        tokens.pair(&user.username)
    })
    .await?;

    Ok(Json(pair))
}

/// Handle POST /api/auth/token/refresh
pub async fn handle_refresh(
    State(state): State<AppState>,
    body: Bytes,
) -> std::result::Result<Json<AccessToken>, ApiError> {
    let request: RefreshRequest = parse_body(&body)?;
    let refresh = request
        .refresh
        .ok_or_else(|| Error::invalid("refresh", "This field is required."))?;

    let claims = state
        .tokens
        .verify(&refresh, TokenKind::Refresh)
        .map_err(Error::from)?;

    let users = state.users.clone();
    let tokens = state.tokens.clone();
    let access = blocking(move || {
        // only a subject that could still log in gets a new access token
        match users.find(&claims.sub)? {
            Some(user) if user.is_active => tokens.issue(&user.username, TokenKind::Access),
            Some(_) => Err(AuthError::InactiveUser.into()),
            None => Err(AuthError::UnknownUser.into()),
        }
    })
    .await?;

    Ok(Json(AccessToken { access }))
}

/// Handle GET /health
pub async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| Error::MalformedBody(e.to_string()))
}

// run store and hashing work off the async executor
async fn blocking<T, F>(f: F) -> std::result::Result<T, ApiError>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError(Error::Internal(e.to_string())))?
        .map_err(ApiError)
}
