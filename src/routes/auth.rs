use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::extractors::{extract_session_token, CurrentUser};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct VerifyTokenRequest {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyTokenResponse {
    pub valid: bool,
    pub uid: String,
    pub email: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/verify-token", post(verify_token))
}

/// Check a session token from the body, falling back to the request's own
/// cookie. Invalid or expired tokens get 401.
async fn verify_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<VerifyTokenResponse>> {
    let request: VerifyTokenRequest = if body.iter().all(u8::is_ascii_whitespace) {
        VerifyTokenRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?
    };

    let token = request
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .or_else(|| extract_session_token(&headers, &state.config.auth.cookie_name))
        .ok_or(AppError::Unauthorized)?;

    let user = CurrentUser::from_token(&state, token)?.ok_or(AppError::Unauthorized)?;
    Ok(Json(VerifyTokenResponse {
        valid: true,
        uid: user.id,
        email: user.email,
    }))
}
