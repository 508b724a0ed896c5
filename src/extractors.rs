use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::auth::session::find_session_user;
use crate::error::AppError;
use crate::state::AppState;

/// Represents the currently authenticated user.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
    pub display_name: String,
    /// Session token the request was authenticated with.
    pub token: String,
}

impl CurrentUser {
    /// Resolve a session token to its user, if the session is still valid.
    pub fn from_token(state: &AppState, token: &str) -> Result<Option<Self>, AppError> {
        let conn = state.db.get()?;
        let user = find_session_user(&conn, token)?;
        Ok(user.map(|u| CurrentUser {
            id: u.id,
            email: u.email,
            display_name: u.display_name,
            token: token.to_string(),
        }))
    }

    pub fn from_headers(state: &AppState, headers: &HeaderMap) -> Result<Option<Self>, AppError> {
        match extract_session_token(headers, &state.config.auth.cookie_name) {
            Some(token) => Self::from_token(state, token),
            None => Ok(None),
        }
    }
}

/// Extractor that requires authentication.
/// Returns 401 if no valid session found.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        CurrentUser::from_headers(state, &parts.headers)?.ok_or(AppError::Unauthorized)
    }
}

/// Optional user extractor: `None` instead of 401 when not authenticated.
pub struct MaybeUser(pub Option<CurrentUser>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(CurrentUser::from_headers(state, &parts.headers)?))
    }
}

/// Session token from the session cookie, or from an `Authorization: Bearer`
/// header for non-browser clients.
pub fn extract_session_token<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == cookie_name && !val.is_empty() {
                Some(val)
            } else {
                None
            }
        });

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn token_is_read_from_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; token=abc123; other=1"),
        );
        assert_eq!(extract_session_token(&headers, "token"), Some("abc123"));
        assert_eq!(extract_session_token(&headers, "session"), None);
    }

    #[test]
    fn bearer_header_is_a_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer xyz"),
        );
        assert_eq!(extract_session_token(&headers, "token"), Some("xyz"));

        headers.insert(header::COOKIE, HeaderValue::from_static("token=fromcookie"));
        assert_eq!(extract_session_token(&headers, "token"), Some("fromcookie"));
    }

    #[test]
    fn empty_values_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("token="));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_session_token(&headers, "token"), None);
    }
}
