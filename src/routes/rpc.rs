use async_graphql::http::{playground_source, GraphQLPlaygroundConfig};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;

use crate::extractors::MaybeUser;
use crate::rpc;
use crate::state::AppState;

/// Procedure endpoint. Authentication is per field, so anonymous callers
/// reach `login` and `createProfile`.
async fn rpc_handler(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Json(request): Json<async_graphql::Request>,
) -> Response {
    let (response, cookies) = rpc::execute(&state, request, viewer).await;

    let mut headers = HeaderMap::new();
    for cookie in cookies {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                headers.append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::error!("Dropping malformed cookie: {}", e),
        }
    }

    (headers, Json(response)).into_response()
}

/// GraphQL Playground UI (development tool)
async fn rpc_playground() -> impl IntoResponse {
    Html(playground_source(GraphQLPlaygroundConfig::new("/api/rpc")))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/rpc", get(rpc_playground).post(rpc_handler))
}
