pub mod archive;
pub mod auth;
pub mod changes;
pub mod events;
pub mod media;
pub mod photos;
pub mod rpc;
pub mod uploads;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::state::AppState;

/// Header carrying the byte offset of a resumable upload chunk.
pub const UPLOAD_OFFSET: HeaderName = HeaderName::from_static("upload-offset");

fn cors_layer(config: &Config) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = config
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, UPLOAD_OFFSET])
            .expose_headers([UPLOAD_OFFSET])
            .allow_credentials(true),
    )
}

/// The complete application router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.upload.max_request_bytes;
    let cors = cors_layer(&state.config);

    let app = Router::new()
        .merge(rpc::router())
        .merge(auth::router())
        .merge(events::router())
        .merge(photos::router())
        .merge(uploads::router())
        .merge(archive::router())
        .merge(changes::router())
        .merge(media::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http());

    let app = match cors {
        Some(cors) => app.layer(cors),
        None => app,
    };
    app.with_state(state)
}
