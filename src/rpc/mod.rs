//! Typed procedures over GraphQL.
//!
//! Resolvers receive the [`AppState`] and the optional [`CurrentUser`] as
//! context data. Errors carry the procedure code in `extensions.code`.

pub mod mutations;
pub mod queries;
pub mod schema;
pub mod types;

use std::sync::{Arc, Mutex};

use async_graphql::{Context, ErrorExtensions};

use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::state::AppState;

pub use schema::{build_schema, RpcSchema};

impl ErrorExtensions for AppError {
    fn extend(&self) -> async_graphql::Error {
        let code = self.code();
        async_graphql::Error::new(self.public_message()).extend_with(|_, e| e.set("code", code))
    }
}

/// Convert an [`AppResult`] into a resolver result.
pub trait RpcResultExt<T> {
    fn rpc(self) -> async_graphql::Result<T>;
}

impl<T> RpcResultExt<T> for AppResult<T> {
    fn rpc(self) -> async_graphql::Result<T> {
        self.map_err(|e| e.extend())
    }
}

/// `Set-Cookie` values produced while resolving a request.
#[derive(Default)]
pub struct ResponseCookies(Mutex<Vec<String>>);

impl ResponseCookies {
    pub fn push(&self, cookie: String) {
        if let Ok(mut cookies) = self.0.lock() {
            cookies.push(cookie);
        }
    }

    pub fn take(&self) -> Vec<String> {
        self.0
            .lock()
            .map(|mut cookies| std::mem::take(&mut *cookies))
            .unwrap_or_default()
    }
}

pub(crate) fn app_state<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a AppState> {
    ctx.data::<AppState>()
}

pub(crate) fn maybe_viewer<'a>(ctx: &Context<'a>) -> Option<&'a CurrentUser> {
    ctx.data_opt::<Option<CurrentUser>>()
        .and_then(|viewer| viewer.as_ref())
}

pub(crate) fn viewer<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a CurrentUser> {
    maybe_viewer(ctx).ok_or_else(|| AppError::Unauthorized.extend())
}

pub(crate) fn set_cookie(ctx: &Context<'_>, cookie: String) {
    if let Some(cookies) = ctx.data_opt::<Arc<ResponseCookies>>() {
        cookies.push(cookie);
    }
}

/// Run one request against the schema. Returns the response and any
/// cookies the resolvers set.
pub async fn execute(
    state: &AppState,
    request: async_graphql::Request,
    viewer: Option<CurrentUser>,
) -> (async_graphql::Response, Vec<String>) {
    let cookies = Arc::new(ResponseCookies::default());
    let request = request
        .data(state.clone())
        .data(viewer)
        .data(cookies.clone());

    let response = state.rpc_schema.execute(request).await;
    (response, cookies.take())
}
