#![allow(dead_code)]

use std::io::Cursor;

use eventroll::config::Config;
use eventroll::db;
use eventroll::extractors::CurrentUser;
use eventroll::rpc;
use eventroll::state::AppState;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;

pub struct TestApp {
    pub state: AppState,
    // Keeps the data directory alive for the duration of the test.
    _tmp: TempDir,
}

pub fn test_app() -> TestApp {
    test_app_with(|_| {})
}

pub fn test_app_with(customize: impl FnOnce(&mut Config)) -> TestApp {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.resolve_paths(tmp.path());
    config.auth.bcrypt_cost = 4;
    config.gallery.invalidation_debounce_ms = 10;
    customize(&mut config);

    let pool = db::create_pool(&config.db_path()).expect("Failed to create test database");
    db::run_migrations(&pool).expect("Failed to run migrations");

    TestApp {
        state: AppState::new(config, pool),
        _tmp: tmp,
    }
}

/// Run a procedure and return its JSON data, panicking on errors.
pub async fn rpc_ok(state: &AppState, viewer: Option<&CurrentUser>, query: &str) -> serde_json::Value {
    let (response, _) = rpc::execute(state, async_graphql::Request::new(query), viewer.cloned()).await;
    assert!(
        response.errors.is_empty(),
        "Expected no errors for {}, got: {:?}",
        query,
        response.errors
    );
    response.data.into_json().unwrap()
}

/// Run a procedure expected to fail and return the error code.
pub async fn rpc_error_code(state: &AppState, viewer: Option<&CurrentUser>, query: &str) -> String {
    let (response, _) = rpc::execute(state, async_graphql::Request::new(query), viewer.cloned()).await;
    assert!(!response.errors.is_empty(), "Expected an error for {}", query);
    let error = serde_json::to_value(&response.errors[0]).unwrap();
    error["extensions"]["code"].as_str().unwrap_or_default().to_string()
}

pub async fn sign_up(state: &AppState, name: &str) -> CurrentUser {
    let query = format!(
        r#"mutation {{
            createProfile(input: {{
                email: "{}@example.com",
                password: "password123",
                displayName: "{}"
            }}) {{ token user {{ id }} }}
        }}"#,
        name.to_lowercase(),
        name
    );
    let data = rpc_ok(state, None, &query).await;
    let token = data["createProfile"]["token"].as_str().unwrap();
    CurrentUser::from_token(state, token).unwrap().unwrap()
}

pub fn cookie(user: &CurrentUser) -> String {
    format!("token={}", user.token)
}

/// Create an event that started yesterday and never ends.
pub async fn create_event(state: &AppState, organizer: &CurrentUser, extra: &str) -> String {
    let query = format!(
        r#"mutation {{
            createEvent(input: {{ name: "Summer Party", date: "2020-01-01T00:00:00Z" {} }}) {{ id }}
        }}"#,
        extra
    );
    let data = rpc_ok(state, Some(organizer), &query).await;
    data["createEvent"]["id"].as_str().unwrap().to_string()
}

pub async fn join(state: &AppState, user: &CurrentUser, event_id: &str) {
    let query = format!(r#"mutation {{ joinEvent(eventId: "{}") {{ id }} }}"#, event_id);
    rpc_ok(state, Some(user), &query).await;
}

/// A small JPEG with some texture so it does not compress to nothing.
pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
    }));
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Jpeg).unwrap();
    buffer.into_inner()
}
