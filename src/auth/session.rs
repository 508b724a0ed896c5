use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::AuthConfig;
use crate::db::models::User;
use crate::db::parse_timestamp;
use crate::error::AppResult;

/// Create a new session for a user. Returns the session token.
pub fn create_session(conn: &Connection, user_id: &str, days: u64) -> AppResult<String> {
    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();

    conn.execute(
        "INSERT INTO sessions (id, user_id, token, expires_at)
         VALUES (?1, ?2, ?3, datetime('now', ?4))",
        params![id, user_id, token, format!("+{} days", days)],
    )?;

    Ok(token)
}

/// Resolve an unexpired session token to its user.
pub fn find_session_user(conn: &Connection, token: &str) -> AppResult<Option<User>> {
    let user = conn
        .query_row(
            "SELECT u.id, u.email, u.display_name, u.photo_url, u.created_at
             FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token = ?1 AND s.expires_at > datetime('now')",
            params![token],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    display_name: row.get(2)?,
                    photo_url: row.get(3)?,
                    created_at: parse_timestamp(&row.get::<_, String>(4)?),
                })
            },
        )
        .optional()?;
    Ok(user)
}

/// Delete a session by token.
pub fn delete_session(conn: &Connection, token: &str) -> AppResult<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// Drop sessions past their expiry.
pub fn purge_expired(conn: &Connection) -> AppResult<usize> {
    let removed = conn.execute(
        "DELETE FROM sessions WHERE expires_at <= datetime('now')",
        [],
    )?;
    Ok(removed)
}

pub fn session_cookie(auth: &AuthConfig, token: &str) -> String {
    let max_age_secs = auth.session_days * 24 * 3600;
    let secure = if auth.secure_cookie { "; Secure" } else { "" };
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{}",
        auth.cookie_name, token, max_age_secs, secure
    )
}

pub fn clear_session_cookie(auth: &AuthConfig) -> String {
    format!(
        "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0",
        auth.cookie_name
    )
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
