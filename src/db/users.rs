use rusqlite::{params, Connection, OptionalExtension};

use crate::db::models::User;
use crate::db::{now_timestamp, parse_timestamp};
use crate::error::{AppError, AppResult};

const USER_COLUMNS: &str = "id, email, display_name, photo_url, created_at";

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        photo_url: row.get(3)?,
        created_at: parse_timestamp(&row.get::<_, String>(4)?),
    })
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Insert a new account. Emails are unique case-insensitively.
pub fn create_user(
    conn: &Connection,
    email: &str,
    display_name: &str,
    photo_url: Option<&str>,
    password_hash: &str,
) -> AppResult<User> {
    let email = normalize_email(email);
    let id = uuid::Uuid::now_v7().to_string();

    let result = conn.execute(
        "INSERT INTO users (id, email, display_name, photo_url, password_hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, email, display_name, photo_url, password_hash, now_timestamp()],
    );

    match result {
        Ok(_) => get_user(conn, &id),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(AppError::Conflict("Email is already registered".into()))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_user(conn: &Connection, id: &str) -> AppResult<User> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        params![id],
        row_to_user,
    )
    .optional()?
    .ok_or(AppError::NotFound)
}

/// Look up an account and its password hash for sign-in.
pub fn find_credentials(conn: &Connection, email: &str) -> AppResult<Option<(User, String)>> {
    let found = conn
        .query_row(
            &format!(
                "SELECT {}, password_hash FROM users WHERE email = ?1",
                USER_COLUMNS
            ),
            params![normalize_email(email)],
            |row| Ok((row_to_user(row)?, row.get::<_, String>(5)?)),
        )
        .optional()?;
    Ok(found)
}

pub fn update_profile(
    conn: &Connection,
    id: &str,
    display_name: Option<&str>,
    photo_url: Option<&str>,
) -> AppResult<User> {
    conn.execute(
        "UPDATE users SET
           display_name = COALESCE(?2, display_name),
           photo_url = COALESCE(?3, photo_url)
         WHERE id = ?1",
        params![id, display_name, photo_url],
    )?;
    get_user(conn, id)
}
