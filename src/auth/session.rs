use rand::Rng;
use rusqlite::{params, OptionalExtension};

use crate::error::AppResult;
use crate::market::UserId;
use crate::state::DbPool;

/// Create a user with a fresh UUIDv7 id, or return the existing id for `username`.
pub fn ensure_user(pool: &DbPool, username: &str) -> AppResult<UserId> {
    let conn = pool.get()?;

    conn.execute(
        "INSERT OR IGNORE INTO users (id, username) VALUES (?1, ?2)",
        params![uuid::Uuid::now_v7().to_string(), username],
    )?;

    let id: String = conn.query_row(
        "SELECT id FROM users WHERE username = ?1",
        params![username],
        |row| row.get(0),
    )?;
    Ok(UserId::new(id))
}

/// Create a new session for a user. Returns the session token.
pub fn create_session(pool: &DbPool, user_id: &UserId, hours: u64) -> AppResult<String> {
    let conn = pool.get()?;

    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();

    conn.execute(
        "INSERT INTO sessions (id, user_id, token, expires_at) VALUES (?1, ?2, ?3, datetime('now', ?4))",
        params![id, user_id.as_str(), token, format!("+{} hours", hours)],
    )?;

    Ok(token)
}

/// Resolve an unexpired session token to its user id and username.
pub fn lookup_session(pool: &DbPool, token: &str) -> AppResult<Option<(UserId, String)>> {
    let conn = pool.get()?;

    let user = conn
        .query_row(
            "SELECT u.id, u.username FROM sessions s \
             JOIN users u ON u.id = s.user_id \
             WHERE s.token = ?1 AND s.expires_at > datetime('now')",
            params![token],
            |row| Ok((UserId::new(row.get::<_, String>(0)?), row.get(1)?)),
        )
        .optional()?;
    Ok(user)
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
