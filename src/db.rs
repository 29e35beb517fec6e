use crate::config::Config;
use crate::error::{is_constraint, CoreError, Result, SQLITE_CONSTRAINT_UNIQUE};
use crate::models::{LocalUser, Role};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub type DbPool = r2d2::Pool<SqliteConnectionManager>;

const SCHEMA: &str = include_str!("../db/schema.sql");

/// Build the connection pool and apply the schema. Every pooled connection
/// enforces foreign keys (cascade deletes depend on it).
pub fn open_pool(cfg: &Config) -> Result<DbPool> {
    open_pool_at(&cfg.db_path, cfg.db_pool_size, cfg.timeout())
}

pub fn open_pool_at(path: &Path, max_size: u32, timeout: Duration) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(move |c| {
        c.busy_timeout(timeout)?;
        c.execute_batch("PRAGMA foreign_keys = ON;")
    });
    let pool = r2d2::Pool::builder()
        .max_size(max_size)
        .connection_timeout(timeout)
        .build(manager)?;
    let conn = pool.get()?;
    run_migrations(&conn)?;
    info!(path = %path.display(), "database ready");
    Ok(pool)
}

pub fn open_or_create(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    run_migrations(&conn)?;
    Ok(conn)
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

fn user_from_row(r: &Row<'_>) -> rusqlite::Result<LocalUser> {
    let role: String = r.get(4)?;
    Ok(LocalUser {
        id: r.get(0)?,
        email: r.get(1)?,
        password_hash: r.get(2)?,
        display_name: r.get(3)?,
        role: Role::parse(&role).unwrap_or(Role::User),
        preferred_lang: r.get(5)?,
        created_at: r.get(6)?,
    })
}

const USER_COLUMNS: &str = "id, email, password_hash, display_name, role, preferred_lang, created_at";

/// Insert a new local user. A duplicate email is a `Conflict`.
pub fn create_user(
    conn: &Connection,
    email: &str,
    password_hash: &str,
    display_name: Option<&str>,
    role: Role,
) -> Result<LocalUser> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO app_user (id, email, password_hash, display_name, role, preferred_lang, created_at) VALUES (?1, ?2, ?3, ?4, ?5, 'es', ?6)",
        params![id, email, password_hash, display_name, role.as_str(), now],
    )
    .map_err(|e| {
        if is_constraint(&e, SQLITE_CONSTRAINT_UNIQUE) {
            CoreError::Conflict(format!("email {} already exists", email))
        } else {
            CoreError::from(e)
        }
    })?;
    Ok(LocalUser {
        id,
        email: email.to_string(),
        password_hash: password_hash.to_string(),
        display_name: display_name.map(str::to_string),
        role,
        preferred_lang: "es".into(),
        created_at: now,
    })
}

pub fn get_user(conn: &Connection, id: &str) -> Result<Option<LocalUser>> {
    let sql = format!("SELECT {} FROM app_user WHERE id = ?1", USER_COLUMNS);
    let row = conn.query_row(&sql, params![id], user_from_row).optional()?;
    Ok(row)
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<LocalUser>> {
    let sql = format!("SELECT {} FROM app_user WHERE email = ?1", USER_COLUMNS);
    let row = conn.query_row(&sql, params![email], user_from_row).optional()?;
    Ok(row)
}

pub fn list_users(conn: &Connection, limit: u32) -> Result<Vec<LocalUser>> {
    let sql = format!("SELECT {} FROM app_user ORDER BY created_at ASC, id ASC LIMIT ?1", USER_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit], user_from_row)?;
    let mut v = Vec::new();
    for r in rows {
        v.push(r?);
    }
    Ok(v)
}

/// Delete a user; credential, events and cached recommendations go with it.
/// Returns false when no such user existed.
pub fn delete_user(conn: &Connection, id: &str) -> Result<bool> {
    let removed = conn.execute("DELETE FROM app_user WHERE id = ?1", params![id])?;
    Ok(removed > 0)
}

pub fn update_preferred_lang(conn: &Connection, id: &str, lang: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE app_user SET preferred_lang = ?2 WHERE id = ?1",
        params![id, lang],
    )?;
    if updated == 0 {
        return Err(CoreError::NotFound(format!("user {}", id)));
    }
    Ok(())
}

/// Run a blocking storage closure off the async executor.
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CoreError::Internal(anyhow::Error::new(e)))?
}
