use crate::{
    auth::{DbUser, DbUserSession, Role, User, UserSession},
    error::AppError,
};
use chrono::{NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

const USER_COLUMNS: &str = "id, username, email, role, display_name, is_active";

#[instrument(skip(pool))]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    let row = sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(user) => User::try_from(user),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn get_active_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    let user = get_user(pool, id).await?;
    if !user.is_active {
        return Err(AppError::NotFound(format!("User with id {} is inactive", id)));
    }
    Ok(user)
}

#[instrument(skip_all, fields(username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let hash: Option<(i64, String, bool)> =
        sqlx::query_as("SELECT id, password, is_active FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await?;

    let Some((id, hash, is_active)) = hash else {
        return Ok(None);
    };

    if !is_active || !bcrypt::verify(password, &hash).unwrap_or(false) {
        return Ok(None);
    }

    get_user(pool, id).await.map(Some)
}

/// Creates the first administrator when the users table is empty.
#[instrument(skip(pool, password))]
pub async fn bootstrap_admin(
    pool: &Pool<Sqlite>,
    username: &str,
    email: &str,
    password: &str,
) -> Result<Option<i64>, AppError> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    if existing > 0 {
        return Ok(None);
    }

    info!("Creating bootstrap administrator");
    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;
    let now = Utc::now().naive_utc();

    let res = sqlx::query(
        "INSERT INTO users (username, email, password, display_name, role, is_active, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(username)
    .bind(email)
    .bind(hashed_password)
    .bind("Administrator")
    .bind(Role::Admin.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(Some(res.last_insert_rowid()))
}

#[instrument(skip(pool, token, csrf_token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    csrf_token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query(
        "INSERT INTO user_sessions (user_id, token, csrf_token, expires_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(token)
    .bind(csrf_token)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, csrf_token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    if result.rows_affected() > 0 {
        info!("Cleaned up {} expired sessions", result.rows_affected());
    }

    Ok(result.rows_affected())
}
