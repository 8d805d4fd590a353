use chrono::{NaiveDateTime, Utc};
use rand::{Rng, distr::Alphanumeric};
use serde::Serialize;

use super::{Permission, Role};
use crate::error::AppError;

#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub display_name: String,
    pub is_active: bool,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUser {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub display_name: Option<String>,
    pub is_active: Option<bool>,
}

impl TryFrom<DbUser> for User {
    type Error = AppError;

    fn try_from(user: DbUser) -> Result<Self, Self::Error> {
        let role = user.role.unwrap_or_default();
        let role = Role::from_str(&role).map_err(|e| AppError::Internal(e.to_string()))?;

        Ok(Self {
            id: user.id.unwrap_or_default(),
            username: user.username.unwrap_or_default(),
            email: user.email.unwrap_or_default(),
            role,
            display_name: user.display_name.unwrap_or_default(),
            is_active: user.is_active.unwrap_or_default(),
        })
    }
}

impl User {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), AppError> {
        if self.role.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                username = %self.username,
                role = %self.role.as_str(),
                permission = ?permission,
                "Permission denied"
            );
            Err(AppError::Authorization(format!(
                "Role '{}' may not perform this action",
                self.role
            )))
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserSession {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub csrf_token: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUserSession {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub token: Option<String>,
    pub csrf_token: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub expires_at: Option<NaiveDateTime>,
}

impl From<DbUserSession> for UserSession {
    fn from(db: DbUserSession) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            token: db.token.unwrap_or_default(),
            csrf_token: db.csrf_token.unwrap_or_default(),
            created_at: db.created_at.unwrap_or(now),
            // A missing expiry is treated as already expired.
            expires_at: db.expires_at.unwrap_or(now),
        }
    }
}

impl UserSession {
    pub fn generate_token() -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(48)
            .map(char::from)
            .collect()
    }

    pub fn generate_csrf_token() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    pub fn is_valid(&self) -> bool {
        self.expires_at > Utc::now().naive_utc()
    }
}
