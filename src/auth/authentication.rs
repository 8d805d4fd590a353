use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use subtle::ConstantTimeEq;

use crate::config::AppConfig;
use crate::db::{get_active_user, get_session_by_token};
use crate::error::AppError;

use super::{Permission, User};

pub const SESSION_COOKIE: &str = "session_token";

/// Everything a handler needs to know about who is asking and under which
/// settings. Built per request from the session cookie and managed state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user: User,
    pub csrf_token: String,
    pub config: AppConfig,
}

impl RequestContext {
    pub fn require(&self, permission: Permission) -> Result<(), AppError> {
        self.user.require_permission(permission)
    }

    /// Compares the submitted token against the one stored with the session.
    pub fn verify_csrf(&self, submitted: Option<&str>) -> Result<(), AppError> {
        let submitted = submitted.unwrap_or_default();
        if !submitted.is_empty() && constant_time_eq(submitted, &self.csrf_token) {
            Ok(())
        } else {
            tracing::warn!(username = %self.user.username, "Rejected form post with bad CSRF token");
            Err(AppError::Csrf)
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequestContext {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let auth_span = tracing::info_span!("request_context_guard");
        let _guard = auth_span.enter();

        let token = request
            .cookies()
            .get_private(SESSION_COOKIE)
            .map(|c| c.value().to_string());

        let Some(token) = token else {
            return Outcome::Error((Status::Unauthorized, ()));
        };

        let (db, config) = match (
            request.rocket().state::<SqlitePool>(),
            request.rocket().state::<AppConfig>(),
        ) {
            (Some(pool), Some(config)) => (pool, config.clone()),
            _ => {
                tracing::error!("Database pool or configuration missing from managed state");
                return Outcome::Error((Status::InternalServerError, ()));
            }
        };

        let session = match get_session_by_token(db, &token).await {
            Ok(session) if session.is_valid() => session,
            Ok(_) => {
                tracing::warn!("Session token expired");
                return Outcome::Error((Status::Unauthorized, ()));
            }
            Err(err) => {
                tracing::warn!(error = ?err, "Invalid session token");
                return Outcome::Error((Status::Unauthorized, ()));
            }
        };

        match get_active_user(db, session.user_id).await {
            Ok(user) => {
                tracing::debug!(username = %user.username, role = %user.role, "User authenticated via session token");
                Outcome::Success(RequestContext {
                    user,
                    csrf_token: session.csrf_token,
                    config,
                })
            }
            Err(AppError::NotFound(_)) => {
                tracing::warn!(user_id = %session.user_id, "Session belongs to a missing or inactive user");
                Outcome::Error((Status::Unauthorized, ()))
            }
            Err(err) => {
                tracing::error!(user_id = %session.user_id, error = ?err, "Failed to fetch user for valid session");
                Outcome::Error((Status::InternalServerError, ()))
            }
        }
    }
}

#[catch(401)]
pub fn unauthorized_api(_req: &Request) -> Custom<Json<Value>> {
    let error_json = json!({
        "error": "Unauthorized",
        "message": "Authentication required"
    });

    Custom(Status::Unauthorized, Json(error_json))
}

#[catch(403)]
pub fn forbidden_api(_req: &Request) -> Custom<Json<Value>> {
    tracing::warn!("Forbidden access attempt");
    let error_json = json!({
        "error": "Forbidden",
        "message": "You don't have permission to perform this action"
    });

    Custom(Status::Forbidden, Json(error_json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    fn context(csrf: &str) -> RequestContext {
        RequestContext {
            user: User {
                id: 1,
                username: "admin".to_string(),
                email: "admin@example.edu".to_string(),
                role: Role::Admin,
                display_name: "Admin".to_string(),
                is_active: true,
            },
            csrf_token: csrf.to_string(),
            config: AppConfig::default(),
        }
    }

    #[test]
    fn csrf_requires_exact_match() {
        let ctx = context("abc123");
        assert!(ctx.verify_csrf(Some("abc123")).is_ok());
        assert!(matches!(ctx.verify_csrf(Some("abc124")), Err(AppError::Csrf)));
        assert!(matches!(ctx.verify_csrf(Some("abc")), Err(AppError::Csrf)));
        assert!(matches!(ctx.verify_csrf(None), Err(AppError::Csrf)));
    }

    #[test]
    fn empty_session_token_never_matches() {
        let ctx = context("");
        assert!(ctx.verify_csrf(Some("")).is_err());
    }
}
