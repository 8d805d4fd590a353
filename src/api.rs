use chrono::{Duration, Utc};
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};
use validator::Validate;

use crate::auth::{Permission, RequestContext, SESSION_COOKIE, User, UserSession};
use crate::config::AppConfig;
use crate::db::{authenticate_user, clean_expired_sessions, create_user_session, invalidate_session};
use crate::error::AppError;
use crate::validation::{ToValidationResponse, ValidationErrorWrapper, ValidationResponse};

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 50, message = "Username is required."))]
    username: String,
    #[validate(length(min = 1, max = 128, message = "Password is required."))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub role: String,
    /// Token to echo back as `csrf_token` on every admin form post.
    pub csrf_token: String,
}

impl UserData {
    fn new(user: User, csrf_token: String) -> Self {
        Self {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            email: user.email,
            role: user.role.to_string(),
            csrf_token,
        }
    }
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<LoginResponse>, Custom<Json<ValidationResponse>>> {
    login
        .validate()
        .map_err(|errors| Custom::from(ValidationErrorWrapper(errors)))?;

    if let Err(err) = clean_expired_sessions(db).await {
        err.log_and_record("Expired session cleanup");
    }

    let user = authenticate_user(db, &login.username, &login.password)
        .await
        .map_err(|err| err.to_validation_response())?;

    let Some(user) = user else {
        warn!("Rejected login attempt");
        return Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some("Invalid username or password".to_string()),
        }));
    };

    let token = UserSession::generate_token();
    let csrf_token = UserSession::generate_csrf_token();
    let expires_at = Utc::now() + Duration::hours(config.session_ttl_hours);

    create_user_session(db, user.id, &token, &csrf_token, expires_at.naive_utc())
        .await
        .map_err(|err| err.to_validation_response())?;

    cookies.add_private(
        Cookie::build((SESSION_COOKIE, token))
            .same_site(SameSite::Lax)
            .http_only(true)
            .max_age(rocket::time::Duration::hours(config.session_ttl_hours)),
    );

    info!(user_id = user.id, "User logged in");

    Ok(Json(LoginResponse {
        success: true,
        user: Some(UserData::new(user, csrf_token)),
        error: None,
    }))
}

#[get("/me")]
pub async fn api_me(ctx: RequestContext) -> Result<Json<UserData>, AppError> {
    ctx.require(Permission::ViewOwnProfile)?;
    Ok(Json(UserData::new(ctx.user, ctx.csrf_token)))
}

#[get("/me", rank = 2)]
pub async fn api_me_unauthorized() -> Status {
    Status::Unauthorized
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &State<Pool<Sqlite>>) -> Status {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(err) = invalidate_session(db, &token).await {
            err.log_and_record("Logout");
        }
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE));

    Status::Ok
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}
