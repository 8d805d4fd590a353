#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod config;
mod db;
mod entities;
mod env;
mod error;
mod grid;
mod mutation;
mod pages;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use std::str::FromStr;

use api::{api_login, api_logout, api_me, api_me_unauthorized, health};
use auth::{forbidden_api, unauthorized_api};
use config::AppConfig;
use db::bootstrap_admin;
use error::AppError;
use rocket::fairing::AdHoc;
use rocket::figment::Figment;
use rocket::{Build, Rocket};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use telemetry::{TelemetryFairing, init_tracing};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    Figment(rocket::figment::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

impl From<rocket::figment::Error> for Error {
    fn from(value: rocket::figment::Error) -> Self {
        Error::Figment(value)
    }
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    let env_files = env::load_environment()?;

    let _otel_guard = init_tracing();
    for path in &env_files {
        info!(path = %path.display(), "Loaded environment file");
    }

    let figment = AppConfig::figment();
    let config = AppConfig::from_figment(&figment)?;
    info!(
        debug = config.debug,
        session_ttl_hours = config.session_ttl_hours,
        max_page_length = config.max_page_length,
        "Configuration loaded"
    );

    let database_url = dotenvy::var("DATABASE_URL")
        .map_err(|err| anyhow::anyhow!("DATABASE_URL is not set: {}", err))?;
    let options = SqliteConnectOptions::from_str(&database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(AppError::from)?;
    info!("Migrations completed successfully");

    bootstrap_from_env(&pool).await?;

    if let Err(err) = init_rocket(pool, figment).launch().await {
        return Err(anyhow::anyhow!("Rocket failed: {}", err).into());
    }

    Ok(())
}

/// Seeds the first administrator from `RECORDS_ADMIN_*` when the users table
/// is still empty.
async fn bootstrap_from_env(pool: &SqlitePool) -> Result<(), AppError> {
    let Ok(password) = dotenvy::var("RECORDS_ADMIN_PASSWORD") else {
        return Ok(());
    };

    let username = dotenvy::var("RECORDS_ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string());
    let email =
        dotenvy::var("RECORDS_ADMIN_EMAIL").unwrap_or_else(|_| "admin@localhost".to_string());

    match bootstrap_admin(pool, &username, &email, &password).await? {
        Some(id) => info!(user_id = id, username = %username, "Bootstrap administrator created"),
        None => warn!("Users already exist; RECORDS_ADMIN_PASSWORD ignored"),
    }

    Ok(())
}

pub fn init_rocket(pool: SqlitePool, figment: Figment) -> Rocket<Build> {
    info!("Starting records console");

    rocket::custom(figment)
        .manage(pool)
        .attach(AdHoc::config::<AppConfig>())
        .mount("/data", entities::data_routes())
        .mount("/admin", entities::admin_routes())
        .mount(
            "/api",
            routes![api_login, api_me, api_me_unauthorized, api_logout, health],
        )
        .register("/api", catchers![unauthorized_api, forbidden_api])
        .register("/data", catchers![unauthorized_api, forbidden_api])
        .attach(TelemetryFairing)
}
