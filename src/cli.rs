//! CLI argument parsing, validation, and startup helpers.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use uuid::Uuid;

use crate::ServerConfig;
use crate::auth::IpSource;
use crate::clock::SystemClock;
use crate::db::Database;
use crate::jwt::MIN_SECRET_BYTES;
use crate::session::SessionService;
use crate::settings::AuthSettings;

/// Environment variable holding the password for `--create-user`.
pub const NEW_USER_PASSWORD_ENV: &str = "TOLLGATE_NEW_USER_PASSWORD";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tollgate",
    about = "Token session service with refresh rotation, revocation and lockout"
)]
pub struct Args {
    /// Address to bind
    #[arg(long, env = "TOLLGATE_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Port to listen on
    #[arg(short, long, env = "TOLLGATE_PORT", default_value = "7292")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "TOLLGATE_DATABASE", default_value = "tollgate.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Read the client address from this header (e.g. X-Forwarded-For).
    /// Only set this behind a reverse proxy that overwrites the header
    #[arg(long, value_parser = IpSource::from_header_name)]
    pub ip_header: Option<IpSource>,

    /// Create a user on startup. The password is read from TOLLGATE_NEW_USER_PASSWORD
    #[arg(long, value_name = "USERNAME")]
    pub create_user: Option<String>,

    /// Role labels for --create-user
    #[arg(long = "role", value_name = "ROLE", default_value = "user")]
    pub roles: Vec<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,

    #[command(flatten)]
    pub auth: AuthSettings,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Read an environment variable and remove it so child processes and
/// diagnostics cannot see it.
fn take_env_secret(name: &str) -> Option<String> {
    let value = std::env::var(name).ok()?;
    // SAFETY: only called during startup, before any task is spawned,
    // and nothing else reads these variables.
    unsafe { std::env::remove_var(name) };
    Some(value)
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Some(secret) = take_env_secret("JWT_SECRET") {
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_SECRET_BYTES {
        error!(
            "JWT secret is shorter than {} bytes. Use a longer secret",
            MIN_SECRET_BYTES
        );
        return None;
    }

    Some(secret)
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

/// Build the session service with the system clock.
/// Returns None and logs an error if the settings are rejected.
pub fn build_service(db: Database, settings: AuthSettings, jwt_secret: &str) -> Option<SessionService> {
    match SessionService::from_settings(db, settings, jwt_secret.as_bytes(), Arc::new(SystemClock)) {
        Ok(service) => Some(service),
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            None
        }
    }
}

/// Handle the --create-user flag. Returns the new principal's UUID.
pub async fn handle_create_user(
    service: &SessionService,
    username: &str,
    roles: &[String],
) -> Option<String> {
    let Some(password) = take_env_secret(NEW_USER_PASSWORD_ENV) else {
        error!("--create-user requires the {} environment variable", NEW_USER_PASSWORD_ENV);
        return None;
    };

    let hash = match service.credentials().hash(&password) {
        Ok(hash) => hash,
        Err(e) => {
            error!(error = %e, "Failed to hash password");
            return None;
        }
    };

    let uuid = Uuid::new_v4().to_string();
    match service
        .database()
        .users()
        .create(&uuid, username, &hash, roles)
        .await
    {
        Ok(_) => {
            info!(principal_id = %uuid, username = %username, roles = ?roles, "User created");
            println!();
            println!("User created: {}", username);
            println!("UUID: {}", uuid);
            println!();
            Some(uuid)
        }
        Err(e) => {
            error!(username = %username, error = %e, "Failed to create user");
            None
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(service: SessionService, ip_header: Option<IpSource>) -> ServerConfig {
    ServerConfig {
        service: Arc::new(service),
        ip_source: ip_header.unwrap_or_default(),
    }
}
