use std::fmt;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use crate::store::{Provisioned, connector_for};

/// Application user created once, at environment setup time.
///
/// The service itself never reads these; it connects with whatever
/// credentials are embedded in its store uri.
#[derive(Args, Clone)]
pub struct AppCredentials {
    /// Database the application user may read and write.
    #[arg(long = "db-name", env = "APP_DB_NAME", default_value = "devsecops")]
    pub database: String,

    #[arg(long = "db-username", env = "APP_DB_USERNAME", default_value = "app_user")]
    pub username: String,

    #[arg(long = "db-password", env = "APP_DB_PASSWORD", hide_env_values = true)]
    pub password: String,
}

impl fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredentials")
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connects with the admin uri and creates the application user.
pub async fn run(admin_uri: &str, credentials: &AppCredentials) -> Result<Provisioned> {
    let connector = connector_for(admin_uri, std::time::Duration::from_secs(10))?;
    let outcome = connector
        .provision(credentials)
        .await
        .with_context(|| format!("failed to provision user {}", credentials.username))?;
    if outcome == Provisioned::Created {
        info!(
            database = %credentials.database,
            username = %credentials.username,
            "created application user with readWrite"
        );
    }
    Ok(outcome)
}
