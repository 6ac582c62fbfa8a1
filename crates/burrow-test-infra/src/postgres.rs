use crate::{Result, TestInfraError};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use std::time::Duration;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers::{ContainerAsync, GenericImage};
use typed_builder::TypedBuilder;

const POSTGRES_PORT: u16 = 5432;

#[derive(TypedBuilder)]
pub struct PostgresConfig {
    #[builder(default = "burrow".to_string())]
    database: String,
    #[builder(default = "burrow".to_string())]
    username: String,
    #[builder(default = "burrow".to_string())]
    password: String,
    #[builder(default = "16-alpine".to_string())]
    tag: String,
    /// Connection attempts made by [`PostgresServer::new`] before giving up.
    #[builder(default = 40)]
    ready_attempts: u32,
    #[builder(default = Duration::from_millis(250))]
    ready_backoff: Duration,
}

/// A disposable PostgreSQL server that accepts queries once constructed.
pub struct PostgresServer {
    container: ContainerAsync<GenericImage>,
    config: PostgresConfig,
}

impl PostgresServer {
    pub async fn new(config: PostgresConfig) -> Result<Self> {
        let container = GenericImage::new("postgres", config.tag.as_str())
            .with_exposed_port(POSTGRES_PORT.tcp())
            .with_wait_for(WaitFor::message_on_stderr(
                "database system is ready to accept connections",
            ))
            .with_env_var("POSTGRES_DB", config.database.as_str())
            .with_env_var("POSTGRES_USER", config.username.as_str())
            .with_env_var("POSTGRES_PASSWORD", config.password.as_str())
            .start()
            .await?;

        let server = Self { container, config };
        server.wait_until_ready().await?;
        Ok(server)
    }

    /// Polls with `SELECT 1` until the server answers.
    ///
    /// The entrypoint runs a temporary server for `initdb` that logs the same
    /// readiness line and then restarts, so the log alone is not enough.
    async fn wait_until_ready(&self) -> Result<()> {
        let options = self.connect_options().await?;
        let mut last_error = None;

        for _ in 0..self.config.ready_attempts {
            match Self::select_one(&options).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    last_error = Some(err);
                    tokio::time::sleep(self.config.ready_backoff).await;
                }
            }
        }

        Err(TestInfraError::NotReady(format!(
            "postgres did not answer after {} attempts: {}",
            self.config.ready_attempts,
            last_error.map_or_else(|| "no attempt made".to_string(), |err| err.to_string())
        )))
    }

    async fn select_one(options: &PgConnectOptions) -> sqlx::Result<()> {
        let mut conn = PgConnection::connect_with(options).await?;
        sqlx::query("SELECT 1").execute(&mut conn).await?;
        conn.close().await
    }

    pub async fn host(&self) -> Result<String> {
        Ok(self.container.get_host().await?.to_string())
    }

    pub async fn port(&self) -> Result<u16> {
        Ok(self.container.get_host_port_ipv4(POSTGRES_PORT).await?)
    }

    pub async fn connect_options(&self) -> Result<PgConnectOptions> {
        Ok(PgConnectOptions::new()
            .host(&self.host().await?)
            .port(self.port().await?)
            .username(&self.config.username)
            .password(&self.config.password)
            .database(&self.config.database))
    }

    pub async fn database_url(&self) -> Result<String> {
        let host = self.host().await?;
        let port = self.port().await?;
        Ok(format!(
            "postgres://{}:{}@{}:{}/{}",
            self.config.username, self.config.password, host, port, self.config.database
        ))
    }

    pub fn container(&self) -> &ContainerAsync<GenericImage> {
        &self.container
    }
}
