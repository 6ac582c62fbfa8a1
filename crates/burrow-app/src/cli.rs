use crate::app::{Backend, Settings};
use crate::telemetry::LogFormat;
use burrow_deleter::{DeletionConfig, FetchFailurePolicy};
use burrow_storage::PoolSettings;
use clap::{Parser, ValueEnum};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const DATABASE_DSN_ENV: &str = "BURROW_DATABASE_DSN";
pub const DATABASE_MAX_CONNECTIONS_ENV: &str = "BURROW_DATABASE_MAX_CONNECTIONS";
pub const FILE_STORAGE_PATH_ENV: &str = "BURROW_FILE_STORAGE_PATH";
pub const LOG_LEVEL_ENV: &str = "BURROW_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "BURROW_LOG_FORMAT";
pub const DELETE_FLUSH_INTERVAL_MS_ENV: &str = "BURROW_DELETE_FLUSH_INTERVAL_MS";
pub const DELETE_QUEUE_CAPACITY_ENV: &str = "BURROW_DELETE_QUEUE_CAPACITY";
pub const DELETE_MAX_PENDING_ENV: &str = "BURROW_DELETE_MAX_PENDING";
pub const DELETE_FETCH_FAILURE_ENV: &str = "BURROW_DELETE_FETCH_FAILURE";
pub const DELETE_DRAIN_ON_STOP_ENV: &str = "BURROW_DELETE_DRAIN_ON_STOP";
pub const SHUTDOWN_TIMEOUT_SECS_ENV: &str = "BURROW_SHUTDOWN_TIMEOUT_SECS";

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 3;
pub const DEFAULT_DELETE_FLUSH_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_DELETE_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_DELETE_MAX_PENDING: usize = 100_000;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FetchFailureArg {
    #[value(name = "drop")]
    Drop,
    #[value(name = "retry")]
    Retry,
}

impl Display for FetchFailureArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchFailureArg::Drop => write!(f, "drop"),
            FetchFailureArg::Retry => write!(f, "retry"),
        }
    }
}

impl From<FetchFailureArg> for FetchFailurePolicy {
    fn from(value: FetchFailureArg) -> Self {
        match value {
            FetchFailureArg::Drop => FetchFailurePolicy::Drop,
            FetchFailureArg::Retry => FetchFailurePolicy::Retry,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "burrow", about = "URL shortener storage and deletion service")]
pub struct Cli {
    /// PostgreSQL connection string. When set, the relational backend is used.
    #[arg(short = 'd', long, env = DATABASE_DSN_ENV)]
    pub database_dsn: Option<String>,

    #[arg(
        long,
        env = DATABASE_MAX_CONNECTIONS_ENV,
        default_value_t = DEFAULT_DATABASE_MAX_CONNECTIONS
    )]
    pub database_max_connections: u32,

    /// Append-only log for the in-memory backend. Ignored with a database DSN.
    #[arg(short = 'f', long, env = FILE_STORAGE_PATH_ENV)]
    pub file_storage_path: Option<PathBuf>,

    /// Filter directive, e.g. `info` or `burrow_storage=debug`. `RUST_LOG` wins when set.
    #[arg(long, env = LOG_LEVEL_ENV, default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[arg(
        long,
        env = DELETE_FLUSH_INTERVAL_MS_ENV,
        default_value_t = DEFAULT_DELETE_FLUSH_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub delete_flush_interval_ms: u64,

    #[arg(
        long,
        env = DELETE_QUEUE_CAPACITY_ENV,
        default_value_t = DEFAULT_DELETE_QUEUE_CAPACITY
    )]
    pub delete_queue_capacity: usize,

    /// Cap on buffered short codes awaiting deletion; 0 disables the cap.
    #[arg(
        long,
        env = DELETE_MAX_PENDING_ENV,
        default_value_t = DEFAULT_DELETE_MAX_PENDING
    )]
    pub delete_max_pending: usize,

    #[arg(
        long,
        env = DELETE_FETCH_FAILURE_ENV,
        value_enum,
        default_value_t = FetchFailureArg::Retry
    )]
    pub delete_fetch_failure: FetchFailureArg,

    #[arg(
        long,
        env = DELETE_DRAIN_ON_STOP_ENV,
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub delete_drain_on_stop: bool,

    #[arg(
        long,
        env = SHUTDOWN_TIMEOUT_SECS_ENV,
        default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS
    )]
    pub shutdown_timeout_secs: u64,
}

impl Cli {
    /// The backend selected by the arguments: a DSN wins over a file path.
    pub fn backend(&self) -> Backend {
        match &self.database_dsn {
            Some(dsn) if !dsn.trim().is_empty() => Backend::Postgres {
                dsn: dsn.clone(),
                pool: PoolSettings::builder()
                    .max_connections(self.database_max_connections)
                    .build(),
            },
            _ => Backend::Memory {
                path: self.file_storage_path.clone(),
            },
        }
    }

    pub fn deletion_config(&self) -> DeletionConfig {
        DeletionConfig::builder()
            .queue_capacity(self.delete_queue_capacity)
            .flush_interval(Duration::from_millis(self.delete_flush_interval_ms))
            .max_pending((self.delete_max_pending > 0).then_some(self.delete_max_pending))
            .fetch_failure_policy(self.delete_fetch_failure.into())
            .drain_on_stop(self.delete_drain_on_stop)
            .build()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn settings(&self) -> Settings {
        Settings::builder()
            .backend(self.backend())
            .deletion(self.deletion_config())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("burrow").chain(args.iter().copied()))
            .expect("valid arguments")
    }

    #[test]
    fn defaults_select_volatile_memory_backend() {
        let cli = parse(&[]);

        assert_eq!(cli.backend(), Backend::Memory { path: None });
        assert_eq!(cli.log_level, "info");

        let config = cli.deletion_config();
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.flush_interval, Duration::from_secs(1));
        assert_eq!(config.max_pending, Some(DEFAULT_DELETE_MAX_PENDING));
        assert_eq!(config.fetch_failure_policy, FetchFailurePolicy::Retry);
        assert!(config.drain_on_stop);
        assert_eq!(cli.shutdown_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn file_path_selects_durable_memory_backend() {
        let cli = parse(&["-f", "/tmp/urls.json"]);

        assert_eq!(
            cli.backend(),
            Backend::Memory {
                path: Some(PathBuf::from("/tmp/urls.json"))
            }
        );
    }

    #[test]
    fn dsn_wins_over_file_path() {
        let cli = parse(&[
            "--database-dsn",
            "postgres://burrow@localhost/burrow",
            "--file-storage-path",
            "/tmp/urls.json",
            "--database-max-connections",
            "7",
        ]);

        match cli.backend() {
            Backend::Postgres { dsn, pool } => {
                assert_eq!(dsn, "postgres://burrow@localhost/burrow");
                assert_eq!(pool.max_connections, 7);
            }
            other => panic!("expected postgres backend, got {other:?}"),
        }
    }

    #[test]
    fn blank_dsn_falls_back_to_memory() {
        let cli = parse(&["-d", "  "]);
        assert_eq!(cli.backend(), Backend::Memory { path: None });
    }

    #[test]
    fn deletion_flags() {
        let cli = parse(&[
            "--delete-flush-interval-ms",
            "250",
            "--delete-max-pending",
            "0",
            "--delete-fetch-failure",
            "drop",
            "--delete-drain-on-stop",
            "false",
        ]);
        let config = cli.deletion_config();

        assert_eq!(config.flush_interval, Duration::from_millis(250));
        assert_eq!(config.max_pending, None);
        assert_eq!(config.fetch_failure_policy, FetchFailurePolicy::Drop);
        assert!(!config.drain_on_stop);
    }

    #[test]
    fn rejects_zero_flush_interval() {
        let result = Cli::try_parse_from(["burrow", "--delete-flush-interval-ms", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unknown_fetch_policy() {
        let result = Cli::try_parse_from(["burrow", "--delete-fetch-failure", "ignore"]);
        assert!(result.is_err());
    }
}
