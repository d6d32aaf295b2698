//! Raw counter source: the monitored PostgreSQL instance.
//!
//! The pipeline only needs a narrow view of the database, expressed as traits:
//! - [`CounterSource`]: cumulative counters plus stored ASH samples and
//!   counter snapshots (`profile_metrics.ash_samples`, `profile_metrics.snapshots`)
//! - [`SampleRecorder`]: the periodic sampling jobs that fill those tables
//! - [`SettingsSink`]: persistent `ALTER SYSTEM` writes and config reload
//!
//! [`PgSource`] implements all three over one lazily (re)established
//! connection. Every call blocks; async callers wrap them in `spawn_blocking`.

mod counters;
pub mod dashboard;
mod queries;
mod settings;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use postgres::{CancelToken, Client, NoTls};
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::model::{RawCounterSnapshot, SessionSampleCounts};

pub use settings::SettingEntry;

/// Read side of the raw counter source used by the calculator.
pub trait CounterSource: Send + Sync + 'static {
    /// Reads the cumulative transaction and statement counters.
    fn raw_counters(&self) -> Result<RawCounterSnapshot, SourceError>;

    /// Growth of the stored total-execution-time series over the last
    /// `window`, in milliseconds. `None` with fewer than two stored snapshots.
    fn active_time_ms(&self, window: Duration) -> Result<Option<f64>, SourceError>;

    /// Stored session samples of the last `window`, split by wait category.
    fn session_samples(&self, window: Duration) -> Result<SessionSampleCounts, SourceError>;

    /// Aborts whatever read is in flight. Called on shutdown.
    fn interrupt(&self) {}
}

/// The two background sampling jobs.
pub trait SampleRecorder: Send + Sync + 'static {
    fn collect_session_sample(&self) -> Result<(), SourceError>;
    fn take_counter_snapshot(&self) -> Result<(), SourceError>;

    /// Aborts a job still running at shutdown.
    fn interrupt(&self) {}
}

/// Destination of persistent settings.
pub trait SettingsSink: Send + Sync {
    /// Stores one setting so it survives reconnects and restarts.
    fn set_persistent(&self, name: &str, value: &str) -> Result<(), SourceError>;
    /// Signals the server to re-read its configuration.
    fn reload(&self) -> Result<(), SourceError>;
}

/// Connection state guarded by the source mutex.
#[derive(Default)]
struct Connection {
    client: Option<Client>,
    server_version_num: Option<i32>,
}

/// PostgreSQL-backed source.
///
/// Connects using `DATABASE_URL` or the standard libpq environment variables:
/// - PGHOST (default: localhost)
/// - PGPORT (default: 5432)
/// - PGUSER (default: $USER)
/// - PGPASSWORD (default: empty)
/// - PGDATABASE (default: same as PGUSER)
pub struct PgSource {
    connection_string: String,
    conn: Mutex<Connection>,
    /// Kept outside `conn` so a running query can be cancelled while the lock is held.
    cancel_token: Mutex<Option<CancelToken>>,
}

impl PgSource {
    /// Creates a source from environment variables.
    ///
    /// `DATABASE_URL` wins when set; otherwise uses $USER if PGUSER is not set.
    pub fn from_env() -> Result<Self, SourceError> {
        if let Ok(url) = std::env::var("DATABASE_URL")
            && !url.is_empty()
        {
            return Ok(Self::with_connection_string(url));
        }

        let user = std::env::var("PGUSER")
            .or_else(|_| std::env::var("USER"))
            .map_err(|_| SourceError::EnvNotSet("PGUSER or USER".to_string()))?;

        let host = std::env::var("PGHOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("PGPORT").unwrap_or_else(|_| "5432".to_string());
        let password = std::env::var("PGPASSWORD").unwrap_or_default();
        let database = std::env::var("PGDATABASE").unwrap_or_else(|_| user.clone());

        Ok(Self::with_connection_string(build_connection_string(
            &host, &port, &user, &password, &database,
        )))
    }

    /// Creates a source with explicit connection string (URL or key=value form).
    pub fn with_connection_string(connection_string: String) -> Self {
        Self {
            connection_string,
            conn: Mutex::new(Connection::default()),
            cancel_token: Mutex::new(None),
        }
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Attempts to connect, for startup checks.
    pub fn try_connect(&self) -> Result<(), SourceError> {
        let mut conn = lock(&self.conn);
        self.ensure_connected(&mut conn)
    }

    /// Ensures the connection is established, reconnecting if needed.
    fn ensure_connected(&self, conn: &mut Connection) -> Result<(), SourceError> {
        if conn.client.is_some() {
            return Ok(());
        }

        match Client::connect(&self.connection_string, NoTls) {
            Ok(mut client) => {
                // Determine server version once per (re)connect.
                conn.server_version_num = client
                    .query_one("SHOW server_version_num", &[])
                    .ok()
                    .and_then(|row| row.try_get::<_, String>(0).ok())
                    .and_then(|v| v.parse::<i32>().ok());
                debug!(server_version_num = ?conn.server_version_num, "connected to PostgreSQL");

                *lock(&self.cancel_token) = Some(client.cancel_token());
                conn.client = Some(client);
                Ok(())
            }
            Err(e) => {
                conn.server_version_num = None;
                Err(SourceError::Connection(format_postgres_error(&e)))
            }
        }
    }

    /// Runs `f` on a live connection.
    ///
    /// Server-side errors keep the connection; anything else (closed socket,
    /// protocol error) drops it so the next call reconnects.
    fn with_client<T>(
        &self,
        f: impl FnOnce(&mut Client, Option<i32>) -> Result<T, postgres::Error>,
    ) -> Result<T, SourceError> {
        let mut conn = lock(&self.conn);
        self.ensure_connected(&mut conn)?;

        let version = conn.server_version_num;
        let Some(client) = conn.client.as_mut() else {
            return Err(SourceError::Connection("not connected".to_string()));
        };

        f(client, version).map_err(|e| {
            let msg = format_postgres_error(&e);
            if e.as_db_error().is_none() {
                conn.client = None;
                conn.server_version_num = None;
                *lock(&self.cancel_token) = None;
            }
            SourceError::Query(msg)
        })
    }

    /// Sends a cancel request for the query currently running on this connection.
    pub fn cancel_running_query(&self) {
        let token = lock(&self.cancel_token).clone();
        if let Some(token) = token
            && let Err(e) = token.cancel_query(NoTls)
        {
            warn!(error = %format_postgres_error(&e), "failed to cancel running query");
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds a libpq key=value connection string, omitting an empty password.
fn build_connection_string(
    host: &str,
    port: &str,
    user: &str,
    password: &str,
    database: &str,
) -> String {
    if password.is_empty() {
        format!("host={host} port={port} user={user} dbname={database}")
    } else {
        format!("host={host} port={port} user={user} password={password} dbname={database}")
    }
}

/// Formats PostgreSQL error message for display.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else if msg.contains("does not exist") {
            msg.split("FATAL:")
                .last()
                .unwrap_or(&msg)
                .trim()
                .to_string()
        } else {
            msg
        }
    }
}
