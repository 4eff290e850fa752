//! Database schema migrations.
//!
//! Uses a simple version table approach to track applied migrations.
//! Each migration is a SQL batch that transforms the schema.

use std::num::ParseIntError;

use tokio_rusqlite::params;

use super::Handle;
use crate::Error;

/// Migration list: (version, SQL).
///
/// Applied in order; the version is an incrementing integer recorded in
/// `_migrations`. All migrations are idempotent using CREATE IF NOT EXISTS.
const MIGRATIONS: &[(&str, &str)] = &[("1", include_str!("../../migrations/001_user_data.sql"))];

/// Run any pending migrations on an open handle.
///
/// The caller's scope decides whether the migration batch is committed.
///
/// # Errors
///
/// Returns an error if a migration SQL fails to execute.
pub async fn run(handle: &Handle) -> Result<usize, Error> {
    handle
        .call(|conn| -> Result<usize, Error> {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS _migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                )",
                [],
            )?;

            let current: i64 =
                conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;

            let mut applied = 0;
            for (version, sql) in MIGRATIONS {
                let version_num: i64 = version
                    .parse()
                    .map_err(|e: ParseIntError| Error::MigrationFailed(e.to_string()))?;
                if version_num > current {
                    conn.execute_batch(sql)
                        .map_err(|e| Error::MigrationFailed(format!("version {version_num}: {e}")))?;
                    conn.execute(
                        "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                        params![version_num, chrono::Utc::now().to_rfc3339()],
                    )?;
                    applied += 1;
                }
            }

            if applied > 0 {
                tracing::info!(applied, from_version = current, "applied migrations");
            }
            Ok(applied)
        })
        .await
}
