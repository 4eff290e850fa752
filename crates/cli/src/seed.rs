//! Loading `user_data` from CSV.

use std::io::Read;
use std::path::Path;

use lazydb_core::db::migrations;
use lazydb_core::{ConnectionScope, Query, Value};
use serde::Deserialize;
use thiserror::Error;

/// Rows per `INSERT OR IGNORE` batch.
const INSERT_CHUNK: usize = 100;

/// Columns a seed file must name in its header.
const COLUMNS: [&str; 4] = ["user_id", "name", "email", "age"];

const INSERT_SQL: &str = "INSERT OR IGNORE INTO user_data (user_id, name, email, age) VALUES (?1, ?2, ?3, ?4)";

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV header has no {0:?} column")]
    MissingColumn(&'static str),

    #[error("line {line}: invalid age {value:?}")]
    InvalidAge { line: usize, value: String },

    #[error(transparent)]
    Database(#[from] lazydb_core::Error),
}

/// One CSV record as written in the file.
#[derive(Debug, Deserialize)]
struct UserRecord {
    #[serde(default)]
    user_id: String,
    name: String,
    email: String,
    #[serde(default)]
    age: String,
}

/// A user ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub age: f64,
}

impl User {
    fn into_params(self) -> Vec<Value> {
        vec![self.user_id.into(), self.name.into(), self.email.into(), self.age.into()]
    }
}

/// What a seed run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    /// Migrations applied before loading.
    pub migrations: usize,
    /// Rows inserted; `None` when the table already held data.
    pub inserted: Option<usize>,
}

/// Parse users from CSV with a `user_id,name,email,age` header.
///
/// A blank `user_id` gets a fresh UUID v4 and a blank age becomes 0. Rows with
/// fewer than four fields are skipped.
pub fn read_users<R: Read>(reader: R) -> Result<Vec<User>, SeedError> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).flexible(true).from_reader(reader);

    let headers = csv.headers()?.clone();
    if let Some(missing) = COLUMNS.into_iter().find(|column| !headers.iter().any(|h| h == *column)) {
        return Err(SeedError::MissingColumn(missing));
    }

    let mut users = Vec::new();
    for (idx, record) in csv.records().enumerate() {
        let record = record?;
        // Header is line 1.
        let line = record.position().map_or(idx + 2, |pos| pos.line() as usize);
        if record.len() < COLUMNS.len() {
            tracing::warn!(line, fields = record.len(), "skipping short CSV row");
            continue;
        }
        let record: UserRecord = record.deserialize(Some(&headers))?;

        let age = if record.age.is_empty() {
            0.0
        } else {
            record
                .age
                .parse::<f64>()
                .map_err(|_| SeedError::InvalidAge { line, value: record.age.clone() })?
        };
        let user_id = if record.user_id.is_empty() { uuid::Uuid::new_v4().to_string() } else { record.user_id };

        users.push(User { user_id, name: record.name, email: record.email, age });
    }
    Ok(users)
}

/// Migrate the database and load `path` into an empty `user_data` table.
pub async fn seed_file(scope: &ConnectionScope, path: &Path) -> Result<SeedReport, SeedError> {
    let file = std::fs::File::open(path).map_err(csv::Error::from)?;
    let users = read_users(file)?;
    seed_users(scope, users).await
}

/// Migrate the database and insert `users` unless the table already has rows.
pub async fn seed_users(scope: &ConnectionScope, users: Vec<User>) -> Result<SeedReport, SeedError> {
    let report = scope
        .run(|handle| async move {
            let migrations = migrations::run(&handle).await?;

            let existing = handle
                .query_row(&Query::new("SELECT COUNT(*) FROM user_data"))
                .await?
                .and_then(|row| row.get_index(0).and_then(Value::as_i64))
                .unwrap_or(0);
            if existing > 0 {
                tracing::info!(existing, "user_data already populated");
                return Ok(SeedReport { migrations, inserted: None });
            }

            let mut inserted = 0;
            let mut users = users.into_iter().peekable();
            while users.peek().is_some() {
                let chunk: Vec<Vec<Value>> = users.by_ref().take(INSERT_CHUNK).map(User::into_params).collect();
                inserted += handle.execute_many(INSERT_SQL, chunk).await?;
            }

            tracing::info!(inserted, "seeded user_data");
            Ok(SeedReport { migrations, inserted: Some(inserted) })
        })
        .await?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "user_id,name,email,age\n\
        a1,Ada,ada@example.com,30\n\
        ,Bob,bob@example.com,22\n\
        c3,Cy,cy@example.com,\n";

    #[test]
    fn test_read_users_fills_blanks() {
        let users = read_users(CSV.as_bytes()).unwrap();
        assert_eq!(users.len(), 3);
        assert_eq!(users[0], User { user_id: "a1".into(), name: "Ada".into(), email: "ada@example.com".into(), age: 30.0 });
        assert_eq!(users[1].user_id.len(), 36);
        assert!(uuid::Uuid::parse_str(&users[1].user_id).is_ok());
        assert_eq!(users[2].age, 0.0);
    }

    #[test]
    fn test_read_users_rejects_bad_age() {
        let err = read_users("user_id,name,email,age\nx,X,x@example.com,old\n".as_bytes()).unwrap_err();
        assert!(matches!(err, SeedError::InvalidAge { line: 2, .. }));
    }

    #[test]
    fn test_read_users_requires_columns() {
        let err = read_users("user_id,name\nx,X\n".as_bytes()).unwrap_err();
        assert!(matches!(err, SeedError::MissingColumn("email")));
    }

    #[test]
    fn test_read_users_skips_short_rows() {
        let csv = "user_id,name,email,age\n\
            a1,Ada,ada@example.com,30\n\
            b2,Bob\n\
            c3,Cy,cy@example.com,41\n";
        let users = read_users(csv.as_bytes()).unwrap();
        let ids: Vec<&str> = users.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "c3"]);
    }

    #[tokio::test]
    async fn test_seed_only_into_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let scope = ConnectionScope::new(dir.path().join("seed.db"));

        let first = seed_users(&scope, read_users(CSV.as_bytes()).unwrap()).await.unwrap();
        assert_eq!(first, SeedReport { migrations: 1, inserted: Some(3) });

        let second = seed_users(&scope, read_users(CSV.as_bytes()).unwrap()).await.unwrap();
        assert_eq!(second, SeedReport { migrations: 0, inserted: None });
    }

    #[tokio::test]
    async fn test_seed_in_chunks_ignores_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let scope = ConnectionScope::new(dir.path().join("chunks.db"));

        let mut users: Vec<User> = (0..250)
            .map(|i| User { user_id: format!("u{i}"), name: format!("n{i}"), email: format!("{i}@example.com"), age: 20.0 })
            .collect();
        users.push(users[0].clone());

        let report = seed_users(&scope, users).await.unwrap();
        assert_eq!(report.inserted, Some(250));
    }
}
