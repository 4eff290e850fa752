//! Operations on a live connection.

use std::sync::Arc;

use tokio_rusqlite::{Connection, rusqlite};

use super::value::{Query, Row, Value};
use crate::Error;

/// A live SQLite session handed out by a [`ConnectionScope`](super::ConnectionScope).
///
/// Every operation runs on the connection's background thread. Clones refer to
/// the same session; once the owning scope exits, calls on any clone fail with
/// a connectivity error.
#[derive(Clone, Debug)]
pub struct Handle {
    pub(crate) conn: Connection,
    target: Arc<str>,
}

impl Handle {
    pub(crate) fn new(conn: Connection, target: Arc<str>) -> Self {
        Self { conn, target }
    }

    /// Path of the database this handle is connected to.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Run a closure against the raw rusqlite connection.
    pub async fn call<T, F>(&self, work: F) -> Result<T, Error>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        self.conn.call(work).await.map_err(Error::from)
    }

    /// Execute a query and collect every row.
    pub async fn query(&self, query: &Query) -> Result<Vec<Row>, Error> {
        query.validate()?;
        let query = query.clone();
        self.call(move |conn| -> Result<Vec<Row>, Error> {
            let mut stmt = conn.prepare(&query.sql)?;
            let columns = column_names(&stmt);
            let mut rows = stmt.query(rusqlite::params_from_iter(query.params.iter()))?;

            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(Row::from_sqlite(row, &columns)?);
            }
            Ok(out)
        })
        .await
    }

    /// Execute a query and return its first row, if any.
    pub async fn query_row(&self, query: &Query) -> Result<Option<Row>, Error> {
        query.validate()?;
        let query = query.clone();
        self.call(move |conn| -> Result<Option<Row>, Error> {
            let mut stmt = conn.prepare(&query.sql)?;
            let columns = column_names(&stmt);
            let mut rows = stmt.query(rusqlite::params_from_iter(query.params.iter()))?;

            match rows.next()? {
                Some(row) => Ok(Some(Row::from_sqlite(row, &columns)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Execute an INSERT, UPDATE or DELETE and return the affected row count.
    pub async fn execute(&self, query: &Query) -> Result<usize, Error> {
        query.validate()?;
        let query = query.clone();
        self.call(move |conn| -> Result<usize, Error> {
            let affected = conn.execute(&query.sql, rusqlite::params_from_iter(query.params.iter()))?;
            Ok(affected)
        })
        .await
    }

    /// Execute one statement once per parameter set.
    ///
    /// Returns the total number of affected rows.
    pub async fn execute_many(&self, sql: &str, param_sets: Vec<Vec<Value>>) -> Result<usize, Error> {
        Query::new(sql).validate()?;
        let sql = sql.to_string();
        self.call(move |conn| -> Result<usize, Error> {
            let mut stmt = conn.prepare(&sql)?;
            let mut total = 0;
            for params in &param_sets {
                total += stmt.execute(rusqlite::params_from_iter(params.iter()))?;
            }
            Ok(total)
        })
        .await
    }

    /// Execute a batch of semicolon-separated statements.
    pub async fn execute_script(&self, script: &str) -> Result<(), Error> {
        let script = script.to_string();
        self.call(move |conn| -> Result<(), Error> {
            conn.execute_batch(&script)?;
            Ok(())
        })
        .await
    }

    /// Column names a query would produce, without stepping it.
    pub async fn column_names(&self, sql: &str) -> Result<Vec<String>, Error> {
        Query::new(sql).validate()?;
        let sql = sql.to_string();
        self.call(move |conn| -> Result<Vec<String>, Error> {
            let stmt = conn.prepare(&sql)?;
            Ok(column_names(&stmt).to_vec())
        })
        .await
    }

    /// `PRAGMA table_info` rows for a table.
    pub async fn table_info(&self, table: &str) -> Result<Vec<Row>, Error> {
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::InvalidArgument(format!("invalid table name: {table:?}")));
        }
        self.query(&Query::new(format!("PRAGMA table_info({table})")))
            .await
    }
}

/// Column names of a prepared statement, shared by every row it yields.
pub fn column_names(stmt: &rusqlite::Statement<'_>) -> Arc<[String]> {
    stmt.column_names().into_iter().map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::super::ConnectionScope;
    use super::*;

    async fn scratch_scope() -> (tempfile::TempDir, ConnectionScope) {
        let dir = tempfile::tempdir().unwrap();
        let scope = ConnectionScope::new(dir.path().join("handle.db"));
        scope
            .run(|h| async move {
                h.execute_script("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER);")
                    .await
            })
            .await
            .unwrap();
        (dir, scope)
    }

    #[tokio::test]
    async fn test_execute_many_and_query() {
        let (_dir, scope) = scratch_scope().await;
        let rows = scope
            .run(|h| async move {
                let inserted = h
                    .execute_many(
                        "INSERT INTO users (name, age) VALUES (?1, ?2)",
                        vec![vec!["Ada".into(), 36.into()], vec!["Linus".into(), 54.into()]],
                    )
                    .await?;
                assert_eq!(inserted, 2);
                h.query(&Query::new("SELECT name, age FROM users WHERE age > ?").bind(40))
                    .await
            })
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name").and_then(Value::as_str), Some("Linus"));
    }

    #[tokio::test]
    async fn test_query_row_none_on_empty() {
        let (_dir, scope) = scratch_scope().await;
        let row = scope
            .run(|h| async move { h.query_row(&Query::new("SELECT * FROM users")).await })
            .await
            .unwrap();
        assert!(row.is_none());
    }

    #[tokio::test]
    async fn test_execute_returns_affected_rows() {
        let (_dir, scope) = scratch_scope().await;
        let affected = scope
            .run(|h| async move {
                h.execute(&Query::new("INSERT INTO users (name, age) VALUES ('a', 1), ('b', 2)"))
                    .await?;
                h.execute(&Query::new("UPDATE users SET age = age + 1")).await
            })
            .await
            .unwrap();
        assert_eq!(affected, 2);
    }

    #[tokio::test]
    async fn test_column_names_and_table_info() {
        let (_dir, scope) = scratch_scope().await;
        let (names, info) = scope
            .run(|h| async move {
                let names = h.column_names("SELECT id, name FROM users").await?;
                let info = h.table_info("users").await?;
                Ok((names, info))
            })
            .await
            .unwrap();

        assert_eq!(names, vec!["id".to_string(), "name".to_string()]);
        assert_eq!(info.len(), 3);
        assert_eq!(info[1].get("name").and_then(Value::as_str), Some("name"));
    }

    #[tokio::test]
    async fn test_malformed_sql_is_query_error() {
        let (_dir, scope) = scratch_scope().await;
        let err = scope
            .run(|h| async move { h.query(&Query::new("SELEC nonsense")).await })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Query(_)));
    }

    #[tokio::test]
    async fn test_table_info_rejects_bad_name() {
        let (_dir, scope) = scratch_scope().await;
        let err = scope
            .run(|h| async move { h.table_info("users; DROP TABLE users").await })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
