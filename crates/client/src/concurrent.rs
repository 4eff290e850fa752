//! Independent queries run side by side.

use futures_util::future::join_all;
use lazydb_core::{ConnectionScope, Error, Query, Row};

/// Run every query in its own scope at the same time.
///
/// Results come back in the order the queries were given. Every query runs to
/// completion and exits its scope before anything is returned; the first
/// failure in input order is then reported.
///
/// # Errors
///
/// Returns `Error::InvalidArgument` before anything runs if any query has no
/// SQL text.
pub async fn fetch_concurrently(scope: &ConnectionScope, queries: Vec<Query>) -> Result<Vec<Vec<Row>>, Error> {
    for query in &queries {
        query.validate()?;
    }

    tracing::debug!(queries = queries.len(), "starting concurrent fetch");

    let fetches = queries.into_iter().map(|query| {
        let scope = scope.clone();
        async move {
            scope
                .run(|handle| async move { handle.query(&query).await })
                .await
        }
    });

    let results = join_all(fetches).await;
    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        tracing::warn!(failed, total = results.len(), "concurrent fetch had failures");
    }
    results.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazydb_core::Value;

    async fn seeded() -> (tempfile::TempDir, ConnectionScope) {
        let dir = tempfile::tempdir().unwrap();
        let scope = ConnectionScope::new(dir.path().join("concurrent.db"));
        scope
            .run(|h| async move {
                h.execute_script(
                    "CREATE TABLE people (name TEXT NOT NULL, age INTEGER NOT NULL);
                     INSERT INTO people VALUES ('a', 20), ('b', 45), ('c', 61), ('d', 33);",
                )
                .await
            })
            .await
            .unwrap();
        (dir, scope)
    }

    fn names(rows: &[Row]) -> Vec<String> {
        rows.iter()
            .filter_map(|r| r.get("name").and_then(Value::as_str).map(String::from))
            .collect()
    }

    #[tokio::test]
    async fn test_results_follow_input_order() {
        let (_dir, scope) = seeded().await;
        let queries = vec![
            Query::new("SELECT name FROM people WHERE age > ? ORDER BY name").bind(40),
            Query::new("SELECT name FROM people WHERE age < ? ORDER BY name").bind(30),
            Query::new("SELECT name FROM people ORDER BY name"),
        ];

        let results = fetch_concurrently(&scope.read_only(), queries).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(names(&results[0]), vec!["b", "c"]);
        assert_eq!(names(&results[1]), vec!["a"]);
        assert_eq!(names(&results[2]), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_one_scope_per_query() {
        let (_dir, scope) = seeded().await;
        let before = scope.metrics();
        let queries = (0..4).map(|_| Query::new("SELECT 1")).collect();
        fetch_concurrently(&scope, queries).await.unwrap();
        let after = scope.metrics();
        assert_eq!(after.opened - before.opened, 4);
        assert_eq!(after.closed - before.closed, 4);
    }

    #[tokio::test]
    async fn test_failure_is_reported() {
        let (_dir, scope) = seeded().await;
        let queries = vec![Query::new("SELECT name FROM people"), Query::new("SELECT * FROM nowhere")];
        let err = fetch_concurrently(&scope, queries).await.unwrap_err();
        assert!(matches!(err, Error::Query(_)));
    }

    #[tokio::test]
    async fn test_failure_waits_for_sibling_scopes() {
        let (_dir, scope) = seeded().await;
        let before = scope.metrics();
        let queries = vec![
            Query::new(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 200000) \
                 SELECT COUNT(*) AS n FROM c",
            ),
            Query::new("SELECT * FROM nowhere"),
        ];

        let err = fetch_concurrently(&scope, queries).await.unwrap_err();
        assert!(matches!(err, Error::Query(_)));

        let after = scope.metrics();
        assert_eq!(after.opened - before.opened, 2);
        assert_eq!(after.closed - before.closed, 2);
        assert_eq!(after.rolled_back - before.rolled_back, 1);
    }

    #[tokio::test]
    async fn test_blank_query_rejected_up_front() {
        let (_dir, scope) = seeded().await;
        let before = scope.metrics();
        let err = fetch_concurrently(&scope, vec![Query::new("SELECT 1"), Query::new("")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(scope.metrics().opened, before.opened);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let (_dir, scope) = seeded().await;
        let results = fetch_concurrently(&scope, Vec::new()).await.unwrap();
        assert!(results.is_empty());
    }
}
