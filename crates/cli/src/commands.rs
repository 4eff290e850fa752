//! Subcommand implementations.
//!
//! Every command writes its results to `out`; logs go to stderr.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use futures_util::{StreamExt, TryStreamExt};
use lazydb_client::{
    Operation, OperationExt, QueryCache, QueryOperation, RetryPolicy, RowStream, RowStreamer, fetch_concurrently,
    paginate,
};
use lazydb_core::{AppConfig, ConnectionScope, Query, Row, Value};

use crate::seed;

const ALL_USERS: &str = "SELECT * FROM user_data";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the schema and load users from a CSV file
    Seed {
        /// CSV with a user_id,name,email,age header
        csv: PathBuf,
    },
    /// Stream users one at a time as JSON lines
    Stream {
        /// Stop after this many users
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Stream users in batches and print those older than --min-age
    Batches {
        /// Rows per batch (defaults to the configured batch_size)
        #[arg(long)]
        size: Option<usize>,
        #[arg(long, default_value_t = 25.0)]
        min_age: f64,
    },
    /// Print users page by page
    Paginate {
        /// Rows per page (defaults to the configured page_size)
        #[arg(long)]
        page_size: Option<usize>,
    },
    /// Print the average user age, computed from a row stream
    AverageAge,
    /// Fetch all users and users older than --min-age at the same time
    Concurrent {
        #[arg(long, default_value_t = 40.0)]
        min_age: f64,
    },
    /// Run a read-only query through the logging, retry and cache wrappers
    Query {
        /// SQL text
        sql: String,
        /// Times to run the query
        #[arg(long, default_value_t = 1)]
        repeat: usize,
    },
}

pub async fn run(command: Command, config: &AppConfig, out: &mut impl Write) -> Result<()> {
    let scope = ConnectionScope::from_config(config);
    match command {
        Command::Seed { csv } => seed_users(&scope, &csv, out).await,
        Command::Stream { limit } => stream_users(config, &scope, limit, out).await,
        Command::Batches { size, min_age } => {
            batch_processing(&scope, size.unwrap_or(config.batch_size), min_age, out).await
        }
        Command::Paginate { page_size } => {
            lazy_paginate(&scope, page_size.unwrap_or(config.page_size), out).await
        }
        Command::AverageAge => average_age(config, &scope, out).await,
        Command::Concurrent { min_age } => concurrent(&scope, min_age, out).await,
        Command::Query { sql, repeat } => cached_query(config, &scope, sql, repeat, out).await,
    }
}

async fn seed_users(scope: &ConnectionScope, csv: &Path, out: &mut impl Write) -> Result<()> {
    let report = seed::seed_file(scope, csv)
        .await
        .with_context(|| format!("seeding from {}", csv.display()))?;

    if report.migrations > 0 {
        writeln!(out, "Table user_data created successfully")?;
    }
    match report.inserted {
        Some(n) => writeln!(out, "Data inserted successfully ({n} rows)")?,
        None => writeln!(out, "Data already exists in user_data table.")?,
    }
    Ok(())
}

fn streamer(config: &AppConfig, scope: &ConnectionScope) -> RowStreamer {
    RowStreamer::new(scope.read_only()).with_fetch_size(config.fetch_size)
}

async fn stream_users(
    config: &AppConfig, scope: &ConnectionScope, limit: Option<usize>, out: &mut impl Write,
) -> Result<()> {
    let rows = streamer(config, scope).stream(Query::new(ALL_USERS))?;
    let mut rows = match limit {
        Some(n) => rows.take(n).boxed(),
        None => rows,
    };

    while let Some(row) = rows.try_next().await? {
        writeln!(out, "{}", serde_json::to_string(&row)?)?;
    }
    Ok(())
}

fn age_of(row: &Row) -> Option<f64> {
    row.get("age").and_then(Value::as_f64)
}

async fn batch_processing(scope: &ConnectionScope, size: usize, min_age: f64, out: &mut impl Write) -> Result<()> {
    let mut batches = RowStreamer::new(scope.read_only()).stream_batches(Query::new(ALL_USERS), size)?;

    while let Some(batch) = batches.try_next().await? {
        for row in batch.iter().filter(|row| age_of(row).is_some_and(|age| age > min_age)) {
            writeln!(out, "{}", serde_json::to_string(row)?)?;
        }
    }
    Ok(())
}

async fn lazy_paginate(scope: &ConnectionScope, page_size: usize, out: &mut impl Write) -> Result<()> {
    let mut pages = paginate(scope.read_only(), Query::new(format!("{ALL_USERS} ORDER BY rowid")), page_size)?;

    while let Some(page) = pages.try_next().await? {
        writeln!(out, "{}", serde_json::to_string(&page)?)?;
    }
    Ok(())
}

/// Mean of the `age` column over a row stream; `None` when there are no rows.
async fn mean_age(mut rows: RowStream) -> Result<Option<f64>> {
    let mut total = 0.0;
    let mut count = 0u64;
    while let Some(row) = rows.try_next().await? {
        let Some(age) = age_of(&row) else {
            bail!("non-numeric age in row {}", serde_json::to_string(&row)?);
        };
        total += age;
        count += 1;
    }
    Ok((count > 0).then(|| total / count as f64))
}

async fn average_age(config: &AppConfig, scope: &ConnectionScope, out: &mut impl Write) -> Result<()> {
    let ages = streamer(config, scope).stream(Query::new("SELECT age FROM user_data"))?;
    match mean_age(ages).await? {
        Some(average) => writeln!(out, "Average age of users: {average:.2}")?,
        None => writeln!(out, "No users found.")?,
    }
    Ok(())
}

async fn concurrent(scope: &ConnectionScope, min_age: f64, out: &mut impl Write) -> Result<()> {
    let queries = vec![
        Query::new(ALL_USERS),
        Query::new("SELECT * FROM user_data WHERE age > ?").bind(min_age),
    ];
    let mut results = fetch_concurrently(&scope.read_only(), queries).await?.into_iter();
    let all_users = results.next().unwrap_or_default();
    let older_users = results.next().unwrap_or_default();

    let report = serde_json::json!({
        "all_users": all_users,
        "older_users": older_users,
        "min_age": min_age,
    });
    writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
    Ok(())
}

async fn cached_query(
    config: &AppConfig, scope: &ConnectionScope, sql: String, repeat: usize, out: &mut impl Write,
) -> Result<()> {
    if repeat == 0 {
        bail!("--repeat must be at least 1");
    }

    let cache = QueryCache::from_settings(&config.cache)?;
    let op = QueryOperation::new("query", scope.read_only())
        .logged(true)
        .with_count(Vec::len)
        .with_retry(RetryPolicy::from(&config.retry))
        .with_cache(cache.clone());

    let query = Query::new(sql);
    let mut rows = Vec::new();
    for _ in 0..repeat {
        rows = op.call(query.clone()).await?;
    }

    for row in &rows {
        writeln!(out, "{}", serde_json::to_string(row)?)?;
    }
    writeln!(out, "{}", serde_json::json!({ "cache": cache.stats() }))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERS: &str = "user_id,name,email,age\n\
        u1,Ada,ada@example.com,30\n\
        u2,Bob,bob@example.com,22\n\
        u3,Cy,cy@example.com,35\n\
        u4,Di,di@example.com,28\n\
        u5,Ed,ed@example.com,19\n";

    async fn seeded_config() -> (tempfile::TempDir, AppConfig) {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("users.csv");
        std::fs::write(&csv, USERS).unwrap();

        let config = AppConfig { db_path: dir.path().join("users.db"), ..Default::default() };
        let mut out = Vec::new();
        run(Command::Seed { csv }, &config, &mut out).await.unwrap();
        (dir, config)
    }

    async fn output(command: Command, config: &AppConfig) -> String {
        let mut out = Vec::new();
        run(command, config, &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_seed_reports_once() {
        let (dir, config) = seeded_config().await;
        let again = output(Command::Seed { csv: dir.path().join("users.csv") }, &config).await;
        assert_eq!(again, "Data already exists in user_data table.\n");
    }

    #[tokio::test]
    async fn test_average_age() {
        let (_dir, config) = seeded_config().await;
        let text = output(Command::AverageAge, &config).await;
        assert_eq!(text, "Average age of users: 26.80\n");
    }

    #[tokio::test]
    async fn test_average_age_empty_table() {
        let (_dir, config) = seeded_config().await;
        ConnectionScope::from_config(&config)
            .run(|h| async move { h.execute(&Query::new("DELETE FROM user_data")).await })
            .await
            .unwrap();
        let text = output(Command::AverageAge, &config).await;
        assert_eq!(text, "No users found.\n");
    }

    #[tokio::test]
    async fn test_batches_filter_by_age() {
        let (_dir, config) = seeded_config().await;
        let text = output(Command::Batches { size: Some(2), min_age: 25.0 }, &config).await;
        let names: Vec<String> = text
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names.len(), 3);
        for name in ["Ada", "Cy", "Di"] {
            assert!(names.iter().any(|n| n == name), "missing {name}");
        }
    }

    #[tokio::test]
    async fn test_stream_limit() {
        let (_dir, config) = seeded_config().await;
        let text = output(Command::Stream { limit: Some(2) }, &config).await;
        assert_eq!(text.lines().count(), 2);
        let all = output(Command::Stream { limit: None }, &config).await;
        assert_eq!(all.lines().count(), 5);
    }

    #[tokio::test]
    async fn test_paginate_prints_each_page() {
        let (_dir, config) = seeded_config().await;
        let text = output(Command::Paginate { page_size: Some(2) }, &config).await;
        let sizes: Vec<usize> = text
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["rows"].as_array().unwrap().len())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_concurrent_report() {
        let (_dir, config) = seeded_config().await;
        let text = output(Command::Concurrent { min_age: 29.0 }, &config).await;
        let report: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(report["all_users"].as_array().unwrap().len(), 5);
        assert_eq!(report["older_users"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_query_repeat_hits_cache() {
        let (_dir, config) = seeded_config().await;
        let text = output(
            Command::Query { sql: "SELECT name FROM user_data WHERE age < 20".into(), repeat: 3 },
            &config,
        )
        .await;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"name":"Ed"}"#);
        let stats: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(stats["cache"]["hits"], 2);
        assert_eq!(stats["cache"]["misses"], 1);
    }

    #[tokio::test]
    async fn test_query_rejects_writes() {
        let (_dir, config) = seeded_config().await;
        let config = AppConfig {
            retry: lazydb_core::config::RetrySettings { retries: 0, ..Default::default() },
            ..config
        };
        let mut out = Vec::new();
        let result = run(Command::Query { sql: "DELETE FROM user_data".into(), repeat: 1 }, &config, &mut out).await;
        assert!(result.is_err());
    }
}
