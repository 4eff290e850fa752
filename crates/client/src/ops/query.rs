//! Operations that run one statement in a fresh scope.

use lazydb_core::{ConnectionScope, Error, Query, Row};

use super::Operation;

/// Runs a query in its own scope and collects every row.
#[derive(Clone, Debug)]
pub struct QueryOperation {
    name: String,
    scope: ConnectionScope,
}

impl QueryOperation {
    pub fn new(name: impl Into<String>, scope: ConnectionScope) -> Self {
        Self { name: name.into(), scope }
    }
}

#[async_trait::async_trait]
impl Operation for QueryOperation {
    type Input = Query;
    type Output = Vec<Row>;

    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, query: Query) -> Result<Vec<Row>, Error> {
        self.scope
            .run(|handle| async move { handle.query(&query).await })
            .await
    }
}

/// Runs a write statement in its own scope and returns the affected row count.
#[derive(Clone, Debug)]
pub struct ExecuteOperation {
    name: String,
    scope: ConnectionScope,
}

impl ExecuteOperation {
    pub fn new(name: impl Into<String>, scope: ConnectionScope) -> Self {
        Self { name: name.into(), scope }
    }
}

#[async_trait::async_trait]
impl Operation for ExecuteOperation {
    type Input = Query;
    type Output = usize;

    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, query: Query) -> Result<usize, Error> {
        self.scope
            .run(|handle| async move { handle.execute(&query).await })
            .await
    }
}
