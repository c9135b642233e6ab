//! Database collaborators.
//!
//! [`ExecutionEngine`] runs and explains SQL; [`SchemaCatalog`] exposes
//! table/foreign-key metadata. The CLI provides a PostgreSQL implementation
//! of both.

use async_trait::async_trait;
use querygate_sql::{ExplainEstimate, ForeignKey, SchemaGraph, TableDef};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One result row: column name to JSON value, in projection order.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl ExecutionResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// First `n` rows, for prompts and previews.
    pub fn head(&self, n: usize) -> &[Row] {
        &self.rows[..n.min(self.rows.len())]
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("query failed: {0}")]
    Query(String),
    #[error("statement timed out after {millis}ms")]
    Timeout { millis: u64 },
    #[error("connection error: {0}")]
    Connection(String),
    #[error("could not decode result: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Run a read-only statement with a per-statement timeout.
    async fn run(&self, sql: &str, timeout: Duration) -> Result<ExecutionResult, EngineError>;

    /// Planner estimate for `sql` without executing it.
    async fn explain(&self, sql: &str) -> Result<ExplainEstimate, EngineError>;
}

/// A table with the foreign keys leaving it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescription {
    pub schema: String,
    #[serde(flatten)]
    pub table: TableDef,
    pub foreign_keys: Vec<ForeignKey>,
}

#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    /// Current tables, columns, keys and comments of `schema`.
    async fn schema_graph(&self, schema: &str) -> Result<SchemaGraph, EngineError>;

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, EngineError> {
        let graph = self.schema_graph(schema).await?;
        let mut names: Vec<String> = graph.table_names().map(str::to_string).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn describe_table(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<TableDescription, EngineError> {
        let graph = self.schema_graph(schema).await?;
        let def = graph
            .table(table)
            .cloned()
            .ok_or_else(|| EngineError::Query(format!("no table {schema}.{table}")))?;
        let foreign_keys = graph.foreign_keys_of(table).cloned().collect();
        Ok(TableDescription {
            schema: schema.to_string(),
            table: def,
            foreign_keys,
        })
    }
}
