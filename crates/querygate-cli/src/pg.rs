//! PostgreSQL execution engine and schema catalog over a `sqlx` pool.
//!
//! Every statement runs inside its own read-only transaction with a local
//! `statement_timeout`, and the transaction is always rolled back.

use async_trait::async_trait;
use querygate_pipeline::{EngineError, ExecutionEngine, ExecutionResult, Row, SchemaCatalog};
use querygate_sql::{ColumnDef, ExplainEstimate, ForeignKey, SchemaGraph, TableDef};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Column, Executor, Postgres, Transaction};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// Postgres `query_canceled`, raised when `statement_timeout` fires.
const SQLSTATE_QUERY_CANCELED: &str = "57014";

/// Slack on top of the server-side timeout before the client gives up.
const CLIENT_GRACE: Duration = Duration::from_secs(1);

const EXPLAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PostgresEngine {
    pool: PgPool,
}

fn map_err(err: sqlx::Error, timeout: Duration) -> EngineError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(SQLSTATE_QUERY_CANCELED) => {
            EngineError::Timeout {
                millis: timeout.as_millis() as u64,
            }
        }
        sqlx::Error::Database(db) => EngineError::Query(db.message().to_string()),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => EngineError::Connection(err.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            EngineError::Decode(err.to_string())
        }
        _ => EngineError::Query(err.to_string()),
    }
}

impl PostgresEngine {
    pub async fn connect(url: &str) -> Result<Self, EngineError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(|e| EngineError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn read_only_tx(
        &self,
        timeout: Duration,
    ) -> Result<Transaction<'static, Postgres>, EngineError> {
        let err = |e| map_err(e, timeout);
        let mut tx = self.pool.begin().await.map_err(err)?;
        (&mut *tx).execute("SET TRANSACTION READ ONLY").await.map_err(err)?;
        let set_timeout = format!("SET LOCAL statement_timeout = {}", timeout.as_millis());
        (&mut *tx).execute(set_timeout.as_str()).await.map_err(err)?;
        Ok(tx)
    }

    async fn run_in_tx(&self, sql: &str, timeout: Duration) -> Result<ExecutionResult, EngineError> {
        let err = |e| map_err(e, timeout);
        let mut tx = self.read_only_tx(timeout).await?;

        let described = (&mut *tx).describe(sql).await.map_err(err)?;
        let columns = unique_column_names(described.columns().iter().map(|c| c.name()));

        // row_to_json keeps projection order and maps every column type onto JSON.
        let wrapped = row_json_sql(sql, &columns);
        let fetched: Vec<(Json<Row>,)> = sqlx::query_as(&wrapped)
            .fetch_all(&mut *tx)
            .await
            .map_err(err)?;
        tx.rollback().await.map_err(err)?;

        Ok(ExecutionResult {
            columns,
            rows: fetched.into_iter().map(|(Json(row),)| row).collect(),
        })
    }

    async fn explain_in_tx(&self, sql: &str) -> Result<ExplainEstimate, EngineError> {
        let err = |e| map_err(e, EXPLAIN_TIMEOUT);
        let mut tx = self.read_only_tx(EXPLAIN_TIMEOUT).await?;
        let (Json(plan),): (Json<Value>,) = sqlx::query_as(&format!("EXPLAIN (FORMAT JSON) {sql}"))
            .fetch_one(&mut *tx)
            .await
            .map_err(err)?;
        tx.rollback().await.map_err(err)?;
        parse_explain(plan)
    }
}

/// Projection names with repeats renamed `name_2`, `name_3`, ... so every
/// column keeps its own key in the row object.
pub fn unique_column_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for name in names {
        let mut candidate = name.to_string();
        let mut n = 1;
        while !seen.insert(candidate.clone()) {
            n += 1;
            candidate = format!("{name}_{n}");
        }
        unique.push(candidate);
    }
    unique
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Wrap `sql` so each row comes back as one JSON object keyed by `columns`.
pub fn row_json_sql(sql: &str, columns: &[String]) -> String {
    if columns.is_empty() {
        return format!("SELECT row_to_json(q) FROM ({sql}) AS q");
    }
    let aliases: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    format!(
        "SELECT row_to_json(q) FROM ({sql}) AS q({})",
        aliases.join(", ")
    )
}

/// Read `Plan Rows` and `Total Cost` from the top plan node.
pub fn parse_explain(raw_plan: Value) -> Result<ExplainEstimate, EngineError> {
    let top = raw_plan
        .get(0)
        .and_then(|entry| entry.get("Plan"))
        .ok_or_else(|| EngineError::Decode("EXPLAIN output has no top-level Plan".to_string()))?;
    let rows = top.get("Plan Rows").and_then(Value::as_f64).unwrap_or(0.0);
    let cost = top.get("Total Cost").and_then(Value::as_f64).unwrap_or(0.0);
    Ok(ExplainEstimate {
        estimated_rows: rows.max(0.0).round() as u64,
        estimated_cost: cost,
        raw_plan,
    })
}

#[async_trait]
impl ExecutionEngine for PostgresEngine {
    async fn run(&self, sql: &str, timeout: Duration) -> Result<ExecutionResult, EngineError> {
        let millis = timeout.as_millis() as u64;
        match tokio::time::timeout(timeout + CLIENT_GRACE, self.run_in_tx(sql, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout { millis }),
        }
    }

    async fn explain(&self, sql: &str) -> Result<ExplainEstimate, EngineError> {
        self.explain_in_tx(sql).await
    }
}

const COLUMNS_SQL: &str = "
SELECT c.table_name::text, c.column_name::text, c.data_type::text,
       c.is_nullable = 'YES' AS nullable, c.column_default::text
FROM information_schema.columns c
JOIN information_schema.tables t
  ON t.table_schema = c.table_schema AND t.table_name = c.table_name
WHERE c.table_schema = $1
ORDER BY c.table_name, c.ordinal_position";

const PRIMARY_KEYS_SQL: &str = "
SELECT tc.table_name::text, kcu.column_name::text
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON kcu.constraint_name = tc.constraint_name
 AND kcu.table_schema = tc.table_schema
 AND kcu.table_name = tc.table_name
WHERE tc.table_schema = $1 AND tc.constraint_type = 'PRIMARY KEY'
ORDER BY tc.table_name, kcu.ordinal_position";

const FOREIGN_KEYS_SQL: &str = "
SELECT kcu.table_name::text, kcu.column_name::text,
       ccu.table_name::text, ccu.column_name::text
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON kcu.constraint_name = tc.constraint_name
 AND kcu.table_schema = tc.table_schema
JOIN information_schema.constraint_column_usage ccu
  ON ccu.constraint_name = tc.constraint_name
 AND ccu.constraint_schema = tc.table_schema
WHERE tc.constraint_type = 'FOREIGN KEY'
  AND tc.table_schema = $1 AND ccu.table_schema = $1
ORDER BY kcu.table_name, kcu.ordinal_position";

const COMMENTS_SQL: &str = "
SELECT c.relname::text, obj_description(c.oid, 'pg_class')
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1 AND c.relkind IN ('r', 'v', 'm', 'p', 'f')";

#[async_trait]
impl SchemaCatalog for PostgresEngine {
    async fn schema_graph(&self, schema: &str) -> Result<SchemaGraph, EngineError> {
        let err = |e| map_err(e, EXPLAIN_TIMEOUT);

        let columns: Vec<(String, String, String, bool, Option<String>)> =
            sqlx::query_as(COLUMNS_SQL)
                .bind(schema)
                .fetch_all(&self.pool)
                .await
                .map_err(err)?;
        let primary_keys: Vec<(String, String)> = sqlx::query_as(PRIMARY_KEYS_SQL)
            .bind(schema)
            .fetch_all(&self.pool)
            .await
            .map_err(err)?;
        let foreign_keys: Vec<(String, String, String, String)> = sqlx::query_as(FOREIGN_KEYS_SQL)
            .bind(schema)
            .fetch_all(&self.pool)
            .await
            .map_err(err)?;
        let comments: Vec<(String, Option<String>)> = sqlx::query_as(COMMENTS_SQL)
            .bind(schema)
            .fetch_all(&self.pool)
            .await
            .map_err(err)?;

        let mut tables: BTreeMap<String, TableDef> = BTreeMap::new();
        for (table, name, data_type, nullable, default) in columns {
            tables
                .entry(table.clone())
                .or_insert_with(|| TableDef {
                    name: table,
                    columns: Vec::new(),
                    primary_key: Vec::new(),
                    comment: None,
                })
                .columns
                .push(ColumnDef {
                    name,
                    data_type,
                    nullable,
                    default,
                });
        }
        for (table, column) in primary_keys {
            if let Some(def) = tables.get_mut(&table) {
                def.primary_key.push(column);
            }
        }
        for (table, comment) in comments {
            if let Some(def) = tables.get_mut(&table) {
                def.comment = comment.filter(|c| !c.trim().is_empty());
            }
        }

        let mut graph = SchemaGraph::new(schema);
        graph.tables = tables.into_values().collect();
        graph.foreign_keys = foreign_keys
            .into_iter()
            .map(
                |(child_table, child_column, parent_table, parent_column)| ForeignKey {
                    child_table,
                    child_column,
                    parent_table,
                    parent_column,
                },
            )
            .collect();
        tracing::debug!(
            schema,
            tables = graph.tables.len(),
            foreign_keys = graph.foreign_keys.len(),
            "loaded schema graph"
        );
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_explain_reads_top_node() {
        let plan = json!([{"Plan": {"Node Type": "Seq Scan", "Plan Rows": 1234, "Total Cost": 56.5}}]);
        let estimate = parse_explain(plan).unwrap();
        assert_eq!(estimate.estimated_rows, 1234);
        assert_eq!(estimate.estimated_cost, 56.5);
    }

    #[test]
    fn test_duplicate_projection_names_get_suffixes() {
        let columns = unique_column_names(["id", "id", "name", "id_2", "id"]);
        assert_eq!(columns, vec!["id", "id_2", "name", "id_2_2", "id_3"]);
    }

    #[test]
    fn test_row_json_sql_aliases_every_column() {
        let columns = unique_column_names(["id", "id", "say \"hi\""]);
        assert_eq!(
            row_json_sql("SELECT o.id, c.id, 1 FROM public.orders o", &columns),
            "SELECT row_to_json(q) FROM (SELECT o.id, c.id, 1 FROM public.orders o) \
             AS q(\"id\", \"id_2\", \"say \"\"hi\"\"\")"
        );
    }

    #[test]
    fn test_parse_explain_rejects_unexpected_shape() {
        assert!(matches!(
            parse_explain(json!({"Plan": {}})),
            Err(EngineError::Decode(_))
        ));
    }
}
