//! Schema and metric card ingestion into the similarity index.

use crate::engine::{EngineError, ExecutionEngine, SchemaCatalog, TableDescription};
use querygate_index::{IndexError, SimilarityIndex};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("schema {schema:?} is not in the allow-list {allowed:?}")]
    SchemaNotAllowed {
        schema: String,
        allowed: Vec<String>,
    },
    #[error("no schemas given")]
    NoSchemas,
    #[error("catalog lookup failed for schema {schema}: {source}")]
    Catalog {
        schema: String,
        #[source]
        source: EngineError,
    },
    #[error("could not read metrics file {path}: {message}")]
    Metrics { path: PathBuf, message: String },
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// One entry of the metrics file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricDef {
    pub name: String,
    #[serde(default)]
    pub definition: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub grain: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MetricsFile {
    Wrapped { metrics: Vec<MetricDef> },
    List(Vec<MetricDef>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub tables: usize,
    pub metrics: usize,
    /// Cards actually added to the index.
    pub inserted: usize,
}

pub struct SchemaIngestor {
    catalog: Arc<dyn SchemaCatalog>,
    engine: Arc<dyn ExecutionEngine>,
    index: Arc<SimilarityIndex>,
    allowed_schemas: Vec<String>,
    row_cap: u64,
    sample_timeout: Duration,
}

impl SchemaIngestor {
    pub fn new(
        catalog: Arc<dyn SchemaCatalog>,
        engine: Arc<dyn ExecutionEngine>,
        index: Arc<SimilarityIndex>,
        allowed_schemas: Vec<String>,
        row_cap: u64,
    ) -> Self {
        Self {
            catalog,
            engine,
            index,
            allowed_schemas,
            row_cap,
            sample_timeout: Duration::from_secs(8),
        }
    }

    pub fn with_sample_timeout(mut self, timeout: Duration) -> Self {
        self.sample_timeout = timeout;
        self
    }

    /// Describe every table of `schemas` (and the metrics file, if it
    /// exists) into cards and insert them.
    ///
    /// Every schema is checked against the allow-list before any catalog
    /// access.
    pub async fn ingest(
        &self,
        schemas: &[String],
        samples: u64,
        metrics_path: Option<&Path>,
    ) -> Result<IngestReport, IngestError> {
        let mut targets: Vec<String> = schemas
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if targets.is_empty() {
            return Err(IngestError::NoSchemas);
        }
        for schema in &targets {
            if !self.allowed_schemas.iter().any(|a| a == schema) {
                return Err(IngestError::SchemaNotAllowed {
                    schema: schema.clone(),
                    allowed: self.allowed_schemas.clone(),
                });
            }
        }
        targets.sort();
        targets.dedup();

        let mut cards: Vec<(String, String)> = Vec::new();
        let mut tables = 0usize;
        for schema in &targets {
            let catalog_err = |source| IngestError::Catalog {
                schema: schema.clone(),
                source,
            };
            let names = self.catalog.list_tables(schema).await.map_err(catalog_err)?;
            tracing::info!(schema = %schema, tables = names.len(), "describing schema");
            for table in names {
                let desc = self
                    .catalog
                    .describe_table(schema, &table)
                    .await
                    .map_err(catalog_err)?;
                let mut card = schema_card(&desc);
                if samples > 0 {
                    self.append_samples(&mut card, schema, &table, samples).await;
                }
                cards.push((card, format!("schema://{schema}.{table}")));
                tables += 1;
            }
        }

        let metrics = match metrics_path {
            Some(path) if path.exists() => load_metrics(path)?,
            Some(path) => {
                tracing::debug!(path = %path.display(), "no metrics file; skipping metric cards");
                Vec::new()
            }
            None => Vec::new(),
        };
        for metric in &metrics {
            cards.push((metric_card(metric), format!("metric://{}", metric.name)));
        }

        let inserted = self.index.insert(&cards).await?;
        tracing::info!(tables, metrics = metrics.len(), inserted, "ingestion finished");
        Ok(IngestReport {
            tables,
            metrics: metrics.len(),
            inserted,
        })
    }

    async fn append_samples(&self, card: &mut String, schema: &str, table: &str, samples: u64) {
        let limit = samples.min(self.row_cap);
        let sql = format!(
            "SELECT * FROM {}.{} LIMIT {limit}",
            quote_ident(schema),
            quote_ident(table)
        );
        match self.engine.run(&sql, self.sample_timeout).await {
            Ok(result) => {
                card.push_str("\nSAMPLE_ROWS:\n");
                for row in &result.rows {
                    let _ = writeln!(
                        card,
                        "- {}",
                        serde_json::to_string(row).unwrap_or_else(|_| "{}".to_string())
                    );
                }
            }
            Err(err) => {
                tracing::warn!(schema, table, error = %err, "could not sample rows; card kept without samples");
            }
        }
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn schema_card(desc: &TableDescription) -> String {
    let table = &desc.table;
    let mut out = String::from("DB SCHEMA CARD\n");
    let _ = writeln!(out, "TABLE: {}.{}", desc.schema, table.name);
    out.push_str("COLUMNS:\n");
    for col in &table.columns {
        let _ = writeln!(
            out,
            "- {} ({}, nullable={}, default={})",
            col.name,
            col.data_type,
            col.nullable,
            col.default.as_deref().unwrap_or("none")
        );
    }
    let pk = if table.primary_key.is_empty() {
        "none".to_string()
    } else {
        table.primary_key.join(", ")
    };
    let _ = writeln!(out, "PRIMARY_KEY: {pk}");
    out.push_str("FOREIGN_KEYS:\n");
    if desc.foreign_keys.is_empty() {
        out.push_str("- none\n");
    }
    for fk in &desc.foreign_keys {
        let _ = writeln!(
            out,
            "- {} -> {}.{}",
            fk.child_column, fk.parent_table, fk.parent_column
        );
    }
    out.push_str("DESCRIPTION:\n");
    out.push_str(table.comment.as_deref().unwrap_or(""));
    out
}

pub fn metric_card(metric: &MetricDef) -> String {
    let mut out = String::from("METRIC CARD\n");
    let _ = writeln!(out, "NAME: {}", metric.name);
    let _ = writeln!(out, "DEFINITION: {}", metric.definition.trim());
    if let Some(table) = &metric.table {
        let _ = writeln!(out, "TABLE: {table}");
    }
    if !metric.filters.is_empty() {
        let _ = writeln!(out, "FILTERS: {}", metric.filters.join(" AND "));
    }
    if let Some(grain) = &metric.grain {
        let _ = writeln!(out, "GRAIN: {grain}");
    }
    out.trim_end().to_string()
}

/// Accepts either `metrics: [...]` or a bare list.
pub fn parse_metrics(text: &str) -> Result<Vec<MetricDef>, serde_yaml::Error> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(match serde_yaml::from_str::<MetricsFile>(text)? {
        MetricsFile::Wrapped { metrics } => metrics,
        MetricsFile::List(metrics) => metrics,
    })
}

fn load_metrics(path: &Path) -> Result<Vec<MetricDef>, IngestError> {
    let metrics_err = |message: String| IngestError::Metrics {
        path: path.to_path_buf(),
        message,
    };
    let text = std::fs::read_to_string(path).map_err(|e| metrics_err(e.to_string()))?;
    parse_metrics(&text).map_err(|e| metrics_err(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use querygate_sql::parse_sql_ddl;

    #[test]
    fn test_schema_card_layout() {
        let graph = parse_sql_ddl(
            "public",
            "CREATE TABLE customers (id INT PRIMARY KEY, region TEXT NOT NULL);
             CREATE TABLE orders (id INT PRIMARY KEY, customer_id INT REFERENCES customers(id), total NUMERIC DEFAULT 0);",
        )
        .unwrap();
        let desc = TableDescription {
            schema: "public".into(),
            table: graph.table("orders").unwrap().clone(),
            foreign_keys: graph.foreign_keys_of("orders").cloned().collect(),
        };
        let card = schema_card(&desc);
        assert!(card.starts_with("DB SCHEMA CARD\nTABLE: public.orders\nCOLUMNS:\n"));
        assert!(card.contains("- customer_id (INT, nullable=true, default=none)"));
        assert!(card.contains("- total (NUMERIC, nullable=true, default=0)"));
        assert!(card.contains("PRIMARY_KEY: id"));
        assert!(card.contains("- customer_id -> customers.id"));
    }

    #[test]
    fn test_parse_metrics_both_shapes() {
        let wrapped = parse_metrics(
            "metrics:\n  - name: revenue\n    definition: sum(orders.total)\n    table: public.orders\n    grain: day\n",
        )
        .unwrap();
        let list = parse_metrics("- name: active_users\n  definition: count(distinct user_id)\n  filters: [\"active\"]\n").unwrap();
        assert_eq!(wrapped[0].name, "revenue");
        assert_eq!(wrapped[0].grain.as_deref(), Some("day"));
        assert_eq!(list[0].filters, vec!["active"]);
        assert!(parse_metrics("").unwrap().is_empty());
    }

    #[test]
    fn test_metric_card() {
        let card = metric_card(&MetricDef {
            name: "revenue".into(),
            definition: "sum(orders.total)".into(),
            table: Some("public.orders".into()),
            filters: vec!["status = 'paid'".into()],
            grain: None,
        });
        assert!(card.starts_with("METRIC CARD\nNAME: revenue\n"));
        assert!(card.contains("FILTERS: status = 'paid'"));
        assert!(!card.contains("GRAIN"));
    }
}
