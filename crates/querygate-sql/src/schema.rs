//! Per-schema table and foreign-key snapshots.
//!
//! A [`SchemaGraph`] is normally built from live catalog metadata by the
//! execution engine. [`parse_sql_ddl`] builds one from `CREATE TABLE`
//! statements instead, which is how fixtures and offline tooling describe a
//! database.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{ColumnOption, ObjectName, Statement, TableConstraint};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// Tables, columns and single-column foreign-key edges of one schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaGraph {
    pub schema: String,
    pub tables: Vec<TableDef>,
    pub foreign_keys: Vec<ForeignKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
}

/// `child_table.child_column` references `parent_table.parent_column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub child_table: String,
    pub child_column: String,
    pub parent_table: String,
    pub parent_column: String,
}

impl SchemaGraph {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            ..Self::default()
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    /// Foreign keys declared on `table`, in declaration order.
    pub fn foreign_keys_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a ForeignKey> {
        self.foreign_keys.iter().filter(move |fk| fk.child_table == table)
    }
}

/// Split `[schema.]table` into its parts.
fn split_name(name: &ObjectName) -> (Option<String>, String) {
    let parts = &name.0;
    let table = parts.last().map(|i| i.value.clone()).unwrap_or_default();
    let schema = (parts.len() >= 2).then(|| parts[parts.len() - 2].value.clone());
    (schema, table)
}

/// Parse `CREATE TABLE` statements into a graph for `schema`.
///
/// Tables qualified with a different schema are skipped; unqualified tables
/// are taken to belong to `schema`. Composite foreign keys are expanded into
/// one edge per column pair.
pub fn parse_sql_ddl(schema: &str, sql: &str) -> Result<SchemaGraph> {
    let dialect = GenericDialect {};
    let statements = Parser::parse_sql(&dialect, sql)?;

    let mut graph = SchemaGraph::new(schema);

    for stmt in statements {
        if let Statement::CreateTable {
            name,
            columns: sql_columns,
            constraints: sql_constraints,
            comment,
            ..
        } = stmt
        {
            let (table_schema, table_name) = split_name(&name);
            if table_schema.as_deref().is_some_and(|s| s != schema) {
                continue;
            }

            let mut columns = Vec::new();
            let mut primary_key = Vec::new();

            for col in &sql_columns {
                let column_name = col.name.value.clone();
                let mut nullable = true;
                let mut default = None;
                for opt in &col.options {
                    match &opt.option {
                        ColumnOption::NotNull => nullable = false,
                        ColumnOption::Default(expr) => default = Some(expr.to_string()),
                        ColumnOption::Unique { is_primary, .. } if *is_primary => {
                            nullable = false;
                            primary_key.push(column_name.clone());
                        }
                        ColumnOption::ForeignKey {
                            foreign_table,
                            referred_columns,
                            ..
                        } => {
                            let (_, parent_table) = split_name(foreign_table);
                            let parent_column = referred_columns
                                .first()
                                .map(|c| c.value.clone())
                                .unwrap_or_else(|| "id".to_string());
                            graph.foreign_keys.push(ForeignKey {
                                child_table: table_name.clone(),
                                child_column: column_name.clone(),
                                parent_table,
                                parent_column,
                            });
                        }
                        _ => {}
                    }
                }
                columns.push(ColumnDef {
                    name: column_name,
                    data_type: col.data_type.to_string(),
                    nullable,
                    default,
                });
            }

            for constraint in &sql_constraints {
                match constraint {
                    TableConstraint::ForeignKey {
                        columns: fk_cols,
                        foreign_table,
                        referred_columns,
                        ..
                    } => {
                        let (_, parent_table) = split_name(foreign_table);
                        for (child, parent) in fk_cols.iter().zip(referred_columns.iter()) {
                            graph.foreign_keys.push(ForeignKey {
                                child_table: table_name.clone(),
                                child_column: child.value.clone(),
                                parent_table: parent_table.clone(),
                                parent_column: parent.value.clone(),
                            });
                        }
                    }
                    TableConstraint::Unique {
                        columns: pk_cols,
                        is_primary: true,
                        ..
                    } => {
                        primary_key = pk_cols.iter().map(|c| c.value.clone()).collect();
                        for column in columns.iter_mut() {
                            if primary_key.contains(&column.name) {
                                column.nullable = false;
                            }
                        }
                    }
                    _ => {}
                }
            }

            graph.tables.push(TableDef {
                name: table_name,
                columns,
                primary_key,
                comment,
            });
        }
    }

    Ok(graph)
}
