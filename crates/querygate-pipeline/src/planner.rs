//! Plan parsing and foreign-key join inference.

use crate::engine::SchemaCatalog;
use crate::state::{JoinHint, JoinSpec, QueryPlan};
use querygate_llm::parse_llm_json_object;
use querygate_sql::{resolve, JoinPath};

/// Parse a planning completion; unusable output yields an empty plan.
pub fn parse_plan(completion: &str) -> QueryPlan {
    match parse_llm_json_object::<QueryPlan>(completion) {
        Ok(plan) => plan,
        Err(err) => {
            tracing::warn!(error = %err, "plan was not valid JSON; continuing with an empty plan");
            QueryPlan::default()
        }
    }
}

/// Split `schema.table` (or a bare table) into its parts.
pub fn split_table_ref<'a>(table: &'a str, default_schema: &'a str) -> (&'a str, &'a str) {
    let table = table.trim();
    match table.rsplit_once('.') {
        Some((schema, name)) => {
            let schema = schema.rsplit('.').next().unwrap_or(schema);
            (schema, name)
        }
        None => (default_schema, table),
    }
}

/// Whether the plan names two or more tables but no joins.
pub fn needs_join_hint(plan: &QueryPlan) -> bool {
    plan.tables.len() >= 2 && plan.joins.is_empty()
}

/// Resolve a join path between the plan's first two tables against a fresh
/// snapshot of the first table's schema.
pub async fn infer_join_hint(
    plan: &QueryPlan,
    catalog: &dyn SchemaCatalog,
    default_schema: &str,
) -> Option<JoinHint> {
    if !needs_join_hint(plan) {
        return None;
    }
    let (schema, source) = split_table_ref(&plan.tables[0], default_schema);
    let (_, target) = split_table_ref(&plan.tables[1], default_schema);

    let unresolved = |error: String| JoinHint::Unresolved {
        schema: schema.to_string(),
        source_table: source.to_string(),
        target_table: target.to_string(),
        error,
    };

    let graph = match catalog.schema_graph(schema).await {
        Ok(graph) => graph,
        Err(err) => {
            tracing::warn!(schema, error = %err, "could not load schema graph for join hint");
            return Some(unresolved(err.to_string()));
        }
    };

    match resolve(&graph, source, target) {
        Ok(path) => {
            tracing::debug!(schema, joins = ?path.joins, "inferred join path");
            Some(JoinHint::Resolved {
                schema: schema.to_string(),
                path,
            })
        }
        Err(err) => {
            tracing::info!(schema, error = %err, "no join path; continuing without joins");
            Some(unresolved(err.to_string()))
        }
    }
}

/// Add one inner join per hop of `path`. Plans with joins are left alone.
pub fn inject_joins(plan: &mut QueryPlan, path: &JoinPath) {
    if !plan.joins.is_empty() {
        return;
    }
    plan.joins = path
        .predicates()
        .map(|(left, right)| JoinSpec::inner(left, right))
        .collect();
}
