//! Static read-only validation of candidate SQL.
//!
//! Checks run in a fixed order and stop at the first failing one:
//!
//! 1. no DDL/DML keyword anywhere in the text
//! 2. the statement starts with `SELECT` or `WITH`
//! 3. at least one `schema.table` shaped identifier
//! 4. the text parses as exactly one query in the configured dialect, and
//!    no query level writes its rows with `SELECT ... INTO`
//! 5. every `LIMIT`/`FETCH` bound, at any query level, is at most the row cap
//! 6. every referenced schema is on the allow-list (all offenders reported)
//!
//! Keywords in check 1 match as whole words anywhere in the text, comments
//! and literals included, so identifiers such as `updated_at` or
//! `delete_flag` pass while a bare `DELETE` never does.
//!
//! Checks 5 and 6 walk the parsed AST, so aliases such as `o.id` are not
//! mistaken for schema names. Schemas are collected from relations,
//! `schema.table.column` references, qualified function names and
//! qualified type names in casts. Unqualified table references that are not
//! CTE names are reported as warnings.

use crate::limit::statement_limits;
use crate::GateResult;
use anyhow::{anyhow, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    DataType, Expr, Ident, ObjectName, Query, SetExpr, Statement, Visit, Visitor,
};
use sqlparser::dialect::dialect_from_str;
use sqlparser::parser::Parser;
use std::collections::{BTreeSet, HashSet};
use std::ops::ControlFlow;
use std::sync::OnceLock;

pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "CREATE", "ALTER", "DROP", "TRUNCATE", "GRANT",
    "REVOKE",
];

pub const ERR_DDL_DML: &str = "Statement appears to modify DDL/DML";
pub const ERR_NOT_SELECT: &str = "Must start with SELECT or WITH";
pub const ERR_UNQUALIFIED: &str = "Use schema-qualified tables (e.g., public.orders)";

fn forbidden_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternation = FORBIDDEN_KEYWORDS.join("|");
        Regex::new(&format!(r"\b({alternation})\b")).expect("valid forbidden-keyword regex")
    })
}

fn qualified_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([A-Za-z_]\w*)\.([A-Za-z_]\w*)\b").expect("valid qualified-name regex")
    })
}

/// Validator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintConfig {
    pub allowed_schemas: Vec<String>,
    /// Largest accepted `LIMIT` argument.
    pub max_rows: u64,
    /// sqlparser dialect name (`postgres`, `generic`, ...).
    pub dialect: String,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            allowed_schemas: vec!["public".to_string()],
            max_rows: 200,
            dialect: "postgres".to_string(),
        }
    }
}

/// Read-only SQL lint gate.
#[derive(Debug, Clone)]
pub struct SqlValidator {
    config: LintConfig,
    allowed: HashSet<String>,
}

impl SqlValidator {
    /// Fails when the configured dialect is unknown to sqlparser.
    pub fn new(config: LintConfig) -> Result<Self> {
        if dialect_from_str(&config.dialect).is_none() {
            return Err(anyhow!("unknown SQL dialect: {}", config.dialect));
        }
        let allowed = config
            .allowed_schemas
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Ok(Self { config, allowed })
    }

    pub fn config(&self) -> &LintConfig {
        &self.config
    }

    pub fn lint(&self, sql: &str) -> GateResult {
        let upper = sql.to_uppercase();

        if let Some(m) = forbidden_re().find(&upper) {
            return GateResult::fail(format!("{ERR_DDL_DML} (found {})", m.as_str()));
        }

        let head = upper.trim_start();
        if !(head.starts_with("SELECT") || head.starts_with("WITH")) {
            return GateResult::fail(ERR_NOT_SELECT);
        }

        if !qualified_re().is_match(sql) {
            return GateResult::fail(ERR_UNQUALIFIED);
        }

        let statement = match self.parse_single_query(sql) {
            Ok(statement) => statement,
            Err(message) => return GateResult::fail(message),
        };

        let mut refs = SchemaRefs::default();
        let _ = statement.visit(&mut refs);
        if let Some(target) = &refs.select_into {
            return GateResult::fail(format!("{ERR_DDL_DML} (found SELECT INTO {target})"));
        }

        if statement_limits(&statement)
            .iter()
            .any(|n| *n > self.config.max_rows)
        {
            return GateResult::fail(format!("LIMIT exceeds {}", self.config.max_rows));
        }

        let unallowed: Vec<String> = refs
            .schemas
            .iter()
            .filter(|schema| !self.allowed.contains(*schema))
            .cloned()
            .collect();
        if !unallowed.is_empty() {
            return GateResult::fail(format!("Unallowed schemas: {unallowed:?}"));
        }

        let warnings = refs
            .unqualified
            .iter()
            .filter(|name| !refs.ctes.contains(*name))
            .map(|name| format!("Unqualified table reference: {name}"))
            .collect();
        GateResult::pass().with_warnings(warnings)
    }

    fn parse_single_query(&self, sql: &str) -> std::result::Result<Statement, String> {
        let dialect = dialect_from_str(&self.config.dialect)
            .ok_or_else(|| format!("Parse error: unknown dialect {}", self.config.dialect))?;
        let mut statements =
            Parser::parse_sql(dialect.as_ref(), sql).map_err(|e| format!("Parse error: {e}"))?;
        if statements.len() != 1 {
            return Err(format!(
                "Parse error: expected exactly one statement, found {}",
                statements.len()
            ));
        }
        let statement = statements.remove(0);
        if !matches!(statement, Statement::Query(_)) {
            return Err(ERR_NOT_SELECT.to_string());
        }
        Ok(statement)
    }
}

/// Unquoted identifiers fold to lower case, as in PostgreSQL.
pub(crate) fn fold_ident(ident: &Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_lowercase(),
    }
}

/// Target of the first `SELECT ... INTO` in a query body.
fn select_into_target(body: &SetExpr) -> Option<String> {
    match body {
        SetExpr::Select(select) => select.into.as_ref().map(|into| into.name.to_string()),
        SetExpr::Query(query) => select_into_target(&query.body),
        SetExpr::SetOperation { left, right, .. } => {
            select_into_target(left).or_else(|| select_into_target(right))
        }
        _ => None,
    }
}

#[derive(Default)]
struct SchemaRefs {
    schemas: BTreeSet<String>,
    unqualified: BTreeSet<String>,
    ctes: HashSet<String>,
    select_into: Option<String>,
}

impl SchemaRefs {
    /// Record the schema part of a qualified `schema.name`.
    fn qualified_name(&mut self, name: &ObjectName) {
        let parts = &name.0;
        if parts.len() >= 2 {
            self.schemas.insert(fold_ident(&parts[parts.len() - 2]));
        }
    }
}

impl Visitor for SchemaRefs {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(fold_ident(&cte.alias.name));
            }
        }
        if self.select_into.is_none() {
            self.select_into = select_into_target(&query.body);
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<()> {
        let parts = &relation.0;
        if parts.len() == 1 {
            self.unqualified.insert(fold_ident(&parts[0]));
        } else {
            self.qualified_name(relation);
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
        match expr {
            // schema.table.column
            Expr::CompoundIdentifier(parts) if parts.len() >= 3 => {
                self.schemas.insert(fold_ident(&parts[parts.len() - 3]));
            }
            Expr::Function(function) => self.qualified_name(&function.name),
            Expr::Cast {
                data_type: DataType::Custom(name, _),
                ..
            }
            | Expr::TryCast {
                data_type: DataType::Custom(name, _),
                ..
            } => self.qualified_name(name),
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SqlValidator {
        SqlValidator::new(LintConfig::default()).unwrap()
    }

    #[test]
    fn test_accepts_simple_select() {
        let result = validator().lint("SELECT id, total FROM public.orders LIMIT 10");
        assert_eq!(result, GateResult::pass());
    }

    #[test]
    fn test_rejects_hidden_dml() {
        let result = validator()
            .lint("SELECT * FROM public.orders WHERE id IN (select 1); delete from public.orders");
        assert!(!result.ok);
        assert!(result.errors[0].contains("DDL/DML"));
    }

    #[test]
    fn test_column_names_containing_keywords_pass() {
        let result = validator()
            .lint("SELECT created_at, updated_at, delete_flag FROM public.orders LIMIT 5");
        assert!(result.ok, "{:?}", result.errors);
    }

    #[test]
    fn test_requires_select_or_with() {
        let result = validator().lint("EXPLAIN SELECT * FROM public.orders");
        assert_eq!(result.errors, vec![ERR_NOT_SELECT.to_string()]);
    }

    #[test]
    fn test_requires_qualification() {
        let result = validator().lint("SELECT * FROM orders");
        assert_eq!(result.errors, vec![ERR_UNQUALIFIED.to_string()]);
    }

    #[test]
    fn test_parse_error_embeds_message() {
        let result = validator().lint("SELECT FROM public.orders WHERE (");
        assert!(!result.ok);
        assert!(result.errors[0].starts_with("Parse error:"));
    }

    #[test]
    fn test_limit_over_cap_is_rejected() {
        let result = validator().lint("SELECT * FROM public.orders LIMIT 201");
        assert_eq!(result.errors, vec!["LIMIT exceeds 200".to_string()]);
        assert!(validator().lint("SELECT * FROM public.orders LIMIT 200").ok);
    }

    #[test]
    fn test_select_into_is_rejected() {
        let result = validator().lint("SELECT * INTO public.orders_copy FROM public.orders LIMIT 10");
        assert_eq!(
            result.errors,
            vec![format!("{ERR_DDL_DML} (found SELECT INTO public.orders_copy)")]
        );
    }

    #[test]
    fn test_select_into_inside_union_is_rejected() {
        let result = validator().lint(
            "SELECT id FROM public.a UNION ALL SELECT id INTO public.b_copy FROM public.b LIMIT 5",
        );
        assert!(!result.ok);
        assert!(result.errors[0].starts_with(ERR_DDL_DML));
    }

    #[test]
    fn test_limit_inside_literal_is_not_a_bound() {
        let result =
            validator().lint("SELECT id FROM public.orders WHERE note = 'LIMIT 5000' LIMIT 5");
        assert!(result.ok, "{:?}", result.errors);
    }

    #[test]
    fn test_nested_limit_over_cap_is_rejected() {
        let result = validator().lint(
            "SELECT id FROM public.orders WHERE customer_id IN \
             (SELECT id FROM public.customers LIMIT 5000) LIMIT 5",
        );
        assert_eq!(result.errors, vec!["LIMIT exceeds 200".to_string()]);
    }

    #[test]
    fn test_qualified_function_schema_must_be_allowed() {
        let result = validator()
            .lint("SELECT pg_catalog.pg_read_file('/etc/passwd') AS f FROM public.orders LIMIT 1");
        assert_eq!(
            result.errors,
            vec![r#"Unallowed schemas: ["pg_catalog"]"#.to_string()]
        );
    }

    #[test]
    fn test_qualified_cast_type_schema_must_be_allowed() {
        let result = validator().lint("SELECT o.id::secret.token FROM public.orders o LIMIT 1");
        assert_eq!(result.errors, vec![r#"Unallowed schemas: ["secret"]"#.to_string()]);
    }

    #[test]
    fn test_unallowed_schemas_reported_together() {
        let result = validator().lint(
            "SELECT a.id FROM sales.accounts a JOIN hr.people p ON p.id = a.owner_id \
             JOIN public.orders o ON o.account_id = a.id",
        );
        assert_eq!(
            result.errors,
            vec![r#"Unallowed schemas: ["hr", "sales"]"#.to_string()]
        );
    }

    #[test]
    fn test_aliases_are_not_schemas() {
        let result = validator().lint(
            "SELECT o.id, c.name FROM public.orders o JOIN public.customers c \
             ON o.customer_id = c.id LIMIT 20",
        );
        assert!(result.ok, "{:?}", result.errors);
    }

    #[test]
    fn test_cte_names_do_not_warn() {
        let result = validator().lint(
            "WITH recent AS (SELECT id FROM public.orders) SELECT id FROM recent LIMIT 5",
        );
        assert!(result.ok);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_unqualified_relation_warns() {
        let result = validator().lint("SELECT o.id FROM orders o LIMIT 5");
        assert!(result.ok);
        assert_eq!(result.warnings, vec!["Unqualified table reference: orders"]);
    }

    #[test]
    fn test_unknown_dialect_is_config_error() {
        let config = LintConfig {
            dialect: "cobol".to_string(),
            ..LintConfig::default()
        };
        assert!(SqlValidator::new(config).is_err());
    }
}
