//! LIMIT handling and cleanup of model-produced SQL text.
//!
//! Row bounds are read from the parsed AST: only the outermost query's
//! `LIMIT`/`FETCH` bounds the result set, and `LIMIT` text inside literals,
//! comments or subqueries does not count. The text scan is a fallback for
//! SQL the parser rejects, which the lint gate refuses anyway.

use regex::Regex;
use sqlparser::ast::{Expr, Query, Statement, Value, Visit, Visitor};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::ops::ControlFlow;
use std::sync::OnceLock;

fn limit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bLIMIT\s+(\d+)").expect("valid LIMIT regex"))
}

fn parse_query(sql: &str) -> Option<Query> {
    let mut statements = Parser::parse_sql(&GenericDialect {}, sql).ok()?;
    if statements.len() != 1 {
        return None;
    }
    match statements.remove(0) {
        Statement::Query(query) => Some(*query),
        _ => None,
    }
}

/// Numeric literal value; anything else is unbounded.
fn literal_bound(expr: &Expr) -> u64 {
    match expr {
        Expr::Value(Value::Number(n, _)) => n.parse::<u64>().unwrap_or(u64::MAX),
        _ => u64::MAX,
    }
}

/// Tightest row bound declared directly on `query`, if any.
///
/// Non-literal arguments and `FETCH ... PERCENT` count as `u64::MAX`, so a
/// cap comparison still rejects them.
pub fn query_bound(query: &Query) -> Option<u64> {
    let limit = query.limit.as_ref().map(literal_bound);
    let fetch = query.fetch.as_ref().map(|fetch| {
        if fetch.percent {
            u64::MAX
        } else {
            fetch.quantity.as_ref().map_or(1, literal_bound)
        }
    });
    limit.into_iter().chain(fetch).min()
}

#[derive(Default)]
struct Bounds(Vec<u64>);

impl Visitor for Bounds {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
        self.0.extend(query_bound(query));
        ControlFlow::Continue(())
    }
}

/// Row bounds of every query level in the statement (CTEs and subqueries
/// included), outermost first.
pub fn statement_limits(statement: &Statement) -> Vec<u64> {
    let mut bounds = Bounds::default();
    let _ = statement.visit(&mut bounds);
    bounds.0
}

/// True when the outermost query carries a `LIMIT` or `FETCH` clause.
pub fn has_limit(sql: &str) -> bool {
    match parse_query(sql) {
        Some(query) => query.limit.is_some() || query.fetch.is_some(),
        None => limit_re().is_match(sql),
    }
}

fn strip_terminator(sql: &str) -> &str {
    sql.trim_end().trim_end_matches(';').trim_end()
}

/// Append `LIMIT <cap>` when the outermost query has no row bound.
///
/// An existing outer clause is left untouched; the lint gate rejects one
/// that exceeds the cap.
pub fn enforce_limit(sql: &str, cap: u64) -> String {
    let body = strip_terminator(sql);
    if has_limit(body) {
        body.trim().to_string()
    } else {
        format!("{body}\nLIMIT {cap}").trim().to_string()
    }
}

/// Bound the outermost query to at most `cap` rows.
///
/// SQL whose outer bound is already within the cap comes back unchanged;
/// otherwise the query is re-rendered with `LIMIT <cap>` in place of its
/// `LIMIT`/`FETCH`.
pub fn cap_limit(sql: &str, cap: u64) -> String {
    let body = strip_terminator(sql);
    let Some(mut query) = parse_query(body) else {
        return cap_limit_text(body, cap);
    };
    match query_bound(&query) {
        Some(bound) if bound <= cap => body.to_string(),
        _ => {
            query.limit = Some(Expr::Value(Value::Number(cap.to_string(), false)));
            query.fetch = None;
            query.to_string()
        }
    }
}

fn cap_limit_text(body: &str, cap: u64) -> String {
    if limit_re().is_match(body) {
        limit_re()
            .replace_all(body, |caps: &regex::Captures<'_>| {
                let n = caps[1].parse::<u64>().unwrap_or(u64::MAX);
                format!("LIMIT {}", n.min(cap))
            })
            .into_owned()
    } else {
        format!("{body}\nLIMIT {cap}")
    }
}

/// Extract the SQL body from a completion.
///
/// Takes the first fenced block when one is present, trims whitespace and
/// drops trailing statement terminators. Interior semicolons are kept so the
/// lint gate still sees multi-statement output.
pub fn clean_sql_output(raw: &str) -> String {
    let text = raw.trim();
    let body = match text.find("```") {
        Some(open) => {
            let after = &text[open + 3..];
            // Skip an optional language tag on the fence line.
            let after = match after.find('\n') {
                Some(nl) if !after[..nl].trim().contains(' ') => &after[nl + 1..],
                _ => after,
            };
            match after.find("```") {
                Some(close) => &after[..close],
                None => after,
            }
        }
        None => text,
    };
    strip_terminator(body.trim()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enforce_limit_appends_when_missing() {
        let out = enforce_limit("SELECT id FROM public.orders;", 200);
        assert_eq!(out, "SELECT id FROM public.orders\nLIMIT 200");
    }

    #[test]
    fn test_enforce_limit_keeps_existing() {
        let out = enforce_limit("SELECT id FROM public.orders LIMIT 5000", 200);
        assert_eq!(out, "SELECT id FROM public.orders LIMIT 5000");
    }

    #[test]
    fn test_enforce_limit_ignores_limit_in_literal() {
        let sql = "SELECT id FROM public.orders WHERE note = 'LIMIT 5'";
        assert_eq!(enforce_limit(sql, 200), format!("{sql}\nLIMIT 200"));
    }

    #[test]
    fn test_enforce_limit_ignores_limit_in_comment() {
        let sql = "SELECT id FROM public.orders /* LIMIT 5 */";
        assert_eq!(enforce_limit(sql, 200), format!("{sql}\nLIMIT 200"));
    }

    #[test]
    fn test_enforce_limit_ignores_subquery_limit() {
        let sql = "SELECT id FROM public.orders \
                   WHERE customer_id IN (SELECT id FROM public.customers LIMIT 5)";
        assert_eq!(enforce_limit(sql, 200), format!("{sql}\nLIMIT 200"));
    }

    #[test]
    fn test_fetch_counts_as_outer_bound() {
        assert!(has_limit("SELECT id FROM public.orders FETCH FIRST 10 ROWS ONLY"));
        assert!(!has_limit("SELECT id FROM (SELECT id FROM public.orders LIMIT 3) AS t"));
    }

    #[test]
    fn test_cap_limit_rewrites_outer_query_only() {
        let sql = "WITH t AS (SELECT id FROM public.a LIMIT 50) SELECT * FROM t limit 70";
        assert_eq!(
            cap_limit(sql, 10),
            "WITH t AS (SELECT id FROM public.a LIMIT 50) SELECT * FROM t LIMIT 10"
        );
    }

    #[test]
    fn test_cap_limit_keeps_bound_within_cap() {
        let sql = "SELECT id FROM public.orders limit 7";
        assert_eq!(cap_limit(sql, 10), sql);
    }

    #[test]
    fn test_cap_limit_bounds_query_with_limited_subquery() {
        let sql = "SELECT id FROM public.orders \
                   WHERE customer_id IN (SELECT id FROM public.customers LIMIT 5)";
        let capped = cap_limit(sql, 100);
        assert!(capped.ends_with(") LIMIT 100"), "{capped}");
        assert!(capped.contains("LIMIT 5)"));
    }

    #[test]
    fn test_cap_limit_replaces_fetch() {
        let capped = cap_limit("SELECT id FROM public.orders FETCH FIRST 500 ROWS ONLY", 100);
        assert_eq!(capped, "SELECT id FROM public.orders LIMIT 100");
    }

    #[test]
    fn test_cap_limit_appends() {
        assert_eq!(
            cap_limit("SELECT 1 FROM public.t ;", 100),
            "SELECT 1 FROM public.t\nLIMIT 100"
        );
    }

    #[test]
    fn test_cap_limit_text_fallback_for_unparseable_sql() {
        assert_eq!(
            cap_limit("SELECT FROM public.t WHERE ( LIMIT 500", 100),
            "SELECT FROM public.t WHERE ( LIMIT 100"
        );
    }

    #[test]
    fn test_statement_limits_cover_nested_queries() {
        let statement = Parser::parse_sql(
            &GenericDialect {},
            "WITH t AS (SELECT id FROM public.a LIMIT 99999999999999999999999) \
             SELECT * FROM t LIMIT 7",
        )
        .unwrap()
        .remove(0);
        assert_eq!(statement_limits(&statement), vec![7, u64::MAX]);
    }

    #[test]
    fn test_clean_sql_output_fenced() {
        let raw = "Here you go:\n```sql\nSELECT id FROM public.orders;\n```\nThanks";
        assert_eq!(clean_sql_output(raw), "SELECT id FROM public.orders");
    }

    #[test]
    fn test_clean_sql_output_keeps_interior_statements() {
        let raw = "SELECT 1 FROM public.t; DROP TABLE public.t;";
        assert_eq!(clean_sql_output(raw), "SELECT 1 FROM public.t; DROP TABLE public.t");
    }
}
