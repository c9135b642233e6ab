//! Organisational policy checks run between lint and cost estimation.

use crate::lint::fold_ident;
use crate::GateResult;
use sqlparser::ast::{Expr, Visit, Visitor};
use sqlparser::dialect::dialect_from_str;
use sqlparser::parser::Parser;
use std::collections::BTreeSet;
use std::ops::ControlFlow;

/// Acceptance hook for column/row level rules.
pub trait PolicyGuard: Send + Sync {
    fn check(&self, sql: &str) -> GateResult;

    fn name(&self) -> &str {
        "policy"
    }
}

/// Baseline policy: accept everything that passed lint.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PolicyGuard for AllowAll {
    fn check(&self, _sql: &str) -> GateResult {
        GateResult::pass()
    }

    fn name(&self) -> &str {
        "allow-all"
    }
}

/// Rejects queries that reference any denylisted column by name.
///
/// Matching is on the last identifier part, so `c.email`, `email` and
/// `public.customers.email` all hit an `email` entry. Unparseable SQL is
/// rejected.
#[derive(Debug, Clone)]
pub struct ColumnDenylist {
    columns: BTreeSet<String>,
    dialect: String,
}

impl ColumnDenylist {
    pub fn new<I, S>(columns: I, dialect: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            columns: columns
                .into_iter()
                .map(|c| c.as_ref().trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
            dialect: dialect.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl PolicyGuard for ColumnDenylist {
    fn check(&self, sql: &str) -> GateResult {
        if self.columns.is_empty() {
            return GateResult::pass();
        }
        let Some(dialect) = dialect_from_str(&self.dialect) else {
            return GateResult::fail(format!("Policy: unknown dialect {}", self.dialect));
        };
        let statements = match Parser::parse_sql(dialect.as_ref(), sql) {
            Ok(statements) => statements,
            Err(e) => return GateResult::fail(format!("Policy: cannot parse statement: {e}")),
        };

        let mut hits = DeniedColumns {
            denied: &self.columns,
            found: BTreeSet::new(),
        };
        for statement in &statements {
            let _ = statement.visit(&mut hits);
        }

        if hits.found.is_empty() {
            GateResult::pass()
        } else {
            let found: Vec<String> = hits.found.into_iter().collect();
            GateResult::fail(format!("Denied columns referenced: {found:?}"))
        }
    }

    fn name(&self) -> &str {
        "column-denylist"
    }
}

struct DeniedColumns<'a> {
    denied: &'a BTreeSet<String>,
    found: BTreeSet<String>,
}

impl Visitor for DeniedColumns<'_> {
    type Break = ();

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
        let ident = match expr {
            Expr::Identifier(ident) => Some(ident),
            Expr::CompoundIdentifier(parts) => parts.last(),
            _ => None,
        };
        if let Some(ident) = ident {
            let name = fold_ident(ident);
            if self.denied.contains(&name) {
                self.found.insert(name);
            }
        }
        ControlFlow::Continue(())
    }
}
