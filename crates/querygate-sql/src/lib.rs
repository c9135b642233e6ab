//! SQL safety gates for Querygate
//!
//! Everything in this crate is pure: no database connection and no model
//! calls. The pipeline crate wires these pieces together.
//!
//! - [`lint`]: structural read-only validation of candidate SQL
//! - [`policy`]: pluggable organisational policy checks
//! - [`cost`]: admission of a query based on optimizer estimates
//! - [`limit`]: LIMIT detection, enforcement and capping
//! - [`schema`]: per-schema table/foreign-key snapshots (and DDL discovery)
//! - [`join_path`]: shortest foreign-key join path between two tables

pub mod cost;
pub mod join_path;
pub mod limit;
pub mod lint;
pub mod policy;
pub mod schema;

use serde::{Deserialize, Serialize};

pub use cost::{CostDecision, CostGate, CostLimits, ExplainEstimate};
pub use join_path::{resolve, JoinPath, JoinPathError};
pub use limit::{cap_limit, clean_sql_output, enforce_limit, has_limit, statement_limits};
pub use lint::{LintConfig, SqlValidator, ERR_DDL_DML, ERR_NOT_SELECT, ERR_UNQUALIFIED};
pub use policy::{AllowAll, ColumnDenylist, PolicyGuard};
pub use schema::{parse_sql_ddl, ColumnDef, ForeignKey, SchemaGraph, TableDef};

/// Outcome of a validation gate.
///
/// `ok` is true iff `errors` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GateResult {
    pub ok: bool,
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl GateResult {
    pub fn pass() -> Self {
        Self {
            ok: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self::from_errors(vec![error.into()])
    }

    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            ok: errors.is_empty(),
            errors,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}
