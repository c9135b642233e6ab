//! The record threaded through one pipeline run.

use crate::engine::ExecutionResult;
use crate::machine::Gate;
use querygate_sql::{CostDecision, ExplainEstimate, GateResult, JoinPath};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The question and the context retrieved for it. Fixed once retrieval ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionContext {
    pub question: String,
    pub fragments: Vec<String>,
}

/// Structured intent produced by planning.
///
/// Deserialization is lenient: missing fields default to empty, scalars are
/// accepted where lists are expected, and non-string list items are kept as
/// their JSON text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    #[serde(default, deserialize_with = "lenient_strings")]
    pub tables: Vec<String>,
    #[serde(default, deserialize_with = "lenient_joins")]
    pub joins: Vec<JoinSpec>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub select: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub filters: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub group_by: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub order_by: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub metric_refs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub left: String,
    pub right: String,
    #[serde(rename = "type", default = "default_join_kind")]
    pub kind: String,
}

fn default_join_kind() -> String {
    "inner".to_string()
}

impl JoinSpec {
    pub fn inner(left: &str, right: &str) -> Self {
        Self {
            left: left.to_string(),
            right: right.to_string(),
            kind: default_join_kind(),
        }
    }
}

fn value_to_string(v: Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn lenient_strings<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items.into_iter().filter_map(value_to_string).collect(),
        other => value_to_string(other).into_iter().collect(),
    })
}

fn lenient_joins<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<JoinSpec>, D::Error> {
    let items = match Value::deserialize(d)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) => s
                .split_once('=')
                .map(|(l, r)| JoinSpec::inner(l.trim(), r.trim())),
            obj @ Value::Object(_) => serde_json::from_value(obj).ok(),
            _ => None,
        })
        .collect())
}

/// SQL text plus the revision that produced it. Never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSql {
    pub text: String,
    pub revision: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PreviewResult {
    Ok { preview: ExecutionResult },
    Failed { error: String },
}

impl PreviewResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, PreviewResult::Ok { .. })
    }
}

/// Why a candidate was sent back to generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub gate: Gate,
    pub reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_patch: Option<String>,
    pub revision: u32,
    pub sql: String,
}

/// Outcome of join inference after planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JoinHint {
    Resolved {
        schema: String,
        path: JoinPath,
    },
    Unresolved {
        schema: String,
        source_table: String,
        target_table: String,
        error: String,
    },
}

/// Auxiliary signals gathered during the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_hint: Option<JoinHint>,
    #[serde(default)]
    pub rejections: Vec<Rejection>,
    #[serde(default)]
    pub retrieval_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub run_id: Uuid,
    pub input: QuestionContext,
    pub plan: Option<QueryPlan>,
    pub sql: Option<CandidateSql>,
    pub lint: Option<GateResult>,
    pub policy: Option<GateResult>,
    pub explain: Option<ExplainEstimate>,
    pub cost: Option<CostDecision>,
    pub preview: Option<PreviewResult>,
    pub result: Option<ExecutionResult>,
    pub answer: Option<String>,
    pub evidence: Evidence,
    /// Last issued candidate revision; keeps increasing across re-plans.
    pub revision: u32,
}

impl PipelineState {
    pub fn new(question: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            input: QuestionContext {
                question: question.to_string(),
                fragments: Vec::new(),
            },
            plan: None,
            sql: None,
            lint: None,
            policy: None,
            explain: None,
            cost: None,
            preview: None,
            result: None,
            answer: None,
            evidence: Evidence::default(),
            revision: 0,
        }
    }

    pub fn question(&self) -> &str {
        &self.input.question
    }

    /// Current candidate text, empty before the first generation.
    pub fn sql_text(&self) -> &str {
        self.sql.as_ref().map(|c| c.text.as_str()).unwrap_or("")
    }

    /// Issue the next candidate.
    pub fn push_candidate(&mut self, text: String) -> &CandidateSql {
        self.revision += 1;
        self.sql.insert(CandidateSql {
            text,
            revision: self.revision,
        })
    }

    /// Clear everything owned by generation and the stages after it.
    pub fn reset_for_regeneration(&mut self) {
        self.sql = None;
        self.lint = None;
        self.policy = None;
        self.explain = None;
        self.cost = None;
        self.preview = None;
        self.result = None;
        self.answer = None;
    }

    /// Clear the plan and everything downstream of it. Retrieved context
    /// and accumulated evidence are kept.
    pub fn reset_for_replan(&mut self) {
        self.plan = None;
        self.evidence.join_hint = None;
        self.reset_for_regeneration();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_parses_canonical_shape() {
        let plan: QueryPlan = serde_json::from_str(
            r#"{
                "tables": ["public.orders", "public.customers"],
                "joins": [{"left": "orders.customer_id", "right": "customers.id", "type": "left"}],
                "select": ["customers.region", "sum(orders.total)"],
                "filters": [],
                "group_by": ["customers.region"],
                "order_by": ["2 desc"],
                "metric_refs": ["revenue"]
            }"#,
        )
        .unwrap();
        assert_eq!(plan.tables.len(), 2);
        assert_eq!(plan.joins[0].kind, "left");
        assert_eq!(plan.metric_refs, vec!["revenue"]);
    }

    #[test]
    fn test_plan_is_lenient() {
        let plan: QueryPlan = serde_json::from_str(
            r#"{"tables": "public.orders", "joins": ["a.x = b.y", 3], "filters": [{"col": 1}, null]}"#,
        )
        .unwrap();
        assert_eq!(plan.tables, vec!["public.orders"]);
        assert_eq!(plan.joins, vec![JoinSpec::inner("a.x", "b.y")]);
        assert_eq!(plan.filters, vec![r#"{"col":1}"#]);
        assert!(plan.select.is_empty());
    }

    #[test]
    fn test_revisions_increase_across_resets() {
        let mut state = PipelineState::new("q");
        state.push_candidate("SELECT 1".into());
        state.reset_for_regeneration();
        assert!(state.sql.is_none());
        state.push_candidate("SELECT 2".into());
        state.reset_for_replan();
        let candidate = state.push_candidate("SELECT 3".into());
        assert_eq!(candidate.revision, 3);
    }
}
