//! Prompt templates for planning, SQL generation and summarization.
//!
//! Each template opens with a fixed header line so scripted completion
//! services can tell the three requests apart.

use crate::engine::ExecutionResult;
use crate::state::{QueryPlan, Rejection};
use std::fmt::Write;

pub const PLAN_HEADER: &str = "TASK: plan a SQL query as JSON.";
pub const SQL_HEADER: &str = "TASK: write one read-only SQL query.";
pub const SUMMARY_HEADER: &str = "TASK: answer the question from query results.";

fn push_context(out: &mut String, fragments: &[String]) {
    out.push_str("Context:\n");
    if fragments.is_empty() {
        out.push_str("(none)\n");
    }
    for fragment in fragments {
        out.push_str(fragment.trim());
        out.push_str("\n---\n");
    }
}

pub fn plan_prompt(question: &str, fragments: &[String]) -> String {
    let mut out = String::new();
    out.push_str(PLAN_HEADER);
    out.push('\n');
    out.push_str(
        "You are a careful data analyst. Return ONLY a JSON object with the fields:\n\
         tables (schema-qualified names), joins (list of {\"left\", \"right\", \"type\"}),\n\
         select, filters, group_by, order_by, metric_refs (all lists of strings).\n",
    );
    let _ = writeln!(out, "Question: {question}");
    push_context(&mut out, fragments);
    out
}

pub struct SqlPromptInput<'a> {
    pub dialect: &'a str,
    pub allowed_schemas: &'a [String],
    pub row_cap: u64,
    pub question: &'a str,
    pub plan: &'a QueryPlan,
    pub fragments: &'a [String],
    pub feedback: Option<&'a Rejection>,
}

pub fn sql_prompt(input: &SqlPromptInput<'_>) -> String {
    let mut out = String::new();
    out.push_str(SQL_HEADER);
    out.push('\n');
    let _ = writeln!(
        out,
        "Write a {} query that implements the plan below. Only SELECT or WITH.\n\
         Always schema-qualify tables; allowed schemas: {}.\n\
         Never return more than {} rows. Return only the SQL, no prose.",
        input.dialect,
        input.allowed_schemas.join(", "),
        input.row_cap,
    );
    let _ = writeln!(out, "Question: {}", input.question);
    let plan_json =
        serde_json::to_string_pretty(input.plan).unwrap_or_else(|_| "{}".to_string());
    let _ = writeln!(out, "Plan:\n{plan_json}");
    if !input.plan.joins.is_empty() {
        out.push_str("Required joins:\n");
        for join in &input.plan.joins {
            let _ = writeln!(
                out,
                "- {} JOIN ON {} = {}",
                join.kind.to_uppercase(),
                join.left,
                join.right
            );
        }
    }
    push_context(&mut out, input.fragments);
    if let Some(rejection) = input.feedback {
        let _ = writeln!(
            out,
            "The previous attempt (revision {}) was rejected by the {}:",
            rejection.revision, rejection.gate
        );
        for reason in &rejection.reasons {
            let _ = writeln!(out, "- {reason}");
        }
        if let Some(patch) = &rejection.suggested_patch {
            let _ = writeln!(out, "Suggested fix: {patch}");
        }
        let _ = writeln!(out, "Rejected SQL:\n{}", rejection.sql);
    }
    out
}

pub fn summary_prompt(
    question: &str,
    result: &ExecutionResult,
    max_rows: usize,
    fragments: &[String],
) -> String {
    let mut out = String::new();
    out.push_str(SUMMARY_HEADER);
    out.push('\n');
    out.push_str(
        "You are a precise analyst. Answer concisely using only the rows shown. \
         If the rows are empty, say so.\n",
    );
    let _ = writeln!(out, "Question: {question}");
    let _ = writeln!(out, "Columns: {}", result.columns.join(", "));
    let rows = result.head(max_rows);
    let _ = writeln!(
        out,
        "Rows (first {} of {}):\n{}",
        rows.len(),
        result.row_count(),
        serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string())
    );
    push_context(&mut out, fragments);
    out
}
