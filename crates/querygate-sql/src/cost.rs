//! Admission control on optimizer estimates.

use crate::GateResult;
use serde::{Deserialize, Serialize};

/// Ceilings applied to an execution-plan estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLimits {
    pub max_estimated_rows: u64,
    pub max_estimated_cost: f64,
    /// Row cap quoted in the suggested remediation.
    pub row_cap: u64,
}

impl Default for CostLimits {
    fn default() -> Self {
        Self {
            max_estimated_rows: 1_000_000,
            max_estimated_cost: 1_000_000.0,
            row_cap: 200,
        }
    }
}

/// Planner estimate returned by the execution engine's `explain`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainEstimate {
    pub estimated_rows: u64,
    pub estimated_cost: f64,
    #[serde(default)]
    pub raw_plan: serde_json::Value,
}

impl ExplainEstimate {
    pub fn new(estimated_rows: u64, estimated_cost: f64) -> Self {
        Self {
            estimated_rows,
            estimated_cost,
            raw_plan: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostDecision {
    pub pass: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_patch: Option<String>,
}

impl CostDecision {
    pub fn to_gate_result(&self) -> GateResult {
        if self.pass {
            GateResult::pass()
        } else {
            GateResult::fail(self.reason.clone())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CostGate {
    limits: CostLimits,
}

impl CostGate {
    pub fn new(limits: CostLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &CostLimits {
        &self.limits
    }

    /// Admit iff rows and cost are both within their ceilings.
    ///
    /// Equal-to-ceiling passes. A non-finite cost never passes.
    pub fn admit(&self, estimate: &ExplainEstimate) -> CostDecision {
        let rows = estimate.estimated_rows;
        let cost = estimate.estimated_cost;
        let rows_ok = rows <= self.limits.max_estimated_rows;
        let cost_ok = cost.is_finite() && cost <= self.limits.max_estimated_cost;

        if rows_ok && cost_ok {
            CostDecision {
                pass: true,
                reason: "within thresholds".to_string(),
                suggested_patch: None,
            }
        } else {
            CostDecision {
                pass: false,
                reason: format!("Too expensive: rows={rows} cost={cost}"),
                suggested_patch: Some(format!(
                    "Add a date/tenant filter and LIMIT {}",
                    self.limits.row_cap
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn gate() -> CostGate {
        CostGate::new(CostLimits {
            max_estimated_rows: 1_000,
            max_estimated_cost: 500.0,
            row_cap: 200,
        })
    }

    #[test]
    fn test_boundary_accepts() {
        let decision = gate().admit(&ExplainEstimate::new(1_000, 500.0));
        assert!(decision.pass);
        assert_eq!(decision.reason, "within thresholds");
        assert!(decision.suggested_patch.is_none());
    }

    #[test]
    fn test_rejection_cites_both_figures() {
        let decision = gate().admit(&ExplainEstimate::new(1_001, 12.5));
        assert!(!decision.pass);
        assert_eq!(decision.reason, "Too expensive: rows=1001 cost=12.5");
        assert_eq!(
            decision.suggested_patch.as_deref(),
            Some("Add a date/tenant filter and LIMIT 200")
        );
        assert!(!decision.to_gate_result().errors.is_empty());
    }

    #[test]
    fn test_nan_cost_fails_closed() {
        assert!(!gate().admit(&ExplainEstimate::new(1, f64::NAN)).pass);
    }

    proptest! {
        #[test]
        fn prop_admit_iff_both_within(rows in 0u64..3_000, cost in 0.0f64..1_500.0) {
            let decision = gate().admit(&ExplainEstimate::new(rows, cost));
            let expected = rows <= 1_000 && cost <= 500.0;
            prop_assert_eq!(decision.pass, expected);
            if !decision.pass {
                prop_assert!(!decision.reason.is_empty());
            }
        }
    }
}
