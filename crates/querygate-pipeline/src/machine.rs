//! Stages, gates and the transition function of the pipeline automaton.
//!
//! ```text
//! Retrieve -> Plan -> Generate -> Lint -> Policy -> Explain -> CostGate
//!          -> Preview -> Execute -> Summarize -> Done
//! ```
//!
//! A rejection at any gate goes back to `Generate` while the regeneration
//! budget lasts, then back to `Plan` while the re-plan budget lasts (which
//! also refills the regeneration budget), then to the terminal `Exhausted`.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Retrieve,
    Plan,
    Generate,
    Lint,
    Policy,
    Explain,
    CostGate,
    Preview,
    Execute,
    Summarize,
    Done,
    Exhausted,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Exhausted)
    }

    /// Unconditional successor.
    pub fn forward(self) -> Stage {
        match self {
            Stage::Retrieve => Stage::Plan,
            Stage::Plan => Stage::Generate,
            Stage::Generate => Stage::Lint,
            Stage::Lint => Stage::Policy,
            Stage::Policy => Stage::Explain,
            Stage::Explain => Stage::CostGate,
            Stage::CostGate => Stage::Preview,
            Stage::Preview => Stage::Execute,
            Stage::Execute => Stage::Summarize,
            Stage::Summarize | Stage::Done => Stage::Done,
            Stage::Exhausted => Stage::Exhausted,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Retrieve => "retrieve",
            Stage::Plan => "plan",
            Stage::Generate => "generate",
            Stage::Lint => "lint",
            Stage::Policy => "policy",
            Stage::Explain => "explain",
            Stage::CostGate => "cost_gate",
            Stage::Preview => "preview",
            Stage::Execute => "execute",
            Stage::Summarize => "summarize",
            Stage::Done => "done",
            Stage::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

/// Validation gates that can reject a candidate.
///
/// A failed `explain` is reported by the cost gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    Lint,
    Policy,
    CostGate,
    Preview,
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Gate::Lint => "lint",
            Gate::Policy => "policy",
            Gate::CostGate => "cost gate",
            Gate::Preview => "dry-run preview",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Advance,
    Rejected(Gate),
}

/// Retry counters carried through the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudget {
    pub max_regenerations: u32,
    pub max_replans: u32,
    /// Regenerations spent against the current plan.
    pub regenerations: u32,
    pub replans: u32,
}

impl RetryBudget {
    pub fn new(max_regenerations: u32, max_replans: u32) -> Self {
        Self {
            max_regenerations,
            max_replans,
            regenerations: 0,
            replans: 0,
        }
    }

    /// Most candidates a run can generate before giving up.
    pub fn max_candidates(&self) -> u32 {
        (self.max_regenerations + 1) * (self.max_replans + 1)
    }
}

pub fn transition(stage: Stage, outcome: StageOutcome, budget: &mut RetryBudget) -> Stage {
    match outcome {
        StageOutcome::Advance => stage.forward(),
        StageOutcome::Rejected(_) if budget.regenerations < budget.max_regenerations => {
            budget.regenerations += 1;
            Stage::Generate
        }
        StageOutcome::Rejected(_) if budget.replans < budget.max_replans => {
            budget.replans += 1;
            budget.regenerations = 0;
            Stage::Plan
        }
        StageOutcome::Rejected(_) => Stage::Exhausted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_happy_path_walks_every_stage() {
        let mut budget = RetryBudget::new(3, 1);
        let mut stage = Stage::Retrieve;
        let mut seen = vec![stage];
        while !stage.is_terminal() {
            stage = transition(stage, StageOutcome::Advance, &mut budget);
            seen.push(stage);
        }
        assert_eq!(seen.len(), 11);
        assert_eq!(stage, Stage::Done);
    }

    #[test]
    fn test_each_gate_failure_returns_to_generate() {
        for (stage, gate) in [
            (Stage::Lint, Gate::Lint),
            (Stage::Policy, Gate::Policy),
            (Stage::CostGate, Gate::CostGate),
            (Stage::Preview, Gate::Preview),
        ] {
            let mut budget = RetryBudget::new(3, 0);
            assert_eq!(
                transition(stage, StageOutcome::Rejected(gate), &mut budget),
                Stage::Generate
            );
            assert_eq!(budget.regenerations, 1);
        }
    }

    #[test]
    fn test_escalates_to_replan_then_exhausts() {
        let mut budget = RetryBudget::new(1, 1);
        let reject = StageOutcome::Rejected(Gate::CostGate);
        assert_eq!(transition(Stage::CostGate, reject, &mut budget), Stage::Generate);
        assert_eq!(transition(Stage::CostGate, reject, &mut budget), Stage::Plan);
        assert_eq!(budget.regenerations, 0);
        assert_eq!(transition(Stage::CostGate, reject, &mut budget), Stage::Generate);
        assert_eq!(transition(Stage::CostGate, reject, &mut budget), Stage::Exhausted);
    }

    proptest! {
        #[test]
        fn prop_always_terminates(
            max_regen in 0u32..5,
            max_replans in 0u32..3,
            rejects in prop::collection::vec(any::<bool>(), 0..200),
        ) {
            let mut budget = RetryBudget::new(max_regen, max_replans);
            let mut stage = Stage::Retrieve;
            let mut candidates = 0u32;
            let mut steps = 0usize;
            let mut script = rejects.into_iter().cycle();
            while !stage.is_terminal() {
                if stage == Stage::Generate {
                    candidates += 1;
                }
                let outcome = match stage {
                    Stage::Lint | Stage::Policy | Stage::CostGate | Stage::Preview
                        if script.next().unwrap_or(true) => StageOutcome::Rejected(Gate::Lint),
                    _ => StageOutcome::Advance,
                };
                stage = transition(stage, outcome, &mut budget);
                steps += 1;
                prop_assert!(steps < 10_000);
            }
            prop_assert!(candidates <= budget.max_candidates());
        }
    }
}
