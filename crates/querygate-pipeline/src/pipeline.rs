//! The question-to-answer driver.

use crate::cache::TtlCache;
use crate::engine::{EngineError, ExecutionEngine, SchemaCatalog};
use crate::machine::{transition, Gate, RetryBudget, Stage, StageOutcome};
use crate::planner;
use crate::preview::DryRunPreview;
use crate::prompts::{self, SqlPromptInput};
use crate::state::{JoinHint, PipelineState, PreviewResult, Rejection};
use querygate_index::SimilarityIndex;
use querygate_llm::{CompletionService, LlmError};
use querygate_sql::{
    clean_sql_output, enforce_limit, AllowAll, CostGate, CostLimits, LintConfig, PolicyGuard,
    SqlValidator,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Dialect, allowed schemas and row cap.
    pub lint: LintConfig,
    pub cost: CostLimits,
    pub top_k: usize,
    pub plan_context_fragments: usize,
    pub summary_rows: usize,
    pub summary_context_fragments: usize,
    pub preview_limit: u64,
    pub preview_timeout: Duration,
    pub execute_timeout: Duration,
    pub max_regenerations: u32,
    pub max_replans: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let lint = LintConfig::default();
        let cost = CostLimits {
            row_cap: lint.max_rows,
            ..CostLimits::default()
        };
        Self {
            lint,
            cost,
            top_k: 6,
            plan_context_fragments: 5,
            summary_rows: 10,
            summary_context_fragments: 6,
            preview_limit: 100,
            preview_timeout: Duration::from_millis(8_000),
            execute_timeout: Duration::from_millis(15_000),
            max_regenerations: 3,
            max_replans: 1,
        }
    }
}

impl PipelineConfig {
    pub fn row_cap(&self) -> u64 {
        self.lint.max_rows
    }

    /// Schema assumed for unqualified table names.
    pub fn default_schema(&self) -> &str {
        self.lint
            .allowed_schemas
            .first()
            .map(String::as_str)
            .unwrap_or("public")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    Config(String),
    #[error("{stage} stage failed: {source}")]
    Completion {
        stage: Stage,
        #[source]
        source: LlmError,
    },
    #[error("execution failed: {0}")]
    Execution(#[source] EngineError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Answered {
        answer: String,
    },
    /// Every allowed candidate was rejected.
    Rejected {
        gate: Gate,
        reasons: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suggested_patch: Option<String>,
        attempts: u32,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub outcome: PipelineOutcome,
    pub state: PipelineState,
    pub budget: RetryBudget,
}

pub struct Pipeline {
    config: PipelineConfig,
    completion: Arc<dyn CompletionService>,
    index: Arc<SimilarityIndex>,
    engine: Arc<dyn ExecutionEngine>,
    catalog: Arc<dyn SchemaCatalog>,
    policy: Arc<dyn PolicyGuard>,
    validator: SqlValidator,
    cost_gate: CostGate,
    preview: DryRunPreview,
    retrieval_cache: Option<Arc<TtlCache<String, Vec<String>>>>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        completion: Arc<dyn CompletionService>,
        index: Arc<SimilarityIndex>,
        engine: Arc<dyn ExecutionEngine>,
        catalog: Arc<dyn SchemaCatalog>,
    ) -> Result<Self, PipelineError> {
        let validator = SqlValidator::new(config.lint.clone())
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        let cost_gate = CostGate::new(config.cost.clone());
        let preview = DryRunPreview::new(
            Arc::clone(&engine),
            config.row_cap(),
            config.preview_timeout,
        );
        Ok(Self {
            config,
            completion,
            index,
            engine,
            catalog,
            policy: Arc::new(AllowAll),
            validator,
            cost_gate,
            preview,
            retrieval_cache: None,
        })
    }

    pub fn with_policy(mut self, policy: Arc<dyn PolicyGuard>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retrieval_cache(mut self, cache: Arc<TtlCache<String, Vec<String>>>) -> Self {
        self.retrieval_cache = Some(cache);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Drive one question to an answer or to a final rejection.
    ///
    /// Gate rejections are part of a successful run; only exhausted
    /// completion retries and final execution errors are returned as `Err`.
    pub async fn run(&self, question: &str) -> Result<PipelineRun, PipelineError> {
        let state = PipelineState::new(question);
        let span = tracing::info_span!("pipeline", run_id = %state.run_id);
        self.drive(state).instrument(span).await
    }

    async fn drive(&self, mut state: PipelineState) -> Result<PipelineRun, PipelineError> {
        let mut budget =
            RetryBudget::new(self.config.max_regenerations, self.config.max_replans);
        let mut stage = Stage::Retrieve;

        loop {
            tracing::debug!(stage = %stage, revision = state.revision, "entering stage");
            let outcome = match stage {
                Stage::Retrieve => {
                    let fragments = self.retrieve(&mut state).await;
                    state.input.fragments = fragments;
                    StageOutcome::Advance
                }
                Stage::Plan => {
                    self.plan(&mut state).await?;
                    StageOutcome::Advance
                }
                Stage::Generate => {
                    self.generate(&mut state).await?;
                    StageOutcome::Advance
                }
                Stage::Lint => {
                    let result = self.validator.lint(state.sql_text());
                    state.lint = Some(result.clone());
                    if result.ok {
                        for warning in &result.warnings {
                            tracing::debug!(warning = %warning, "lint warning");
                        }
                        StageOutcome::Advance
                    } else {
                        reject(&mut state, Gate::Lint, result.errors, None)
                    }
                }
                Stage::Policy => {
                    let result = self.policy.check(state.sql_text());
                    state.policy = Some(result.clone());
                    if result.ok {
                        StageOutcome::Advance
                    } else {
                        reject(&mut state, Gate::Policy, result.errors, None)
                    }
                }
                Stage::Explain => match self.engine.explain(state.sql_text()).await {
                    Ok(estimate) => {
                        state.explain = Some(estimate);
                        StageOutcome::Advance
                    }
                    Err(err) => reject(
                        &mut state,
                        Gate::CostGate,
                        vec![format!("explain failed: {err}")],
                        None,
                    ),
                },
                Stage::CostGate => match state.explain.as_ref() {
                    Some(estimate) => {
                        let decision = self.cost_gate.admit(estimate);
                        state.cost = Some(decision.clone());
                        if decision.pass {
                            StageOutcome::Advance
                        } else {
                            reject(
                                &mut state,
                                Gate::CostGate,
                                vec![decision.reason],
                                decision.suggested_patch,
                            )
                        }
                    }
                    None => reject(
                        &mut state,
                        Gate::CostGate,
                        vec!["no plan estimate available".to_string()],
                        None,
                    ),
                },
                Stage::Preview => {
                    let preview = self
                        .preview
                        .preview(state.sql_text(), self.config.preview_limit)
                        .await;
                    state.preview = Some(preview.clone());
                    match preview {
                        PreviewResult::Ok { .. } => StageOutcome::Advance,
                        PreviewResult::Failed { error } => {
                            reject(&mut state, Gate::Preview, vec![error], None)
                        }
                    }
                }
                Stage::Execute => {
                    let result = self
                        .engine
                        .run(state.sql_text(), self.config.execute_timeout)
                        .await
                        .map_err(PipelineError::Execution)?;
                    tracing::info!(rows = result.row_count(), "query executed");
                    state.result = Some(result);
                    StageOutcome::Advance
                }
                Stage::Summarize => {
                    self.summarize(&mut state).await?;
                    StageOutcome::Advance
                }
                Stage::Done => {
                    let answer = state.answer.clone().unwrap_or_default();
                    return Ok(PipelineRun {
                        outcome: PipelineOutcome::Answered { answer },
                        state,
                        budget,
                    });
                }
                Stage::Exhausted => {
                    let last = state.evidence.rejections.last().cloned();
                    let (gate, reasons, suggested_patch) = match last {
                        Some(r) => (r.gate, r.reasons, r.suggested_patch),
                        None => (Gate::Lint, vec!["no candidate accepted".to_string()], None),
                    };
                    tracing::warn!(
                        gate = %gate,
                        attempts = state.revision,
                        "retry budget exhausted; giving up"
                    );
                    return Ok(PipelineRun {
                        outcome: PipelineOutcome::Rejected {
                            gate,
                            reasons,
                            suggested_patch,
                            attempts: state.revision,
                        },
                        state,
                        budget,
                    });
                }
            };

            let next = transition(stage, outcome, &mut budget);
            if let StageOutcome::Rejected(_) = outcome {
                match next {
                    Stage::Generate => state.reset_for_regeneration(),
                    Stage::Plan => {
                        tracing::info!(replans = budget.replans, "re-planning");
                        state.reset_for_replan();
                    }
                    _ => {}
                }
            }
            stage = next;
        }
    }

    async fn retrieve(&self, state: &mut PipelineState) -> Vec<String> {
        let key = state.question().trim().to_string();
        if let Some(cache) = &self.retrieval_cache {
            if let Some(hit) = cache.get(&key) {
                tracing::debug!(fragments = hit.len(), "retrieval cache hit");
                return hit;
            }
        }
        match self.index.query(&key, self.config.top_k).await {
            Ok(fragments) => {
                if let Some(cache) = &self.retrieval_cache {
                    cache.put(key, fragments.clone());
                }
                fragments
            }
            Err(err) => {
                tracing::warn!(error = %err, "retrieval failed; continuing without context");
                state.evidence.retrieval_error = Some(err.to_string());
                Vec::new()
            }
        }
    }

    async fn plan(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        let n = self.config.plan_context_fragments.min(state.input.fragments.len());
        let prompt = prompts::plan_prompt(state.question(), &state.input.fragments[..n]);
        let raw = self
            .completion
            .complete(&prompt)
            .await
            .map_err(|source| PipelineError::Completion {
                stage: Stage::Plan,
                source,
            })?;
        let mut plan = planner::parse_plan(&raw);

        let hint = planner::infer_join_hint(
            &plan,
            self.catalog.as_ref(),
            self.config.default_schema(),
        )
        .await;
        if let Some(JoinHint::Resolved { path, .. }) = &hint {
            planner::inject_joins(&mut plan, path);
        }
        state.evidence.join_hint = hint;
        state.plan = Some(plan);
        Ok(())
    }

    async fn generate(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        let plan = state.plan.clone().unwrap_or_default();
        let prompt = prompts::sql_prompt(&SqlPromptInput {
            dialect: &self.config.lint.dialect,
            allowed_schemas: &self.config.lint.allowed_schemas,
            row_cap: self.config.row_cap(),
            question: state.question(),
            plan: &plan,
            fragments: &state.input.fragments,
            feedback: state.evidence.rejections.last(),
        });
        let raw = self
            .completion
            .complete(&prompt)
            .await
            .map_err(|source| PipelineError::Completion {
                stage: Stage::Generate,
                source,
            })?;
        let text = enforce_limit(&clean_sql_output(&raw), self.config.row_cap());
        let candidate = state.push_candidate(text);
        tracing::debug!(revision = candidate.revision, sql = %candidate.text, "generated candidate");
        Ok(())
    }

    async fn summarize(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        let result = state.result.clone().unwrap_or_default();
        let n = self
            .config
            .summary_context_fragments
            .min(state.input.fragments.len());
        let prompt = prompts::summary_prompt(
            state.question(),
            &result,
            self.config.summary_rows,
            &state.input.fragments[..n],
        );
        let answer = self
            .completion
            .complete(&prompt)
            .await
            .map_err(|source| PipelineError::Completion {
                stage: Stage::Summarize,
                source,
            })?;
        state.answer = Some(answer.trim().to_string());
        Ok(())
    }
}

fn reject(
    state: &mut PipelineState,
    gate: Gate,
    mut reasons: Vec<String>,
    suggested_patch: Option<String>,
) -> StageOutcome {
    if reasons.is_empty() {
        reasons.push(format!("rejected by {gate}"));
    }
    let revision = state.sql.as_ref().map(|c| c.revision).unwrap_or(0);
    tracing::info!(gate = %gate, revision, reasons = ?reasons, "candidate rejected");
    state.evidence.rejections.push(Rejection {
        gate,
        reasons,
        suggested_patch,
        revision,
        sql: state.sql_text().to_string(),
    });
    StageOutcome::Rejected(gate)
}
