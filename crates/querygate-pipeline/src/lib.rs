//! # querygate-pipeline
//!
//! The bounded question-to-answer state machine: retrieve context, plan,
//! generate SQL, pass it through the lint, policy, cost and dry-run gates,
//! execute and summarize. Rejections feed back into generation (and, once
//! that budget is spent, into planning) until the retry budget runs out.
//!
//! Also home to schema/metric card ingestion and the collaborator traits
//! for the database ([`ExecutionEngine`], [`SchemaCatalog`]).

pub mod cache;
pub mod engine;
pub mod ingest;
pub mod machine;
pub mod pipeline;
pub mod planner;
pub mod preview;
pub mod prompts;
pub mod state;

pub use cache::TtlCache;
pub use engine::{
    EngineError, ExecutionEngine, ExecutionResult, Row, SchemaCatalog, TableDescription,
};
pub use ingest::{IngestError, IngestReport, MetricDef, SchemaIngestor};
pub use machine::{transition, Gate, RetryBudget, Stage, StageOutcome};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, PipelineOutcome, PipelineRun};
pub use preview::DryRunPreview;
pub use state::{
    CandidateSql, Evidence, JoinHint, JoinSpec, PipelineState, PreviewResult, QueryPlan,
    QuestionContext, Rejection,
};
