use crate::engine::ExecutionEngine;
use crate::state::PreviewResult;
use querygate_sql::cap_limit;
use std::sync::Arc;
use std::time::Duration;

/// Runs a row-capped probe of a candidate to surface runtime errors.
pub struct DryRunPreview {
    engine: Arc<dyn ExecutionEngine>,
    row_cap: u64,
    timeout: Duration,
}

impl DryRunPreview {
    pub fn new(engine: Arc<dyn ExecutionEngine>, row_cap: u64, timeout: Duration) -> Self {
        Self {
            engine,
            row_cap,
            timeout,
        }
    }

    /// Engine errors are returned as [`PreviewResult::Failed`], never raised.
    pub async fn preview(&self, sql: &str, sample_limit: u64) -> PreviewResult {
        let probe = cap_limit(sql, sample_limit.min(self.row_cap));
        match self.engine.run(&probe, self.timeout).await {
            Ok(preview) => PreviewResult::Ok { preview },
            Err(err) => {
                tracing::debug!(error = %err, "dry-run preview failed");
                PreviewResult::Failed {
                    error: err.to_string(),
                }
            }
        }
    }
}
