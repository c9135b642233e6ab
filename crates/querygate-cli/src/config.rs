//! Runtime settings, read from the environment.
//!
//! Precedence for every value: explicit CLI override > environment variable
//! > default. Empty variables count as unset; malformed numbers are errors
//! naming the variable.

use anyhow::{anyhow, Result};
use querygate_index::IndexPaths;
use querygate_llm::RetryPolicy;
use querygate_pipeline::PipelineConfig;
use querygate_sql::{CostLimits, LintConfig};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const ALLOWED_SCHEMAS_ENV: &str = "QUERYGATE_ALLOWED_SCHEMAS";
pub const MAX_SQL_ROWS_ENV: &str = "QUERYGATE_MAX_SQL_ROWS";
pub const MAX_EST_ROWS_ENV: &str = "QUERYGATE_MAX_EST_ROWS";
pub const MAX_EST_COST_ENV: &str = "QUERYGATE_MAX_EST_COST";
pub const TOP_K_ENV: &str = "QUERYGATE_TOP_K";
pub const INDEX_PATH_ENV: &str = "QUERYGATE_INDEX_PATH";
pub const META_PATH_ENV: &str = "QUERYGATE_META_PATH";
pub const METRICS_PATH_ENV: &str = "QUERYGATE_METRICS_PATH";
pub const LLM_BACKEND_ENV: &str = "QUERYGATE_LLM_BACKEND";
pub const LLM_MODEL_ENV: &str = "QUERYGATE_LLM_MODEL";
pub const EMBED_BACKEND_ENV: &str = "QUERYGATE_EMBED_BACKEND";
pub const EMBED_MODEL_ENV: &str = "QUERYGATE_EMBED_MODEL";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const ANTHROPIC_BASE_URL_ENV: &str = "ANTHROPIC_BASE_URL";
pub const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";
pub const API_TIMEOUT_SECS_ENV: &str = "QUERYGATE_API_TIMEOUT_SECS";
pub const API_MAX_RETRIES_ENV: &str = "QUERYGATE_API_MAX_RETRIES";
pub const API_RETRY_DELAY_SECS_ENV: &str = "QUERYGATE_API_RETRY_DELAY_SECS";
pub const MAX_REGENERATIONS_ENV: &str = "QUERYGATE_MAX_REGENERATIONS";
pub const MAX_REPLANS_ENV: &str = "QUERYGATE_MAX_REPLANS";
pub const PREVIEW_LIMIT_ENV: &str = "QUERYGATE_PREVIEW_LIMIT";
pub const PREVIEW_TIMEOUT_MS_ENV: &str = "QUERYGATE_PREVIEW_TIMEOUT_MS";
pub const EXECUTE_TIMEOUT_MS_ENV: &str = "QUERYGATE_EXECUTE_TIMEOUT_MS";
pub const SQL_DIALECT_ENV: &str = "QUERYGATE_SQL_DIALECT";

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAi,
    Anthropic,
    Ollama,
    Mock,
}

impl FromStr for LlmBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmBackend::OpenAi),
            "anthropic" => Ok(LlmBackend::Anthropic),
            "ollama" => Ok(LlmBackend::Ollama),
            "mock" => Ok(LlmBackend::Mock),
            other => Err(anyhow!(
                "invalid {LLM_BACKEND_ENV}={other:?} (expected openai|anthropic|ollama|mock)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedBackend {
    OpenAi,
    Ollama,
    TokenHash,
}

impl FromStr for EmbedBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(EmbedBackend::OpenAi),
            "ollama" => Ok(EmbedBackend::Ollama),
            "token-hash" | "token_hash" | "hash" => Ok(EmbedBackend::TokenHash),
            other => Err(anyhow!(
                "invalid {EMBED_BACKEND_ENV}={other:?} (expected openai|ollama|token-hash)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub allowed_schemas: Vec<String>,
    pub max_sql_rows: u64,
    pub max_est_rows: u64,
    pub max_est_cost: f64,
    pub top_k: usize,
    pub index_path: PathBuf,
    pub meta_path: PathBuf,
    pub metrics_path: PathBuf,
    pub llm_backend: LlmBackend,
    pub llm_model: Option<String>,
    pub embed_backend: EmbedBackend,
    pub embed_model: Option<String>,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub anthropic_api_key: String,
    pub anthropic_base_url: String,
    pub ollama_host: String,
    pub api_timeout_secs: u64,
    pub api_max_retries: u32,
    pub api_retry_delay_secs: u64,
    pub max_regenerations: u32,
    pub max_replans: u32,
    pub preview_limit: u64,
    pub preview_timeout_ms: u64,
    pub execute_timeout_ms: u64,
    pub sql_dialect: String,
}

/// Variable lookup; `None` means unset.
type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_string(lookup: Lookup<'_>, name: &str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or(lookup: Lookup<'_>, name: &str, default: &str) -> String {
    env_string(lookup, name).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: FromStr>(lookup: Lookup<'_>, name: &str, default: T, expected: &str) -> Result<T> {
    match env_string(lookup, name) {
        Some(v) => v
            .parse::<T>()
            .map_err(|_| anyhow!("invalid {name}={v:?} (expected {expected})")),
        None => Ok(default),
    }
}

pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|name: &str| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        let database_url = match env_string(lookup, DATABASE_URL_ENV) {
            Some(url) => url,
            None => {
                let port: u16 = env_parse(lookup, "PGPORT", 5432, "integer port")?;
                format!(
                    "postgres://{}:{}@{}:{}/{}",
                    env_or(lookup, "PGUSER", "postgres"),
                    env_or(lookup, "PGPASSWORD", "postgres"),
                    env_or(lookup, "PGHOST", "localhost"),
                    port,
                    env_or(lookup, "PGDATABASE", "postgres"),
                )
            }
        };

        let allowed_schemas = split_list(&env_or(lookup, ALLOWED_SCHEMAS_ENV, "public"));
        if allowed_schemas.is_empty() {
            return Err(anyhow!("{ALLOWED_SCHEMAS_ENV} must name at least one schema"));
        }

        let max_est_cost: f64 =
            env_parse(lookup, MAX_EST_COST_ENV, 1_000_000.0, "number")?;
        if !max_est_cost.is_finite() || max_est_cost < 0.0 {
            return Err(anyhow!(
                "invalid {MAX_EST_COST_ENV}={max_est_cost} (expected a finite non-negative number)"
            ));
        }

        let llm_backend: LlmBackend = env_or(lookup, LLM_BACKEND_ENV, "openai").parse()?;
        let embed_backend: EmbedBackend = env_or(lookup, EMBED_BACKEND_ENV, "openai").parse()?;

        Ok(Self {
            database_url,
            allowed_schemas,
            max_sql_rows: env_parse(lookup, MAX_SQL_ROWS_ENV, 200, "integer row count")?,
            max_est_rows: env_parse(lookup, MAX_EST_ROWS_ENV, 1_000_000, "integer row count")?,
            max_est_cost,
            top_k: env_parse(lookup, TOP_K_ENV, 6, "integer")?,
            index_path: env_or(lookup, INDEX_PATH_ENV, "./index/vectors.cbor").into(),
            meta_path: env_or(lookup, META_PATH_ENV, "./index/meta.json").into(),
            metrics_path: env_or(lookup, METRICS_PATH_ENV, "./data/metrics.yaml").into(),
            llm_backend,
            llm_model: env_string(lookup, LLM_MODEL_ENV),
            embed_backend,
            embed_model: env_string(lookup, EMBED_MODEL_ENV),
            openai_api_key: env_or(lookup, OPENAI_API_KEY_ENV, ""),
            openai_base_url: env_or(lookup, OPENAI_BASE_URL_ENV, DEFAULT_OPENAI_BASE_URL),
            anthropic_api_key: env_or(lookup, ANTHROPIC_API_KEY_ENV, ""),
            anthropic_base_url: env_or(lookup, ANTHROPIC_BASE_URL_ENV, DEFAULT_ANTHROPIC_BASE_URL),
            ollama_host: env_or(lookup, OLLAMA_HOST_ENV, DEFAULT_OLLAMA_HOST),
            api_timeout_secs: env_parse(
                lookup,
                API_TIMEOUT_SECS_ENV,
                30,
                "integer seconds; 0 disables",
            )?,
            api_max_retries: env_parse(lookup, API_MAX_RETRIES_ENV, 3, "integer attempts")?,
            api_retry_delay_secs: env_parse(lookup, API_RETRY_DELAY_SECS_ENV, 2, "integer seconds")?,
            max_regenerations: env_parse(lookup, MAX_REGENERATIONS_ENV, 3, "integer")?,
            max_replans: env_parse(lookup, MAX_REPLANS_ENV, 1, "integer")?,
            preview_limit: env_parse(lookup, PREVIEW_LIMIT_ENV, 100, "integer row count")?,
            preview_timeout_ms: env_parse(lookup, PREVIEW_TIMEOUT_MS_ENV, 8_000, "integer milliseconds")?,
            execute_timeout_ms: env_parse(lookup, EXECUTE_TIMEOUT_MS_ENV, 15_000, "integer milliseconds")?,
            sql_dialect: env_or(lookup, SQL_DIALECT_ENV, "postgres"),
        })
    }

    /// `None` disables the per-request timeout.
    pub fn api_timeout(&self) -> Option<Duration> {
        (self.api_timeout_secs > 0).then(|| Duration::from_secs(self.api_timeout_secs))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.api_max_retries,
            Duration::from_secs(self.api_retry_delay_secs),
        )
    }

    pub fn index_paths(&self) -> IndexPaths {
        IndexPaths::new(self.index_path.clone(), self.meta_path.clone())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            lint: LintConfig {
                allowed_schemas: self.allowed_schemas.clone(),
                max_rows: self.max_sql_rows,
                dialect: self.sql_dialect.clone(),
            },
            cost: CostLimits {
                max_estimated_rows: self.max_est_rows,
                max_estimated_cost: self.max_est_cost,
                row_cap: self.max_sql_rows,
            },
            top_k: self.top_k,
            preview_limit: self.preview_limit,
            preview_timeout: Duration::from_millis(self.preview_timeout_ms),
            execute_timeout: Duration::from_millis(self.execute_timeout_ms),
            max_regenerations: self.max_regenerations,
            max_replans: self.max_replans,
            ..PipelineConfig::default()
        }
    }
}
