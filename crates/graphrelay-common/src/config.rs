use serde::{Deserialize, Serialize};
use config::{Config, ConfigError, File, Environment};

// --- Constants for Default Configuration ---
pub const DEFAULT_EVALUATOR_MAX_ROUNDS: u32 = 32;
pub const DEFAULT_EVALUATOR_PAGE_SIZE: usize = 25;
pub const DEFAULT_EVALUATOR_PREDICATE_CONCURRENCY: usize = 8;
pub const DEFAULT_EVALUATOR_TABLE_NAME: &str = "graph";

pub const DEFAULT_MUTATION_INITIAL_DELAY_MS: u64 = 50;
pub const DEFAULT_MUTATION_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_MUTATION_MAX_DELAY_MS: u64 = 2000;
pub const DEFAULT_MUTATION_DEADLINE_MS: u64 = 30000;

pub const DEFAULT_SCHEMA_CACHE_MAX_ENTRIES: u64 = 1000;
pub const DEFAULT_SCHEMA_CACHE_TTL_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Upper bound on evaluation rounds per request.
    pub max_rounds: u32,
    /// Page size used when a connection query sets neither `first` nor `last`.
    pub default_page_size: usize,
    /// How many `Where` predicates may be awaited at once.
    pub predicate_concurrency: usize,
    /// Table whose schema drives pushdown planning.
    pub table_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationConfig {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Retries stop once this much time has elapsed since the first attempt.
    pub deadline_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaCacheConfig {
    pub max_entries: u64,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    #[serde(default)]
    pub mutation: MutationConfig,
    #[serde(default)]
    pub schema_cache: SchemaCacheConfig,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_EVALUATOR_MAX_ROUNDS,
            default_page_size: DEFAULT_EVALUATOR_PAGE_SIZE,
            predicate_concurrency: DEFAULT_EVALUATOR_PREDICATE_CONCURRENCY,
            table_name: DEFAULT_EVALUATOR_TABLE_NAME.into(),
        }
    }
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_MUTATION_INITIAL_DELAY_MS,
            multiplier: DEFAULT_MUTATION_MULTIPLIER,
            max_delay_ms: DEFAULT_MUTATION_MAX_DELAY_MS,
            deadline_ms: DEFAULT_MUTATION_DEADLINE_MS,
        }
    }
}

impl Default for SchemaCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_SCHEMA_CACHE_MAX_ENTRIES,
            ttl_secs: DEFAULT_SCHEMA_CACHE_TTL_SECS,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            evaluator: EvaluatorConfig::default(),
            mutation: MutationConfig::default(),
            schema_cache: SchemaCacheConfig::default(),
        }
    }
}

impl AppConfig {
    /// Defaults, then `graphrelay.toml` if present, then `GRAPHRELAY__*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder("graphrelay")?.build()?.try_deserialize()
    }

    /// Same layering as [`AppConfig::load`] with an explicit config file (required).
    pub fn load_from_path(path: &str) -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(File::with_name(path).required(true))
            .add_source(Environment::with_prefix("GRAPHRELAY").separator("__"))
            .build()?
            .try_deserialize()
    }

    fn builder(file_name: &str) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Ok(Self::defaults()?
            // File: graphrelay.toml
            .add_source(File::with_name(file_name).required(false))
            // Environment: GRAPHRELAY__EVALUATOR__MAX_ROUNDS=8 -> evaluator.max_rounds=8
            .add_source(Environment::with_prefix("GRAPHRELAY").separator("__")))
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("evaluator.max_rounds", DEFAULT_EVALUATOR_MAX_ROUNDS)?
            .set_default("evaluator.default_page_size", DEFAULT_EVALUATOR_PAGE_SIZE as i64)?
            .set_default("evaluator.predicate_concurrency", DEFAULT_EVALUATOR_PREDICATE_CONCURRENCY as i64)?
            .set_default("evaluator.table_name", DEFAULT_EVALUATOR_TABLE_NAME)?
            .set_default("mutation.initial_delay_ms", DEFAULT_MUTATION_INITIAL_DELAY_MS)?
            .set_default("mutation.multiplier", DEFAULT_MUTATION_MULTIPLIER)?
            .set_default("mutation.max_delay_ms", DEFAULT_MUTATION_MAX_DELAY_MS)?
            .set_default("mutation.deadline_ms", DEFAULT_MUTATION_DEADLINE_MS)?
            .set_default("schema_cache.max_entries", DEFAULT_SCHEMA_CACHE_MAX_ENTRIES)?
            .set_default("schema_cache.ttl_secs", DEFAULT_SCHEMA_CACHE_TTL_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = AppConfig::default();
        assert_eq!(config.evaluator.max_rounds, DEFAULT_EVALUATOR_MAX_ROUNDS);
        assert_eq!(config.evaluator.table_name, DEFAULT_EVALUATOR_TABLE_NAME);
        assert_eq!(config.mutation.max_delay_ms, DEFAULT_MUTATION_MAX_DELAY_MS);
        assert_eq!(config.schema_cache.ttl_secs, DEFAULT_SCHEMA_CACHE_TTL_SECS);
    }

    #[test]
    fn test_load_uses_defaults_without_file() {
        let config = AppConfig::load().expect("defaults should deserialize");
        assert!(config.evaluator.default_page_size > 0);
        assert!(config.mutation.multiplier >= 1.0);
    }
}
