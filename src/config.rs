//! Engine and staging configuration.
//!
//! Operational parameters arrive from a config file (or are built in code)
//! and are validated before the engine accepts them. Defaults match the
//! production deployment this engine grew out of: 50k-record pages, a 0.9
//! match threshold, and a three-million-pair batch guard.

use serde::Deserialize;

use crate::contract::{AttributeContract, QueryContract, SourceQuery};
use crate::error::ValidationError;

/// Default records pulled per batch.
pub const DEFAULT_BATCH_SIZE: usize = 50_000;
/// Default minimum match probability for an edge to count.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.9;
/// Default abort threshold for candidate-pair count per batch.
pub const DEFAULT_MAX_PAIRS_PER_BATCH: usize = 3_000_000;

/// Operational parameters for the batch pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Records pulled per page.
    pub batch_size: usize,
    /// Optional cap on total records touched in one run.
    pub run_limit: Option<usize>,
    /// Minimum match probability for an edge to be considered.
    pub match_threshold: f64,
    /// Candidate-pair count above which a batch aborts.
    pub max_pairs_per_batch: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            run_limit: None,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            max_pairs_per_batch: DEFAULT_MAX_PAIRS_PER_BATCH,
        }
    }
}

impl EngineConfig {
    /// Checks parameter ranges.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] if the batch size or pair cap is zero,
    /// or the threshold is outside [0, 1].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 {
            return Err(ValidationError::BatchSizeZero);
        }
        if self.max_pairs_per_batch == 0 {
            return Err(ValidationError::PairCapZero);
        }
        if !self.match_threshold.is_finite() || !(0.0..=1.0).contains(&self.match_threshold) {
            return Err(ValidationError::ThresholdOutOfRange {
                value: self.match_threshold,
            });
        }
        Ok(())
    }
}

/// Staging-side configuration: the optional custom source query and the
/// attribute columns every staged record must carry.
#[derive(Debug, Clone, Default)]
pub struct StagingConfig {
    /// Validated custom source query, if one was configured.
    pub source_query: Option<SourceQuery>,
    /// Required normalized attribute names.
    pub required_attributes: Vec<String>,
}

impl StagingConfig {
    /// The attribute contract stores should enforce on insert.
    #[must_use]
    pub fn attribute_contract(&self) -> AttributeContract {
        AttributeContract::new(self.required_attributes.iter().cloned())
    }
}

/// Full configuration: engine parameters plus staging contract.
#[derive(Debug, Clone, Default)]
pub struct DedupeConfig {
    /// Batch pipeline parameters.
    pub engine: EngineConfig,
    /// Staging contract parameters.
    pub staging: StagingConfig,
}

impl DedupeConfig {
    /// Parses configuration from TOML text, applies defaults for missing
    /// keys, and validates everything, including any configured source query
    /// against the staging contract.
    ///
    /// ```toml
    /// [engine]
    /// batch_size = 50000
    /// match_threshold = 0.9
    /// max_pairs_per_batch = 3000000
    ///
    /// [staging]
    /// required_attributes = ["full_name", "birth_date"]
    /// source_query = "SELECT id, full_name, birth_date FROM src WHERE id > :last_id LIMIT :limit"
    /// ```
    ///
    /// # Errors
    /// Returns [`ValidationError::ConfigParse`] for malformed TOML and the
    /// specific validation error for out-of-range parameters or a query that
    /// breaks the contract.
    pub fn from_toml_str(text: &str) -> Result<Self, ValidationError> {
        let raw: RawConfig = toml::from_str(text).map_err(|e| ValidationError::ConfigParse {
            message: e.to_string(),
        })?;

        let defaults = EngineConfig::default();
        let raw_engine = raw.engine.unwrap_or_default();
        let engine = EngineConfig {
            batch_size: raw_engine.batch_size.unwrap_or(defaults.batch_size),
            run_limit: raw_engine.run_limit,
            match_threshold: raw_engine
                .match_threshold
                .unwrap_or(defaults.match_threshold),
            max_pairs_per_batch: raw_engine
                .max_pairs_per_batch
                .unwrap_or(defaults.max_pairs_per_batch),
        };
        engine.validate()?;

        let raw_staging = raw.staging.unwrap_or_default();
        let required_attributes = raw_staging.required_attributes.unwrap_or_default();
        let source_query = match raw_staging.source_query {
            Some(text) => {
                let contract = QueryContract::with_columns(required_attributes.iter().cloned());
                Some(SourceQuery::parse(text, &contract)?)
            }
            None => None,
        };

        Ok(Self {
            engine,
            staging: StagingConfig {
                source_query,
                required_attributes,
            },
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    engine: Option<RawEngine>,
    staging: Option<RawStaging>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEngine {
    batch_size: Option<usize>,
    run_limit: Option<usize>,
    match_threshold: Option<f64>,
    max_pairs_per_batch: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStaging {
    source_query: Option<String>,
    required_attributes: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_production_values() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 50_000);
        assert_eq!(config.run_limit, None);
        assert!((config.match_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.max_pairs_per_batch, 3_000_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let config = EngineConfig {
            batch_size: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::BatchSizeZero)
        ));
    }

    #[test]
    fn test_validate_rejects_zero_pair_cap() {
        let config = EngineConfig {
            max_pairs_per_batch: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ValidationError::PairCapZero)));
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        for bad in [-0.1, 1.1, f64::NAN] {
            let config = EngineConfig {
                match_threshold: bad,
                ..EngineConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ValidationError::ThresholdOutOfRange { .. })
            ));
        }
    }

    #[test]
    fn test_from_toml_empty_uses_defaults() {
        let config = DedupeConfig::from_toml_str("").unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert!(config.staging.source_query.is_none());
        assert!(config.staging.attribute_contract().is_empty());
    }

    #[test]
    fn test_from_toml_partial_overrides() {
        let config = DedupeConfig::from_toml_str(
            r#"
            [engine]
            batch_size = 500
            run_limit = 2000
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.batch_size, 500);
        assert_eq!(config.engine.run_limit, Some(2000));
        assert!((config.engine.match_threshold - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_toml_rejects_malformed_text() {
        let err = DedupeConfig::from_toml_str("[engine\nbatch_size = 1").unwrap_err();
        assert!(matches!(err, ValidationError::ConfigParse { .. }));
    }

    #[test]
    fn test_from_toml_rejects_invalid_engine_values() {
        let err = DedupeConfig::from_toml_str("[engine]\nmatch_threshold = 2.0").unwrap_err();
        assert!(matches!(err, ValidationError::ThresholdOutOfRange { .. }));
    }

    #[test]
    fn test_from_toml_validates_source_query() {
        let config = DedupeConfig::from_toml_str(
            r#"
            [staging]
            required_attributes = ["full_name"]
            source_query = "SELECT id, full_name FROM src WHERE id > :last_id ORDER BY id LIMIT :limit"
            "#,
        )
        .unwrap();
        assert!(config.staging.source_query.is_some());
        assert_eq!(config.staging.required_attributes, vec!["full_name"]);
    }

    #[test]
    fn test_from_toml_rejects_query_missing_column() {
        let err = DedupeConfig::from_toml_str(
            r#"
            [staging]
            required_attributes = ["full_name"]
            source_query = "SELECT id FROM src WHERE id > :last_id LIMIT :limit"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::MissingColumn { .. }));
    }

    #[test]
    fn test_from_toml_rejects_query_missing_placeholder() {
        let err = DedupeConfig::from_toml_str(
            r#"
            [staging]
            source_query = "SELECT id FROM src LIMIT :limit"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::MissingPlaceholder { .. }));
    }
}
