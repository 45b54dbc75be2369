//! Loader configuration
//!
//! Everything that decides how a loaded IR becomes an engine: which strategy,
//! how it is partitioned, how the parallel filter is fitted, and which
//! preprocessing steps run first. Loadable from JSON; missing fields take
//! their defaults, unknown fields are rejected.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use cv_core::{ConvError, ConvResult, MAX_IR_LENGTH, MAX_PARTITION_SIZE, MIN_PARTITION_SIZE, ProcessSetup};
use cv_dsp::{ConvolverOptions, EngineKind, ParallelFilterConfig};

/// Block size used when neither the config nor the host gives one
const FALLBACK_BLOCK_SIZE: usize = 256;

/// Partitioning of the FFT strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartitionConfig {
    /// Uniform block / non-uniform head size; `None` derives it from the host block size
    pub block_size: Option<usize>,
    /// Largest non-uniform partition
    pub max_partition_size: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            block_size: None,
            max_partition_size: 4096,
        }
    }
}

/// Optional IR preparation steps (run in a fixed order, see `preprocess`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreprocessConfig {
    /// Average all channels to one
    pub mono: bool,
    /// Invert the magnitude response
    pub invert: bool,
    /// Fade the response below this frequency toward its average
    pub low_fade_hz: Option<f64>,
    /// Fade the response above this frequency toward its average
    pub high_fade_hz: Option<f64>,
    /// Fractional-octave smoothing width
    pub smoothing_octaves: Option<f64>,
    pub normalize: bool,
    pub min_phase: bool,
    /// Cut the tail once it falls this far below the total energy (negative dB)
    pub truncate_db: Option<f64>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            mono: false,
            invert: false,
            low_fade_hz: None,
            high_fade_hz: None,
            smoothing_octaves: None,
            normalize: false,
            min_phase: false,
            truncate_db: None,
        }
    }
}

impl PreprocessConfig {
    fn validate(&self) -> ConvResult<()> {
        let positive = |name: &str, value: Option<f64>| match value {
            Some(v) if !v.is_finite() || v <= 0.0 => Err(ConvError::Config(format!("{name} must be positive, got {v}"))),
            _ => Ok(()),
        };
        positive("low_fade_hz", self.low_fade_hz)?;
        positive("high_fade_hz", self.high_fade_hz)?;
        positive("smoothing_octaves", self.smoothing_octaves)?;
        if let Some(db) = self.truncate_db {
            if !db.is_finite() || db >= 0.0 {
                return Err(ConvError::Config(format!("truncate_db must be negative, got {db}")));
            }
        }
        Ok(())
    }
}

/// Complete loader configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    pub engine: EngineKind,
    pub partition: PartitionConfig,
    pub parallel: ParallelFilterConfig,
    pub preprocess: PreprocessConfig,
    /// Longest IR accepted after preprocessing, in samples
    pub max_ir_length: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            partition: PartitionConfig::default(),
            parallel: ParallelFilterConfig::default(),
            preprocess: PreprocessConfig::default(),
            max_ir_length: MAX_IR_LENGTH,
        }
    }
}

fn check_partition(name: &str, size: usize) -> ConvResult<()> {
    if !size.is_power_of_two() || !(MIN_PARTITION_SIZE..=MAX_PARTITION_SIZE).contains(&size) {
        return Err(ConvError::Config(format!(
            "{name} must be a power of two in {MIN_PARTITION_SIZE}..={MAX_PARTITION_SIZE}, got {size}"
        )));
    }
    Ok(())
}

impl LoaderConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> ConvResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConvError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConvResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> ConvResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ConvError::Config(e.to_string()))
    }

    pub fn validate(&self) -> ConvResult<()> {
        if let Some(block_size) = self.partition.block_size {
            check_partition("block_size", block_size)?;
        }
        check_partition("max_partition_size", self.partition.max_partition_size)?;
        if self.max_ir_length == 0 || self.max_ir_length > MAX_IR_LENGTH {
            return Err(ConvError::Config(format!(
                "max_ir_length must be in 1..={MAX_IR_LENGTH}, got {}",
                self.max_ir_length
            )));
        }
        self.parallel
            .validate()
            .map_err(|e| ConvError::Config(e.to_string()))?;
        self.preprocess.validate()
    }

    /// Engine construction options for the given host setup
    pub fn convolver_options(&self, setup: Option<&ProcessSetup>) -> ConvolverOptions {
        let block_size = self
            .partition
            .block_size
            .or_else(|| setup.map(ConvolverOptions::block_size_for))
            .unwrap_or(FALLBACK_BLOCK_SIZE);

        ConvolverOptions {
            kind: self.engine,
            block_size,
            max_partition_size: self.partition.max_partition_size.max(block_size),
            parallel: self.parallel.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = LoaderConfig::from_json("{}").unwrap();
        assert_eq!(config, LoaderConfig::default());
        assert_eq!(config.engine, EngineKind::NonUniform);
    }

    #[test]
    fn test_partial_json() {
        let config = LoaderConfig::from_json(
            r#"{ "engine": "parallel_filter", "parallel": { "sections": 32 }, "preprocess": { "normalize": true } }"#,
        )
        .unwrap();
        assert_eq!(config.engine, EngineKind::ParallelFilter);
        assert_eq!(config.parallel.sections, 32);
        assert_eq!(config.parallel.fir_order, ParallelFilterConfig::default().fir_order);
        assert!(config.preprocess.normalize);
    }

    #[test]
    fn test_unknown_values_rejected() {
        assert!(matches!(
            LoaderConfig::from_json(r#"{ "engine": "fastest" }"#),
            Err(ConvError::Config(_))
        ));
        assert!(matches!(
            LoaderConfig::from_json(r#"{ "partitions": 4 }"#),
            Err(ConvError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        for json in [
            r#"{ "partition": { "block_size": 100 } }"#,
            r#"{ "partition": { "max_partition_size": 16 } }"#,
            r#"{ "max_ir_length": 0 }"#,
            r#"{ "preprocess": { "truncate_db": 6.0 } }"#,
            r#"{ "preprocess": { "low_fade_hz": -20.0 } }"#,
            r#"{ "parallel": { "warp": 1.5 } }"#,
        ] {
            assert!(LoaderConfig::from_json(json).is_err(), "{json}");
        }
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = LoaderConfig::default();
        config.partition.block_size = Some(128);
        config.preprocess.truncate_db = Some(-60.0);
        let json = config.to_json().unwrap();
        assert_eq!(LoaderConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_block_size_resolution() {
        let setup = ProcessSetup::new(480, 48000.0).unwrap();
        let mut config = LoaderConfig::default();
        assert_eq!(config.convolver_options(Some(&setup)).block_size, 512);
        assert_eq!(config.convolver_options(None).block_size, FALLBACK_BLOCK_SIZE);

        config.partition.block_size = Some(64);
        assert_eq!(config.convolver_options(Some(&setup)).block_size, 64);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loader.json");
        fs::write(&path, r#"{ "engine": "uniform" }"#).unwrap();
        assert_eq!(LoaderConfig::from_file(&path).unwrap().engine, EngineKind::Uniform);
        assert!(matches!(
            LoaderConfig::from_file(dir.path().join("missing.json")),
            Err(ConvError::Io(_))
        ));
    }
}
