//! Document-level validation.
//!
//! Surfaces everything the trainer would otherwise discover minutes into a
//! run (zero sizes, out-of-range probabilities, a target regex that does not
//! compile) before any weights load. The first violation comes back as a
//! typed error; non-fatal findings accumulate as warnings on the report.

use crate::optimizer::{OptimizerKind, ParamType};
use crate::schema::{
    DatasetConfig, InitLoraWeights, LoraConfig, OptimizerConfig, TargetModules, TrainConfig,
    TrainingConfig, WandbConfig,
};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// Named LoRA init strategies the consumer recognizes besides the bool form.
const KNOWN_INIT_STRATEGIES: &[&str] = &["gaussian", "olora", "pissa", "eva", "loftq"];

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("flux_path must not be empty")]
    EmptyFluxPath,

    #[error("train.batch_size must be >= 1")]
    InvalidBatchSize,

    #[error("train.accumulate_grad_batches must be >= 1")]
    InvalidGradAccumulation,

    #[error("train.batch_size * train.accumulate_grad_batches overflows ({batch_size} * {accumulate_grad_batches})")]
    EffectiveBatchOverflow {
        batch_size: usize,
        accumulate_grad_batches: usize,
    },

    #[error("train.save_interval must be >= 1")]
    InvalidSaveInterval,

    #[error("train.sample_interval must be >= 1")]
    InvalidSampleInterval,

    #[error("train.max_steps must be -1 (no limit) or >= 1, got {0}")]
    InvalidMaxSteps(i64),

    #[error("train.save_path must not be empty")]
    EmptySavePath,

    #[error("train.dataset.type must not be empty when present")]
    EmptyDatasetType,

    #[error("train.dataset.path must not be empty")]
    EmptyDatasetPath,

    #[error("{field} must be >= 1")]
    InvalidSize { field: &'static str },

    #[error("{field} must be in [0, 1], got {value}")]
    InvalidProbability { field: &'static str, value: f64 },

    #[error("train.lora_config.r must be >= 1")]
    InvalidLoraRank,

    #[error("train.lora_config.lora_alpha must be >= 1")]
    InvalidLoraAlpha,

    #[error("train.lora_config.lora_dropout must be in [0, 1), got {0}")]
    InvalidLoraDropout(f64),

    #[error("train.lora_config.init_lora_weights '{strategy}' is not recognized (known: {known})")]
    UnknownInitStrategy { strategy: String, known: String },

    #[error("train.lora_config.target_modules does not compile as a regex: {pattern}")]
    InvalidTargetPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("train.lora_config.target_modules must name at least one module")]
    EmptyTargetModules,

    #[error("train.lora_config.target_modules contains an empty module name")]
    EmptyTargetModuleName,

    #[error("train.optimizer.type '{got}' is not recognized (known: {known})")]
    UnknownOptimizerType { got: String, known: String },

    #[error("train.optimizer.params.{key} must be {expected}")]
    OptimizerParamType { key: String, expected: &'static str },

    #[error("train.optimizer.params.{key} is out of range: {reason}")]
    OptimizerParamRange { key: String, reason: String },

    #[error("train.wandb.project must not be empty")]
    EmptyWandbProject,
}

/// Outcome of a successful validation. The config is usable; the warnings
/// are findings worth reading before committing to a long run.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

/// Validate a parsed config against every documented constraint.
pub fn validate_config(config: &TrainingConfig) -> Result<ValidationReport, ValidationError> {
    let mut report = ValidationReport::default();

    if config.flux_path.trim().is_empty() {
        return Err(ValidationError::EmptyFluxPath);
    }

    validate_train(&config.train, &mut report)?;

    Ok(report)
}

fn validate_train(
    train: &TrainConfig,
    report: &mut ValidationReport,
) -> Result<(), ValidationError> {
    if train.batch_size == 0 {
        return Err(ValidationError::InvalidBatchSize);
    }
    if train.accumulate_grad_batches == 0 {
        return Err(ValidationError::InvalidGradAccumulation);
    }
    if train
        .batch_size
        .checked_mul(train.accumulate_grad_batches)
        .is_none()
    {
        return Err(ValidationError::EffectiveBatchOverflow {
            batch_size: train.batch_size,
            accumulate_grad_batches: train.accumulate_grad_batches,
        });
    }
    if train.save_interval == 0 {
        return Err(ValidationError::InvalidSaveInterval);
    }
    if train.sample_interval == 0 {
        return Err(ValidationError::InvalidSampleInterval);
    }
    if train.max_steps != -1 && train.max_steps < 1 {
        return Err(ValidationError::InvalidMaxSteps(train.max_steps));
    }
    if train.save_path.trim().is_empty() {
        return Err(ValidationError::EmptySavePath);
    }

    validate_dataset(&train.dataset)?;
    if let Some(wandb) = &train.wandb {
        validate_wandb(wandb)?;
    }
    validate_lora(&train.lora_config)?;
    validate_optimizer(&train.optimizer, report)?;

    Ok(())
}

fn validate_dataset(dataset: &DatasetConfig) -> Result<(), ValidationError> {
    if let Some(kind) = &dataset.dataset_type {
        if kind.trim().is_empty() {
            return Err(ValidationError::EmptyDatasetType);
        }
    }
    if dataset.path.trim().is_empty() {
        return Err(ValidationError::EmptyDatasetPath);
    }

    check_size(dataset.condition_size, "train.dataset.condition_size")?;
    check_size(dataset.target_size, "train.dataset.target_size")?;
    check_size(dataset.image_size, "train.dataset.image_size")?;
    check_size(dataset.padding, "train.dataset.padding")?;

    check_probability(dataset.drop_text_prob, "train.dataset.drop_text_prob")?;
    check_probability(dataset.drop_image_prob, "train.dataset.drop_image_prob")?;

    Ok(())
}

fn validate_wandb(wandb: &WandbConfig) -> Result<(), ValidationError> {
    if wandb.project.trim().is_empty() {
        return Err(ValidationError::EmptyWandbProject);
    }
    Ok(())
}

fn validate_lora(lora: &LoraConfig) -> Result<(), ValidationError> {
    if lora.r == 0 {
        return Err(ValidationError::InvalidLoraRank);
    }
    if lora.lora_alpha == 0 {
        return Err(ValidationError::InvalidLoraAlpha);
    }

    if let InitLoraWeights::Named(strategy) = &lora.init_lora_weights {
        if !KNOWN_INIT_STRATEGIES.contains(&strategy.as_str()) {
            return Err(ValidationError::UnknownInitStrategy {
                strategy: strategy.clone(),
                known: KNOWN_INIT_STRATEGIES.join(", "),
            });
        }
    }

    validate_target_modules(&lora.target_modules)?;

    if let Some(dropout) = lora.lora_dropout {
        if !(0.0..1.0).contains(&dropout) {
            return Err(ValidationError::InvalidLoraDropout(dropout));
        }
    }

    Ok(())
}

fn validate_target_modules(targets: &TargetModules) -> Result<(), ValidationError> {
    match targets {
        TargetModules::Pattern(pattern) => {
            if pattern.trim().is_empty() {
                return Err(ValidationError::EmptyTargetModules);
            }
            Regex::new(pattern).map_err(|source| ValidationError::InvalidTargetPattern {
                pattern: pattern.clone(),
                source,
            })?;
        }
        TargetModules::List(names) => {
            if names.is_empty() {
                return Err(ValidationError::EmptyTargetModules);
            }
            if names.iter().any(|name| name.trim().is_empty()) {
                return Err(ValidationError::EmptyTargetModuleName);
            }
        }
    }
    Ok(())
}

fn validate_optimizer(
    optimizer: &OptimizerConfig,
    report: &mut ValidationReport,
) -> Result<(), ValidationError> {
    let kind: OptimizerKind =
        optimizer
            .type_
            .parse()
            .map_err(|_| ValidationError::UnknownOptimizerType {
                got: optimizer.type_.clone(),
                known: OptimizerKind::recognized_names(),
            })?;

    let known = kind.known_params();
    for (key, value) in &optimizer.params {
        match known.get(key.as_str()) {
            None => report.warnings.push(format!(
                "train.optimizer.params.{key} is not a known {kind} parameter"
            )),
            Some(ParamType::Float) => check_float_param(key, value)?,
            Some(ParamType::Bool) => check_bool_param(key, value)?,
            Some(ParamType::Betas) => check_betas_param(key, value)?,
        }
    }

    // Prodigy adapts its own step size; anything but lr = 1 is almost always
    // a config mistake, but the constructor does accept it.
    if kind == OptimizerKind::Prodigy {
        if let Some(lr) = optimizer.params.get("lr").and_then(Value::as_f64) {
            if lr != 1.0 {
                report.warnings.push(format!(
                    "train.optimizer.params.lr = {lr}: Prodigy is normally run with lr = 1"
                ));
            }
        }
    }

    Ok(())
}

fn check_size(value: usize, field: &'static str) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::InvalidSize { field });
    }
    Ok(())
}

fn check_probability(value: f64, field: &'static str) -> Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::InvalidProbability { field, value });
    }
    Ok(())
}

fn check_float_param(key: &str, value: &Value) -> Result<(), ValidationError> {
    let number = value
        .as_f64()
        .ok_or_else(|| ValidationError::OptimizerParamType {
            key: key.to_string(),
            expected: "a number",
        })?;

    match key {
        "lr" if number <= 0.0 => Err(ValidationError::OptimizerParamRange {
            key: key.to_string(),
            reason: format!("{number} (must be > 0)"),
        }),
        "weight_decay" if number < 0.0 => Err(ValidationError::OptimizerParamRange {
            key: key.to_string(),
            reason: format!("{number} (must be >= 0)"),
        }),
        _ => Ok(()),
    }
}

fn check_bool_param(key: &str, value: &Value) -> Result<(), ValidationError> {
    if !value.is_boolean() {
        return Err(ValidationError::OptimizerParamType {
            key: key.to_string(),
            expected: "a boolean",
        });
    }
    Ok(())
}

fn check_betas_param(key: &str, value: &Value) -> Result<(), ValidationError> {
    let items = value
        .as_array()
        .ok_or_else(|| ValidationError::OptimizerParamType {
            key: key.to_string(),
            expected: "a two-element list of floats",
        })?;

    let betas: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
    if items.len() != 2 || betas.len() != 2 {
        return Err(ValidationError::OptimizerParamType {
            key: key.to_string(),
            expected: "a two-element list of floats",
        });
    }

    for beta in betas {
        if beta <= 0.0 || beta >= 1.0 {
            return Err(ValidationError::OptimizerParamRange {
                key: key.to_string(),
                reason: format!("{beta} (each beta must be in (0, 1))"),
            });
        }
    }

    Ok(())
}
