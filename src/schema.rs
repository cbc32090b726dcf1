//! Typed schema for the Flux.1-Fill LoRA training config.
//!
//! Mirrors the YAML document the trainer consumes:
//! - top level: `flux_path`, `dtype`, `model`, `train`, `use_offset_noise`
//! - `train` carries the loop settings plus the nested `dataset`,
//!   `lora_config`, `optimizer` and `wandb` blocks
//!
//! Parsing is strict: an unknown key anywhere in the document is an error, so
//! typos surface here instead of as silently-ignored settings on a GPU box.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Numeric precision for model weights and activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Bfloat16,
    Float16,
    Float32,
}

impl Dtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dtype::Bfloat16 => "bfloat16",
            Dtype::Float16 => "float16",
            Dtype::Float32 => "float32",
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root of the training config document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingConfig {
    /// Base checkpoint: a HuggingFace repo id or a local path.
    pub flux_path: String,
    pub dtype: Dtype,
    #[serde(default)]
    pub model: ModelConfig,
    pub train: TrainConfig,
    #[serde(default)]
    pub use_offset_noise: bool,
}

/// Architectural variant flags the model code reads before loading weights.
/// Their semantics live entirely in the model; the config only carries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ModelConfig {
    pub union_cond_attn: bool,
    pub add_cond_attn: bool,
    pub latent_lora: bool,
    pub use_sep: bool,
}

/// Training-loop settings plus the nested dataset / LoRA / optimizer blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainConfig {
    pub batch_size: usize,
    #[serde(default = "default_accumulate_grad_batches")]
    pub accumulate_grad_batches: usize,
    #[serde(default = "default_dataloader_workers")]
    pub dataloader_workers: usize,
    #[serde(default = "default_save_interval")]
    pub save_interval: usize,
    #[serde(default = "default_sample_interval")]
    pub sample_interval: usize,
    /// -1 trains until interrupted.
    #[serde(default = "default_max_steps")]
    pub max_steps: i64,
    #[serde(default)]
    pub gradient_checkpointing: bool,
    #[serde(default = "default_save_path")]
    pub save_path: String,
    pub dataset: DatasetConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wandb: Option<WandbConfig>,
    pub lora_config: LoraConfig,
    pub optimizer: OptimizerConfig,
}

impl TrainConfig {
    /// Samples contributing to one optimizer step. Saturates at `usize::MAX`
    /// when the product overflows; the validator rejects such configs.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.saturating_mul(self.accumulate_grad_batches)
    }
}

/// Where the edit pairs come from and how they are sized and augmented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    /// Loader tag understood by the trainer; the fill run uses "edit".
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub dataset_type: Option<String>,
    /// Glob over parquet shards.
    pub path: String,
    pub condition_size: usize,
    pub target_size: usize,
    pub image_size: usize,
    pub padding: usize,
    pub drop_text_prob: f64,
    pub drop_image_prob: f64,
}

/// Experiment-tracking settings. Tracking is off when the block is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WandbConfig {
    pub project: String,
}

/// PEFT-style LoRA adapter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoraConfig {
    pub r: usize,
    pub lora_alpha: usize,
    #[serde(default = "default_init_lora_weights")]
    pub init_lora_weights: InitLoraWeights,
    pub target_modules: TargetModules,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lora_dropout: Option<f64>,
}

/// How the adapter matrices are initialized: a plain bool (the consumer's
/// built-in Kaiming-A / zero-B scheme) or a named strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InitLoraWeights {
    Bool(bool),
    Named(String),
}

/// Which linear layers receive adapters: a regex full-matched against module
/// names, or an explicit list of name suffixes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetModules {
    Pattern(String),
    List(Vec<String>),
}

impl TargetModules {
    /// The regex form, if that is what the config used.
    pub fn as_pattern(&self) -> Option<&str> {
        match self {
            TargetModules::Pattern(p) => Some(p),
            TargetModules::List(_) => None,
        }
    }
}

/// Optimizer selection plus the keyword arguments forwarded to its
/// constructor. The type is kept as a string and checked by the validator so
/// the error can name the recognized set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizerConfig {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, serde_json::Value>,
}

fn default_accumulate_grad_batches() -> usize {
    1
}

fn default_dataloader_workers() -> usize {
    5
}

fn default_save_interval() -> usize {
    1000
}

fn default_sample_interval() -> usize {
    100
}

fn default_max_steps() -> i64 {
    -1
}

fn default_save_path() -> String {
    "runs".to_string()
}

fn default_init_lora_weights() -> InitLoraWeights {
    InitLoraWeights::Bool(true)
}

/// Load a training config from a YAML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<TrainingConfig> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: TrainingConfig =
        serde_yaml::from_str(&text).with_context(|| "Failed to parse YAML config")?;

    Ok(config)
}

/// Parse a training config from a YAML string.
pub fn from_yaml(text: &str) -> Result<TrainingConfig> {
    let config: TrainingConfig =
        serde_yaml::from_str(text).with_context(|| "Failed to parse YAML config")?;
    Ok(config)
}

/// Serialize a config back to YAML with defaults materialized.
pub fn to_yaml(config: &TrainingConfig) -> Result<String> {
    serde_yaml::to_string(config).context("Failed to serialize config to YAML")
}

/// Write a config to disk as YAML, creating parent directories as needed.
pub fn save_config(config: &TrainingConfig, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }

    let text = to_yaml(config)?;
    fs::write(path, text)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const REFERENCE_YAML: &str = include_str!("../config/fill_lora.yaml");

    const MINIMAL_YAML: &str = r#"
flux_path: "black-forest-labs/FLUX.1-Fill-dev"
dtype: "bfloat16"
train:
  batch_size: 1
  dataset:
    path: "data/*.parquet"
    condition_size: 512
    target_size: 512
    image_size: 512
    padding: 8
    drop_text_prob: 0.1
    drop_image_prob: 0.1
  lora_config:
    r: 16
    lora_alpha: 16
    target_modules: "transformer_blocks\\.[0-9]+\\.attn\\.(to_q|to_k|to_v)"
  optimizer:
    type: "AdamW"
    params:
      lr: 0.0001
"#;

    #[test]
    fn test_reference_config_parses() {
        let config = from_yaml(REFERENCE_YAML).unwrap();

        assert_eq!(config.flux_path, "black-forest-labs/FLUX.1-Fill-dev");
        assert_eq!(config.dtype, Dtype::Bfloat16);
        assert!(config.model.union_cond_attn);
        assert!(!config.model.add_cond_attn);
        assert!(!config.use_offset_noise);

        assert_eq!(config.train.batch_size, 2);
        assert_eq!(config.train.accumulate_grad_batches, 1);
        assert_eq!(config.train.save_interval, 1000);
        assert_eq!(config.train.sample_interval, 100);
        assert_eq!(config.train.max_steps, -1);
        assert!(config.train.gradient_checkpointing);
        assert_eq!(config.train.save_path, "runs");

        let dataset = &config.train.dataset;
        assert_eq!(dataset.dataset_type.as_deref(), Some("edit"));
        assert_eq!(dataset.condition_size, 512);
        assert_eq!(dataset.padding, 8);
        assert_eq!(dataset.drop_text_prob, 0.1);

        let lora = &config.train.lora_config;
        assert_eq!(lora.r, 32);
        assert_eq!(lora.lora_alpha, 32);
        assert_eq!(
            lora.init_lora_weights,
            InitLoraWeights::Named("gaussian".to_string())
        );
        assert!(lora.target_modules.as_pattern().is_some());

        assert_eq!(config.train.optimizer.type_, "Prodigy");
        assert_eq!(
            config.train.optimizer.params.get("lr"),
            Some(&serde_json::json!(1))
        );
        assert_eq!(
            config.train.optimizer.params.get("use_bias_correction"),
            Some(&serde_json::json!(true))
        );

        assert_eq!(
            config.train.wandb.as_ref().map(|w| w.project.as_str()),
            Some("flux-fill-lora")
        );
    }

    #[test]
    fn test_reference_config_has_exactly_the_documented_top_level_keys() {
        let value: serde_yaml::Value = serde_yaml::from_str(REFERENCE_YAML).unwrap();
        let mapping = value.as_mapping().unwrap();

        let mut keys: Vec<&str> = mapping.keys().filter_map(|k| k.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            ["dtype", "flux_path", "model", "train", "use_offset_noise"]
        );
    }

    #[test]
    fn test_minimal_config_takes_defaults() {
        let config = from_yaml(MINIMAL_YAML).unwrap();

        // Absent top-level blocks
        assert_eq!(config.model, ModelConfig::default());
        assert!(!config.use_offset_noise);

        // Absent train fields
        assert_eq!(config.train.accumulate_grad_batches, 1);
        assert_eq!(config.train.dataloader_workers, 5);
        assert_eq!(config.train.save_interval, 1000);
        assert_eq!(config.train.sample_interval, 100);
        assert_eq!(config.train.max_steps, -1);
        assert!(!config.train.gradient_checkpointing);
        assert_eq!(config.train.save_path, "runs");
        assert!(config.train.wandb.is_none());

        // Absent lora fields
        assert_eq!(
            config.train.lora_config.init_lora_weights,
            InitLoraWeights::Bool(true)
        );
        assert!(config.train.lora_config.lora_dropout.is_none());
    }

    #[test]
    fn test_effective_batch_size_multiplies_accumulation() {
        let mut config = from_yaml(MINIMAL_YAML).unwrap();
        config.train.batch_size = 4;
        config.train.accumulate_grad_batches = 8;
        assert_eq!(config.train.effective_batch_size(), 32);
    }

    #[test]
    fn test_effective_batch_size_saturates_instead_of_overflowing() {
        let mut config = from_yaml(MINIMAL_YAML).unwrap();
        config.train.batch_size = usize::MAX / 2;
        config.train.accumulate_grad_batches = 4;
        assert_eq!(config.train.effective_batch_size(), usize::MAX);
    }

    #[test]
    fn test_unknown_top_level_key_is_rejected() {
        let yaml = format!("{MINIMAL_YAML}\nuse_offset_nois: true\n");
        assert!(from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_unknown_nested_key_is_rejected() {
        let yaml = MINIMAL_YAML.replace("    r: 16", "    r: 16\n    lora_rank: 16");
        assert!(from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_missing_required_block_is_rejected() {
        let yaml = "flux_path: \"x\"\ndtype: \"bfloat16\"\n";
        assert!(from_yaml(yaml).is_err());
    }

    #[test]
    fn test_unknown_dtype_is_rejected() {
        let yaml = MINIMAL_YAML.replace("\"bfloat16\"", "\"fp16\"");
        assert!(from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_init_lora_weights_accepts_bool_and_string() {
        let with_bool = MINIMAL_YAML.replace("    r: 16", "    init_lora_weights: false\n    r: 16");
        let config = from_yaml(&with_bool).unwrap();
        assert_eq!(
            config.train.lora_config.init_lora_weights,
            InitLoraWeights::Bool(false)
        );

        let with_name =
            MINIMAL_YAML.replace("    r: 16", "    init_lora_weights: \"gaussian\"\n    r: 16");
        let config = from_yaml(&with_name).unwrap();
        assert_eq!(
            config.train.lora_config.init_lora_weights,
            InitLoraWeights::Named("gaussian".to_string())
        );
    }

    #[test]
    fn test_target_modules_accepts_pattern_and_list() {
        let config = from_yaml(MINIMAL_YAML).unwrap();
        assert!(matches!(
            config.train.lora_config.target_modules,
            TargetModules::Pattern(_)
        ));

        let listed = MINIMAL_YAML.replace(
            "    target_modules: \"transformer_blocks\\\\.[0-9]+\\\\.attn\\\\.(to_q|to_k|to_v)\"",
            "    target_modules:\n      - attn.to_q\n      - attn.to_k\n      - attn.to_v",
        );
        let config = from_yaml(&listed).unwrap();
        assert_eq!(
            config.train.lora_config.target_modules,
            TargetModules::List(vec![
                "attn.to_q".to_string(),
                "attn.to_k".to_string(),
                "attn.to_v".to_string()
            ])
        );
    }

    #[test]
    fn test_yaml_round_trip_is_identity() {
        let config = from_yaml(REFERENCE_YAML).unwrap();
        let dumped = to_yaml(&config).unwrap();
        let reparsed = from_yaml(&dumped).unwrap();
        assert_eq!(config, reparsed);

        // And the serialized mapping is stable under a second cycle.
        let first: serde_yaml::Value = serde_yaml::from_str(&dumped).unwrap();
        let second: serde_yaml::Value =
            serde_yaml::from_str(&to_yaml(&reparsed).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_serialized_config_always_carries_the_five_top_level_keys() {
        // Even when the input omitted the optional blocks.
        let config = from_yaml(MINIMAL_YAML).unwrap();
        let dumped = to_yaml(&config).unwrap();

        let value: serde_yaml::Value = serde_yaml::from_str(&dumped).unwrap();
        let mapping = value.as_mapping().unwrap();
        let mut keys: Vec<&str> = mapping.keys().filter_map(|k| k.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            ["dtype", "flux_path", "model", "train", "use_offset_noise"]
        );
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("fill.yaml");

        let config = from_yaml(REFERENCE_YAML).unwrap();
        save_config(&config, &path).unwrap();
        assert!(path.exists());

        let loaded = load_config(&path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_config_reports_missing_file() {
        let err = load_config("/nonexistent/fill.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_load_config_reports_malformed_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "flux_path: [unterminated").unwrap();

        assert!(load_config(&path).is_err());
    }
}
