//! Recognized optimizers and the constructor kwargs they accept.
//!
//! `train.optimizer.type` selects the implementation and `params` is handed
//! to its constructor verbatim. The tables here let the validator type-check
//! the well-known kwargs and flag the rest before a run starts.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Optimizers the trainer can instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptimizerKind {
    Prodigy,
    AdamW,
    Sgd,
}

/// Value shape expected for a known kwarg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Any YAML number.
    Float,
    /// A YAML boolean.
    Bool,
    /// A two-element list of floats in (0, 1).
    Betas,
}

#[derive(Debug, Error)]
#[error("unrecognized optimizer type: {0}")]
pub struct UnknownOptimizer(pub String);

static KNOWN_PARAMS: Lazy<HashMap<OptimizerKind, HashMap<&'static str, ParamType>>> =
    Lazy::new(|| {
        use ParamType::*;

        let prodigy = HashMap::from([
            ("lr", Float),
            ("betas", Betas),
            ("beta3", Float),
            ("eps", Float),
            ("weight_decay", Float),
            ("decouple", Bool),
            ("use_bias_correction", Bool),
            ("safeguard_warmup", Bool),
            ("d0", Float),
            ("d_coef", Float),
            ("growth_rate", Float),
            ("fsdp_in_use", Bool),
        ]);
        let adamw = HashMap::from([
            ("lr", Float),
            ("betas", Betas),
            ("eps", Float),
            ("weight_decay", Float),
            ("amsgrad", Bool),
        ]);
        let sgd = HashMap::from([
            ("lr", Float),
            ("momentum", Float),
            ("dampening", Float),
            ("weight_decay", Float),
            ("nesterov", Bool),
        ]);

        HashMap::from([
            (OptimizerKind::Prodigy, prodigy),
            (OptimizerKind::AdamW, adamw),
            (OptimizerKind::Sgd, sgd),
        ])
    });

impl OptimizerKind {
    /// Every recognized optimizer.
    pub const ALL: &'static [OptimizerKind] = &[
        OptimizerKind::Prodigy,
        OptimizerKind::AdamW,
        OptimizerKind::Sgd,
    ];

    /// Name exactly as it appears in the config file.
    pub fn name(&self) -> &'static str {
        match self {
            OptimizerKind::Prodigy => "Prodigy",
            OptimizerKind::AdamW => "AdamW",
            OptimizerKind::Sgd => "SGD",
        }
    }

    /// Kwargs the constructor is known to accept.
    pub fn known_params(&self) -> &'static HashMap<&'static str, ParamType> {
        &KNOWN_PARAMS[self]
    }

    /// Comma-separated recognized names, for error messages.
    pub fn recognized_names() -> String {
        OptimizerKind::ALL
            .iter()
            .map(|k| k.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for OptimizerKind {
    type Err = UnknownOptimizer;

    // The external trainer matches the name exactly, so no case folding here.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Prodigy" => Ok(OptimizerKind::Prodigy),
            "AdamW" => Ok(OptimizerKind::AdamW),
            "SGD" => Ok(OptimizerKind::Sgd),
            other => Err(UnknownOptimizer(other.to_string())),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
