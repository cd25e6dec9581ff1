//! Optimizer registry (Adam, AdamW, SGD).
//!
//! Optimizers are selected by name from a static registry. Each entry maps a
//! name to a typed parameter struct; command-line keyword arguments are parsed
//! best-effort into those structs and anything that does not fit is logged and
//! ignored.

use candle_core::backprop::GradStore;
use candle_core::Var;
use candle_nn::{Optimizer, ParamsAdamW};
use serde::{Deserialize, Serialize};

use crate::error::{GanError, Result};

/// Adam parameters (AdamW without decoupled weight decay).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamParams {
    /// First moment decay.
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    /// Second moment decay.
    #[serde(default = "default_beta2")]
    pub beta2: f64,
    /// Numerical stability term.
    #[serde(default = "default_eps")]
    pub eps: f64,
}

/// AdamW parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamWParams {
    /// First moment decay.
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    /// Second moment decay.
    #[serde(default = "default_beta2")]
    pub beta2: f64,
    /// Numerical stability term.
    #[serde(default = "default_eps")]
    pub eps: f64,
    /// Decoupled weight decay.
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
}

fn default_beta1() -> f64 {
    0.9
}
fn default_beta2() -> f64 {
    0.999
}
fn default_eps() -> f64 {
    1e-7
}
fn default_weight_decay() -> f64 {
    0.01
}

impl Default for AdamParams {
    fn default() -> Self {
        Self {
            beta1: default_beta1(),
            beta2: default_beta2(),
            eps: default_eps(),
        }
    }
}

impl Default for AdamWParams {
    fn default() -> Self {
        Self {
            beta1: default_beta1(),
            beta2: default_beta2(),
            eps: default_eps(),
            weight_decay: default_weight_decay(),
        }
    }
}

/// Optimizer selection with typed parameters.
///
/// ```rust
/// use sunset_gan::optimizer::OptimizerSpec;
///
/// let spec: OptimizerSpec = serde_yaml::from_str("name: adam\nbeta1: 0.5").unwrap();
/// match spec {
///     OptimizerSpec::Adam(p) => assert_eq!(p.beta1, 0.5),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum OptimizerSpec {
    /// Adam.
    Adam(AdamParams),
    /// AdamW.
    #[serde(rename = "adamw")]
    AdamW(AdamWParams),
    /// Plain stochastic gradient descent.
    Sgd,
}

impl Default for OptimizerSpec {
    fn default() -> Self {
        Self::Adam(AdamParams::default())
    }
}

/// A keyword argument value, parsed as a literal when possible.
#[derive(Debug, Clone, PartialEq)]
pub enum KwargValue {
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// `True` / `False` (either case).
    Bool(bool),
    /// Anything else, kept verbatim (surrounding quotes stripped).
    Str(String),
}

impl KwargValue {
    /// Parse a literal, falling back to the raw string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return Self::Float(f);
        }
        match trimmed {
            "True" | "true" => return Self::Bool(true),
            "False" | "false" => return Self::Bool(false),
            _ => {}
        }
        let unquoted = trimmed
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .or_else(|| trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
            .unwrap_or(trimmed);
        Self::Str(unquoted.to_string())
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// Pair up a flat `key value key value ...` list. A trailing key without a
/// value is dropped.
#[must_use]
pub fn parse_kwargs(flat: &[String]) -> Vec<(String, KwargValue)> {
    flat.chunks_exact(2)
        .map(|pair| (pair[0].clone(), KwargValue::parse(&pair[1])))
        .collect()
}

type Constructor = fn(&[(String, KwargValue)]) -> OptimizerSpec;

const REGISTRY: &[(&str, Constructor)] = &[
    ("adam", adam_from_kwargs),
    ("adamw", adamw_from_kwargs),
    ("sgd", sgd_from_kwargs),
];

/// Names accepted by [`OptimizerSpec::from_kwargs`].
#[must_use]
pub fn registered_optimizers() -> Vec<&'static str> {
    REGISTRY.iter().map(|(name, _)| *name).collect()
}

fn set_f64(slot: &mut f64, optimizer: &str, key: &str, value: &KwargValue) {
    match value.as_f64() {
        Some(v) => *slot = v,
        None => tracing::warn!(
            "ignoring {optimizer} argument {key}={value:?}: expected a number"
        ),
    }
}

fn adam_from_kwargs(kwargs: &[(String, KwargValue)]) -> OptimizerSpec {
    let mut params = AdamParams::default();
    for (key, value) in kwargs {
        match key.as_str() {
            "beta1" | "beta_1" => set_f64(&mut params.beta1, "adam", key, value),
            "beta2" | "beta_2" => set_f64(&mut params.beta2, "adam", key, value),
            "eps" | "epsilon" => set_f64(&mut params.eps, "adam", key, value),
            _ => tracing::warn!("ignoring unknown adam argument {key}"),
        }
    }
    OptimizerSpec::Adam(params)
}

fn adamw_from_kwargs(kwargs: &[(String, KwargValue)]) -> OptimizerSpec {
    let mut params = AdamWParams::default();
    for (key, value) in kwargs {
        match key.as_str() {
            "beta1" | "beta_1" => set_f64(&mut params.beta1, "adamw", key, value),
            "beta2" | "beta_2" => set_f64(&mut params.beta2, "adamw", key, value),
            "eps" | "epsilon" => set_f64(&mut params.eps, "adamw", key, value),
            "weight_decay" => set_f64(&mut params.weight_decay, "adamw", key, value),
            _ => tracing::warn!("ignoring unknown adamw argument {key}"),
        }
    }
    OptimizerSpec::AdamW(params)
}

fn sgd_from_kwargs(kwargs: &[(String, KwargValue)]) -> OptimizerSpec {
    for (key, _) in kwargs {
        tracing::warn!("ignoring sgd argument {key}: sgd takes no parameters");
    }
    OptimizerSpec::Sgd
}

impl OptimizerSpec {
    /// Resolve an optimizer by name and apply keyword arguments.
    ///
    /// # Errors
    ///
    /// Returns [`GanError::Config`] when `name` is not registered. Bad
    /// arguments are never an error.
    pub fn from_kwargs(name: &str, kwargs: &[(String, KwargValue)]) -> Result<Self> {
        let lowered = name.to_ascii_lowercase();
        REGISTRY
            .iter()
            .find(|(registered, _)| *registered == lowered)
            .map(|(_, build)| build(kwargs))
            .ok_or_else(|| {
                GanError::Config(format!(
                    "unknown optimizer '{name}', expected one of {:?}",
                    registered_optimizers()
                ))
            })
    }

    /// Registry name of this optimizer.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Adam(_) => "adam",
            Self::AdamW(_) => "adamw",
            Self::Sgd => "sgd",
        }
    }

    /// Build the optimizer over `vars`.
    ///
    /// # Errors
    ///
    /// Returns an error if candle rejects the parameters.
    pub fn build(&self, learning_rate: f64, vars: Vec<Var>) -> Result<GanOptimizer> {
        let optimizer = match *self {
            Self::Adam(p) => GanOptimizer::AdamW(candle_nn::AdamW::new(
                vars,
                ParamsAdamW {
                    lr: learning_rate,
                    beta1: p.beta1,
                    beta2: p.beta2,
                    eps: p.eps,
                    weight_decay: 0.0,
                },
            )?),
            Self::AdamW(p) => GanOptimizer::AdamW(candle_nn::AdamW::new(
                vars,
                ParamsAdamW {
                    lr: learning_rate,
                    beta1: p.beta1,
                    beta2: p.beta2,
                    eps: p.eps,
                    weight_decay: p.weight_decay,
                },
            )?),
            Self::Sgd => GanOptimizer::Sgd(candle_nn::SGD::new(vars, learning_rate)?),
        };
        Ok(optimizer)
    }
}

/// A built optimizer.
pub enum GanOptimizer {
    /// Adam / AdamW.
    AdamW(candle_nn::AdamW),
    /// SGD.
    Sgd(candle_nn::SGD),
}

impl GanOptimizer {
    /// Apply one update from already-reduced gradients.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            Self::AdamW(opt) => opt.step(grads)?,
            Self::Sgd(opt) => opt.step(grads)?,
        }
        Ok(())
    }

    /// Current learning rate.
    #[must_use]
    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::AdamW(opt) => opt.learning_rate(),
            Self::Sgd(opt) => opt.learning_rate(),
        }
    }
}
