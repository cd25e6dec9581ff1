//! Configuration parsing and validation.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::architecture::{DiscriminatorArch, GeneratorArch};
use crate::error::{GanError, Result};
use crate::optimizer::OptimizerSpec;

/// Main configuration for a training run.
///
/// # Example
///
/// ```rust
/// use sunset_gan::GanConfig;
///
/// # fn main() -> sunset_gan::Result<()> {
/// let yaml = r#"
/// data:
///   path: ./data/sunsets.safetensors
/// training:
///   epochs: 5
///   batch_size: 64
/// "#;
/// let config: GanConfig = serde_yaml::from_str(yaml)?;
/// config.validate()?;
/// assert_eq!(config.training.max_q_size, 25);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GanConfig {
    /// Network shapes and optional checkpoints to start from.
    #[serde(default)]
    pub model: ModelConfig,

    /// Optimizers and learning rates.
    #[serde(default)]
    pub optimizers: OptimizersConfig,

    /// Training loop hyperparameters.
    #[serde(default)]
    pub training: TrainingConfig,

    /// Sample grid output.
    #[serde(default)]
    pub plotting: PlotConfig,

    /// Model persistence.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Training images.
    #[serde(default)]
    pub data: DataConfig,

    /// Object-store credentials.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Image shape as `[height, width, channels]`.
    #[serde(default = "default_image_shape")]
    pub image_shape: [usize; 3],

    /// Size of the generator's latent noise vector.
    #[serde(default = "default_latent_dims")]
    pub latent_dims: usize,

    /// Discriminator conv widths; the first block keeps resolution, the rest halve it.
    #[serde(default = "default_d_filters")]
    pub discriminator_filters: Vec<usize>,

    /// Generator upsampling widths before the squeeze-excitation blocks.
    #[serde(default = "default_g_head_filters")]
    pub generator_head_filters: Vec<usize>,

    /// Generator squeeze-excitation block widths.
    #[serde(default = "default_g_se_filters")]
    pub generator_se_filters: Vec<usize>,

    /// Generator upsampling widths after the squeeze-excitation blocks.
    #[serde(default = "default_g_tail_filters")]
    pub generator_tail_filters: Vec<usize>,

    /// Load the discriminator from this path instead of building a fresh one.
    #[serde(default)]
    pub discriminator_path: Option<String>,

    /// Load the generator from this path instead of building a fresh one.
    #[serde(default)]
    pub generator_path: Option<String>,

    /// Log parameter counts of both networks at startup.
    #[serde(default)]
    pub print_summaries: bool,
}

fn default_image_shape() -> [usize; 3] {
    [64, 64, 3]
}
fn default_latent_dims() -> usize {
    1000
}
fn default_d_filters() -> Vec<usize> {
    vec![16, 32, 64, 128, 256]
}
fn default_g_head_filters() -> Vec<usize> {
    vec![256, 192]
}
fn default_g_se_filters() -> Vec<usize> {
    vec![128, 86, 64]
}
fn default_g_tail_filters() -> Vec<usize> {
    vec![32, 16]
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            image_shape: default_image_shape(),
            latent_dims: default_latent_dims(),
            discriminator_filters: default_d_filters(),
            generator_head_filters: default_g_head_filters(),
            generator_se_filters: default_g_se_filters(),
            generator_tail_filters: default_g_tail_filters(),
            discriminator_path: None,
            generator_path: None,
            print_summaries: false,
        }
    }
}

impl ModelConfig {
    /// Discriminator architecture described by this configuration.
    #[must_use]
    pub fn discriminator_arch(&self) -> DiscriminatorArch {
        let [height, width, channels] = self.image_shape;
        DiscriminatorArch {
            height,
            width,
            channels,
            filters: self.discriminator_filters.clone(),
        }
    }

    /// Generator architecture whose latent reshape matches `discriminator`'s
    /// final feature map.
    #[must_use]
    pub fn generator_arch(&self, discriminator: &DiscriminatorArch) -> GeneratorArch {
        GeneratorArch {
            latent_dims: self.latent_dims,
            reshape: discriminator.feature_shape(),
            out_channels: discriminator.channels,
            head_filters: self.generator_head_filters.clone(),
            se_filters: self.generator_se_filters.clone(),
            tail_filters: self.generator_tail_filters.clone(),
        }
    }
}

/// Optimizer configuration for both networks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizersConfig {
    /// Discriminator learning rate.
    #[serde(default = "default_lr")]
    pub d_lr: f64,

    /// Generator learning rate.
    #[serde(default = "default_lr")]
    pub g_lr: f64,

    /// Discriminator optimizer.
    #[serde(default)]
    pub d_opt: OptimizerSpec,

    /// Generator optimizer.
    #[serde(default)]
    pub g_opt: OptimizerSpec,
}

fn default_lr() -> f64 {
    4e-4
}

impl Default for OptimizersConfig {
    fn default() -> Self {
        Self {
            d_lr: default_lr(),
            g_lr: default_lr(),
            d_opt: OptimizerSpec::default(),
            g_opt: OptimizerSpec::default(),
        }
    }
}

/// Training loop hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of epochs.
    #[serde(default = "default_epochs")]
    pub epochs: usize,

    /// Images per step, split across replicas.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Initial discriminator regularization coefficient.
    #[serde(default = "default_initial_reg")]
    pub d_initial_reg: f64,

    /// Initial generator regularization coefficient.
    #[serde(default = "default_initial_reg")]
    pub g_initial_reg: f64,

    /// Floor of the discriminator regularization coefficient.
    #[serde(default = "default_min_reg")]
    pub d_min_reg: f64,

    /// Floor of the generator regularization coefficient.
    #[serde(default = "default_min_reg")]
    pub g_min_reg: f64,

    /// Maximum number of snapshots held in each queue.
    #[serde(default = "default_max_q_size")]
    pub max_q_size: usize,

    /// Steps between snapshot insertions.
    #[serde(default = "default_q_update_inc")]
    pub q_update_inc: u64,

    /// Global step of the first snapshot insertion (defaults to `q_update_inc`).
    #[serde(default)]
    pub first_insert_step: Option<u64>,

    /// Number of data-parallel replicas.
    #[serde(default = "default_replicas")]
    pub num_replicas: usize,

    /// Seed for shuffling and noise.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_epochs() -> usize {
    1
}
fn default_batch_size() -> usize {
    128
}
fn default_initial_reg() -> f64 {
    1e-2
}
fn default_min_reg() -> f64 {
    1e-4
}
fn default_max_q_size() -> usize {
    25
}
fn default_q_update_inc() -> u64 {
    10
}
fn default_replicas() -> usize {
    1
}
fn default_seed() -> u64 {
    42
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            d_initial_reg: default_initial_reg(),
            g_initial_reg: default_initial_reg(),
            d_min_reg: default_min_reg(),
            g_min_reg: default_min_reg(),
            max_q_size: default_max_q_size(),
            q_update_inc: default_q_update_inc(),
            first_insert_step: None,
            num_replicas: default_replicas(),
            seed: default_seed(),
        }
    }
}

impl TrainingConfig {
    /// Global step at which both queues first append a snapshot.
    #[must_use]
    pub fn first_insert(&self) -> u64 {
        self.first_insert_step.unwrap_or(self.q_update_inc)
    }
}

/// Sample grid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotConfig {
    /// Grid shape as `[rows, cols]`.
    #[serde(default = "default_plot_dims")]
    pub plot_dims: [usize; 2],

    /// Output directory (local or bucket); empty disables writing.
    #[serde(default)]
    pub plot_dir: String,

    /// Plot every N completed epochs.
    #[serde(default = "default_plot_tstep")]
    pub plot_tstep: usize,

    /// Training images are stored blue-green-red; swap to RGB when plotting.
    #[serde(default)]
    pub bgr: bool,
}

fn default_plot_dims() -> [usize; 2] {
    [1, 5]
}
fn default_plot_tstep() -> usize {
    1
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            plot_dims: default_plot_dims(),
            plot_dir: String::new(),
            plot_tstep: default_plot_tstep(),
            bgr: false,
        }
    }
}

/// Model persistence configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory (local or bucket) receiving `generator.safetensors` and
    /// `discriminator.safetensors`.
    #[serde(default)]
    pub save_dir: Option<String>,

    /// Save every N completed epochs; `None` saves only at the end.
    #[serde(default)]
    pub save_tstep: Option<usize>,
}

/// Training data configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataConfig {
    /// `.safetensors` archive or image directory, local or `gs://`.
    #[serde(default)]
    pub path: String,
}

/// Object-store access configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Cloud project billed for bucket requests.
    #[serde(default)]
    pub project_name: Option<String>,

    /// OAuth bearer token; falls back to `GOOGLE_OAUTH_ACCESS_TOKEN`.
    #[serde(default)]
    pub access_token: Option<String>,
}

impl GanConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The configuration written by `sunset-gan init`.
    #[must_use]
    pub fn default_preset() -> Self {
        Self {
            data: DataConfig {
                path: "./data/sunsets.safetensors".into(),
            },
            plotting: PlotConfig {
                plot_dir: "./outputs/plots".into(),
                ..PlotConfig::default()
            },
            checkpoint: CheckpointConfig {
                save_dir: Some("./outputs/models".into()),
                save_tstep: None,
            },
            ..Self::default()
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GanError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.data.path.is_empty() {
            return Err(GanError::Config("data.path is required".into()));
        }
        let t = &self.training;
        if t.batch_size == 0 {
            return Err(GanError::Config("training.batch_size must be > 0".into()));
        }
        if t.max_q_size == 0 {
            return Err(GanError::Config("training.max_q_size must be > 0".into()));
        }
        if t.q_update_inc == 0 {
            return Err(GanError::Config("training.q_update_inc must be > 0".into()));
        }
        if t.first_insert() == 0 {
            return Err(GanError::Config(
                "training.first_insert_step must be >= 1".into(),
            ));
        }
        if t.num_replicas == 0 {
            return Err(GanError::Config("training.num_replicas must be > 0".into()));
        }
        if t.d_min_reg < 0.0 || t.g_min_reg < 0.0 || t.d_initial_reg < 0.0 || t.g_initial_reg < 0.0
        {
            return Err(GanError::Config(
                "regularization coefficients must be non-negative".into(),
            ));
        }
        if self.plotting.plot_tstep == 0 {
            return Err(GanError::Config("plotting.plot_tstep must be > 0".into()));
        }
        if self.plotting.plot_dims.contains(&0) {
            return Err(GanError::Config("plotting.plot_dims must be non-zero".into()));
        }
        if self.checkpoint.save_tstep == Some(0) {
            return Err(GanError::Config("checkpoint.save_tstep must be > 0".into()));
        }
        if self.optimizers.d_lr <= 0.0 || self.optimizers.g_lr <= 0.0 {
            return Err(GanError::Config("learning rates must be > 0".into()));
        }

        let discriminator = self.model.discriminator_arch();
        discriminator.validate()?;
        self.model.generator_arch(&discriminator).validate(&discriminator)?;

        Ok(())
    }
}
