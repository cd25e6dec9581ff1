//! # sunset-gan
//!
//! Adversarial image trainer built on candle.
//!
//! A generator and a discriminator are trained against each other. Each
//! network also plays against a bounded history of its opponent's past
//! weights, held in snapshot queues that grow every few steps.
//!
//! ## Features
//!
//! - **Snapshot queues** - Historical opponents appended on a fixed cadence
//! - **Decaying regularization** - L2 penalty `max(min, C / sqrt(t))`
//! - **Weighted epoch losses** - Exponential decay solved per run
//! - **Data-parallel replicas** - Shards run on a thread pool, gradients summed
//! - **Local and GCS storage** - Datasets, checkpoints and sample grids
//!
//! ## Quick Start (CLI)
//!
//! ```bash
//! # Write a starting configuration
//! sunset-gan init sunsets.yaml
//!
//! # Validate it
//! sunset-gan validate sunsets.yaml
//!
//! # Train, overriding the discriminator optimizer
//! sunset-gan train sunsets.yaml --d-opt adamw --d-opt-params weight_decay 0.001
//!
//! # Sample from a saved generator
//! sunset-gan sample --generator ./outputs/models/generator.safetensors --output grid.png
//! ```
//!
//! ## Quick Start (Library)
//!
//! ```no_run
//! use sunset_gan::{GanConfig, Trainer};
//!
//! # fn main() -> sunset_gan::Result<()> {
//! let config = GanConfig::from_file("sunsets.yaml")?;
//! let mut trainer = Trainer::new(config)?;
//! trainer.train()?;
//! trainer.save_models("./outputs/models")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Customizing a Preset
//!
//! ```rust
//! use sunset_gan::GanConfig;
//!
//! let mut config = GanConfig::default_preset();
//! config.training.epochs = 50;
//! config.training.max_q_size = 10;
//! config.plotting.plot_tstep = 5;
//! assert!(config.validate().is_ok());
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod architecture;
pub mod config;
pub mod dataset;
pub mod error;
pub mod layers;
pub mod model;
pub mod optimizer;
pub mod plot;
pub mod queue;
pub mod replica;
pub mod scheduler;
pub mod step;
pub mod storage;
pub mod trainer;
pub mod weighting;

pub use config::{GanConfig, TrainingConfig};
pub use error::{GanError, Result};
pub use trainer::{EpochSummary, Trainer};
