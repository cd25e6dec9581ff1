//! Error types for sunset-gan.
//!
//! Every fallible operation in the crate returns [`Result`], whose error side
//! is [`GanError`].
//!
//! # Example
//!
//! ```rust
//! use sunset_gan::{GanConfig, GanError};
//!
//! let mut config = GanConfig::default_preset();
//! config.training.batch_size = 0;
//! match config.validate() {
//!     Err(GanError::Config(msg)) => assert!(msg.contains("batch_size")),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use thiserror::Error;

/// Result type alias for sunset-gan operations.
pub type Result<T> = std::result::Result<T, GanError>;

/// Errors that can occur in sunset-gan.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GanError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid configuration file.
    #[error("invalid config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Model construction or persistence error.
    #[error("model error: {0}")]
    Model(String),

    /// Dataset error.
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Training error.
    #[error("training error: {0}")]
    Training(String),

    /// Checkpoint error.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Visualization error.
    #[error("plot error: {0}")]
    Plot(String),

    /// The loss decay equation has no root inside the search bracket.
    #[error("no loss decay coefficient in [{lower}, {upper}] for {steps} steps per epoch")]
    RootNotBracketed {
        /// Steps per epoch the coefficient was solved for.
        steps: usize,
        /// Lower end of the bracket.
        lower: f64,
        /// Upper end of the bracket.
        upper: f64,
    },

    /// The generator target vector does not match the discriminator queue.
    #[error("generator targets have {targets} entries but the opponent queue holds {opponents}")]
    LabelMismatch {
        /// Length of the target vector.
        targets: usize,
        /// Length of the discriminator queue.
        opponents: usize,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (architecture metadata).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Candle error.
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Safetensors error.
    #[error("safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    /// Image codec error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// HTTP error from the object store.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Progress bar template error.
    #[error("template error: {0}")]
    Template(String),
}

impl From<indicatif::style::TemplateError> for GanError {
    fn from(err: indicatif::style::TemplateError) -> Self {
        GanError::Template(err.to_string())
    }
}
