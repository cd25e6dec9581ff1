//! CLI entry point for sunset-gan.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sunset_gan::architecture::GeneratorArch;
use sunset_gan::config::StorageConfig;
use sunset_gan::model::Trainable;
use sunset_gan::optimizer::{parse_kwargs, OptimizerSpec};
use sunset_gan::storage::{Storage, StoragePath};
use sunset_gan::trainer::select_device;
use sunset_gan::{plot, GanConfig, Result, Trainer};

#[derive(Parser)]
#[command(name = "sunset-gan")]
#[command(about = "Adversarial image trainer with historical snapshot queues")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        config: String,
    },
    /// Start training
    Train {
        /// Path to configuration file
        config: String,
        /// Discriminator optimizer name (adam, adamw, sgd)
        #[arg(long)]
        d_opt: Option<String>,
        /// Discriminator optimizer arguments as `key value` pairs
        #[arg(long, num_args = 1.., allow_negative_numbers = true)]
        d_opt_params: Vec<String>,
        /// Generator optimizer name (adam, adamw, sgd)
        #[arg(long)]
        g_opt: Option<String>,
        /// Generator optimizer arguments as `key value` pairs
        #[arg(long, num_args = 1.., allow_negative_numbers = true)]
        g_opt_params: Vec<String>,
        /// Save both models here when training ends (local or gs://)
        #[arg(long)]
        save_dir: Option<String>,
    },
    /// Generate a sample configuration file
    Init {
        /// Output path for config file
        #[arg(default_value = "sunset-gan.yaml")]
        output: String,
    },
    /// Write a sample grid from a saved generator
    Sample {
        /// Saved generator (local or gs://)
        #[arg(long)]
        generator: String,
        /// Output PNG (local or gs://)
        #[arg(long)]
        output: String,
        /// Grid rows
        #[arg(long, default_value_t = 1)]
        rows: usize,
        /// Grid columns
        #[arg(long, default_value_t = 5)]
        cols: usize,
        /// Noise seed
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Swap blue and red channels
        #[arg(long)]
        bgr: bool,
    },
}

fn override_optimizer(spec: &mut OptimizerSpec, name: Option<String>, params: &[String]) -> Result<()> {
    if name.is_none() && params.is_empty() {
        return Ok(());
    }
    let name = name.unwrap_or_else(|| spec.name().to_string());
    *spec = OptimizerSpec::from_kwargs(&name, &parse_kwargs(params))?;
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => {
            tracing::info!("Validating configuration: {}", config);
            let config = GanConfig::from_file(&config)?;
            config.validate()?;
            println!("✓ Configuration is valid");
            println!("  Image shape: {:?}", config.model.image_shape);
            println!("  Latent dims: {}", config.model.latent_dims);
            println!("  Dataset: {}", config.data.path);
        }
        Commands::Train {
            config,
            d_opt,
            d_opt_params,
            g_opt,
            g_opt_params,
            save_dir,
        } => {
            tracing::info!("Starting training with config: {}", config);
            let mut config = GanConfig::from_file(&config)?;
            override_optimizer(&mut config.optimizers.d_opt, d_opt, &d_opt_params)?;
            override_optimizer(&mut config.optimizers.g_opt, g_opt, &g_opt_params)?;
            if save_dir.is_some() {
                config.checkpoint.save_dir = save_dir;
            }

            let mut trainer = Trainer::new(config)?;
            for summary in trainer.train()? {
                println!(
                    "Epoch {}: D loss {:.4}, G loss {:.4}",
                    summary.epoch, summary.d_loss, summary.g_loss
                );
            }
        }
        Commands::Init { output } => {
            GanConfig::default_preset().to_file(&output)?;
            println!("✓ Configuration written to: {output}");
        }
        Commands::Sample {
            generator,
            output,
            rows,
            cols,
            seed,
            bgr,
        } => {
            let storage = Storage::from_config(&StorageConfig::default())?;
            let device = select_device();
            let generator =
                Trainable::<GeneratorArch>::load(&storage, &StoragePath::parse(&generator)?, &device)?;
            let grid = plot::sample_grid(&generator, rows, cols, seed, bgr)?;
            plot::write_grid(&storage, &StoragePath::parse(&output)?, &grid)?;
            println!("✓ Samples written to: {output}");
        }
    }

    Ok(())
}
