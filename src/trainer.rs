//! Adversarial training loop.

use std::ops::Range;

use candle_core::{Device, Tensor};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::architecture::{DiscriminatorArch, GeneratorArch};
use crate::config::GanConfig;
use crate::dataset::ImageDataset;
use crate::error::{GanError, Result};
use crate::model::{Snapshot, Trainable};
use crate::optimizer::GanOptimizer;
use crate::plot;
use crate::queue::{GeneratorTargets, QueueEvent, SnapshotQueue};
use crate::replica::ReplicaRunner;
use crate::scheduler::{L2Penalty, PenaltySign, RegularizationSchedule};
use crate::step::{DiscriminatorShard, DiscriminatorStep, GeneratorShard, GeneratorStep, StepLosses};
use crate::storage::{Storage, StoragePath};
use crate::weighting::{EpochLossAccumulator, LossDecay};

/// File name of the saved discriminator.
pub const DISCRIMINATOR_FILE: &str = "discriminator.safetensors";
/// File name of the saved generator.
pub const GENERATOR_FILE: &str = "generator.safetensors";

/// Losses reported at the end of an epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochSummary {
    /// Completed epochs, from 1.
    pub epoch: usize,
    /// Steps taken in the epoch.
    pub steps: usize,
    /// Global step after the epoch.
    pub timestep: u64,
    /// Decay-weighted discriminator loss.
    pub d_loss: f64,
    /// Decay-weighted generator loss.
    pub g_loss: f64,
}

/// Contiguous batch ranges over `n` shuffled examples; the last one holds the
/// remainder.
///
/// ```rust
/// use sunset_gan::trainer::plan_batches;
///
/// let batches = plan_batches(1000, 128);
/// assert_eq!(batches.len(), 8);
/// assert_eq!(batches[7], 896..1000);
/// ```
#[must_use]
pub fn plan_batches(n: usize, batch_size: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    (0..n)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(n))
        .collect()
}

/// Pick the training device.
///
/// CUDA is used when built with the `cuda` feature unless
/// `SUNSET_GAN_FORCE_CPU=1`; `SUNSET_GAN_CUDA_DEVICE` selects the ordinal.
#[must_use]
pub fn select_device() -> Device {
    let force_cpu = std::env::var("SUNSET_GAN_FORCE_CPU")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    let cuda_device = std::env::var("SUNSET_GAN_CUDA_DEVICE")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    if !force_cpu && cfg!(feature = "cuda") {
        match Device::cuda_if_available(cuda_device) {
            Ok(device @ Device::Cuda(_)) => {
                tracing::info!("Training device: CUDA (device {})", cuda_device);
                device
            }
            Ok(_) => {
                tracing::warn!("CUDA not available; falling back to CPU.");
                Device::Cpu
            }
            Err(err) => {
                tracing::warn!("CUDA init failed ({err}); falling back to CPU.");
                Device::Cpu
            }
        }
    } else {
        if force_cpu {
            tracing::warn!("CPU mode forced via SUNSET_GAN_FORCE_CPU=1.");
        } else {
            tracing::warn!("CUDA feature disabled; training on CPU. Enable with --features cuda.");
        }
        Device::Cpu
    }
}

/// Training orchestrator.
///
/// # Example
///
/// ```no_run
/// use sunset_gan::{GanConfig, Trainer};
///
/// # fn main() -> sunset_gan::Result<()> {
/// let config = GanConfig::from_file("sunsets.yaml")?;
/// let mut trainer = Trainer::new(config)?;
/// for summary in trainer.train()? {
///     println!("epoch {}: D {:.4} G {:.4}", summary.epoch, summary.d_loss, summary.g_loss);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Trainer {
    config: GanConfig,
    device: Device,
    storage: Storage,
    discriminator: Trainable<DiscriminatorArch>,
    generator: Trainable<GeneratorArch>,
    d_optimizer: GanOptimizer,
    g_optimizer: GanOptimizer,
    d_schedule: RegularizationSchedule,
    g_schedule: RegularizationSchedule,
    d_penalty: L2Penalty,
    g_penalty: L2Penalty,
    /// Opponents of the discriminator step.
    generators: SnapshotQueue<Snapshot<GeneratorArch>>,
    /// Opponents of the generator step.
    discriminators: SnapshotQueue<Snapshot<DiscriminatorArch>>,
    targets: GeneratorTargets,
    runner: ReplicaRunner,
    rng: StdRng,
    timestep: u64,
    history: Vec<EpochSummary>,
}

impl Trainer {
    /// Create a trainer on the selected device with local and GCS storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a model cannot be
    /// built or loaded.
    pub fn new(config: GanConfig) -> Result<Self> {
        config.validate()?;
        let storage = Storage::from_config(&config.storage)?;
        Self::with_storage(config, storage, select_device())
    }

    /// Create a trainer with explicit storage and device.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a model cannot be
    /// built or loaded.
    pub fn with_storage(config: GanConfig, storage: Storage, device: Device) -> Result<Self> {
        config.validate()?;

        let discriminator = match &config.model.discriminator_path {
            Some(path) => Trainable::load(&storage, &StoragePath::parse(path)?, &device)?,
            None => Trainable::new(config.model.discriminator_arch(), &device)?,
        };
        let generator = match &config.model.generator_path {
            Some(path) => Trainable::load(&storage, &StoragePath::parse(path)?, &device)?,
            None => Trainable::new(config.model.generator_arch(discriminator.arch()), &device)?,
        };
        generator.arch().validate(discriminator.arch())?;

        let opts = &config.optimizers;
        let d_optimizer = opts.d_opt.build(opts.d_lr, discriminator.vars())?;
        let g_optimizer = opts.g_opt.build(opts.g_lr, generator.vars())?;
        tracing::info!("Discriminator optimizer: {:?}, lr={}", opts.d_opt, d_optimizer.learning_rate());
        tracing::info!("Generator optimizer: {:?}, lr={}", opts.g_opt, g_optimizer.learning_rate());

        let t = &config.training;
        let d_schedule = RegularizationSchedule::new(t.d_initial_reg, t.d_min_reg, PenaltySign::Negative);
        let g_schedule = RegularizationSchedule::new(t.g_initial_reg, t.g_min_reg, PenaltySign::Positive);

        let generators =
            SnapshotQueue::new(generator.snapshot()?, t.max_q_size, t.q_update_inc, t.first_insert())?;
        let discriminators =
            SnapshotQueue::new(discriminator.snapshot()?, t.max_q_size, t.q_update_inc, t.first_insert())?;
        let targets = GeneratorTargets::zeros(discriminators.len());

        let runner = ReplicaRunner::new(t.num_replicas)?;
        tracing::info!("Number of replicas: {}", runner.num_replicas());
        let rng = StdRng::seed_from_u64(t.seed);

        let trainer = Self {
            d_penalty: d_schedule.initial_penalty(),
            g_penalty: g_schedule.initial_penalty(),
            config,
            device,
            storage,
            discriminator,
            generator,
            d_optimizer,
            g_optimizer,
            d_schedule,
            g_schedule,
            generators,
            discriminators,
            targets,
            runner,
            rng,
            timestep: 1,
            history: Vec::new(),
        };
        if trainer.config.model.print_summaries {
            trainer.print_summaries();
        }
        Ok(trainer)
    }

    /// Log both architectures and their parameter counts.
    pub fn print_summaries(&self) {
        tracing::info!(
            "Discriminator: {:?}, {} trainable params",
            self.discriminator.arch(),
            self.discriminator.param_count()
        );
        tracing::info!(
            "Generator: {:?}, {} trainable params",
            self.generator.arch(),
            self.generator.param_count()
        );
    }

    /// Load the configured dataset and train.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset cannot be loaded or training fails.
    pub fn train(&mut self) -> Result<Vec<EpochSummary>> {
        let d = self.discriminator.arch();
        let dataset = ImageDataset::load(
            &self.storage,
            &self.config.data.path,
            [d.height, d.width, d.channels],
            &self.device,
        )?;
        self.train_on(&dataset)
    }

    /// Train on an already loaded dataset for the configured number of
    /// epochs. Returns the summaries of this run.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset is empty, a step fails, or plotting or
    /// saving fails.
    pub fn train_on(&mut self, dataset: &ImageDataset) -> Result<Vec<EpochSummary>> {
        if dataset.is_empty() {
            return Err(GanError::Dataset("no training images".into()));
        }
        let epochs = self.config.training.epochs;
        let batches = plan_batches(dataset.len(), self.config.training.batch_size);
        let decay = LossDecay::solve(batches.len())?;
        tracing::info!("Starting training");
        tracing::info!("  Images: {}", dataset.len());
        tracing::info!("  Epochs: {epochs}, steps per epoch: {}", batches.len());
        tracing::info!("  Loss decay k: {:.6}", decay.k());

        let pb = ProgressBar::new((epochs * batches.len()) as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>7}/{len:7} {msg}")?
                .progress_chars("#>-"),
        );

        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        let mut summaries = Vec::with_capacity(epochs);
        for epoch in 0..epochs {
            indices.shuffle(&mut self.rng);
            let mut totals = EpochLossAccumulator::new(decay);

            for (i, range) in batches.iter().enumerate() {
                let batch = dataset.select(&indices[range.clone()])?;
                let losses = self.train_step(&batch)?;
                totals.record(i, losses.d_loss, losses.g_loss);

                pb.set_message(format!(
                    "epoch {}/{epochs} d_loss={:.4} g_loss={:.4}",
                    epoch + 1,
                    losses.d_loss,
                    losses.g_loss
                ));
                pb.inc(1);
            }

            let summary = EpochSummary {
                epoch: epoch + 1,
                steps: totals.recorded(),
                timestep: self.timestep,
                d_loss: totals.d_loss(),
                g_loss: totals.g_loss(),
            };
            tracing::info!(
                "Timestep: {}; Weighted D Loss: {:.4}, Weighted G Loss: {:.4}",
                summary.timestep,
                summary.d_loss,
                summary.g_loss
            );
            self.end_of_epoch(summary.epoch, epochs)?;
            self.history.push(summary);
            summaries.push(summary);
        }
        pb.finish_with_message("Training complete");

        if let Some(dir) = self.config.checkpoint.save_dir.clone() {
            self.save_models(&dir)?;
        }
        Ok(summaries)
    }

    fn end_of_epoch(&mut self, completed: usize, epochs: usize) -> Result<()> {
        if completed % self.config.plotting.plot_tstep == 0 {
            self.plot_samples(completed)?;
        }
        if completed < epochs {
            if let (Some(dir), Some(every)) = (
                self.config.checkpoint.save_dir.clone(),
                self.config.checkpoint.save_tstep,
            ) {
                if completed % every == 0 {
                    self.save_models(&dir)?;
                }
            }
        }
        Ok(())
    }

    /// One discriminator step, one generator step, then queue and schedule
    /// bookkeeping.
    ///
    /// `real` is `(n, C, H, W)`; every size-dependent tensor of the step
    /// follows `n`. The discriminator queue is updated right after the
    /// discriminator step, so the generator step scores against the
    /// discriminator as it stands after this step's update.
    ///
    /// # Errors
    ///
    /// Returns an error if either step fails.
    pub fn train_step(&mut self, real: &Tensor) -> Result<StepLosses> {
        let (d_shards, g_shards) = self.plan_shards(real)?;
        let d_loss = self.discriminator_step(&d_shards)?;
        let g_loss = self.generator_step(&g_shards)?;

        self.timestep += 1;
        self.d_schedule.update(&mut self.d_penalty, self.timestep);
        self.g_schedule.update(&mut self.g_penalty, self.timestep);

        Ok(StepLosses { d_loss, g_loss })
    }

    /// Split `real` across the non-empty replicas and draw their seeds.
    fn plan_shards(&mut self, real: &Tensor) -> Result<(Vec<DiscriminatorShard>, Vec<GeneratorShard>)> {
        let shards: Vec<Range<usize>> = self
            .runner
            .shard_ranges(real.dim(0)?)
            .into_iter()
            .filter(|r| !r.is_empty())
            .collect();
        let d_shards = shards
            .iter()
            .map(|r| {
                Ok(DiscriminatorShard {
                    real: real.narrow(0, r.start, r.len())?,
                    seed: self.rng.gen(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let g_shards = shards
            .iter()
            .map(|r| GeneratorShard {
                size: r.len(),
                seed: self.rng.gen(),
            })
            .collect();
        Ok((d_shards, g_shards))
    }

    fn discriminator_step(&mut self, shards: &[DiscriminatorShard]) -> Result<f64> {
        let step = DiscriminatorStep {
            discriminator: &self.discriminator,
            generators: &self.generators,
            penalty: self.d_penalty,
            latent_dims: self.generator.arch().latent_dims,
        };
        let outcome = self.runner.run(&step, shards, &self.discriminator.vars())?;
        self.d_optimizer.step(&outcome.grads)?;

        let t = self.timestep;
        if let QueueEvent::Inserted { evicted } =
            self.discriminators.update(self.discriminator.snapshot()?, t)
        {
            tracing::debug!(
                "t={t}: discriminator snapshot queued (len {}, evicted {evicted})",
                self.discriminators.len()
            );
        }
        if self.targets.resize(self.discriminators.len()) {
            tracing::debug!("t={t}: generator targets resized to {}", self.targets.len());
        }
        Ok(outcome.loss)
    }

    fn generator_step(&mut self, shards: &[GeneratorShard]) -> Result<f64> {
        let step = GeneratorStep::new(
            &self.generator,
            &self.discriminators,
            &self.targets,
            self.g_penalty,
            self.generator.arch().latent_dims,
        )?;
        let outcome = self.runner.run(&step, shards, &self.generator.vars())?;
        self.g_optimizer.step(&outcome.grads)?;

        let t = self.timestep;
        if let QueueEvent::Inserted { evicted } = self.generators.update(self.generator.snapshot()?, t) {
            tracing::debug!(
                "t={t}: generator snapshot queued (len {}, evicted {evicted})",
                self.generators.len()
            );
        }
        Ok(outcome.loss)
    }

    /// Save both models as `discriminator.safetensors` and
    /// `generator.safetensors` under `dir` (local or bucket).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or a write fails.
    pub fn save_models(&self, dir: &str) -> Result<()> {
        let dir = StoragePath::parse(dir)?;
        self.discriminator.save(&self.storage, &dir.join(DISCRIMINATOR_FILE))?;
        self.generator.save(&self.storage, &dir.join(GENERATOR_FILE))?;
        Ok(())
    }

    /// Write a sample grid for `epoch` to the plot directory. Returns the
    /// written path, or `None` when no plot directory is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if generation, encoding or the write fails.
    pub fn plot_samples(&mut self, epoch: usize) -> Result<Option<StoragePath>> {
        let plotting = &self.config.plotting;
        if plotting.plot_dir.is_empty() {
            return Ok(None);
        }
        let [rows, cols] = plotting.plot_dims;
        let grid = plot::sample_grid(&self.generator, rows, cols, self.rng.gen(), plotting.bgr)?;
        let path = StoragePath::parse(&plotting.plot_dir)?.join(&plot::grid_file_name(epoch));
        plot::write_grid(&self.storage, &path, &grid)?;
        Ok(Some(path))
    }

    /// Training configuration.
    pub fn config(&self) -> &GanConfig {
        &self.config
    }

    /// Training device.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The live discriminator.
    pub fn discriminator(&self) -> &Trainable<DiscriminatorArch> {
        &self.discriminator
    }

    /// The live generator.
    pub fn generator(&self) -> &Trainable<GeneratorArch> {
        &self.generator
    }

    /// Generator snapshots the discriminator trains against.
    pub fn generator_queue(&self) -> &SnapshotQueue<Snapshot<GeneratorArch>> {
        &self.generators
    }

    /// Discriminator snapshots the generator trains against.
    pub fn discriminator_queue(&self) -> &SnapshotQueue<Snapshot<DiscriminatorArch>> {
        &self.discriminators
    }

    /// Generator targets, one per queued discriminator.
    pub fn targets(&self) -> &GeneratorTargets {
        &self.targets
    }

    /// Current discriminator and generator penalties.
    pub fn penalties(&self) -> (L2Penalty, L2Penalty) {
        (self.d_penalty, self.g_penalty)
    }

    /// Global step of the next training step.
    pub fn timestep(&self) -> u64 {
        self.timestep
    }

    /// Summaries of every epoch trained so far.
    pub fn history(&self) -> &[EpochSummary] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataConfig;
    use crate::step::{assemble_discriminator_batch, sample_noise};

    fn tiny_config() -> GanConfig {
        let mut config = GanConfig {
            data: DataConfig {
                path: "gs://bucket/sunsets.safetensors".into(),
            },
            ..GanConfig::default()
        };
        config.model.image_shape = [8, 8, 3];
        config.model.latent_dims = 6;
        config.model.discriminator_filters = vec![4, 8];
        config.model.generator_head_filters = vec![];
        config.model.generator_se_filters = vec![4];
        config.model.generator_tail_filters = vec![4];
        config.training.batch_size = 4;
        config.training.max_q_size = 2;
        config.training.q_update_inc = 2;
        config
    }

    fn tiny_dataset(n: usize) -> Result<ImageDataset> {
        #[allow(clippy::cast_possible_truncation)]
        let pixels: Vec<u8> = (0..n * 8 * 8 * 3).map(|i| (i * 7 % 256) as u8).collect();
        ImageDataset::from_u8_nhwc(pixels, n, [8, 8, 3], &Device::Cpu)
    }

    fn tiny_trainer(config: GanConfig) -> Result<Trainer> {
        Trainer::with_storage(config, Storage::in_memory(), Device::Cpu)
    }

    #[test]
    fn test_plan_batches_covers_every_index_once() {
        let batches = plan_batches(1000, 128);
        assert_eq!(batches.len(), 8);
        assert!(batches[..7].iter().all(|r| r.len() == 128));
        assert_eq!(batches[7].len(), 104);
        let covered: Vec<usize> = batches.into_iter().flatten().collect();
        assert_eq!(covered, (0..1000).collect::<Vec<_>>());

        assert_eq!(plan_batches(8, 4), vec![0..4, 4..8]);
        assert!(plan_batches(0, 4).is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = tiny_config();
        config.model.generator_tail_filters = vec![4, 4];
        assert!(tiny_trainer(config).is_err());
    }

    #[test]
    fn test_remainder_step_uses_remainder_size() -> Result<()> {
        // 1000 images in batches of 128 leave 104 for the last step.
        let last = plan_batches(1000, 128).pop().unwrap();
        assert_eq!(last.len(), 104);

        let mut config = tiny_config();
        config.training.num_replicas = 2;
        let mut trainer = tiny_trainer(config)?;
        let remainder = tiny_dataset(3)?;
        let real = remainder.images();
        let (d_shards, g_shards) = trainer.plan_shards(real)?;

        let real_rows: usize = d_shards.iter().map(|s| s.real.dim(0).unwrap()).sum();
        let noise_rows: usize = g_shards.iter().map(|s| s.size).sum();
        assert_eq!(real_rows, 3);
        assert_eq!(noise_rows, 3);

        // One queued generator: r fakes then r reals.
        assert_eq!(trainer.generator_queue().len(), 1);
        let noise = sample_noise(3, 6, 0, &Device::Cpu)?;
        let fakes = trainer
            .generator_queue()
            .iter()
            .map(|g| g.forward(&noise))
            .collect::<Result<Vec<_>>>()?;
        let (images, labels) = assemble_discriminator_batch(&fakes, real)?;
        assert_eq!(images.dim(0)?, 6);
        assert_eq!(
            labels.flatten_all()?.to_vec1::<f32>()?,
            vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]
        );

        let losses = trainer.train_step(real)?;
        assert!(losses.d_loss.is_finite());
        assert!(losses.g_loss.is_finite());
        assert_eq!(trainer.timestep(), 2);
        Ok(())
    }

    #[test]
    fn test_generator_scores_against_updated_discriminator() -> Result<()> {
        let mut config = tiny_config();
        config.optimizers.d_lr = 0.1;
        let mut trainer = tiny_trainer(config)?;
        let dataset = tiny_dataset(4)?;
        let images = dataset.images();
        let before = trainer.discriminator().forward(images)?.to_vec2::<f32>()?;

        let (d_shards, _) = trainer.plan_shards(dataset.images())?;
        trainer.discriminator_step(&d_shards)?;

        let live = trainer.discriminator().forward(images)?.to_vec2::<f32>()?;
        assert_ne!(live, before);
        let newest = trainer.discriminator_queue().latest().unwrap();
        assert_eq!(newest.forward(images)?.to_vec2::<f32>()?, live);
        assert_eq!(trainer.targets().len(), trainer.discriminator_queue().len());
        Ok(())
    }

    #[test]
    fn test_training_advances_queues_and_schedules() -> Result<()> {
        let mut config = tiny_config();
        config.training.epochs = 2;
        let mut trainer = tiny_trainer(config)?;
        // 10 images in batches of 4: 3 steps per epoch, t = 1..=6.
        let summaries = trainer.train_on(&tiny_dataset(10)?)?;

        assert_eq!(summaries.len(), 2);
        assert_eq!(trainer.history(), summaries.as_slice());
        assert!(summaries.iter().all(|s| s.steps == 3));
        assert_eq!(summaries[1].timestep, 7);
        assert_eq!(trainer.timestep(), 7);

        // Insertions at t = 2, 4, 6 with capacity 2.
        assert_eq!(trainer.discriminator_queue().len(), 2);
        assert_eq!(trainer.generator_queue().len(), 2);
        assert_eq!(trainer.discriminator_queue().next_insert_t(), 8);
        assert_eq!(trainer.targets().len(), 2);

        let (d_penalty, g_penalty) = trainer.penalties();
        let expected = 1e-2 / 7f64.sqrt();
        assert!((d_penalty.coefficient + expected).abs() < 1e-12);
        assert!((g_penalty.coefficient - expected).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_same_seed_reproduces_losses() -> Result<()> {
        let dataset = tiny_dataset(6)?;
        let a = tiny_trainer(tiny_config())?.train_on(&dataset)?;
        let b = tiny_trainer(tiny_config())?.train_on(&dataset)?;
        assert_eq!(a.len(), 1);
        assert!((a[0].d_loss - b[0].d_loss).abs() < 1e-6);
        assert!((a[0].g_loss - b[0].g_loss).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_save_models_and_resume() -> Result<()> {
        let storage = Storage::in_memory();
        let trainer = Trainer::with_storage(tiny_config(), storage.clone(), Device::Cpu)?;
        trainer.save_models("gs://bucket/run")?;

        let mut config = tiny_config();
        config.model.discriminator_path = Some("gs://bucket/run/discriminator.safetensors".into());
        config.model.generator_path = Some("gs://bucket/run/generator.safetensors".into());
        let resumed = Trainer::with_storage(config, storage, Device::Cpu)?;
        assert_eq!(resumed.generator().arch(), trainer.generator().arch());
        assert_eq!(resumed.discriminator().param_count(), trainer.discriminator().param_count());
        Ok(())
    }

    #[test]
    fn test_plot_samples_skipped_without_directory() -> Result<()> {
        let mut trainer = tiny_trainer(tiny_config())?;
        assert!(trainer.plot_samples(1)?.is_none());

        let mut config = tiny_config();
        config.plotting.plot_dir = "gs://bucket/plots".into();
        let storage = Storage::in_memory();
        let mut trainer = Trainer::with_storage(config, storage.clone(), Device::Cpu)?;
        let path = trainer.plot_samples(3)?.expect("plot directory configured");
        assert_eq!(path.to_string(), "gs://bucket/plots/epoch_3.png");
        assert!(storage.exists(&path)?);
        Ok(())
    }
}
