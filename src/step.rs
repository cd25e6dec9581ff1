//! Discriminator and generator training steps.
//!
//! Both steps compute a summed binary cross-entropy (on logits) normalized by
//! the global batch size, plus their network's L2 penalty split evenly across
//! replicas. Gradients are taken by the [`ReplicaRunner`](crate::replica::ReplicaRunner).

use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::architecture::{DiscriminatorArch, GeneratorArch};
use crate::error::Result;
use crate::model::{Snapshot, Trainable};
use crate::queue::{GeneratorTargets, SnapshotQueue};
use crate::replica::{ReplicaContext, ReplicaStep};
use crate::scheduler::L2Penalty;

/// Label of real images.
pub const REAL_LABEL: f32 = 1.0;
/// Label of generated images.
pub const FAKE_LABEL: f32 = 0.0;

const SHUFFLE_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

/// Losses of one training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepLosses {
    /// Discriminator loss summed over replicas.
    pub d_loss: f64,
    /// Generator loss summed over replicas.
    pub g_loss: f64,
}

/// Element-wise binary cross-entropy of `logits` against `targets`:
/// `max(x, 0) − x·z + log(1 + exp(−|x|))`.
pub fn bce_with_logits(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let softplus = (logits.abs()?.neg()?.exp()? + 1.0)?.log()?;
    Ok(logits.relu()?.sub(&logits.mul(targets)?)?.add(&softplus)?)
}

/// `Σ bce / global_batch + penalty / num_replicas`.
fn replica_objective(
    logits: &Tensor,
    targets: &Tensor,
    penalty: &Tensor,
    ctx: &ReplicaContext,
) -> Result<Tensor> {
    let data = bce_with_logits(logits, targets)?
        .sum_all()?
        .affine(ctx.batch_scale(), 0.0)?;
    Ok(data.add(&penalty.affine(ctx.replica_scale(), 0.0)?)?)
}

/// Standard normal noise of shape `(n, latent_dims)`.
pub fn sample_noise(n: usize, latent_dims: usize, seed: u64, device: &Device) -> Result<Tensor> {
    let mut rng = StdRng::seed_from_u64(seed);
    let values: Vec<f32> = (0..n * latent_dims)
        .map(|_| rng.sample(StandardNormal))
        .collect();
    Ok(Tensor::from_vec(values, (n, latent_dims), device)?)
}

/// Concatenate the fakes of every generator followed by the real batch, with
/// labels `(rows, 1)`: [`FAKE_LABEL`] for fakes, [`REAL_LABEL`] for reals.
pub fn assemble_discriminator_batch(fakes: &[Tensor], real: &Tensor) -> Result<(Tensor, Tensor)> {
    let device = real.device();
    let fake_rows: usize = fakes.iter().map(|f| f.dim(0)).sum::<candle_core::Result<_>>()?;
    let real_rows = real.dim(0)?;

    let mut parts: Vec<&Tensor> = fakes.iter().collect();
    parts.push(real);
    let images = Tensor::cat(&parts, 0)?;

    let labels = Tensor::cat(
        &[
            Tensor::full(FAKE_LABEL, (fake_rows, 1), device)?,
            Tensor::full(REAL_LABEL, (real_rows, 1), device)?,
        ],
        0,
    )?;
    Ok((images, labels.to_dtype(DType::F32)?))
}

/// Apply one random permutation to the rows of both tensors.
pub fn shuffle_jointly<R: Rng>(
    images: &Tensor,
    labels: &Tensor,
    rng: &mut R,
) -> Result<(Tensor, Tensor)> {
    let n = images.dim(0)?;
    #[allow(clippy::cast_possible_truncation)]
    let mut order: Vec<u32> = (0..n as u32).collect();
    order.shuffle(rng);
    let index = Tensor::from_vec(order, n, images.device())?;
    Ok((images.index_select(&index, 0)?, labels.index_select(&index, 0)?))
}

/// Real images for one discriminator replica.
#[derive(Debug, Clone)]
pub struct DiscriminatorShard {
    /// `(n, C, H, W)` real images.
    pub real: Tensor,
    /// Seed for noise and shuffling.
    pub seed: u64,
}

/// Train the live discriminator against every generator in the queue.
pub struct DiscriminatorStep<'a> {
    /// Model being trained.
    pub discriminator: &'a Trainable<DiscriminatorArch>,
    /// Opponents producing fakes.
    pub generators: &'a SnapshotQueue<Snapshot<GeneratorArch>>,
    /// Current penalty coefficient.
    pub penalty: L2Penalty,
    /// Latent vector size.
    pub latent_dims: usize,
}

impl ReplicaStep for DiscriminatorStep<'_> {
    type Shard = DiscriminatorShard;

    fn shard_size(shard: &DiscriminatorShard) -> usize {
        shard.real.dim(0).unwrap_or(0)
    }

    fn replica_loss(&self, shard: &DiscriminatorShard, ctx: &ReplicaContext) -> Result<Tensor> {
        let n = shard.real.dim(0)?;
        let device = shard.real.device();
        let noise = sample_noise(n, self.latent_dims, shard.seed, device)?;

        let fakes = self
            .generators
            .iter()
            .map(|g| Ok(g.forward(&noise)?.detach()))
            .collect::<Result<Vec<_>>>()?;
        let (images, labels) = assemble_discriminator_batch(&fakes, &shard.real)?;
        let mut rng = StdRng::seed_from_u64(shard.seed ^ SHUFFLE_SALT);
        let (images, labels) = shuffle_jointly(&images, &labels, &mut rng)?;

        let logits = self.discriminator.forward(&images)?;
        let penalty = self.discriminator.penalty(self.penalty)?;
        replica_objective(&logits, &labels, &penalty, ctx)
    }
}

/// Noise batch for one generator replica.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorShard {
    /// Number of images to generate.
    pub size: usize,
    /// Noise seed.
    pub seed: u64,
}

/// Train the live generator against every discriminator in the queue.
pub struct GeneratorStep<'a> {
    generator: &'a Trainable<GeneratorArch>,
    discriminators: &'a SnapshotQueue<Snapshot<DiscriminatorArch>>,
    targets: &'a GeneratorTargets,
    penalty: L2Penalty,
    latent_dims: usize,
}

impl<'a> GeneratorStep<'a> {
    /// Prepare a step.
    ///
    /// # Errors
    ///
    /// Returns [`GanError::LabelMismatch`](crate::GanError::LabelMismatch)
    /// unless `targets` has one label per discriminator.
    pub fn new(
        generator: &'a Trainable<GeneratorArch>,
        discriminators: &'a SnapshotQueue<Snapshot<DiscriminatorArch>>,
        targets: &'a GeneratorTargets,
        penalty: L2Penalty,
        latent_dims: usize,
    ) -> Result<Self> {
        targets.check(discriminators.len())?;
        Ok(Self {
            generator,
            discriminators,
            targets,
            penalty,
            latent_dims,
        })
    }
}

impl ReplicaStep for GeneratorStep<'_> {
    type Shard = GeneratorShard;

    fn shard_size(shard: &GeneratorShard) -> usize {
        shard.size
    }

    fn replica_loss(&self, shard: &GeneratorShard, ctx: &ReplicaContext) -> Result<Tensor> {
        let device = self.generator.device();
        let noise = sample_noise(shard.size, self.latent_dims, shard.seed, device)?;
        let fakes = self.generator.forward(&noise)?;

        let scores = self
            .discriminators
            .iter()
            .map(|d| d.forward(&fakes))
            .collect::<Result<Vec<_>>>()?;
        let predictions = Tensor::stack(&scores, 0)?;
        let targets = self.targets.to_tensor(shard.size, device)?;

        let penalty = self.generator.penalty(self.penalty)?;
        replica_objective(&predictions, &targets, &penalty, ctx)
    }
}
