//! Data-parallel replica runner.
//!
//! A step's batch is split into contiguous shards, one per replica. Each
//! replica computes its loss and back-propagates on a worker of a dedicated
//! thread pool. The runner then sums the losses and the gradients of the
//! trainable variables; the caller applies its optimizer once with the result.
//!
//! Replica losses must be normalized by the global batch size (the sum of all
//! shard sizes), so the summed loss and gradients equal those of one pass over
//! the whole batch.

use std::ops::Range;

use candle_core::backprop::GradStore;
use candle_core::{DType, Tensor, Var};
use rayon::prelude::*;

use crate::error::{GanError, Result};

/// What a replica knows about the step it takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaContext {
    /// Replica index.
    pub index: usize,
    /// Number of replicas with a non-empty shard.
    pub num_replicas: usize,
    /// Sum of all shard sizes.
    pub global_batch_size: usize,
}

impl ReplicaContext {
    /// `1 / global_batch_size`.
    #[must_use]
    pub fn batch_scale(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let scale = 1.0 / self.global_batch_size as f64;
        scale
    }

    /// `1 / num_replicas`.
    #[must_use]
    pub fn replica_scale(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let scale = 1.0 / self.num_replicas as f64;
        scale
    }
}

/// A step that can run on one shard of a batch.
pub trait ReplicaStep: Sync {
    /// Per-replica input.
    type Shard: Sync;

    /// Number of examples in `shard`.
    fn shard_size(shard: &Self::Shard) -> usize;

    /// Scalar loss of one replica.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails.
    fn replica_loss(&self, shard: &Self::Shard, ctx: &ReplicaContext) -> Result<Tensor>;
}

/// Reduced result of one distributed step.
pub struct StepOutcome {
    /// Sum of replica losses.
    pub loss: f64,
    /// Sum of replica gradients.
    pub grads: GradStore,
}

/// Runs steps across replicas on a thread pool.
pub struct ReplicaRunner {
    pool: rayon::ThreadPool,
    num_replicas: usize,
}

impl ReplicaRunner {
    /// Create a runner with one worker per replica.
    ///
    /// # Errors
    ///
    /// Returns [`GanError::Training`] if `num_replicas` is zero or the pool
    /// cannot be created.
    pub fn new(num_replicas: usize) -> Result<Self> {
        if num_replicas == 0 {
            return Err(GanError::Training("at least one replica is required".into()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_replicas)
            .thread_name(|i| format!("replica-{i}"))
            .build()
            .map_err(|e| GanError::Training(format!("failed to start replica pool: {e}")))?;
        Ok(Self { pool, num_replicas })
    }

    /// Number of replicas.
    #[must_use]
    pub fn num_replicas(&self) -> usize {
        self.num_replicas
    }

    /// Contiguous shard ranges for a batch of `len` examples.
    #[must_use]
    pub fn shard_ranges(&self, len: usize) -> Vec<Range<usize>> {
        split_shards(len, self.num_replicas)
    }

    /// Run `step` on every non-empty shard and reduce.
    ///
    /// # Errors
    ///
    /// Returns the first replica error, or [`GanError::Training`] if every
    /// shard is empty.
    pub fn run<S: ReplicaStep>(
        &self,
        step: &S,
        shards: &[S::Shard],
        vars: &[Var],
    ) -> Result<StepOutcome> {
        let active: Vec<&S::Shard> = shards.iter().filter(|s| S::shard_size(s) > 0).collect();
        if active.is_empty() {
            return Err(GanError::Training("step has no examples".into()));
        }
        let global_batch_size = active.iter().map(|s| S::shard_size(s)).sum();
        let num_replicas = active.len();

        let results: Vec<(f64, GradStore)> = self.pool.install(|| {
            active
                .par_iter()
                .enumerate()
                .map(|(index, shard)| {
                    let ctx = ReplicaContext {
                        index,
                        num_replicas,
                        global_batch_size,
                    };
                    let loss = step.replica_loss(shard, &ctx)?;
                    let grads = loss.backward()?;
                    let value = loss.to_dtype(DType::F64)?.to_scalar::<f64>()?;
                    tracing::trace!("replica {}/{}: loss {value:.6}", ctx.index + 1, ctx.num_replicas);
                    Ok((value, grads))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let loss = results.iter().map(|(l, _)| l).sum();
        let grads = sum_gradients(results.into_iter().map(|(_, g)| g).collect(), vars)?;
        Ok(StepOutcome { loss, grads })
    }
}

/// Split `len` examples into `replicas` contiguous ranges whose sizes differ
/// by at most one. Ranges may be empty when `len < replicas`.
#[must_use]
pub fn split_shards(len: usize, replicas: usize) -> Vec<Range<usize>> {
    let replicas = replicas.max(1);
    let (base, extra) = (len / replicas, len % replicas);
    let mut start = 0;
    (0..replicas)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

/// Sum the gradients of `vars` across replica stores into the first store.
///
/// # Errors
///
/// Returns [`GanError::Training`] if `stores` is empty.
pub fn sum_gradients(stores: Vec<GradStore>, vars: &[Var]) -> Result<GradStore> {
    let mut stores = stores.into_iter();
    let Some(mut merged) = stores.next() else {
        return Err(GanError::Training("no replica gradients to reduce".into()));
    };
    let rest: Vec<GradStore> = stores.collect();
    if rest.is_empty() {
        return Ok(merged);
    }
    for var in vars {
        let mut total = merged.get(var.as_tensor()).cloned();
        for store in &rest {
            if let Some(grad) = store.get(var.as_tensor()) {
                total = Some(match total {
                    Some(acc) => acc.add(grad)?,
                    None => grad.clone(),
                });
            }
        }
        if let Some(total) = total {
            merged.insert(var.as_tensor(), total);
        }
    }
    Ok(merged)
}
