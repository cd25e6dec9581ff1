//! Trainable models, frozen snapshots and checkpoint persistence.
//!
//! A [`Trainable`] owns the variables of one network. A [`Snapshot`] is a deep
//! copy of those variables as plain tensors, rebuilt into its own network, so
//! later optimizer updates never reach it and gradients never flow into it.
//!
//! Checkpoints are single `.safetensors` files. The architecture is stored as
//! JSON under the `architecture` metadata key and the network kind under
//! `kind`.

use std::collections::HashMap;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use safetensors::SafeTensors;

use crate::architecture::{Architecture, Network};
use crate::error::{GanError, Result};
use crate::scheduler::L2Penalty;
use crate::storage::{Storage, StoragePath};

/// Metadata key holding the architecture JSON.
pub const ARCHITECTURE_KEY: &str = "architecture";
/// Metadata key holding [`Architecture::KIND`].
pub const KIND_KEY: &str = "kind";

/// A network with trainable variables.
pub struct Trainable<A: Architecture> {
    arch: A,
    varmap: VarMap,
    net: A::Net,
    device: Device,
}

impl<A: Architecture> Trainable<A> {
    /// Build a freshly initialized network.
    ///
    /// # Errors
    ///
    /// Returns an error if the architecture cannot be built.
    pub fn new(arch: A, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let net = arch.build(vb)?;
        Ok(Self {
            arch,
            varmap,
            net,
            device: device.clone(),
        })
    }

    /// The architecture this model was built from.
    pub fn arch(&self) -> &A {
        &self.arch
    }

    /// Device holding the weights.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Forward pass through the live weights.
    ///
    /// # Errors
    ///
    /// Returns an error on shape mismatch.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.net.forward(xs)
    }

    /// Weight penalty of the live weights.
    ///
    /// # Errors
    ///
    /// Returns an error if the penalty cannot be computed.
    pub fn penalty(&self, penalty: L2Penalty) -> Result<Tensor> {
        self.net.penalty(penalty)
    }

    /// All trainable variables.
    #[must_use]
    pub fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// Number of trainable parameters.
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.vars().iter().map(|v| v.elem_count()).sum()
    }

    fn named_tensors(&self) -> Result<Vec<(String, Tensor)>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|e| GanError::Model(format!("variable map poisoned: {e}")))?;
        let mut tensors = data
            .iter()
            .map(|(name, var)| Ok((name.clone(), var.as_tensor().detach().copy()?)))
            .collect::<Result<Vec<_>>>()?;
        tensors.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(tensors)
    }

    /// Deep copy of the current weights.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy or rebuild fails.
    pub fn snapshot(&self) -> Result<Snapshot<A>> {
        let tensors: HashMap<String, Tensor> = self.named_tensors()?.into_iter().collect();
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &self.device);
        Ok(Snapshot {
            net: self.arch.build(vb)?,
        })
    }

    /// Serialize weights and architecture to safetensors bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let tensors = self
            .named_tensors()?
            .into_iter()
            .map(|(name, t)| Ok((name, t.to_device(&Device::Cpu)?)))
            .collect::<Result<Vec<_>>>()?;
        let metadata = HashMap::from([
            (ARCHITECTURE_KEY.to_string(), serde_json::to_string(&self.arch)?),
            (KIND_KEY.to_string(), A::KIND.to_string()),
        ]);
        Ok(safetensors::tensor::serialize(tensors, &Some(metadata))?)
    }

    /// Rebuild a model from [`Trainable::to_bytes`] output.
    ///
    /// # Errors
    ///
    /// Returns [`GanError::Checkpoint`] if the metadata is missing, names the
    /// other network kind, or the weights do not match the architecture.
    pub fn from_bytes(bytes: &[u8], device: &Device) -> Result<Self> {
        let (_, header) = SafeTensors::read_metadata(bytes)?;
        let metadata = header.metadata().clone().unwrap_or_default();

        if let Some(kind) = metadata.get(KIND_KEY) {
            if kind != A::KIND {
                return Err(GanError::Checkpoint(format!(
                    "checkpoint holds a {kind}, expected a {}",
                    A::KIND
                )));
            }
        }
        let arch_json = metadata.get(ARCHITECTURE_KEY).ok_or_else(|| {
            GanError::Checkpoint(format!("checkpoint has no '{ARCHITECTURE_KEY}' metadata"))
        })?;
        let arch: A = serde_json::from_str(arch_json)?;

        let loaded = candle_core::safetensors::load_buffer(bytes, device)?;
        let mut model = Self::new(arch, device)?;
        let expected: Vec<String> = model
            .varmap
            .data()
            .lock()
            .map_err(|e| GanError::Model(format!("variable map poisoned: {e}")))?
            .keys()
            .cloned()
            .collect();
        for name in &expected {
            let tensor = loaded.get(name).ok_or_else(|| {
                GanError::Checkpoint(format!("checkpoint is missing weight '{name}'"))
            })?;
            model
                .varmap
                .set_one(name, tensor)
                .map_err(|e| GanError::Checkpoint(format!("cannot restore '{name}': {e}")))?;
        }
        if loaded.len() != expected.len() {
            tracing::warn!(
                "checkpoint has {} tensors, {} {} weights restored",
                loaded.len(),
                expected.len(),
                A::KIND
            );
        }
        Ok(model)
    }

    /// Write a checkpoint to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, storage: &Storage, path: &StoragePath) -> Result<()> {
        storage.put(path, &self.to_bytes()?)?;
        tracing::info!("Saved {} to {path}", A::KIND);
        Ok(())
    }

    /// Load a checkpoint from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the checkpoint is invalid.
    pub fn load(storage: &Storage, path: &StoragePath, device: &Device) -> Result<Self> {
        let model = Self::from_bytes(&storage.get(path)?, device)?;
        tracing::info!("Loaded {} from {path}", A::KIND);
        Ok(model)
    }
}

/// Frozen copy of a model.
pub struct Snapshot<A: Architecture> {
    net: A::Net,
}

impl<A: Architecture> Snapshot<A> {
    /// Forward pass through the frozen weights.
    ///
    /// # Errors
    ///
    /// Returns an error on shape mismatch.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.net.forward(xs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::fixtures::{tiny_discriminator, tiny_generator};
    use crate::architecture::{DiscriminatorArch, GeneratorArch};

    fn first_weight(model: &Trainable<DiscriminatorArch>) -> Vec<f32> {
        let data = model.varmap.data().lock().unwrap();
        data["blocks.0.conv.weight"]
            .as_tensor()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()
    }

    #[test]
    fn test_snapshot_is_isolated_from_updates() -> Result<()> {
        let device = Device::Cpu;
        let model = Trainable::new(tiny_discriminator(), &device)?;
        let images = Tensor::randn(0f32, 1.0, (2, 3, 8, 8), &device)?;
        let snapshot = model.snapshot()?;
        let before = snapshot.forward(&images)?.to_vec2::<f32>()?;

        for var in model.vars() {
            var.set(&var.as_tensor().affine(0.5, 0.1)?)?;
        }

        let after = snapshot.forward(&images)?.to_vec2::<f32>()?;
        assert_eq!(before, after);
        assert_ne!(model.forward(&images)?.to_vec2::<f32>()?, before);
        Ok(())
    }

    #[test]
    fn test_snapshot_carries_no_gradient() -> Result<()> {
        let device = Device::Cpu;
        let model = Trainable::new(tiny_discriminator(), &device)?;
        let snapshot = model.snapshot()?;
        let images = Var::from_tensor(&Tensor::randn(0f32, 1.0, (2, 3, 8, 8), &device)?)?;
        let grads = snapshot.forward(images.as_tensor())?.sum_all()?.backward()?;
        for var in model.vars() {
            assert!(grads.get(var.as_tensor()).is_none());
        }
        assert!(grads.get(images.as_tensor()).is_some());
        Ok(())
    }

    #[test]
    fn test_bytes_roundtrip_restores_weights_and_arch() -> Result<()> {
        let device = Device::Cpu;
        let d = tiny_discriminator();
        let model = Trainable::new(d.clone(), &device)?;
        let restored = Trainable::<DiscriminatorArch>::from_bytes(&model.to_bytes()?, &device)?;
        assert_eq!(restored.arch(), &d);
        assert_eq!(restored.param_count(), model.param_count());
        assert_eq!(first_weight(&restored), first_weight(&model));
        Ok(())
    }

    #[test]
    fn test_wrong_kind_is_rejected() -> Result<()> {
        let device = Device::Cpu;
        let d = tiny_discriminator();
        let generator = Trainable::new(tiny_generator(&d), &device)?;
        let result = Trainable::<DiscriminatorArch>::from_bytes(&generator.to_bytes()?, &device);
        assert!(matches!(result, Err(GanError::Checkpoint(_))));
        Ok(())
    }

    #[test]
    fn test_save_and_load_through_storage() -> Result<()> {
        let device = Device::Cpu;
        let storage = Storage::in_memory();
        let path = StoragePath::parse("gs://bucket/models/generator.safetensors")?;
        let d = tiny_discriminator();
        let generator = Trainable::new(tiny_generator(&d), &device)?;
        generator.save(&storage, &path)?;

        let loaded = Trainable::<GeneratorArch>::load(&storage, &path, &device)?;
        let noise = Tensor::randn(0f32, 1.0, (1, 6), &device)?;
        let a = generator.forward(&noise)?.flatten_all()?.to_vec1::<f32>()?;
        let b = loaded.forward(&noise)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(a, b);
        Ok(())
    }
}
