//! Generator and discriminator architectures.
//!
//! An architecture is a small serializable description of a network. It is
//! stored as JSON next to the weights when a model is saved, so a checkpoint
//! can be rebuilt without the configuration that produced it.

use candle_core::Tensor;
use candle_nn::{Linear, Module, VarBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{GanError, Result};
use crate::layers::{l2_penalty, DownBlock, Regularized, SeBlock, Swish, UpBlock};
use crate::scheduler::L2Penalty;

/// A network built from an [`Architecture`].
pub trait Network: Send + Sync {
    /// Run the network on a batch.
    ///
    /// # Errors
    ///
    /// Returns an error on shape mismatch.
    fn forward(&self, xs: &Tensor) -> Result<Tensor>;

    /// L2 penalty over the regularized trunk layers.
    ///
    /// # Errors
    ///
    /// Returns an error if the penalty cannot be computed.
    fn penalty(&self, penalty: L2Penalty) -> Result<Tensor>;
}

/// Serializable description of a network.
pub trait Architecture: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name used in logs and checkpoint metadata.
    const KIND: &'static str;

    /// The network this architecture builds.
    type Net: Network;

    /// Build the network, creating or looking up its weights through `vb`.
    ///
    /// # Errors
    ///
    /// Returns an error if a weight is missing or has the wrong shape.
    fn build(&self, vb: VarBuilder) -> Result<Self::Net>;
}

/// Convolutional discriminator producing one logit per image.
///
/// The first block keeps the resolution and every further block halves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscriminatorArch {
    /// Input height.
    pub height: usize,
    /// Input width.
    pub width: usize,
    /// Input channels.
    pub channels: usize,
    /// Output channels of each conv block.
    pub filters: Vec<usize>,
}

impl DiscriminatorArch {
    fn downsample_factor(&self) -> usize {
        1 << self.filters.len().saturating_sub(1)
    }

    /// Shape `[channels, height, width]` of the last block's output.
    ///
    /// ```rust
    /// use sunset_gan::architecture::DiscriminatorArch;
    ///
    /// let arch = DiscriminatorArch {
    ///     height: 64,
    ///     width: 64,
    ///     channels: 3,
    ///     filters: vec![16, 32, 64, 128, 256],
    /// };
    /// assert_eq!(arch.feature_shape(), [256, 4, 4]);
    /// ```
    #[must_use]
    pub fn feature_shape(&self) -> [usize; 3] {
        let factor = self.downsample_factor();
        [
            self.filters.last().copied().unwrap_or(self.channels),
            self.height / factor,
            self.width / factor,
        ]
    }

    /// Check that the blocks divide the input evenly.
    ///
    /// # Errors
    ///
    /// Returns [`GanError::Config`] describing the problem.
    pub fn validate(&self) -> Result<()> {
        if self.height == 0 || self.width == 0 || self.channels == 0 {
            return Err(GanError::Config(
                "model.image_shape entries must be > 0".into(),
            ));
        }
        if self.filters.is_empty() || self.filters.contains(&0) {
            return Err(GanError::Config(
                "model.discriminator_filters must be non-empty and > 0".into(),
            ));
        }
        let factor = self.downsample_factor();
        if self.height % factor != 0 || self.width % factor != 0 {
            return Err(GanError::Config(format!(
                "image size {}x{} is not divisible by the discriminator downsampling factor {factor}",
                self.height, self.width
            )));
        }
        Ok(())
    }
}

/// Built discriminator.
pub struct Discriminator {
    blocks: Vec<DownBlock>,
    head: Linear,
}

impl Architecture for DiscriminatorArch {
    const KIND: &'static str = "discriminator";
    type Net = Discriminator;

    fn build(&self, vb: VarBuilder) -> Result<Discriminator> {
        self.validate()?;
        let mut blocks = Vec::with_capacity(self.filters.len());
        let mut in_c = self.channels;
        for (i, &out_c) in self.filters.iter().enumerate() {
            let stride = if i == 0 { 1 } else { 2 };
            blocks.push(DownBlock::new(in_c, out_c, stride, vb.pp(format!("blocks.{i}")))?);
            in_c = out_c;
        }
        let [c, h, w] = self.feature_shape();
        let head = candle_nn::linear(c * h * w, 1, vb.pp("head"))?;
        Ok(Discriminator { blocks, head })
    }
}

impl Network for Discriminator {
    /// `(N, C, H, W)` images to `(N, 1)` logits.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        for block in &self.blocks {
            xs = block.forward(&xs)?;
        }
        Ok(self.head.forward(&xs.flatten_from(1)?)?)
    }

    fn penalty(&self, penalty: L2Penalty) -> Result<Tensor> {
        let weights: Vec<&Tensor> = self
            .blocks
            .iter()
            .flat_map(|b| b.regularized_weights())
            .collect();
        l2_penalty(&weights, penalty)
    }
}

/// Generator mapping latent noise to images.
///
/// Dense projection reshaped to `reshape`, `head_filters` upsampling blocks,
/// `se_filters` squeeze-excitation residual blocks, `tail_filters` upsampling
/// blocks, then a 1×1 conv with `tanh` to `out_channels`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorArch {
    /// Latent vector size.
    pub latent_dims: usize,
    /// `[channels, height, width]` of the dense projection.
    pub reshape: [usize; 3],
    /// Output image channels.
    pub out_channels: usize,
    /// Upsampling blocks before the SE blocks.
    pub head_filters: Vec<usize>,
    /// SE residual blocks.
    pub se_filters: Vec<usize>,
    /// Upsampling blocks after the SE blocks.
    pub tail_filters: Vec<usize>,
}

impl GeneratorArch {
    /// Output image shape `[channels, height, width]`.
    #[must_use]
    pub fn output_shape(&self) -> [usize; 3] {
        let factor = 1 << (self.head_filters.len() + self.tail_filters.len());
        [
            self.out_channels,
            self.reshape[1] * factor,
            self.reshape[2] * factor,
        ]
    }

    /// Check the generator produces images the discriminator accepts.
    ///
    /// # Errors
    ///
    /// Returns [`GanError::Config`] on any mismatch.
    pub fn validate(&self, discriminator: &DiscriminatorArch) -> Result<()> {
        if self.latent_dims == 0 {
            return Err(GanError::Config("model.latent_dims must be > 0".into()));
        }
        if self.reshape.contains(&0) {
            return Err(GanError::Config("generator reshape must be non-zero".into()));
        }
        if self
            .head_filters
            .iter()
            .chain(&self.se_filters)
            .chain(&self.tail_filters)
            .any(|&f| f == 0)
        {
            return Err(GanError::Config("generator filters must be > 0".into()));
        }
        let upsampling = self.head_filters.len() + self.tail_filters.len();
        let downsampling = discriminator.filters.len().saturating_sub(1);
        if upsampling != downsampling {
            return Err(GanError::Config(format!(
                "generator has {upsampling} upsampling blocks but the discriminator downsamples {downsampling} times"
            )));
        }
        let expected = [discriminator.channels, discriminator.height, discriminator.width];
        if self.output_shape() != expected {
            return Err(GanError::Config(format!(
                "generator produces {:?} images but the discriminator expects {expected:?}",
                self.output_shape()
            )));
        }
        Ok(())
    }
}

/// Built generator.
pub struct Generator {
    dense: Linear,
    dense_act: Swish,
    reshape: [usize; 3],
    head: Vec<UpBlock>,
    se: Vec<SeBlock>,
    tail: Vec<UpBlock>,
    out: candle_nn::Conv2d,
}

impl Architecture for GeneratorArch {
    const KIND: &'static str = "generator";
    type Net = Generator;

    fn build(&self, vb: VarBuilder) -> Result<Generator> {
        let [c, h, w] = self.reshape;
        let dense = candle_nn::linear(self.latent_dims, c * h * w, vb.pp("dense"))?;
        let dense_act = Swish::trainable(vb.pp("dense_act"))?;

        let mut in_c = c;
        let mut head = Vec::with_capacity(self.head_filters.len());
        for (i, &f) in self.head_filters.iter().enumerate() {
            head.push(UpBlock::new(in_c, f, vb.pp(format!("head.{i}")))?);
            in_c = f;
        }
        let mut se = Vec::with_capacity(self.se_filters.len());
        for (i, &f) in self.se_filters.iter().enumerate() {
            se.push(SeBlock::new(in_c, f, vb.pp(format!("se.{i}")))?);
            in_c = f;
        }
        let mut tail = Vec::with_capacity(self.tail_filters.len());
        for (i, &f) in self.tail_filters.iter().enumerate() {
            tail.push(UpBlock::new(in_c, f, vb.pp(format!("tail.{i}")))?);
            in_c = f;
        }
        let out = candle_nn::conv2d(
            in_c,
            self.out_channels,
            1,
            candle_nn::Conv2dConfig::default(),
            vb.pp("out"),
        )?;

        Ok(Generator {
            dense,
            dense_act,
            reshape: self.reshape,
            head,
            se,
            tail,
            out,
        })
    }
}

impl Network for Generator {
    /// `(N, latent_dims)` noise to `(N, C, H, W)` images in `[-1, 1]`.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let batch = xs.dim(0)?;
        let [c, h, w] = self.reshape;
        let xs = self.dense_act.forward(&self.dense.forward(xs)?)?;
        let mut xs = xs.reshape((batch, c, h, w))?;
        for block in &self.head {
            xs = block.forward(&xs)?;
        }
        for block in &self.se {
            xs = block.forward(&xs)?;
        }
        for block in &self.tail {
            xs = block.forward(&xs)?;
        }
        Ok(self.out.forward(&xs)?.tanh()?)
    }

    fn penalty(&self, penalty: L2Penalty) -> Result<Tensor> {
        let mut weights = self.dense.regularized_weights();
        weights.extend(self.head.iter().flat_map(|b| b.regularized_weights()));
        weights.extend(self.se.iter().flat_map(|b| b.regularized_weights()));
        weights.extend(self.tail.iter().flat_map(|b| b.regularized_weights()));
        l2_penalty(&weights, penalty)
    }
}

/// Small architectures for fast CPU tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::{DiscriminatorArch, GeneratorArch};

    pub(crate) fn tiny_discriminator() -> DiscriminatorArch {
        DiscriminatorArch {
            height: 8,
            width: 8,
            channels: 3,
            filters: vec![4, 8],
        }
    }

    pub(crate) fn tiny_generator(d: &DiscriminatorArch) -> GeneratorArch {
        GeneratorArch {
            latent_dims: 6,
            reshape: d.feature_shape(),
            out_channels: d.channels,
            head_filters: vec![],
            se_filters: vec![4],
            tail_filters: vec![4],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{tiny_discriminator, tiny_generator};
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_feature_shape_and_validation() {
        let d = tiny_discriminator();
        assert_eq!(d.feature_shape(), [8, 4, 4]);
        assert!(d.validate().is_ok());

        let odd = DiscriminatorArch { height: 9, ..d };
        assert!(odd.validate().is_err());
    }

    #[test]
    fn test_generator_must_match_discriminator() {
        let d = tiny_discriminator();
        let g = tiny_generator(&d);
        assert!(g.validate(&d).is_ok());
        assert_eq!(g.output_shape(), [3, 8, 8]);

        let too_many = GeneratorArch {
            head_filters: vec![4],
            ..g.clone()
        };
        assert!(too_many.validate(&d).is_err());

        let wrong_channels = GeneratorArch { out_channels: 1, ..g };
        assert!(wrong_channels.validate(&d).is_err());
    }

    #[test]
    fn test_networks_forward_shapes() -> Result<()> {
        let device = Device::Cpu;
        let d_arch = tiny_discriminator();
        let g_arch = tiny_generator(&d_arch);

        let d_vars = VarMap::new();
        let d = d_arch.build(VarBuilder::from_varmap(&d_vars, DType::F32, &device))?;
        let g_vars = VarMap::new();
        let g = g_arch.build(VarBuilder::from_varmap(&g_vars, DType::F32, &device))?;

        let noise = Tensor::randn(0f32, 1.0, (5, 6), &device)?;
        let images = g.forward(&noise)?;
        assert_eq!(images.dims(), &[5, 3, 8, 8]);
        let max = images.abs()?.max_all()?.to_scalar::<f32>()?;
        assert!(max <= 1.0);

        let logits = d.forward(&images)?;
        assert_eq!(logits.dims(), &[5, 1]);
        assert!(logits.flatten_all()?.to_vec1::<f32>()?.iter().all(|l| l.is_finite()));
        Ok(())
    }

    #[test]
    fn test_penalty_sign_follows_coefficient() -> Result<()> {
        let device = Device::Cpu;
        let d_vars = VarMap::new();
        let d = tiny_discriminator().build(VarBuilder::from_varmap(&d_vars, DType::F32, &device))?;

        let positive = d.penalty(L2Penalty::new(1e-2))?.to_scalar::<f32>()?;
        let negative = d.penalty(L2Penalty::new(-1e-2))?.to_scalar::<f32>()?;
        let disabled = d.penalty(L2Penalty::disabled())?.to_scalar::<f32>()?;
        assert!(positive > 0.0);
        assert!((positive + negative).abs() < 1e-6);
        assert_eq!(disabled, 0.0);
        Ok(())
    }

    #[test]
    fn test_architecture_json_roundtrip() {
        let d = tiny_discriminator();
        let json = serde_json::to_string(&tiny_generator(&d)).unwrap();
        let back: GeneratorArch = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tiny_generator(&d));
    }
}
