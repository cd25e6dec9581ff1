//! Building blocks shared by the generator and discriminator.
//!
//! Everything here works on `(batch, channels, height, width)` tensors. Layers
//! that carry an L2 penalty expose their kernel and bias through
//! [`Regularized::regularized_weights`] so a network can sum them into one
//! penalty term.

use candle_core::Tensor;
use candle_nn::{
    Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig, Init, Linear, Module,
    VarBuilder,
};

use crate::error::{GanError, Result};
use crate::scheduler::L2Penalty;

/// Epsilon of instance normalization.
pub const INSTANCE_NORM_EPS: f64 = 1e-3;

/// Logistic sigmoid, written with primitive ops so it is differentiable.
pub fn sigmoid(xs: &Tensor) -> Result<Tensor> {
    Ok((xs.neg()?.exp()? + 1.0)?.recip()?)
}

/// Layers whose weights enter the network's L2 penalty.
pub trait Regularized {
    /// Kernel and bias tensors.
    fn regularized_weights(&self) -> Vec<&Tensor>;
}

impl Regularized for Conv2d {
    fn regularized_weights(&self) -> Vec<&Tensor> {
        std::iter::once(self.weight()).chain(self.bias()).collect()
    }
}

impl Regularized for ConvTranspose2d {
    fn regularized_weights(&self) -> Vec<&Tensor> {
        std::iter::once(self.weight()).chain(self.bias()).collect()
    }
}

impl Regularized for Linear {
    fn regularized_weights(&self) -> Vec<&Tensor> {
        std::iter::once(self.weight()).chain(self.bias()).collect()
    }
}

/// `coefficient · Σ w²` over `weights`.
pub fn l2_penalty(weights: &[&Tensor], penalty: L2Penalty) -> Result<Tensor> {
    let mut total: Option<Tensor> = None;
    for w in weights {
        let sq = w.sqr()?.sum_all()?;
        total = Some(match total {
            Some(acc) => (acc + sq)?,
            None => sq,
        });
    }
    match total {
        Some(t) => Ok(t.affine(penalty.coefficient, 0.0)?),
        None => Err(GanError::Model("network has no regularized layers".into())),
    }
}

/// `x · sigmoid(β·x)`, with β either trainable or fixed at 1.
#[derive(Debug, Clone)]
pub struct Swish {
    beta: Option<Tensor>,
}

impl Swish {
    /// Swish with a trainable β initialized to 1.
    pub fn trainable(vb: VarBuilder) -> Result<Self> {
        let beta = vb.get_with_hints(1, "beta", Init::Const(1.0))?;
        Ok(Self { beta: Some(beta) })
    }

    /// Swish with β = 1.
    #[must_use]
    pub fn fixed() -> Self {
        Self { beta: None }
    }

    /// Apply the activation.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let gate = match &self.beta {
            Some(beta) => sigmoid(&xs.broadcast_mul(beta)?)?,
            None => sigmoid(xs)?,
        };
        Ok(xs.mul(&gate)?)
    }
}

/// Per-sample, per-channel normalization over the spatial dimensions with a
/// learnable scale and offset.
#[derive(Debug, Clone)]
pub struct InstanceNorm {
    gamma: Tensor,
    beta: Tensor,
    channels: usize,
}

impl InstanceNorm {
    /// Scale 1 and offset 0 for each of `channels`.
    pub fn new(channels: usize, vb: VarBuilder) -> Result<Self> {
        let gamma = vb.get_with_hints(channels, "gamma", Init::Const(1.0))?;
        let beta = vb.get_with_hints(channels, "beta", Init::Const(0.0))?;
        Ok(Self {
            gamma,
            beta,
            channels,
        })
    }

    /// Normalize each `(sample, channel)` plane of an NCHW tensor.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mean = xs.mean_keepdim((2, 3))?;
        let centered = xs.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim((2, 3))?;
        let normed = centered.broadcast_div(&(var + INSTANCE_NORM_EPS)?.sqrt()?)?;
        let gamma = self.gamma.reshape((1, self.channels, 1, 1))?;
        let beta = self.beta.reshape((1, self.channels, 1, 1))?;
        Ok(normed.broadcast_mul(&gamma)?.broadcast_add(&beta)?)
    }
}

fn same_conv(stride: usize) -> Conv2dConfig {
    Conv2dConfig {
        padding: 1,
        stride,
        ..Default::default()
    }
}

/// Stride-1, size-preserving 3×3 transposed convolution.
fn same_conv_transpose() -> ConvTranspose2dConfig {
    ConvTranspose2dConfig {
        padding: 1,
        output_padding: 0,
        stride: 1,
        ..Default::default()
    }
}

/// Insert a zero after every row and column: `(N, C, H, W)` to `(N, C, 2H, 2W)`.
///
/// A stride-1 transposed convolution with padding 1 over this tensor equals a
/// stride-2 transposed convolution with padding 1 and output padding 1 over
/// the input.
pub fn zero_interleave(xs: &Tensor) -> Result<Tensor> {
    let (n, c, h, w) = xs.dims4()?;
    let xs = xs.unsqueeze(4)?;
    let xs = Tensor::cat(&[&xs, &xs.zeros_like()?], 4)?.reshape((n, c, h, 1, 2 * w))?;
    Ok(Tensor::cat(&[&xs, &xs.zeros_like()?], 3)?.reshape((n, c, 2 * h, 2 * w))?)
}

/// Conv → trainable Swish → instance norm. Stride 2 halves the resolution.
#[derive(Debug, Clone)]
pub struct DownBlock {
    conv: Conv2d,
    act: Swish,
    norm: InstanceNorm,
}

impl DownBlock {
    /// 3×3 block from `in_c` to `out_c` channels.
    pub fn new(in_c: usize, out_c: usize, stride: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            conv: candle_nn::conv2d(in_c, out_c, 3, same_conv(stride), vb.pp("conv"))?,
            act: Swish::trainable(vb.pp("act"))?,
            norm: InstanceNorm::new(out_c, vb.pp("norm"))?,
        })
    }

    /// Apply the block.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.conv.forward(xs)?;
        self.norm.forward(&self.act.forward(&xs)?)
    }
}

impl Regularized for DownBlock {
    fn regularized_weights(&self) -> Vec<&Tensor> {
        self.conv.regularized_weights()
    }
}

/// Stride-2 transposed conv → trainable Swish → instance norm. Doubles the resolution.
#[derive(Debug, Clone)]
pub struct UpBlock {
    conv: ConvTranspose2d,
    act: Swish,
    norm: InstanceNorm,
}

impl UpBlock {
    /// 3×3 upsampling block from `in_c` to `out_c` channels.
    pub fn new(in_c: usize, out_c: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            conv: candle_nn::conv_transpose2d(in_c, out_c, 3, same_conv_transpose(), vb.pp("conv"))?,
            act: Swish::trainable(vb.pp("act"))?,
            norm: InstanceNorm::new(out_c, vb.pp("norm"))?,
        })
    }

    /// `(N, C, H, W)` to `(N, out_c, 2H, 2W)`.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.conv.forward(&zero_interleave(xs)?)?;
        self.norm.forward(&self.act.forward(&xs)?)
    }
}

impl Regularized for UpBlock {
    fn regularized_weights(&self) -> Vec<&Tensor> {
        self.conv.regularized_weights()
    }
}

/// Residual block with squeeze-excitation channel gating.
///
/// ```text
/// x ─ convT ─┬─ swish ─ norm ─ convT ─ norm ─┬─ × ─ + ─ swish
///            │                               └─ SE ┘   │
///            └─────────────────────────────────────────┘
/// ```
///
/// The SE branch averages over space, squeezes to `max(filters / 16, 1)`
/// channels, applies a fixed Swish and expands back through a sigmoid.
#[derive(Debug, Clone)]
pub struct SeBlock {
    conv_in: ConvTranspose2d,
    act_in: Swish,
    norm_in: InstanceNorm,
    conv_out: ConvTranspose2d,
    norm_out: InstanceNorm,
    squeeze: Conv2d,
    excite: Conv2d,
    act_out: Swish,
}

impl SeBlock {
    /// Resolution-preserving block from `in_c` to `filters` channels.
    pub fn new(in_c: usize, filters: usize, vb: VarBuilder) -> Result<Self> {
        let reduced = (filters / 16).max(1);
        let pointwise = Conv2dConfig::default();
        Ok(Self {
            conv_in: candle_nn::conv_transpose2d(in_c, filters, 3, same_conv_transpose(), vb.pp("conv_in"))?,
            act_in: Swish::trainable(vb.pp("act_in"))?,
            norm_in: InstanceNorm::new(filters, vb.pp("norm_in"))?,
            conv_out: candle_nn::conv_transpose2d(filters, filters, 3, same_conv_transpose(), vb.pp("conv_out"))?,
            norm_out: InstanceNorm::new(filters, vb.pp("norm_out"))?,
            squeeze: candle_nn::conv2d(filters, reduced, 1, pointwise, vb.pp("squeeze"))?,
            excite: candle_nn::conv2d(reduced, filters, 1, pointwise, vb.pp("excite"))?,
            act_out: Swish::trainable(vb.pp("act_out"))?,
        })
    }

    /// Apply the block.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let shortcut = self.conv_in.forward(xs)?;
        let xs = self.norm_in.forward(&self.act_in.forward(&shortcut)?)?;
        let xs = self.norm_out.forward(&self.conv_out.forward(&xs)?)?;

        let se = xs.mean_keepdim((2, 3))?;
        let se = Swish::fixed().forward(&self.squeeze.forward(&se)?)?;
        let se = sigmoid(&self.excite.forward(&se)?)?;

        let xs = xs.broadcast_mul(&se)?.add(&shortcut)?;
        self.act_out.forward(&xs)
    }
}

impl Regularized for SeBlock {
    fn regularized_weights(&self) -> Vec<&Tensor> {
        let mut weights = self.conv_in.regularized_weights();
        weights.extend(self.conv_out.regularized_weights());
        weights
    }
}

/// Parameter count of a set of tensors.
#[must_use]
pub fn param_count<'a>(tensors: impl IntoIterator<Item = &'a Tensor>) -> usize {
    tensors.into_iter().map(Tensor::elem_count).sum()
}
