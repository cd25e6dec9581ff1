//! Time-decayed weighting of per-step losses.
//!
//! For an epoch of `N` steps a coefficient `k` is solved such that
//! `Σ_{x=1}^{N} exp(-k·x) = 1`. Step `i` (0-based) then contributes
//! `loss_i · exp(-k·(N − i))` to the epoch's reported loss, so the most recent
//! steps dominate and the weights sum to one. This only affects reporting.

use crate::error::{GanError, Result};

/// Search bracket for `k`.
pub const DECAY_BRACKET: (f64, f64) = (0.0, 3.0);

const XTOL: f64 = 1e-12;
const MAX_ITER: usize = 200;

/// Brent's bracketed root finder.
///
/// Returns `None` when `f(lower)` and `f(upper)` have the same sign.
pub fn brent<F: Fn(f64) -> f64>(f: F, lower: f64, upper: f64, xtol: f64) -> Option<f64> {
    let (mut a, mut b) = (lower, upper);
    let (mut fa, mut fb) = (f(a), f(b));
    if fa == 0.0 {
        return Some(a);
    }
    if fb == 0.0 {
        return Some(b);
    }
    if fa.signum() == fb.signum() {
        return None;
    }

    let (mut c, mut fc) = (b, fb);
    let mut d = b - a;
    let mut e = d;

    for _ in 0..MAX_ITER {
        if fb.signum() == fc.signum() {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        let tol = 2.0 * f64::EPSILON * b.abs() + 0.5 * xtol;
        let xm = 0.5 * (c - b);
        if xm.abs() <= tol || fb == 0.0 {
            return Some(b);
        }

        if e.abs() >= tol && fa.abs() > fb.abs() {
            // Inverse quadratic interpolation, or secant when only two points differ.
            let s = fb / fa;
            let (mut p, mut q) = if a == c {
                (2.0 * xm * s, 1.0 - s)
            } else {
                let q = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * xm * q * (q - r) - (b - a) * (r - 1.0)),
                    (q - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();
            let bound = (3.0 * xm * q - (tol * q).abs()).min((e * q).abs());
            if 2.0 * p < bound {
                e = d;
                d = p / q;
            } else {
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }

        a = b;
        fa = fb;
        b += if d.abs() > tol { d } else { tol.copysign(xm) };
        fb = f(b);
    }

    Some(b)
}

/// `Σ_{x=1}^{steps} exp(-k·x) − 1`.
#[must_use]
pub fn decay_residual(k: f64, steps: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let sum: f64 = (1..=steps).map(|x| (-k * x as f64).exp()).sum();
    sum - 1.0
}

/// Loss decay coefficient for a fixed number of steps per epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossDecay {
    k: f64,
    steps: usize,
}

impl LossDecay {
    /// Solve for `k` over [`DECAY_BRACKET`].
    ///
    /// # Errors
    ///
    /// Returns [`GanError::RootNotBracketed`] when the bracket holds no root,
    /// which happens for `steps == 0`.
    ///
    /// ```rust
    /// use sunset_gan::weighting::LossDecay;
    ///
    /// let decay = LossDecay::solve(8).unwrap();
    /// let total: f64 = (0..8).map(|i| decay.weight(i)).sum();
    /// assert!((total - 1.0).abs() < 1e-9);
    /// ```
    pub fn solve(steps: usize) -> Result<Self> {
        let (lower, upper) = DECAY_BRACKET;
        let k = brent(|k| decay_residual(k, steps), lower, upper, XTOL).ok_or(
            GanError::RootNotBracketed {
                steps,
                lower,
                upper,
            },
        )?;
        Ok(Self { k, steps })
    }

    /// The solved coefficient.
    #[must_use]
    pub fn k(&self) -> f64 {
        self.k
    }

    /// Steps per epoch the coefficient was solved for.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Weight of 0-based step `index`.
    #[must_use]
    pub fn weight(&self, index: usize) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let distance = self.steps.saturating_sub(index) as f64;
        (-self.k * distance).exp()
    }
}

/// Weighted discriminator and generator losses for one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochLossAccumulator {
    decay: LossDecay,
    d_total: f64,
    g_total: f64,
    recorded: usize,
}

impl EpochLossAccumulator {
    /// Start an empty epoch.
    #[must_use]
    pub fn new(decay: LossDecay) -> Self {
        Self {
            decay,
            d_total: 0.0,
            g_total: 0.0,
            recorded: 0,
        }
    }

    /// Add the losses of step `index`.
    pub fn record(&mut self, index: usize, d_loss: f64, g_loss: f64) {
        let w = self.decay.weight(index);
        self.d_total += d_loss * w;
        self.g_total += g_loss * w;
        self.recorded += 1;
    }

    /// Weighted discriminator loss so far.
    #[must_use]
    pub fn d_loss(&self) -> f64 {
        self.d_total
    }

    /// Weighted generator loss so far.
    #[must_use]
    pub fn g_loss(&self) -> f64 {
        self.g_total
    }

    /// Number of recorded steps.
    #[must_use]
    pub fn recorded(&self) -> usize {
        self.recorded
    }
}
