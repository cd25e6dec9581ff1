//! Regularization coefficient schedule.
//!
//! Both networks carry an L2 weight penalty whose coefficient decays with the
//! global step as `max(min, initial / sqrt(t))`. The discriminator's
//! coefficient is negated.

use serde::{Deserialize, Serialize};

/// Sign applied to a scheduled coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PenaltySign {
    /// Coefficient used as is (generator).
    Positive,
    /// Coefficient negated (discriminator).
    Negative,
}

impl PenaltySign {
    fn apply(self, value: f64) -> f64 {
        match self {
            Self::Positive => value,
            Self::Negative => -value,
        }
    }
}

/// L2 weight penalty handle shared by every regularized layer of one network.
///
/// The trainer owns one per network and overwrites the coefficient after each
/// step; layers read it when the network's penalty term is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct L2Penalty {
    /// Multiplier of the summed squared weights. May be negative.
    pub coefficient: f64,
}

impl L2Penalty {
    /// A penalty with the given coefficient.
    #[must_use]
    pub fn new(coefficient: f64) -> Self {
        Self { coefficient }
    }

    /// A penalty that contributes nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self { coefficient: 0.0 }
    }

    /// Whether the penalty would contribute nothing.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.coefficient == 0.0
    }
}

/// Decaying coefficient schedule for one network.
///
/// ```rust
/// use sunset_gan::scheduler::{PenaltySign, RegularizationSchedule};
///
/// let schedule = RegularizationSchedule::new(1e-2, 1e-4, PenaltySign::Negative);
/// assert_eq!(schedule.coefficient(1), -1e-2);
/// assert_eq!(schedule.coefficient(4), -5e-3);
/// assert_eq!(schedule.coefficient(100_000_000), -1e-4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegularizationSchedule {
    initial: f64,
    min: f64,
    sign: PenaltySign,
}

impl RegularizationSchedule {
    /// Create a schedule.
    #[must_use]
    pub fn new(initial: f64, min: f64, sign: PenaltySign) -> Self {
        Self { initial, min, sign }
    }

    /// Coefficient at global step `t` (steps count from 1; 0 is treated as 1).
    #[must_use]
    pub fn coefficient(&self, t: u64) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let t = t.max(1) as f64;
        self.sign.apply(self.min.max(self.initial / t.sqrt()))
    }

    /// Write the coefficient for step `t` into `penalty`.
    pub fn update(&self, penalty: &mut L2Penalty, t: u64) {
        penalty.coefficient = self.coefficient(t);
    }

    /// Penalty at the first step.
    #[must_use]
    pub fn initial_penalty(&self) -> L2Penalty {
        L2Penalty::new(self.coefficient(1))
    }
}
