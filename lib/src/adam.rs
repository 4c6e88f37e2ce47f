use crate::Error;
use candle_core::Tensor;

/// Hyper-parameters of the Adam update.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AdamParams {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Default for AdamParams {
    fn default() -> Self {
        Self {
            learning_rate: 5.0,
            beta1: 0.99,
            beta2: 0.999,
            epsilon: 1e-1,
        }
    }
}

/// Adam state for a single tensor.
///
/// Uses the formulation where the bias corrections are folded into the step
/// size and epsilon is added to the uncorrected second moment:
///
/// ```text
/// lr_t = lr * sqrt(1 - beta2^t) / (1 - beta1^t)
/// x    = x - lr_t * m / (sqrt(v) + epsilon)
/// ```
pub struct Adam {
    params: AdamParams,
    step: i32,
    first_moment: Tensor,
    second_moment: Tensor,
}

impl Adam {
    /// Creates zeroed moments shaped like `value`
    pub fn new(params: AdamParams, value: &Tensor) -> Result<Self, Error> {
        Ok(Self {
            params,
            step: 0,
            first_moment: value.zeros_like()?,
            second_moment: value.zeros_like()?,
        })
    }

    /// Number of updates applied so far
    pub fn steps(&self) -> i32 {
        self.step
    }

    /// Folds `grad` into the moments and returns the updated `value`.
    pub fn step(&mut self, value: &Tensor, grad: &Tensor) -> Result<Tensor, Error> {
        let AdamParams {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } = self.params;
        let grad = grad.detach();

        self.step += 1;

        let first_moment = self
            .first_moment
            .affine(beta1, 0.0)?
            .add(&grad.affine(1.0 - beta1, 0.0)?)?;
        let second_moment = self
            .second_moment
            .affine(beta2, 0.0)?
            .add(&grad.sqr()?.affine(1.0 - beta2, 0.0)?)?;

        let step_size = learning_rate * (1.0 - beta2.powi(self.step)).sqrt()
            / (1.0 - beta1.powi(self.step));

        let denom = second_moment.sqrt()?.affine(1.0, epsilon)?;
        let update = first_moment.div(&denom)?.affine(step_size, 0.0)?;
        let next = value.detach().sub(&update)?;

        self.first_moment = first_moment;
        self.second_moment = second_moment;

        Ok(next)
    }
}
