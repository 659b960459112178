//! Step learning-rate decay

/// Multiplies the base rate by `factor` every `step` epochs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSchedule {
    pub initial: f64,
    pub factor: f64,
    pub step: usize,
}

impl StepSchedule {
    pub fn new(initial: f64, factor: f64, step: usize) -> Self {
        StepSchedule {
            initial,
            factor,
            step,
        }
    }

    /// Learning rate for a zero-based epoch
    pub fn learning_rate(&self, epoch: usize) -> f64 {
        if self.step == 0 {
            return self.initial;
        }
        self.initial * self.factor.powi((epoch / self.step) as i32)
    }
}
