//! Step learning-rate decay and validation-loss early stopping.

/// Multiplies the learning rate by `factor` when training reaches each of
/// the configured epochs.
#[derive(Clone, Debug)]
pub struct StepDecay {
    lr: f64,
    factor: f64,
    steps: Vec<usize>,
    next: usize,
}

impl StepDecay {
    pub fn new(initial_lr: f64, factor: f64, mut steps: Vec<usize>) -> Self {
        steps.sort_unstable();
        steps.dedup();
        Self {
            lr: initial_lr,
            factor,
            steps,
            next: 0,
        }
    }

    /// Learning rate to use for `epoch` (0-based). Call once per epoch, in order.
    pub fn lr_for_epoch(&mut self, epoch: usize) -> f64 {
        if self.steps.get(self.next) == Some(&epoch) {
            self.lr *= self.factor;
            self.next += 1;
        }
        self.lr
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }
}

/// Outcome of feeding one validation loss to [`EarlyStopping`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Verdict {
    /// Strictly better than the best so far; persist the weights.
    Improved,
    /// Strictly worse; carries the current count of such epochs.
    Worse(usize),
    /// Equal to the best (or NaN): nothing changes.
    Unchanged,
    /// Worse for `patience` epochs in a row.
    Stop,
}

#[derive(Clone, Debug)]
pub struct EarlyStopping {
    best: f64,
    patience: usize,
    no_improvement: usize,
}

impl EarlyStopping {
    pub const PATIENCE: usize = 3;

    pub fn new(best: f64) -> Self {
        Self {
            best,
            patience: Self::PATIENCE,
            no_improvement: 0,
        }
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn no_improvement(&self) -> usize {
        self.no_improvement
    }

    pub fn update(&mut self, val_loss: f64) -> Verdict {
        if self.best > val_loss {
            self.best = val_loss;
            self.no_improvement = 0;
            Verdict::Improved
        } else if self.best < val_loss {
            self.no_improvement += 1;
            if self.no_improvement >= self.patience {
                Verdict::Stop
            } else {
                Verdict::Worse(self.no_improvement)
            }
        } else {
            Verdict::Unchanged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decays_only_at_boundaries() {
        let mut schedule = StepDecay::new(0.001, 0.75, vec![10, 20, 30]);
        let lrs = (0..40).map(|e| schedule.lr_for_epoch(e)).collect::<Vec<_>>();

        assert!(lrs[..10].iter().all(|&lr| lr == 0.001));
        assert!((lrs[10] - lrs[9] * 0.75).abs() < 1e-15);
        assert!(lrs[10..20].iter().all(|&lr| lr == lrs[10]));
        assert!((lrs[20] - 0.001 * 0.75 * 0.75).abs() < 1e-15);
        assert!((lrs[39] - 0.001 * 0.75f64.powi(3)).abs() < 1e-15);
    }

    #[test]
    fn unsorted_steps_are_normalised() {
        let mut schedule = StepDecay::new(1.0, 0.5, vec![3, 1, 3]);
        let lrs = (0..5).map(|e| schedule.lr_for_epoch(e)).collect::<Vec<_>>();
        assert_eq!(lrs, vec![1.0, 0.5, 0.5, 0.25, 0.25]);
    }

    #[test]
    fn equal_loss_is_a_no_op() {
        let mut stopper = EarlyStopping::new(f64::INFINITY);
        let verdicts = [0.5, 0.5, 0.6, 0.7]
            .into_iter()
            .map(|loss| stopper.update(loss))
            .collect::<Vec<_>>();

        assert_eq!(
            verdicts,
            vec![
                Verdict::Improved,
                Verdict::Unchanged,
                Verdict::Worse(1),
                Verdict::Worse(2)
            ]
        );
        assert_eq!(stopper.best(), 0.5);
    }

    #[test]
    fn stops_after_three_worse_epochs() {
        let mut stopper = EarlyStopping::new(0.4);
        assert_eq!(stopper.update(0.5), Verdict::Worse(1));
        assert_eq!(stopper.update(0.3), Verdict::Improved);
        assert_eq!(stopper.no_improvement(), 0);
        assert_eq!(stopper.update(0.31), Verdict::Worse(1));
        assert_eq!(stopper.update(0.32), Verdict::Worse(2));
        assert_eq!(stopper.update(0.33), Verdict::Stop);
    }

    #[test]
    fn nan_loss_changes_nothing() {
        let mut stopper = EarlyStopping::new(1.0);
        assert_eq!(stopper.update(f64::NAN), Verdict::Unchanged);
        assert_eq!(stopper.best(), 1.0);
    }
}
