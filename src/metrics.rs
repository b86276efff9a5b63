//! Running accuracy, ranking precision and loss for one pass over a split.

/// 1-indexed position of `label` when `output` is sorted descending.
///
/// The order is a stable ascending sort read backwards, so among equal
/// scores the higher index ranks first.
pub fn rank_of(label: usize, output: &[f32]) -> usize {
    let score = output[label];
    1 + output
        .iter()
        .enumerate()
        .filter(|&(i, &s)| s > score || (s == score && i > label))
        .count()
}

/// Sum of reciprocal ranks of the true labels and the number of samples.
///
/// `outputs` holds one row of class scores per label.
pub fn average_precision(labels: &[usize], outputs: &[Vec<f32>]) -> (f64, usize) {
    labels
        .iter()
        .zip(outputs)
        .fold((0.0, 0), |(ap, cnt), (&label, output)| {
            (ap + 1.0 / rank_of(label, output) as f64, cnt + 1)
        })
}

fn argmax(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, max), (i, &v)| {
            if v > max {
                (i, v)
            } else {
                (best, max)
            }
        })
        .0
}

/// Per-pass accumulator, reset at the start of each epoch or validation.
#[derive(Clone, Debug, Default)]
pub struct EpochMetrics {
    correct: usize,
    total: usize,
    ap_sum: f64,
    ap_count: usize,
    loss_sum: f64,
    batches: usize,
}

impl EpochMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Add one batch: its labels, score rows and mean loss.
    pub fn update(&mut self, labels: &[usize], outputs: &[Vec<f32>], loss: f64) {
        for (&label, output) in labels.iter().zip(outputs) {
            if argmax(output) == label {
                self.correct += 1;
            }
            self.total += 1;
        }
        let (ap, cnt) = average_precision(labels, outputs);
        self.ap_sum += ap;
        self.ap_count += cnt;
        self.loss_sum += loss;
        self.batches += 1;
    }

    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    pub fn map(&self) -> f64 {
        if self.ap_count == 0 {
            0.0
        } else {
            self.ap_sum / self.ap_count as f64
        }
    }

    /// Mean of the batch losses.
    pub fn loss(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.loss_sum / self.batches as f64
        }
    }

    pub fn batches(&self) -> usize {
        self.batches
    }
}
