//! Training metrics and evaluation

use std::fmt;

/// Regression metrics accumulated over batches
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    /// Sum of per-batch loss weighted by batch size
    pub loss_sum: f64,
    /// Sum of absolute errors
    pub abs_err_sum: f64,
    /// Number of samples seen
    pub count: usize,
    /// Number of batches accumulated
    pub batch_count: usize,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update with one batch's mean loss and its size
    pub fn update(&mut self, mean_loss: f32, batch_size: usize) {
        self.loss_sum += mean_loss as f64 * batch_size as f64;
        self.count += batch_size;
        self.batch_count += 1;
    }

    /// Update from raw predictions and targets
    pub fn update_from_predictions(&mut self, predictions: &[f32], targets: &[f32]) {
        let n = predictions.len();
        if n == 0 {
            return;
        }
        let sq: f64 = predictions
            .iter()
            .zip(targets)
            .map(|(p, t)| ((p - t) as f64).powi(2))
            .sum();
        self.abs_err_sum += predictions
            .iter()
            .zip(targets)
            .map(|(p, t)| (p - t).abs() as f64)
            .sum::<f64>();
        self.loss_sum += sq;
        self.count += n;
        self.batch_count += 1;
    }

    /// Mean squared error; NaN when nothing was accumulated
    pub fn mse(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        self.loss_sum / self.count as f64
    }

    pub fn mae(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        self.abs_err_sum / self.count as f64
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MSE: {:.4} | n={}", self.mse(), self.count)
    }
}

/// Training history for tracking progress
#[derive(Debug, Clone, Default)]
pub struct TrainingHistory {
    pub train_losses: Vec<f64>,
    pub val_losses: Vec<f64>,
    pub best_val_loss: f64,
    pub best_epoch: usize,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self {
            best_val_loss: f64::INFINITY,
            ..Default::default()
        }
    }

    /// Record metrics for an epoch
    pub fn record_epoch(&mut self, epoch: usize, train: &Metrics, val: &Metrics) {
        self.train_losses.push(train.mse());
        self.val_losses.push(val.mse());

        if val.mse() < self.best_val_loss {
            self.best_val_loss = val.mse();
            self.best_epoch = epoch;
        }
    }

    pub fn epochs(&self) -> usize {
        self.train_losses.len()
    }

    pub fn final_train_loss(&self) -> Option<f64> {
        self.train_losses.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_weighted_mean() {
        let mut m = Metrics::new();
        m.update(1.0, 3);
        m.update(3.0, 1);
        assert_eq!(m.mse(), 1.5);
        assert_eq!(m.batch_count, 2);
    }

    #[test]
    fn test_from_predictions() {
        let mut m = Metrics::new();
        m.update_from_predictions(&[1.0, 2.0], &[0.0, 4.0]);
        assert_eq!(m.mse(), 2.5);
        assert_eq!(m.mae(), 1.5);
    }

    #[test]
    fn test_empty_metrics_are_nan() {
        assert!(Metrics::new().mse().is_nan());
    }

    #[test]
    fn test_history_tracks_best_epoch() {
        let mut history = TrainingHistory::new();
        for (epoch, loss) in [4.0f32, 2.0, 3.0].iter().enumerate() {
            let mut m = Metrics::new();
            m.update(*loss, 1);
            history.record_epoch(epoch, &m, &m);
        }
        assert_eq!(history.best_epoch, 1);
        assert_eq!(history.best_val_loss, 2.0);
        assert_eq!(history.final_train_loss(), Some(3.0));
    }
}
