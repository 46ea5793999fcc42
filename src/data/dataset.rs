//! Burn Dataset implementation over the feature table
//!
//! The training step only sees numeric columns: text and date columns are
//! left out, and the label column becomes the regression target.

use burn::data::dataset::Dataset;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::data::table::{Cell, Table};
use crate::{ConcertError, Result};

/// Numeric features and labels extracted from a feature table
#[derive(Debug, Clone)]
pub struct TrainingMatrix {
    pub feature_names: Vec<String>,
    pub features: Vec<Vec<f32>>,
    pub labels: Vec<f32>,
}

impl TrainingMatrix {
    pub fn from_table(table: &Table, label: &str) -> Result<Self> {
        let label_idx = table.require_column(label, "feature table")?;
        let numeric: Vec<usize> = (0..table.columns().len())
            .filter(|&i| i != label_idx)
            .filter(|&i| {
                table
                    .rows()
                    .iter()
                    .all(|r| matches!(r[i], Cell::Number(_) | Cell::Null))
            })
            .collect();

        let skipped: Vec<&String> = (0..table.columns().len())
            .filter(|i| *i != label_idx && !numeric.contains(i))
            .map(|i| &table.columns()[i])
            .collect();
        if !skipped.is_empty() {
            log::debug!("Non-numeric columns left out of training: {:?}", skipped);
        }

        Self::collect(table, label_idx, &numeric)
    }

    /// Extract exactly the named feature columns, in the given order.
    ///
    /// Used to rebuild the matrix a saved model was trained on.
    pub fn with_features(table: &Table, label: &str, feature_names: &[String]) -> Result<Self> {
        let label_idx = table.require_column(label, "feature table")?;
        let indices = feature_names
            .iter()
            .map(|name| table.require_column(name, "feature table"))
            .collect::<Result<Vec<_>>>()?;
        Self::collect(table, label_idx, &indices)
    }

    fn collect(table: &Table, label_idx: usize, numeric: &[usize]) -> Result<Self> {
        let mut features = Vec::with_capacity(table.len());
        let mut labels = Vec::with_capacity(table.len());
        let mut incomplete = 0;
        for row in table.rows() {
            let y = row[label_idx].as_f64().unwrap_or(f64::NAN);
            let x: Vec<f64> = numeric
                .iter()
                .map(|&i| row[i].as_f64().unwrap_or(f64::NAN))
                .collect();
            if y.is_nan() || x.iter().any(|v| v.is_nan()) {
                incomplete += 1;
                continue;
            }
            features.push(x.into_iter().map(|v| v as f32).collect());
            labels.push(y as f32);
        }
        if incomplete > 0 {
            log::warn!("Skipped {} rows with missing values", incomplete);
        }
        if features.is_empty() {
            return Err(ConcertError::Training(
                "no complete rows in the feature table".to_string(),
            ));
        }

        Ok(TrainingMatrix {
            feature_names: numeric.iter().map(|&i| table.columns()[i].clone()).collect(),
            features,
            labels,
        })
    }

    pub fn dim(&self) -> usize {
        self.feature_names.len()
    }
}

/// One concert's features and target
#[derive(Debug, Clone)]
pub struct ConcertSample {
    pub features: Vec<f32>,
    pub label: f32,
}

/// Z-score normalization fitted on the training split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureNormalization {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl FeatureNormalization {
    pub fn from_samples(samples: &[ConcertSample], dim: usize) -> Self {
        let mut sum = vec![0.0f32; dim];
        let mut sum_sq = vec![0.0f32; dim];
        for sample in samples {
            for (j, v) in sample.features.iter().enumerate() {
                sum[j] += v;
                sum_sq[j] += v * v;
            }
        }

        let n = samples.len().max(1) as f32;
        let mean: Vec<f32> = sum.iter().map(|s| s / n).collect();
        let std: Vec<f32> = sum_sq
            .iter()
            .zip(mean.iter())
            .map(|(sq, m)| (sq / n - m * m).max(0.0).sqrt().max(0.001))
            .collect();

        FeatureNormalization { mean, std }
    }

    /// Normalize a feature tensor: (x - mean) / std
    pub fn normalize<B: Backend>(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = features.device();
        let mean = Tensor::<B, 1>::from_floats(self.mean.as_slice(), &device).unsqueeze_dim(0);
        let std = Tensor::<B, 1>::from_floats(self.std.as_slice(), &device).unsqueeze_dim(0);
        (features - mean) / std
    }
}

/// Dataset of concert samples
#[derive(Debug, Clone, Default)]
pub struct ConcertDataset {
    samples: Vec<ConcertSample>,
}

/// Shuffled train/validation/test datasets
pub struct SplitDatasets {
    pub train: ConcertDataset,
    pub val: ConcertDataset,
    pub test: ConcertDataset,
}

impl ConcertDataset {
    pub fn from_samples(samples: Vec<ConcertSample>) -> Self {
        ConcertDataset { samples }
    }

    pub fn from_matrix(matrix: &TrainingMatrix) -> Self {
        let samples = matrix
            .features
            .iter()
            .zip(&matrix.labels)
            .map(|(x, &y)| ConcertSample {
                features: x.clone(),
                label: y,
            })
            .collect();
        ConcertDataset { samples }
    }

    pub fn samples(&self) -> &[ConcertSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Shuffle with a seed, then cut into train/val/test by ratio
    pub fn split(self, train_ratio: f32, val_ratio: f32, seed: u64) -> SplitDatasets {
        let mut samples = self.samples;
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        samples.shuffle(&mut rng);

        let n = samples.len();
        let n_train = ((n as f32 * train_ratio.max(0.0)) as usize).min(n);
        let n_val = ((n as f32 * val_ratio.max(0.0)) as usize).min(n - n_train);

        let test = samples.split_off(n_train + n_val);
        let val = samples.split_off(n_train);

        log::info!(
            "Split {} samples: train={}, val={}, test={}",
            n,
            samples.len(),
            val.len(),
            test.len()
        );

        SplitDatasets {
            train: ConcertDataset::from_samples(samples),
            val: ConcertDataset::from_samples(val),
            test: ConcertDataset::from_samples(test),
        }
    }
}

impl Dataset<ConcertSample> for ConcertDataset {
    fn get(&self, index: usize) -> Option<ConcertSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Batch of concert samples
#[derive(Debug, Clone)]
pub struct ConcertBatch<B: Backend> {
    /// Features: [batch, dim]
    pub features: Tensor<B, 2>,
    /// Targets: [batch, 1]
    pub labels: Tensor<B, 2>,
}

/// Batcher for creating training batches
#[derive(Clone)]
pub struct ConcertBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> ConcertBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        ConcertBatcher { device }
    }

    /// Batch a slice of samples directly
    pub fn batch_samples(&self, items: &[ConcertSample]) -> ConcertBatch<B> {
        let batch_size = items.len();
        let dim = items.first().map(|s| s.features.len()).unwrap_or(0);

        let mut feature_data = Vec::with_capacity(batch_size * dim);
        let mut label_data = Vec::with_capacity(batch_size);
        for sample in items {
            feature_data.extend_from_slice(&sample.features);
            label_data.push(sample.label);
        }

        let features = Tensor::<B, 1>::from_floats(feature_data.as_slice(), &self.device)
            .reshape([batch_size, dim]);
        let labels = Tensor::<B, 1>::from_floats(label_data.as_slice(), &self.device)
            .reshape([batch_size, 1]);

        ConcertBatch { features, labels }
    }
}

impl<B: Backend> burn::data::dataloader::batcher::Batcher<B, ConcertSample, ConcertBatch<B>>
    for ConcertBatcher<B>
{
    fn batch(&self, items: Vec<ConcertSample>, _device: &B::Device) -> ConcertBatch<B> {
        self.batch_samples(&items)
    }
}
