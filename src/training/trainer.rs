//! Training loop for the concert regressor
//!
//! The loss is MSE plus an L2 penalty on the two hidden kernels, scaled by
//! `weight_decay`. Biases and the output layer are not penalised. Training
//! stops once the epoch's mean penalised loss drops below `target_loss`.

use burn::data::dataloader::DataLoaderBuilder;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};

use crate::data::dataset::{
    ConcertBatcher, ConcertDataset, ConcertSample, FeatureNormalization, SplitDatasets,
    TrainingMatrix,
};
use crate::model::{ModelArtifacts, Regressor, RegressorConfig};
use crate::training::metrics::{Metrics, TrainingHistory};
use crate::{ConcertError, Result, TrainingConfig};

/// Everything a training run produces
pub struct TrainingOutcome<B: AutodiffBackend> {
    pub model: Regressor<B>,
    pub model_config: RegressorConfig,
    pub normalization: FeatureNormalization,
    pub feature_names: Vec<String>,
    pub history: TrainingHistory,
    pub test: Metrics,
    /// (target, prediction) for every test sample
    pub test_predictions: Vec<(f32, f32)>,
}

impl<B: AutodiffBackend> TrainingOutcome<B> {
    pub fn artifacts(&self) -> ModelArtifacts {
        ModelArtifacts {
            config: self.model_config.clone(),
            normalization: self.normalization.clone(),
            feature_names: self.feature_names.clone(),
        }
    }

    /// Write the weights and their artifacts side by side
    pub fn save(&self, model_path: &str) -> Result<()>
    where
        B::FloatElem: serde::Serialize + serde::de::DeserializeOwned,
        B::IntElem: serde::Serialize + serde::de::DeserializeOwned,
    {
        self.model.save(model_path)?;
        self.artifacts().save(model_path)
    }
}

/// Load weights saved by [`TrainingOutcome::save`] together with their artifacts
pub fn load_trained<B: Backend>(
    device: &B::Device,
    model_path: &str,
) -> Result<(Regressor<B>, ModelArtifacts)>
where
    B::FloatElem: serde::Serialize + serde::de::DeserializeOwned,
    B::IntElem: serde::Serialize + serde::de::DeserializeOwned,
{
    let artifacts = ModelArtifacts::load(model_path)?;
    let model = Regressor::load(device, model_path, &artifacts.config)?;
    Ok((model, artifacts))
}

/// Score a saved model on a matrix built with its feature columns
pub fn evaluate_matrix<B: Backend>(
    model: &Regressor<B>,
    artifacts: &ModelArtifacts,
    matrix: &TrainingMatrix,
    device: &B::Device,
) -> Result<(Metrics, Vec<(f32, f32)>)> {
    if matrix.feature_names != artifacts.feature_names {
        return Err(ConcertError::Training(
            "feature columns differ from the ones the model was trained on".to_string(),
        ));
    }
    let dataset = ConcertDataset::from_matrix(matrix);
    let batcher = ConcertBatcher::<B>::new(device.clone());
    evaluate(model, &artifacts.normalization, &batcher, dataset.samples())
}

/// Trains the regressor on a feature matrix
pub struct RegressorTrainer<B: AutodiffBackend> {
    config: TrainingConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> RegressorTrainer<B> {
    pub fn new(config: TrainingConfig, device: B::Device) -> Self {
        RegressorTrainer { config, device }
    }

    /// Shuffle, split, fit, then evaluate on the held-out test split
    pub fn train(&self, matrix: &TrainingMatrix) -> Result<TrainingOutcome<B>> {
        let cfg = &self.config;
        let SplitDatasets { train, val, test } =
            ConcertDataset::from_matrix(matrix).split(cfg.train_ratio, cfg.val_ratio, cfg.seed);
        if train.is_empty() {
            return Err(ConcertError::Training(format!(
                "training split is empty ({} samples)",
                matrix.features.len()
            )));
        }

        let normalization = FeatureNormalization::from_samples(train.samples(), matrix.dim());
        let model_config = RegressorConfig::from_training(matrix.dim(), cfg);
        let mut model = Regressor::<B>::new(&self.device, &model_config);
        let mut optimizer = AdamConfig::new().init();

        let batch_size = if cfg.batch_size == 0 {
            train.len()
        } else {
            cfg.batch_size.min(train.len())
        };
        let train_loader = DataLoaderBuilder::new(ConcertBatcher::<B>::new(self.device.clone()))
            .batch_size(batch_size)
            .shuffle(cfg.seed)
            .build(train);
        let eval_batcher = ConcertBatcher::<B::InnerBackend>::new(self.device.clone());

        let mut history = TrainingHistory::new();
        log::info!(
            "Training on {} features for up to {} epochs",
            matrix.dim(),
            cfg.epochs
        );

        for epoch in 0..cfg.epochs {
            let mut train_metrics = Metrics::new();
            let mut penalised_sum = 0.0;
            for batch in train_loader.iter() {
                let batch_size = batch.labels.dims()[0];
                let predictions = model.forward(normalization.normalize(batch.features));
                let mse = mse_loss(predictions, batch.labels);
                let mse_val: f32 = mse.clone().into_scalar().elem();
                let loss = mse + model.l2_penalty(cfg.weight_decay);
                let loss_val: f32 = loss.clone().into_scalar().elem();

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(cfg.learning_rate, model, grads);

                train_metrics.update(mse_val, batch_size);
                penalised_sum += loss_val as f64 * batch_size as f64;
            }
            let train_loss = penalised_sum / train_metrics.count.max(1) as f64;

            let (val_metrics, _) =
                evaluate(&model.valid(), &normalization, &eval_batcher, val.samples())?;
            history.record_epoch(epoch, &train_metrics, &val_metrics);

            log::debug!(
                "Epoch {}/{}: Train: {} | Val: {}",
                epoch + 1,
                cfg.epochs,
                train_metrics,
                val_metrics
            );
            if epoch % 50 == 0 || epoch + 1 == cfg.epochs {
                log::info!(
                    "Epoch {}/{}: loss={:.4}, train_mse={:.4}, val_mse={:.4}",
                    epoch + 1,
                    cfg.epochs,
                    train_loss,
                    train_metrics.mse(),
                    val_metrics.mse()
                );
            }

            if train_loss < cfg.target_loss {
                log::info!(
                    "Loss reached {} at epoch {}, stopping",
                    cfg.target_loss,
                    epoch + 1
                );
                break;
            }
        }

        let (test_metrics, test_predictions) =
            evaluate(&model.valid(), &normalization, &eval_batcher, test.samples())?;
        log::info!("Test: {} | MAE: {:.4}", test_metrics, test_metrics.mae());

        Ok(TrainingOutcome {
            model,
            model_config,
            normalization,
            feature_names: matrix.feature_names.clone(),
            history,
            test: test_metrics,
            test_predictions,
        })
    }
}

fn mse_loss<B: Backend>(predictions: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    (predictions - targets).powf_scalar(2.0).mean()
}

/// Full-batch evaluation without dropout
fn evaluate<B: Backend>(
    model: &Regressor<B>,
    normalization: &FeatureNormalization,
    batcher: &ConcertBatcher<B>,
    samples: &[ConcertSample],
) -> Result<(Metrics, Vec<(f32, f32)>)> {
    let mut metrics = Metrics::new();
    if samples.is_empty() {
        return Ok((metrics, Vec::new()));
    }

    let batch = batcher.batch_samples(samples);
    let predictions = model.forward(normalization.normalize(batch.features));
    let predictions: Vec<f32> = predictions
        .into_data()
        .to_vec()
        .map_err(|e| ConcertError::Training(format!("{:?}", e)))?;
    let targets: Vec<f32> = samples.iter().map(|s| s.label).collect();

    metrics.update_from_predictions(&predictions, &targets);
    Ok((metrics, targets.into_iter().zip(predictions).collect()))
}
