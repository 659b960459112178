//! Model inference for finished runs

use std::path::Path;

use burn::tensor::backend::Backend;

use crate::data::dataset::AodDataset;
use crate::data::split::FeatureNormalization;
use crate::model::{Regressor, RegressorConfig};
use crate::report::{Predictions, StoredModel, CHECKPOINT_STEM, NORMALIZATION_JSON, SUMMARY_JSON};
use crate::Result;

/// Predictor for scoring new tables with a stored run
pub struct Predictor<B: Backend> {
    model: Regressor<B>,
    normalization: FeatureNormalization,
    config: RegressorConfig,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Create a predictor from an in-memory model
    pub fn new(
        model: Regressor<B>,
        normalization: FeatureNormalization,
        config: RegressorConfig,
        device: B::Device,
    ) -> Self {
        Predictor {
            model,
            normalization,
            config,
            device,
        }
    }

    /// Load predictor from a run's output directory
    pub fn load(run_dir: &Path, device: B::Device) -> Result<Self> {
        let stored = StoredModel::load(&run_dir.join(SUMMARY_JSON))?;
        let normalization = FeatureNormalization::load(&run_dir.join(NORMALIZATION_JSON))?;
        let model = Regressor::load(&device, &run_dir.join(CHECKPOINT_STEM), stored.model)?;
        Ok(Self::new(model, normalization, stored.model, device))
    }

    pub fn config(&self) -> &RegressorConfig {
        &self.config
    }

    /// Predict raw (unstandardized) samples
    pub fn predict(&self, dataset: &AodDataset) -> Result<Predictions> {
        if dataset.is_empty() {
            return Ok(Predictions::default());
        }
        let scaled = self.normalization.apply(dataset);
        self.predict_standardized(&scaled)
    }

    /// Predict samples already scaled with this run's normalization
    pub fn predict_standardized(&self, dataset: &AodDataset) -> Result<Predictions> {
        if dataset.is_empty() {
            return Ok(Predictions::default());
        }
        let batch = dataset.to_batch::<B>(&self.device);
        let y_pred = self.model.predict(batch.features)?;
        Ok(Predictions::new(dataset.targets(), y_pred))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::AodSample;
    use crate::model::Activation;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_predict_applies_stored_normalization() {
        let device = Default::default();
        let config = RegressorConfig::new(2, 0.001, Activation::ReLU);
        let model = config.init::<TestBackend>(&device);
        let normalization = FeatureNormalization {
            mean: vec![10.0, 20.0],
            std: vec![2.0, 4.0],
        };
        let predictor = Predictor::new(model, normalization, config, device);

        let raw = AodDataset::from_samples(
            vec![AodSample { features: vec![12.0, 16.0], target: 0.3 }],
            2,
        );
        let scaled = AodDataset::from_samples(
            vec![AodSample { features: vec![1.0, -1.0], target: 0.3 }],
            2,
        );

        let a = predictor.predict(&raw).unwrap();
        let b = predictor.predict_standardized(&scaled).unwrap();
        assert_eq!(a.y_pred, b.y_pred);
        assert_eq!(a.y_true, vec![0.3]);
    }
}
