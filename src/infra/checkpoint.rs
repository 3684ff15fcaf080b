// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights using Burn's named
// MessagePack recorder with gzip compression.
//
// What gets saved into a run directory:
//   1. model.mpk.gz       — all learned parameters
//   2. train_config.json  — the run's TrainConfig
//
// The config is needed to rebuild a model of the same shape
// before weights can be loaded into it: loading fails if the
// architecture doesn't match.
//
// NamedMpkGzFileRecorder<FullPrecisionSettings>:
//   - Serialises model parameters to MessagePack at full precision
//   - Compresses with gzip
//   - Appends the `.mpk.gz` extension itself
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::application::train_use_case::TrainConfig;
use crate::ml::model::QaModel;

pub const MODEL_FILE:  &str = "model";
pub const CONFIG_FILE: &str = "train_config.json";
const RECORD_EXTENSION: &str = ".mpk.gz";

type WeightsRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

/// Manages the weight and config files of one run directory.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Path the weights are written to, extension included
    pub fn model_path(&self) -> PathBuf {
        self.dir.join(format!("{MODEL_FILE}{RECORD_EXTENSION}"))
    }

    /// Writes `{dir}/model.mpk.gz`
    pub fn save_model<B: Backend>(&self, model: &QaModel<B>) -> Result<()> {
        let path = self.dir.join(MODEL_FILE);

        WeightsRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        tracing::info!("Saved model weights to '{}'", self.model_path().display());
        Ok(())
    }

    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;

        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;

        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Malformed config in '{}'", path.display()))
    }
}

/// Load weights into a freshly built model of the same configuration.
/// `path` may be given with or without the `.mpk.gz` extension.
pub fn load_model<B: Backend>(
    model:  QaModel<B>,
    path:   impl AsRef<Path>,
    device: &B::Device,
) -> Result<QaModel<B>> {
    let path = recorder_path(path.as_ref());

    let record = WeightsRecorder::new()
        .load(path.clone(), device)
        .with_context(|| {
            format!(
                "Cannot load checkpoint '{}{RECORD_EXTENSION}'. Was it saved with the same model settings?",
                path.display()
            )
        })?;

    Ok(model.load_record(record))
}

/// Strip the recorder's own extension so it isn't doubled on load.
fn recorder_path(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    match text.strip_suffix(RECORD_EXTENSION) {
        Some(stem) => PathBuf::from(stem),
        None       => path.to_path_buf(),
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::QaModelConfig;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TB = NdArray;

    #[test]
    fn test_recorder_path_strips_extension() {
        assert_eq!(recorder_path(Path::new("runs/a/model.mpk.gz")), PathBuf::from("runs/a/model"));
        assert_eq!(recorder_path(Path::new("runs/a/model")), PathBuf::from("runs/a/model"));
    }

    #[test]
    fn test_config_round_trip() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        let cfg  = TrainConfig { epochs: 7, bidirectional: true, ..TrainConfig::default() };

        ckpt.save_config(&cfg).unwrap();
        let loaded = ckpt.load_config().unwrap();
        assert_eq!(loaded.epochs, 7);
        assert!(loaded.bidirectional);
    }

    #[test]
    fn test_saved_weights_reproduce_outputs() {
        let dir    = tempfile::tempdir().unwrap();
        let ckpt   = CheckpointManager::new(dir.path()).unwrap();
        let device = Default::default();
        let config = QaModelConfig::new(10, 6, 8, 6);

        let trained: QaModel<TB> = config.init(&device).unwrap();
        ckpt.save_model(&trained).unwrap();
        assert!(ckpt.model_path().exists());

        let fresh: QaModel<TB> = config.init(&device).unwrap();
        let restored = load_model(fresh, ckpt.model_path(), &device).unwrap();

        let stories = Tensor::<TB, 2, Int>::from_data(TensorData::new(vec![1i64, 2, 3, 4, 5, 0], [2, 3]), &device);
        let queries = Tensor::<TB, 2, Int>::from_data(TensorData::new(vec![6i64, 7, 8, 0], [2, 2]), &device);
        let a = trained.forward(stories.clone(), queries.clone(), &[3, 2], &[2, 1]).unwrap();
        let b = restored.forward(stories, queries, &[3, 2], &[2, 1]).unwrap();

        let diff: f64 = (a - b).abs().max().into_scalar().elem();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_weights_file_is_gzipped_with_full_extension() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        let model: QaModel<TB> = QaModelConfig::new(10, 6, 8, 6).init(&Default::default()).unwrap();
        ckpt.save_model(&model).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["model.mpk.gz".to_string()]);

        // gzip magic number
        let bytes = fs::read(ckpt.model_path()).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_missing_checkpoint_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let model: QaModel<TB> = QaModelConfig::new(10, 6, 8, 6).init(&Default::default()).unwrap();
        assert!(load_model(model, dir.path().join("nope"), &Default::default()).is_err());
    }
}
