// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a full run in order:
//
//   Step 0: Adopt resumed model shape   (Layer 6 - infra)
//   Step 1: Load bAbI files             (Layer 4 - data)
//   Step 2: Build / load vocabulary     (Layer 6 - infra)
//   Step 3: Vectorise both splits       (Layer 4 - data)
//   Step 4: Check model settings        (Layer 5 - ml)
//   Step 5: Create the run directory    (Layer 6 - infra)
//   Step 6: Run training / evaluation   (Layer 5 - ml)
//   Step 7: Write results               (Layer 6 - infra)
//
// Evaluation-only runs go through the same steps with
// `evaluate_only` set; they load weights and never update them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::data::{dataset::BabiDataset, loader::BabiFileLoader};
use crate::domain::{instance::BabiInstance, traits::InstanceSource};
use crate::error::QaError;
use crate::infra::{
    checkpoint::{CheckpointManager, CONFIG_FILE},
    metrics::MetricsLogger,
    results::ResultsWriter,
    vocabulary_store::{Vocabulary, VocabularyStore},
};
use crate::ml::model::{FusionStrategy, QaModelConfig};
use crate::ml::trainer::{run_training, RunHistory};

/// Where tensors live during the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// NdArray backend
    #[default]
    Cpu,
    /// Wgpu backend, needs the `wgpu` feature
    Wgpu,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu  => write!(f, "cpu"),
            Self::Wgpu => write!(f, "wgpu"),
        }
    }
}

// ─── Training Configuration ──────────────────────────────────────────────────
// All settings of one run, immutable once the run starts.
// Serialisable so it can be saved next to the weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub train_file:        String,
    pub test_file:         String,
    /// Extra bAbI file whose words join the vocabulary
    pub vocab_file:        Option<String>,
    pub output_dir:        String,
    pub embedding_size:    usize,
    pub story_hidden_size: usize,
    pub query_hidden_size: usize,
    pub n_layers:          usize,
    pub bidirectional:     bool,
    pub fusion:            FusionStrategy,
    pub shared_embedding:  bool,
    pub batch_size:        usize,
    pub lr:                f64,
    pub epochs:            usize,
    /// Weights file to load before the first epoch
    pub resume_from:       Option<String>,
    pub evaluate_only:     bool,
    pub device:            DeviceKind,
    pub seed:              u64,
    pub print_batch_loss:  bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            train_file:        "data/qa1_single-supporting-fact_train.txt".to_string(),
            test_file:         "data/qa1_single-supporting-fact_test.txt".to_string(),
            vocab_file:        None,
            output_dir:        "results".to_string(),
            embedding_size:    50,
            story_hidden_size: 100,
            query_hidden_size: 50,
            n_layers:          1,
            bidirectional:     false,
            fusion:            FusionStrategy::QuestionConditioned,
            shared_embedding:  false,
            batch_size:        16,
            lr:                0.001,
            epochs:            40,
            resume_from:       None,
            evaluate_only:     false,
            device:            DeviceKind::Cpu,
            seed:              42,
            print_batch_loss:  false,
        }
    }
}

impl TrainConfig {
    /// Model hyperparameters for a vocabulary of `vocab_size` words
    pub fn model_config(&self, vocab_size: usize) -> QaModelConfig {
        QaModelConfig::new(
            vocab_size,
            self.embedding_size,
            self.story_hidden_size,
            self.query_hidden_size,
        )
        .with_n_layers(self.n_layers)
        .with_bidirectional(self.bidirectional)
        .with_fusion(self.fusion)
        .with_shared_embedding(self.shared_embedding)
    }

    /// This config with the model architecture of `saved`.
    /// Data, optimiser and run settings stay as they are.
    pub fn with_architecture_of(&self, saved: &TrainConfig) -> TrainConfig {
        TrainConfig {
            embedding_size:    saved.embedding_size,
            story_hidden_size: saved.story_hidden_size,
            query_hidden_size: saved.query_hidden_size,
            n_layers:          saved.n_layers,
            bidirectional:     saved.bidirectional,
            fusion:            saved.fusion,
            shared_embedding:  saved.shared_embedding,
            ..self.clone()
        }
    }

    /// Short settings string used to name the run directory
    pub fn param_string(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}_{}_{}_{}_{}",
            self.embedding_size,
            self.story_hidden_size,
            self.query_hidden_size,
            self.n_layers,
            if self.bidirectional { "bi" } else { "uni" },
            self.fusion,
            self.batch_size,
            self.lr,
            self.epochs,
        )
    }
}

/// What a finished run leaves behind.
#[derive(Debug)]
pub struct RunReport {
    pub run_dir: PathBuf,
    pub history: RunHistory,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full pipeline end to end
    pub fn execute(&self) -> Result<RunReport> {
        // ── Step 0: Weights only load into the shape they were saved from ────
        let cfg = &self.resolved_config()?;

        // ── Step 1: Load bAbI instances ───────────────────────────────────────
        let train = load(&cfg.train_file)?;
        let test  = load(&cfg.test_file)?;
        let extra = match &cfg.vocab_file {
            Some(path) => load(path)?,
            None       => Vec::new(),
        };
        tracing::info!("Loaded {} train / {} test instances", train.len(), test.len());

        // ── Step 2: Build / load vocabulary ───────────────────────────────────
        // A resumed model keeps the word ids it was trained with.
        let corpus = extra.iter().chain(&train).chain(&test);
        let vocab = match cfg.resume_from.as_deref().and_then(|p| Path::new(p).parent()) {
            Some(dir) => VocabularyStore::new(dir).load_or_build(corpus)?,
            None      => Vocabulary::build(corpus)?,
        };
        if vocab.is_empty() {
            return Err(QaError::config("vocabulary is empty: the bAbI files contain no words").into());
        }
        tracing::info!("Vocabulary has {} words", vocab.len());

        // ── Step 3: Vectorise ─────────────────────────────────────────────────
        let (train_ds, test_ds) = BabiDataset::vectorize_splits(&train, &test, &vocab)?;

        // ── Step 4: Model settings, before anything is written ────────────────
        let model_cfg = cfg.model_config(vocab.len());
        model_cfg.validate()?;

        // ── Step 5: Run directory ─────────────────────────────────────────────
        let results = ResultsWriter::create(&cfg.output_dir, &cfg.param_string())?;
        let ckpt    = CheckpointManager::new(results.dir())?;
        ckpt.save_config(cfg)?;
        VocabularyStore::new(results.dir()).save(&vocab)?;
        let metrics = MetricsLogger::new(results.dir())?;

        // ── Step 6: Training loop (Layer 5) ───────────────────────────────────
        let history = run_training(cfg, &model_cfg, &train_ds, &test_ds, &ckpt, Some(&metrics))?;

        // ── Step 7: Results ───────────────────────────────────────────────────
        results.write_history(&history)?;
        results.write_eval_records(&history.eval_records, &vocab)?;
        results.write_params(cfg, vocab.len())?;

        Ok(RunReport { run_dir: results.dir().to_path_buf(), history })
    }

    /// The requested config, with the architecture replaced by the one
    /// saved next to the resumed weights when that file exists.
    fn resolved_config(&self) -> Result<TrainConfig> {
        let cfg = &self.config;
        let Some(dir) = cfg.resume_from.as_deref().and_then(|p| Path::new(p).parent()) else {
            return Ok(cfg.clone());
        };
        if !dir.join(CONFIG_FILE).is_file() {
            tracing::warn!(
                "No {CONFIG_FILE} next to '{}'; using the requested model settings",
                dir.display()
            );
            return Ok(cfg.clone());
        }

        let saved = CheckpointManager::new(dir)?.load_config()?;
        let resolved = cfg.with_architecture_of(&saved);
        if resolved.param_string() != cfg.param_string() {
            tracing::info!("Using the model settings saved in '{}'", dir.display());
        }
        Ok(resolved)
    }
}

fn load(path: &str) -> Result<Vec<BabiInstance>> {
    BabiFileLoader::new(path)
        .load_all()
        .with_context(|| format!("Cannot load bAbI file '{path}'"))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const TRAIN: &str = "\
1 Mary moved to the bathroom.
2 John went to the hallway.
3 Where is Mary? \tbathroom\t1
4 Daniel went back to the hallway.
5 Where is Daniel? \thallway\t4
1 Sandra journeyed to the bathroom.
2 Where is Sandra? \tbathroom\t1
";

    const TEST: &str = "\
1 John moved to the hallway.
2 Where is John? \thallway\t1
1 Mary went to the bathroom.
2 Where is Mary? \tbathroom\t1
";

    fn config_in(dir: &Path) -> TrainConfig {
        let train = dir.join("train.txt");
        let test  = dir.join("test.txt");
        fs::write(&train, TRAIN).unwrap();
        fs::write(&test, TEST).unwrap();

        TrainConfig {
            train_file:        train.to_string_lossy().to_string(),
            test_file:         test.to_string_lossy().to_string(),
            output_dir:        dir.join("results").to_string_lossy().to_string(),
            embedding_size:    8,
            story_hidden_size: 8,
            query_hidden_size: 8,
            batch_size:        2,
            epochs:            2,
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = TrainConfig::default();
        assert_eq!(cfg.embedding_size, 50);
        assert_eq!(cfg.query_hidden_size, cfg.embedding_size);
        assert_eq!(cfg.batch_size, 16);
        assert_eq!(cfg.seed, 42);
        assert!(cfg.model_config(100).validate().is_ok());
    }

    #[test]
    fn test_config_json_uses_lowercase_device() {
        let json = serde_json::to_string(&TrainConfig { device: DeviceKind::Wgpu, ..TrainConfig::default() }).unwrap();
        assert!(json.contains("\"device\":\"wgpu\""));
    }

    #[test]
    fn test_full_run_writes_results() {
        let dir    = tempfile::tempdir().unwrap();
        let report = TrainUseCase::new(config_in(dir.path())).execute().unwrap();

        for file in [
            "train_loss.csv", "test_loss.csv", "train_accuracy.csv", "test_accuracy.csv",
            "answers.csv", "stories.csv", "queries.csv", "params.txt",
            "train_config.json", "tokenizer.json", "metrics.csv", "model.mpk.gz",
        ] {
            assert!(report.run_dir.join(file).exists(), "missing {file}");
        }
        assert_eq!(report.history.train_accuracy.len(), 2);
        // 3 train instances, batch 2 → 2 batches per epoch
        assert_eq!(report.history.train_loss.len(), 4);

        let answers = fs::read_to_string(report.run_dir.join("answers.csv")).unwrap();
        assert_eq!(answers.lines().count(), 1 + 2);
    }

    #[test]
    fn test_resumed_evaluation_reuses_vocabulary_and_weights() {
        let dir     = tempfile::tempdir().unwrap();
        let cfg     = config_in(dir.path());
        let trained = TrainUseCase::new(cfg.clone()).execute().unwrap();

        let eval_cfg = TrainConfig {
            resume_from:   Some(trained.run_dir.join("model.mpk.gz").to_string_lossy().to_string()),
            evaluate_only: true,
            epochs:        1,
            ..cfg
        };
        let evaluated = TrainUseCase::new(eval_cfg).execute().unwrap();

        assert!(evaluated.history.train_loss.is_empty());
        assert_eq!(evaluated.history.test_accuracy.len(), 1);
        assert_eq!(
            evaluated.history.test_accuracy[0],
            *trained.history.test_accuracy.last().unwrap()
        );
    }

    #[test]
    fn test_resumed_evaluation_adopts_saved_architecture() {
        let dir     = tempfile::tempdir().unwrap();
        let cfg     = TrainConfig { bidirectional: true, query_hidden_size: 4, ..config_in(dir.path()) };
        let trained = TrainUseCase::new(cfg.clone()).execute().unwrap();

        // model flags left at their defaults, as a bare `evaluate` would pass them
        let eval_cfg = TrainConfig {
            train_file:    cfg.train_file.clone(),
            test_file:     cfg.test_file.clone(),
            output_dir:    cfg.output_dir.clone(),
            batch_size:    cfg.batch_size,
            resume_from:   Some(trained.run_dir.join("model.mpk.gz").to_string_lossy().to_string()),
            evaluate_only: true,
            epochs:        1,
            ..TrainConfig::default()
        };
        let evaluated = TrainUseCase::new(eval_cfg).execute().unwrap();

        assert_eq!(
            evaluated.history.test_accuracy[0],
            *trained.history.test_accuracy.last().unwrap()
        );
        let params = fs::read_to_string(evaluated.run_dir.join("params.txt")).unwrap();
        assert!(params.contains("bidirectional: true"));
        assert!(params.contains("query_hidden_size: 4"));
    }

    #[test]
    fn test_architecture_override_keeps_run_settings() {
        let saved = TrainConfig { embedding_size: 8, n_layers: 3, fusion: FusionStrategy::IndependentConcat, ..TrainConfig::default() };
        let asked = TrainConfig { lr: 0.5, epochs: 3, seed: 9, ..TrainConfig::default() };

        let merged = asked.with_architecture_of(&saved);
        assert_eq!(merged.embedding_size, 8);
        assert_eq!(merged.n_layers, 3);
        assert_eq!(merged.fusion, FusionStrategy::IndependentConcat);
        assert_eq!(merged.lr, 0.5);
        assert_eq!(merged.epochs, 3);
        assert_eq!(merged.seed, 9);
    }

    #[test]
    fn test_empty_corpus_is_config_error() {
        let dir   = tempfile::tempdir().unwrap();
        let train = dir.path().join("empty_train.txt");
        let test  = dir.path().join("empty_test.txt");
        fs::write(&train, "").unwrap();
        fs::write(&test, "").unwrap();
        let cfg = TrainConfig {
            train_file: train.to_string_lossy().to_string(),
            test_file:  test.to_string_lossy().to_string(),
            output_dir: dir.path().join("results").to_string_lossy().to_string(),
            ..TrainConfig::default()
        };

        let err = TrainUseCase::new(cfg.clone()).execute().unwrap_err();
        assert!(matches!(err.downcast_ref::<QaError>(), Some(QaError::Config(_))));
        assert!(!Path::new(&cfg.output_dir).exists());
    }

    #[test]
    fn test_size_mismatch_fails_before_run_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig { query_hidden_size: 5, ..config_in(dir.path()) };

        let err = TrainUseCase::new(cfg.clone()).execute().unwrap_err();
        assert!(matches!(err.downcast_ref::<QaError>(), Some(QaError::Config(_))));
        assert!(!Path::new(&cfg.output_dir).exists());
    }
}
