// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Train + evaluation loop using Burn's DataLoader and Adam.
//
// Per epoch:
//   1. training pass (skipped when evaluate_only)
//        validate → sort by story length → forward → NLL loss
//        → finite check → backward → Adam step → count correct
//   2. evaluation pass on model.valid()
//        same forward, no update, plus one EvalRecord per batch
//
// Key Burn 0.20 insight:
//   - Training uses B = Autodiff<Inner> for gradients
//   - model.valid() returns the model on B::InnerBackend, so
//     the evaluation loader batches on the inner backend too
//   - the training loader reshuffles on every iter() from the
//     run seed; the evaluation loader keeps file order
//   - the model moves through the optimizer by value:
//       model = optim.step(lr, model, grads)
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use anyhow::Result;
use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::application::train_use_case::{DeviceKind, TrainConfig};
use crate::data::{
    batcher::{BabiBatch, BabiBatcher},
    dataset::BabiDataset,
};
use crate::error::{QaError, QaResult};
use crate::infra::{
    checkpoint::{load_model, CheckpointManager},
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::model::{nll_loss, predict, QaModel, QaModelConfig};

// ─── Run outputs ──────────────────────────────────────────────────────────────
/// One evaluated batch, every array in the sorted (aligned) order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRecord {
    pub stories:       Vec<Vec<u32>>,
    pub answers:       Vec<u32>,
    pub story_lengths: Vec<usize>,
    pub query_lengths: Vec<usize>,
    pub predictions:   Vec<u32>,
    pub queries:       Vec<Vec<u32>>,
}

impl EvalRecord {
    pub fn correct(&self) -> impl Iterator<Item = bool> + '_ {
        self.answers.iter().zip(&self.predictions).map(|(a, p)| a == p)
    }
}

/// Everything a run produces besides the weights.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunHistory {
    /// Per training batch
    pub train_loss:     Vec<f64>,
    /// Per evaluation batch, all epochs
    pub test_loss:      Vec<f64>,
    /// Per epoch, percent
    pub train_accuracy: Vec<f64>,
    /// Per epoch, percent
    pub test_accuracy:  Vec<f64>,
    /// Final epoch only
    pub eval_records:   Vec<EvalRecord>,
}

/// Result of one evaluation pass.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub losses:   Vec<f64>,
    pub accuracy: f64,
    pub records:  Vec<EvalRecord>,
}

/// `100 × correct / total`, 0 for an empty set
pub fn accuracy(correct: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * correct as f64 / total as f64
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        f64::NAN
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

// ─── Shared batch computation ─────────────────────────────────────────────────
struct BatchOutput<B: Backend> {
    loss:        Tensor<B, 1>,
    predictions: Tensor<B, 1, Int>,
    /// The batch in the order the model saw it
    batch:       BabiBatch<B>,
}

fn forward_batch<B: Backend>(model: &QaModel<B>, batch: BabiBatch<B>) -> QaResult<BatchOutput<B>> {
    batch.validate()?;
    let (batch, _) = batch.sort_by_story_length();

    let log_probs = model.forward(
        batch.stories.clone(),
        batch.queries.clone(),
        &batch.story_lengths,
        &batch.query_lengths,
    )?;
    let loss        = nll_loss(log_probs.clone(), batch.answers.clone());
    let predictions = predict(log_probs);

    Ok(BatchOutput { loss, predictions, batch })
}

fn finite_loss(value: f64, epoch: usize, batch: usize) -> QaResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(QaError::Numerical { value, epoch, batch })
    }
}

fn count_correct<B: Backend>(predictions: Tensor<B, 1, Int>, answers: Tensor<B, 1, Int>) -> usize {
    predictions
        .equal(answers)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}

fn int_values<B: Backend, const D: usize>(t: Tensor<B, D, Int>) -> QaResult<Vec<u32>> {
    let values = t
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| QaError::data(format!("cannot read tensor: {e:?}")))?;
    Ok(values.into_iter().map(|v| v as u32).collect())
}

fn rows(flat: Vec<u32>, width: usize) -> Vec<Vec<u32>> {
    flat.chunks(width.max(1)).map(|row| row.to_vec()).collect()
}

// ─── Data loaders ─────────────────────────────────────────────────────────────
pub type BatchLoader<B> = Arc<dyn DataLoader<B, BabiBatch<B>>>;

/// Training batches, reshuffled on every `iter()` from `seed`.
/// The last batch of an epoch may be smaller than `batch_size`.
pub fn train_loader<B: Backend>(
    dataset:    &BabiDataset,
    batch_size: usize,
    seed:       u64,
    device:     &B::Device,
) -> BatchLoader<B> {
    DataLoaderBuilder::new(BabiBatcher::new())
        .batch_size(batch_size)
        .shuffle(seed)
        .set_device(device.clone())
        .build(dataset.clone())
}

/// Evaluation batches in dataset order.
pub fn eval_loader<B: Backend>(
    dataset:    &BabiDataset,
    batch_size: usize,
    device:     &B::Device,
) -> BatchLoader<B> {
    DataLoaderBuilder::new(BabiBatcher::new())
        .batch_size(batch_size)
        .set_device(device.clone())
        .build(dataset.clone())
}

// ─── Training pass ────────────────────────────────────────────────────────────
/// One pass over the training set; returns the updated model,
/// the per-batch losses and the epoch accuracy.
pub fn train_epoch<B, O>(
    mut model:        QaModel<B>,
    optim:            &mut O,
    loader:           &BatchLoader<B>,
    lr:               f64,
    epoch:            usize,
    print_batch_loss: bool,
) -> QaResult<(QaModel<B>, Vec<f64>, f64)>
where
    B: AutodiffBackend,
    O: Optimizer<QaModel<B>, B>,
{
    let mut losses  = Vec::new();
    let mut correct = 0usize;

    for (i, batch) in loader.iter().enumerate() {
        let out = forward_batch(&model, batch)?;

        let loss_val = finite_loss(out.loss.clone().into_scalar().elem::<f64>(), epoch, i + 1)?;
        losses.push(loss_val);
        if print_batch_loss {
            println!("  epoch {epoch} batch {:>4} | loss={loss_val:.4}", i + 1);
        }

        // Backward pass + Adam update; gradients are rebuilt every step
        let grads = out.loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optim.step(lr, model, grads);

        correct += count_correct(out.predictions, out.batch.answers);
    }

    let acc = accuracy(correct, loader.num_items());
    Ok((model, losses, acc))
}

// ─── Evaluation pass ──────────────────────────────────────────────────────────
/// Forward over every batch of `loader`, no parameter update.
pub fn evaluate<B: Backend>(
    model:  &QaModel<B>,
    loader: &BatchLoader<B>,
    epoch:  usize,
) -> QaResult<Evaluation> {
    let mut losses  = Vec::new();
    let mut records = Vec::new();
    let mut correct = 0usize;

    for (i, batch) in loader.iter().enumerate() {
        let out = forward_batch(model, batch)?;
        let [_, story_width] = out.batch.stories.dims();
        let [_, query_width] = out.batch.queries.dims();

        losses.push(finite_loss(out.loss.into_scalar().elem::<f64>(), epoch, i + 1)?);

        let record = EvalRecord {
            stories:       rows(int_values(out.batch.stories)?, story_width),
            answers:       int_values(out.batch.answers)?,
            story_lengths: out.batch.story_lengths,
            query_lengths: out.batch.query_lengths,
            predictions:   int_values(out.predictions)?,
            queries:       rows(int_values(out.batch.queries)?, query_width),
        };
        correct += record.correct().filter(|&c| c).count();
        records.push(record);
    }

    Ok(Evaluation {
        losses,
        accuracy: accuracy(correct, loader.num_items()),
        records,
    })
}

// ─── Run ──────────────────────────────────────────────────────────────────────
/// Settings the loop cannot run with, checked before the first batch.
pub fn check_run_settings(cfg: &TrainConfig, train_len: usize, test_len: usize) -> QaResult<()> {
    if cfg.batch_size == 0 {
        return Err(QaError::config("batch_size must be at least 1"));
    }
    if cfg.epochs == 0 {
        return Err(QaError::config("epochs must be at least 1"));
    }
    if !(cfg.lr.is_finite() && cfg.lr > 0.0) {
        return Err(QaError::config(format!("learning rate must be positive, got {}", cfg.lr)));
    }
    if !cfg.evaluate_only && cfg.batch_size > train_len {
        return Err(QaError::config(format!(
            "batch_size ({}) exceeds the training set ({train_len} instances)",
            cfg.batch_size
        )));
    }
    if cfg.batch_size > test_len {
        return Err(QaError::config(format!(
            "batch_size ({}) exceeds the test set ({test_len} instances)",
            cfg.batch_size
        )));
    }
    Ok(())
}

/// Run all epochs on an already built (or resumed) model.
pub fn conduct_training<B: AutodiffBackend>(
    cfg:     &TrainConfig,
    model:   QaModel<B>,
    train:   &BabiDataset,
    test:    &BabiDataset,
    device:  &B::Device,
    metrics: Option<&MetricsLogger>,
) -> Result<(QaModel<B>, RunHistory)> {
    check_run_settings(cfg, train.len(), test.len())?;

    // ── Adam optimiser ────────────────────────────────────────────────────────
    // m = β1*m + (1-β1)*g        (mean)
    // v = β2*v + (1-β2)*g²       (variance)
    // θ = θ - lr * m / (√v + ε)  (update)
    let mut optim = AdamConfig::new().with_epsilon(1e-8).init::<B, QaModel<B>>();

    // ── Training data loader (AutodiffBackend) ────────────────────────────────
    let train_batches = train_loader::<B>(train, cfg.batch_size, cfg.seed, device);

    // ── Evaluation data loader (InnerBackend, no autodiff overhead) ───────────
    let test_batches = eval_loader::<B::InnerBackend>(test, cfg.batch_size, device);

    let mut model   = model;
    let mut history = RunHistory::default();

    for epoch in 1..=cfg.epochs {
        // ── Training phase ────────────────────────────────────────────────────
        let mut epoch_train_loss = f64::NAN;
        let mut train_acc        = f64::NAN;
        if !cfg.evaluate_only {
            let (updated, losses, acc) = train_epoch(
                model, &mut optim, &train_batches, cfg.lr, epoch, cfg.print_batch_loss,
            )?;
            model = updated;
            epoch_train_loss = mean(&losses);
            train_acc        = acc;
            history.train_loss.extend(losses);
            history.train_accuracy.push(acc);
        }

        // ── Evaluation phase ──────────────────────────────────────────────────
        // model.valid() → QaModel<B::InnerBackend>, dropout disabled
        let eval = evaluate(&model.valid(), &test_batches, epoch)?;
        let epoch_test_loss = mean(&eval.losses);
        history.test_loss.extend(eval.losses);
        history.test_accuracy.push(eval.accuracy);
        history.eval_records = eval.records;

        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | test_loss={:.4} | train_acc={:.1}% | test_acc={:.1}%",
            epoch, cfg.epochs, epoch_train_loss, epoch_test_loss, train_acc, eval.accuracy,
        );

        if let Some(logger) = metrics {
            logger.log(&EpochMetrics::new(
                epoch, epoch_train_loss, epoch_test_loss, train_acc, eval.accuracy,
            ))?;
        }
    }

    tracing::info!("Training complete!");
    Ok((model, history))
}

/// Build the model on the configured device, optionally resume its
/// weights, run all epochs and save the trained weights.
pub fn run_training(
    cfg:       &TrainConfig,
    model_cfg: &QaModelConfig,
    train:     &BabiDataset,
    test:      &BabiDataset,
    ckpt:      &CheckpointManager,
    metrics:   Option<&MetricsLogger>,
) -> Result<RunHistory> {
    match cfg.device {
        DeviceKind::Cpu => {
            let device = burn::backend::ndarray::NdArrayDevice::default();
            tracing::info!("Using NdArray device: {:?}", device);
            train_on::<burn::backend::Autodiff<burn::backend::NdArray>>(
                cfg, model_cfg, train, test, ckpt, metrics, device,
            )
        }
        DeviceKind::Wgpu => train_on_wgpu(cfg, model_cfg, train, test, ckpt, metrics),
    }
}

#[cfg(feature = "wgpu")]
fn train_on_wgpu(
    cfg:       &TrainConfig,
    model_cfg: &QaModelConfig,
    train:     &BabiDataset,
    test:      &BabiDataset,
    ckpt:      &CheckpointManager,
    metrics:   Option<&MetricsLogger>,
) -> Result<RunHistory> {
    let device = burn::backend::wgpu::WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);
    train_on::<burn::backend::Autodiff<burn::backend::Wgpu>>(
        cfg, model_cfg, train, test, ckpt, metrics, device,
    )
}

#[cfg(not(feature = "wgpu"))]
fn train_on_wgpu(
    _cfg:       &TrainConfig,
    _model_cfg: &QaModelConfig,
    _train:     &BabiDataset,
    _test:      &BabiDataset,
    _ckpt:      &CheckpointManager,
    _metrics:   Option<&MetricsLogger>,
) -> Result<RunHistory> {
    Err(QaError::device("wgpu support not compiled in; rebuild with `--features wgpu`").into())
}

fn train_on<B: AutodiffBackend>(
    cfg:       &TrainConfig,
    model_cfg: &QaModelConfig,
    train:     &BabiDataset,
    test:      &BabiDataset,
    ckpt:      &CheckpointManager,
    metrics:   Option<&MetricsLogger>,
    device:    B::Device,
) -> Result<RunHistory> {
    let mut model: QaModel<B> = model_cfg.init(&device)?;
    tracing::info!(
        "Model ready: fusion={}, layers={}, bidirectional={}, shared_embedding={}",
        model_cfg.fusion, model_cfg.n_layers, model_cfg.bidirectional, model_cfg.shared_embedding,
    );

    if let Some(path) = &cfg.resume_from {
        model = load_model(model, path, &device)?;
        tracing::info!("Resumed weights from '{}'", path);
    }

    let (model, history) = conduct_training(cfg, model, train, test, &device, metrics)?;

    if !cfg.evaluate_only {
        ckpt.save_model(&model)?;
    }
    Ok(history)
}
