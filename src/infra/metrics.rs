// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records one row of metrics per epoch to metrics.csv inside
// the run directory, so a run can be followed while it trains.
//
// Example CSV output:
//   epoch,train_loss,test_loss,train_acc,test_acc
//   1,1.609400,1.571200,20.000000,25.000000
//   2,1.402100,1.388300,45.000000,50.000000
//
// Losses are epoch means of the per-batch losses; accuracies are
// percentages. In evaluate-only runs the training columns are NaN.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

pub const METRICS_FILE: &str = "metrics.csv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Starts at 1
    pub epoch: usize,

    /// Mean NLL over the epoch's training batches
    pub train_loss: f64,

    /// Mean NLL over the evaluation batches
    pub test_loss: f64,

    /// Percent of training instances answered correctly
    pub train_acc: f64,

    /// Percent of test instances answered correctly
    pub test_acc: f64,
}

impl EpochMetrics {
    pub fn new(
        epoch:      usize,
        train_loss: f64,
        test_loss:  f64,
        train_acc:  f64,
        test_acc:   f64,
    ) -> Self {
        Self { epoch, train_loss, test_loss, train_acc, test_acc }
    }
}

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let csv_path = dir.join(METRICS_FILE);
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "epoch,train_loss,test_loss,train_acc,test_acc")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)?;

        writeln!(
            f,
            "{},{:.6},{:.6},{:.6},{:.6}",
            m.epoch, m.train_loss, m.test_loss, m.train_acc, m.test_acc,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: test_loss={:.4}, test_acc={:.1}%",
            m.epoch,
            m.test_loss,
            m.test_acc,
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
