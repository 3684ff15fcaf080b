// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with `clap`.
// All work is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`    — trains on a bAbI task, evaluating every epoch
//   2. `evaluate` — scores saved weights on a bAbI task

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::Commands;

use crate::application::train_use_case::{RunReport, TrainUseCase};

#[derive(Parser, Debug)]
#[command(
    name = "babi-qa",
    version,
    about = "Train a recurrent question-answering model on bAbI tasks."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Route the subcommand to the use case; never computes itself.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => {
                tracing::info!("Starting training on '{}'", args.run.train_file);
                let report = TrainUseCase::new(args.into()).execute()?;
                print_summary("Training complete", &report);
            }
            Commands::Evaluate(args) => {
                tracing::info!("Evaluating '{}' on '{}'", args.resume_from, args.run.test_file);
                let report = TrainUseCase::new(args.into()).execute()?;
                print_summary("Evaluation complete", &report);
            }
        }
        Ok(())
    }
}

fn print_summary(title: &str, report: &RunReport) {
    let test_acc = report.history.test_accuracy.last().copied().unwrap_or(0.0);
    println!("\n{title}. Test accuracy: {test_acc:.1}%");
    println!("Results saved to '{}'", report.run_dir.display());
}
