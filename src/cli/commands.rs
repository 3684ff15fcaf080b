// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `evaluate`, and all
// their configurable flags.
//
// clap's derive macros generate help text (--help), error
// messages for missing args and type conversion.

use clap::{Args, Subcommand, ValueEnum};

use crate::application::train_use_case::{DeviceKind, TrainConfig};
use crate::ml::model::FusionStrategy;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a model on a bAbI task and evaluate it after every epoch
    Train(TrainArgs),

    /// Evaluate saved weights on a bAbI task without training
    Evaluate(EvaluateArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionArg {
    /// Add the question code to every story word before encoding the story
    QuestionConditioned,
    /// Encode story and question separately and concatenate
    IndependentConcat,
}

impl From<FusionArg> for FusionStrategy {
    fn from(a: FusionArg) -> Self {
        match a {
            FusionArg::QuestionConditioned => FusionStrategy::QuestionConditioned,
            FusionArg::IndependentConcat   => FusionStrategy::IndependentConcat,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceArg {
    Cpu,
    Wgpu,
}

impl From<DeviceArg> for DeviceKind {
    fn from(a: DeviceArg) -> Self {
        match a {
            DeviceArg::Cpu  => DeviceKind::Cpu,
            DeviceArg::Wgpu => DeviceKind::Wgpu,
        }
    }
}

/// Data and model arguments shared by both commands.
/// When resuming, the model flags saved in train_config.json next to
/// the weights replace the ones given here.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// bAbI training file
    #[arg(long)]
    pub train_file: String,

    /// bAbI test file
    #[arg(long)]
    pub test_file: String,

    /// Additional bAbI file whose words are added to the vocabulary
    #[arg(long)]
    pub vocab_file: Option<String>,

    /// Parent directory for per-run result directories
    #[arg(long, default_value = "results")]
    pub output_dir: String,

    /// Size of the word embeddings
    #[arg(long, default_value_t = 50)]
    pub embedding_size: usize,

    /// Hidden size of the story GRU
    #[arg(long, default_value_t = 100)]
    pub story_hidden_size: usize,

    /// Hidden size of the query GRU; with question-conditioned fusion
    /// the question code (×2 if bidirectional) must equal --embedding-size
    #[arg(long, default_value_t = 50)]
    pub query_hidden_size: usize,

    /// Number of stacked GRU layers per encoder
    #[arg(long, default_value_t = 1)]
    pub layers: usize,

    /// Read sequences in both directions
    #[arg(long)]
    pub bidirectional: bool,

    /// How the question and the story are combined
    #[arg(long, value_enum, default_value_t = FusionArg::QuestionConditioned)]
    pub fusion: FusionArg,

    /// Use one embedding table for stories and queries
    #[arg(long)]
    pub shared_embedding: bool,

    /// Number of instances per batch
    #[arg(long, default_value_t = 16)]
    pub batch_size: usize,

    #[arg(long, value_enum, default_value_t = DeviceArg::Cpu)]
    pub device: DeviceArg,

    /// Print the loss of every training batch
    #[arg(long)]
    pub print_batch_loss: bool,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Adam learning rate
    #[arg(long, default_value_t = 0.001)]
    pub lr: f64,

    /// Number of full passes through the training data
    #[arg(long, default_value_t = 40)]
    pub epochs: usize,

    /// Weights (model.mpk.gz) to continue training from
    #[arg(long)]
    pub resume_from: Option<String>,

    /// Seed for the per-epoch shuffle
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Weights (model.mpk.gz) to evaluate
    #[arg(long)]
    pub resume_from: String,
}

fn base_config(r: RunArgs) -> TrainConfig {
    TrainConfig {
        train_file:        r.train_file,
        test_file:         r.test_file,
        vocab_file:        r.vocab_file,
        output_dir:        r.output_dir,
        embedding_size:    r.embedding_size,
        story_hidden_size: r.story_hidden_size,
        query_hidden_size: r.query_hidden_size,
        n_layers:          r.layers,
        bidirectional:     r.bidirectional,
        fusion:            r.fusion.into(),
        shared_embedding:  r.shared_embedding,
        batch_size:        r.batch_size,
        device:            r.device.into(),
        print_batch_loss:  r.print_batch_loss,
        ..TrainConfig::default()
    }
}

/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            lr:          a.lr,
            epochs:      a.epochs,
            resume_from: a.resume_from,
            seed:        a.seed,
            ..base_config(a.run)
        }
    }
}

/// One pass over the test set with the given weights.
impl From<EvaluateArgs> for TrainConfig {
    fn from(a: EvaluateArgs) -> Self {
        TrainConfig {
            epochs:        1,
            resume_from:   Some(a.resume_from),
            evaluate_only: true,
            ..base_config(a.run)
        }
    }
}
