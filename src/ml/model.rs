// ============================================================
// Layer 5 — Question-Answering Model
// ============================================================
// Reads a story and a question, predicts the answer word.
//
// Question-conditioned fusion (default):
//
//   query ─ embed ─ query GRU ─► question code  [B, Hq]
//                                     │ repeat over story positions
//                                     ▼
//   story ─ embed ─────────────────► (+) ─► story GRU ─► [B, Hs]
//                                                          │
//                                        linear ─ log_softmax
//                                                          ▼
//                                                   [B, vocab]
//
// Adding the question code to every story token before the
// story is encoded lets the story GRU keep what matters for
// this question and drop the rest.
//
// Independent concatenation (baseline):
//   story GRU and query GRU run separately; their final states
//   are concatenated, projected and log-softmaxed.
//
// The fusion adds vectors of size embedding_size and of the
// question code size, so those two must match; this is checked
// when the model is built.

use burn::{
    module::Ignored,
    nn::{Embedding, EmbeddingConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::log_softmax,
};
use serde::{Deserialize, Serialize};

use crate::error::{QaError, QaResult};
use crate::ml::encoder::{SequenceEncoder, SequenceEncoderConfig};

/// How the question and the story are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FusionStrategy {
    /// Add the encoded question to every story embedding, then encode the story
    #[default]
    QuestionConditioned,
    /// Encode both independently and concatenate the final states
    IndependentConcat,
}

impl std::fmt::Display for FusionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QuestionConditioned => write!(f, "question-conditioned"),
            Self::IndependentConcat   => write!(f, "independent-concat"),
        }
    }
}

#[derive(Config, Debug)]
pub struct QaModelConfig {
    pub vocab_size:        usize,
    pub embedding_size:    usize,
    pub story_hidden_size: usize,
    pub query_hidden_size: usize,
    #[config(default = 1)]
    pub n_layers: usize,
    #[config(default = false)]
    pub bidirectional: bool,
    #[config(default = "FusionStrategy::QuestionConditioned")]
    pub fusion: FusionStrategy,
    /// One embedding table for both story and query
    #[config(default = false)]
    pub shared_embedding: bool,
    #[config(default = 0.3)]
    pub dropout: f64,
}

impl QaModelConfig {
    fn story_encoder(&self, input_size: usize) -> SequenceEncoderConfig {
        SequenceEncoderConfig::new(input_size, self.story_hidden_size)
            .with_n_layers(self.n_layers)
            .with_bidirectional(self.bidirectional)
            .with_dropout(self.dropout)
    }

    fn query_encoder(&self) -> SequenceEncoderConfig {
        SequenceEncoderConfig::new(self.embedding_size, self.query_hidden_size)
            .with_n_layers(self.n_layers)
            .with_bidirectional(self.bidirectional)
            .with_dropout(self.dropout)
    }

    /// Size of the encoded question
    pub fn question_code_size(&self) -> usize {
        self.query_encoder().output_size()
    }

    /// Input width of the final projection
    pub fn projection_input_size(&self) -> usize {
        let story = self.story_encoder(self.embedding_size).output_size();
        match self.fusion {
            FusionStrategy::QuestionConditioned => story,
            FusionStrategy::IndependentConcat   => story + self.question_code_size(),
        }
    }

    pub fn validate(&self) -> QaResult<()> {
        let sizes = [
            ("vocab_size", self.vocab_size),
            ("embedding_size", self.embedding_size),
            ("story_hidden_size", self.story_hidden_size),
            ("query_hidden_size", self.query_hidden_size),
            ("n_layers", self.n_layers),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(QaError::config(format!("{name} must be positive")));
            }
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(QaError::config(format!("dropout {} outside [0, 1)", self.dropout)));
        }
        if self.fusion == FusionStrategy::QuestionConditioned
            && self.embedding_size != self.question_code_size()
        {
            return Err(QaError::config(format!(
                "question-conditioned fusion adds the question code to story embeddings: \
                 embedding_size ({}) must equal the question code size ({})",
                self.embedding_size,
                self.question_code_size(),
            )));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> QaResult<QaModel<B>> {
        self.validate()?;

        let story_table = EmbeddingConfig::new(self.vocab_size, self.embedding_size).init(device);
        let query_table = (!self.shared_embedding)
            .then(|| EmbeddingConfig::new(self.vocab_size, self.embedding_size).init(device));

        Ok(QaModel {
            embeddings:    EmbeddingTables { story: story_table, query: query_table },
            story_encoder: self.story_encoder(self.embedding_size).init(device),
            query_encoder: self.query_encoder().init(device),
            fc:            LinearConfig::new(self.projection_input_size(), self.vocab_size).init(device),
            fusion:        Ignored(self.fusion),
        })
    }
}

/// Story and query lookup tables. With `query == None` the story
/// table serves both call sites, so there is exactly one shared table.
#[derive(Module, Debug)]
pub struct EmbeddingTables<B: Backend> {
    story: Embedding<B>,
    query: Option<Embedding<B>>,
}

impl<B: Backend> EmbeddingTables<B> {
    pub fn story(&self) -> &Embedding<B> {
        &self.story
    }

    pub fn query(&self) -> &Embedding<B> {
        self.query.as_ref().unwrap_or(&self.story)
    }

    pub fn is_shared(&self) -> bool {
        self.query.is_none()
    }
}

#[derive(Module, Debug)]
pub struct QaModel<B: Backend> {
    pub embeddings:    EmbeddingTables<B>,
    pub story_encoder: SequenceEncoder<B>,
    pub query_encoder: SequenceEncoder<B>,
    pub fc:            Linear<B>,
    pub fusion:        Ignored<FusionStrategy>,
}

impl<B: Backend> QaModel<B> {
    pub fn fusion(&self) -> FusionStrategy {
        self.fusion.0
    }

    /// Answer log-probabilities.
    ///
    /// stories: [B, S], queries: [B, Q]; rows sorted by descending
    /// story length → [B, vocab]
    pub fn forward(
        &self,
        stories:       Tensor<B, 2, Int>,
        queries:       Tensor<B, 2, Int>,
        story_lengths: &[usize],
        query_lengths: &[usize],
    ) -> QaResult<Tensor<B, 2>> {
        let story_state = match self.fusion() {
            FusionStrategy::QuestionConditioned => {
                let question_code = self.encode_question(queries, query_lengths)?;
                let story_emb     = self.embeddings.story().forward(stories);
                let combined      = condition_on_question(story_emb, question_code);
                self.story_encoder.forward(combined, story_lengths)?
            }
            FusionStrategy::IndependentConcat => {
                let story_emb = self.embeddings.story().forward(stories);
                let story     = self.story_encoder.forward(story_emb, story_lengths)?;
                let question  = self.encode_question(queries, query_lengths)?;
                Tensor::cat(vec![story, question], 1)
            }
        };

        Ok(log_softmax(self.fc.forward(story_state), 1))
    }

    /// The question code: the query encoder's final state, [B, code_size].
    /// Query rows follow the story sort, so they are encoded in any order.
    pub fn encode_question(
        &self,
        queries:       Tensor<B, 2, Int>,
        query_lengths: &[usize],
    ) -> QaResult<Tensor<B, 2>> {
        let query_emb = self.embeddings.query().forward(queries);
        self.query_encoder.forward_unsorted(query_emb, query_lengths)
    }
}

/// `combined[b, s, :] = story_emb[b, s, :] + question_code[b, :]`
pub fn condition_on_question<B: Backend>(
    story_emb:     Tensor<B, 3>,
    question_code: Tensor<B, 2>,
) -> Tensor<B, 3> {
    let [batch, story_len, dim] = story_emb.dims();
    let repeated = question_code
        .reshape([batch, 1, dim])
        .expand([batch, story_len, dim]);
    story_emb + repeated
}

/// Mean negative log-likelihood of the target ids.
/// log_probs: [B, vocab], targets: [B] → [1]
pub fn nll_loss<B: Backend>(log_probs: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    let [batch, _] = log_probs.dims();
    log_probs
        .gather(1, targets.reshape([batch, 1]))
        .mean()
        .neg()
}

/// Most likely answer id per row, [B]
pub fn predict<B: Backend>(log_probs: Tensor<B, 2>) -> Tensor<B, 1, Int> {
    let [batch, _] = log_probs.dims();
    log_probs.argmax(1).reshape([batch])
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type TB = NdArray;

    fn config() -> QaModelConfig {
        QaModelConfig::new(12, 6, 8, 6)
    }

    fn ints<const D: usize>(values: Vec<i64>, shape: [usize; D]) -> Tensor<TB, D, Int> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    fn floats(t: Tensor<TB, 2>) -> Vec<f32> {
        t.into_data().convert::<f32>().to_vec::<f32>().unwrap()
    }

    /// Three rows sorted by story length: 5, 3, 2
    fn sample_inputs() -> (Tensor<TB, 2, Int>, Tensor<TB, 2, Int>, Vec<usize>, Vec<usize>) {
        let stories = ints(vec![3, 4, 5, 6, 7, 2, 3, 4, 0, 0, 8, 9, 0, 0, 0], [3, 5]);
        let queries = ints(vec![10, 11, 0, 10, 11, 4, 11, 0, 0], [3, 3]);
        (stories, queries, vec![5, 3, 2], vec![2, 3, 1])
    }

    #[test]
    fn test_fusion_size_mismatch_is_config_error() {
        let err = QaModelConfig::new(12, 6, 8, 10).init::<TB>(&Default::default()).unwrap_err();
        assert!(matches!(err, QaError::Config(_)));
    }

    #[test]
    fn test_bidirectional_question_code_doubles() {
        let cfg = QaModelConfig::new(12, 6, 8, 3).with_bidirectional(true);
        assert_eq!(cfg.question_code_size(), 6);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.projection_input_size(), 16);
    }

    #[test]
    fn test_concat_baseline_allows_any_sizes() {
        let cfg = QaModelConfig::new(12, 6, 8, 10).with_fusion(FusionStrategy::IndependentConcat);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.projection_input_size(), 18);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        assert!(QaModelConfig::new(12, 0, 8, 0).validate().is_err());
        assert!(QaModelConfig::new(12, 6, 0, 6).validate().is_err());
        assert!(QaModelConfig::new(12, 6, 8, 6).with_n_layers(0).validate().is_err());
    }

    #[test]
    fn test_log_probs_normalised_per_row() {
        for fusion in [FusionStrategy::QuestionConditioned, FusionStrategy::IndependentConcat] {
            let model: QaModel<TB> = config().with_fusion(fusion).init(&Default::default()).unwrap();
            let (stories, queries, sl, ql) = sample_inputs();
            let out = model.forward(stories, queries, &sl, &ql).unwrap();
            assert_eq!(out.dims(), [3, 12]);

            let sums = floats(out.exp().sum_dim(1));
            for s in sums {
                assert!((s - 1.0).abs() < 1e-4, "row sums to {s}");
            }
        }
    }

    #[test]
    fn test_question_code_added_at_every_position() {
        let device = Default::default();
        let story_emb: Tensor<TB, 3> = Tensor::random([2, 4, 3], Distribution::Normal(0.0, 1.0), &device);
        let code: Tensor<TB, 2> = Tensor::random([2, 3], Distribution::Normal(0.0, 1.0), &device);

        let combined = condition_on_question(story_emb.clone(), code.clone());
        assert_eq!(combined.dims(), [2, 4, 3]);

        let emb  = story_emb.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        let code = floats(code);
        let comb = combined.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        for b in 0..2 {
            for s in 0..4 {
                for d in 0..3 {
                    let i = (b * 4 + s) * 3 + d;
                    assert!((comb[i] - (emb[i] + code[b * 3 + d])).abs() < 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_shared_embedding_is_one_table() {
        let shared: QaModel<TB> = config().with_shared_embedding(true).init(&Default::default()).unwrap();
        let separate: QaModel<TB> = config().init(&Default::default()).unwrap();

        assert!(shared.embeddings.is_shared());
        assert!(!separate.embeddings.is_shared());
        assert!(shared.num_params() < separate.num_params());
        assert_eq!(separate.num_params() - shared.num_params(), 12 * 6);
    }

    #[test]
    fn test_nll_picks_target_log_prob() {
        let log_probs: Tensor<TB, 2> = Tensor::from_data(
            TensorData::new(vec![-0.1f32, -2.0, -3.0, -4.0, -0.5, -1.0], [2, 3]),
            &Default::default(),
        );
        let loss = nll_loss(log_probs.clone(), ints(vec![0, 2], [2]));
        let value = loss.into_scalar().elem::<f64>();
        assert!((value - 0.55).abs() < 1e-6);

        let preds = predict(log_probs).into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(preds, vec![0, 1]);
    }

    #[test]
    fn test_flattened_targets_give_same_loss() {
        let model: QaModel<TB> = config().init(&Default::default()).unwrap();
        let (stories, queries, sl, ql) = sample_inputs();
        let out = model.forward(stories, queries, &sl, &ql).unwrap();

        let answers = ints(vec![3, 7, 9], [3]);
        let as_column = answers.clone().reshape([3, 1]).flatten::<1>(0, 1);

        let a = nll_loss(out.clone(), answers).into_scalar().elem::<f64>();
        let b = nll_loss(out, as_column).into_scalar().elem::<f64>();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unsorted_story_lengths_rejected() {
        let model: QaModel<TB> = config().init(&Default::default()).unwrap();
        let (stories, queries, _, ql) = sample_inputs();
        assert!(model.forward(stories, queries, &[2, 5, 3], &ql).is_err());
    }
}
