// ============================================================
// Layer 4 — bAbI Batcher
// ============================================================
// Implements Burn's Batcher trait to stack BabiSamples into
// tensors on the target device.
//
// How batching works here:
//   Input:  N samples, stories padded to S, queries padded to Q
//   Output: stories [N, S], queries [N, Q], answers [N]
//
// True lengths stay on the host as plain Vec<usize>: the
// encoders need them as indices, never as tensor data.
//
// Before a forward pass the batch is sorted by story length
// (descending) and every parallel array is permuted with the
// same order, see `BabiBatch::sort_by_story_length`.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::data::dataset::BabiSample;
use crate::error::{QaError, QaResult};
use crate::ml::encoder::check_lengths;
use crate::ml::packing::{descending_order, order_tensor, permute};

// ─── BabiBatch ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct BabiBatch<B: Backend> {
    /// [batch, story_width]
    pub stories: Tensor<B, 2, Int>,

    /// [batch, query_width]
    pub queries: Tensor<B, 2, Int>,

    /// [batch]
    pub answers: Tensor<B, 1, Int>,

    pub story_lengths: Vec<usize>,
    pub query_lengths: Vec<usize>,
}

impl<B: Backend> BabiBatch<B> {
    /// Every row needs 1 ≤ length ≤ padded width, and all parallel
    /// arrays must describe the same number of rows.
    pub fn validate(&self) -> QaResult<()> {
        let [batch, story_width] = self.stories.dims();
        let [query_rows, query_width] = self.queries.dims();
        let [answer_rows] = self.answers.dims();

        if batch == 0 {
            return Err(QaError::data("empty batch"));
        }
        if query_rows != batch || answer_rows != batch || self.query_lengths.len() != batch {
            return Err(QaError::data(format!(
                "batch arrays disagree: {batch} stories, {query_rows} queries, \
                 {answer_rows} answers, {} story lengths, {} query lengths",
                self.story_lengths.len(),
                self.query_lengths.len(),
            )));
        }
        check_lengths(&self.story_lengths, batch, story_width)
            .map_err(|e| QaError::data(format!("story: {e}")))?;
        check_lengths(&self.query_lengths, batch, query_width)
            .map_err(|e| QaError::data(format!("query: {e}")))?;
        Ok(())
    }

    /// Reorder rows by descending story length (stable), moving
    /// queries, answers and both length arrays along with the stories.
    /// Returns the sorted batch and the order used:
    /// row `i` of the result is row `order[i]` of the input.
    pub fn sort_by_story_length(self) -> (Self, Vec<usize>) {
        let order  = descending_order(&self.story_lengths);
        let device = self.stories.device();
        let index  = order_tensor::<B>(&order, &device);

        let sorted = Self {
            stories:       self.stories.select(0, index.clone()),
            queries:       self.queries.select(0, index.clone()),
            answers:       self.answers.select(0, index),
            story_lengths: permute(&self.story_lengths, &order),
            query_lengths: permute(&self.query_lengths, &order),
        };
        (sorted, order)
    }
}

// ─── BabiBatcher ──────────────────────────────────────────────────────────────
#[derive(Clone, Debug, Default)]
pub struct BabiBatcher;

impl BabiBatcher {
    pub fn new() -> Self {
        Self
    }

    /// Stack samples into tensors on `device`.
    /// All samples must share the story and query widths.
    pub fn batch_on<B: Backend>(&self, items: Vec<BabiSample>, device: &B::Device) -> BabiBatch<B> {
        let batch_size  = items.len();
        let story_width = items.first().map_or(0, |s| s.story.len());
        let query_width = items.first().map_or(0, |s| s.query.len());

        let story_flat: Vec<i64> = items
            .iter()
            .flat_map(|s| s.story.iter().map(|&x| x as i64))
            .collect();
        let query_flat: Vec<i64> = items
            .iter()
            .flat_map(|s| s.query.iter().map(|&x| x as i64))
            .collect();
        let answers: Vec<i64> = items.iter().map(|s| s.answer as i64).collect();

        BabiBatch {
            stories: Tensor::from_data(TensorData::new(story_flat, [batch_size, story_width]), device),
            queries: Tensor::from_data(TensorData::new(query_flat, [batch_size, query_width]), device),
            answers: Tensor::from_data(TensorData::new(answers, [batch_size]), device),
            story_lengths: items.iter().map(|s| s.story_length).collect(),
            query_lengths: items.iter().map(|s| s.query_length).collect(),
        }
    }
}

impl<B: Backend> Batcher<B, BabiSample, BabiBatch<B>> for BabiBatcher {
    fn batch(&self, items: Vec<BabiSample>, device: &B::Device) -> BabiBatch<B> {
        self.batch_on(items, device)
    }
}
