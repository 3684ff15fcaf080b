// ============================================================
// Layer 5 — Sequence Encoder
// ============================================================
// Turns a batch of embedded, padded sequences into one hidden
// vector per sequence using stacked GRU layers.
//
// Packing without a packed tensor type:
//   A forward GRU's output at step t depends only on steps ≤ t,
//   so the state at step `length - 1` is exactly the state a
//   packed sequence would end in. Padding positions come after
//   it and can never leak into it. The encoder therefore runs
//   over the full padded width and gathers each row's state at
//   its own last true position.
//
//   The backward direction (bidirectional mode) runs over each
//   row reversed *within its true length*:
//
//     tokens  [a b c _ _]  length 3
//     reverse [c b a _ _]
//
//   so its final state (at position length-1 of the reversed
//   row) also only saw real tokens.
//
// Batches must arrive sorted by descending length, like a
// packed batch. `forward_unsorted` sorts, encodes and restores
// the caller's order for paths whose order is fixed by another
// sequence (the query follows the story's sort).
//
// Shapes:
//   input   [batch, seq_len, input_size]
//   output  [batch, hidden_size * directions]

use burn::{
    nn::{gru::{Gru, GruConfig}, Dropout, DropoutConfig},
    prelude::*,
    tensor::TensorData,
};

use crate::error::{QaError, QaResult};
use crate::ml::packing::{descending_order, inverse_order, is_descending, order_tensor, permute};

#[derive(Config, Debug)]
pub struct SequenceEncoderConfig {
    pub input_size:  usize,
    pub hidden_size: usize,
    #[config(default = 1)]
    pub n_layers: usize,
    #[config(default = false)]
    pub bidirectional: bool,
    /// Applied between stacked layers while training
    #[config(default = 0.3)]
    pub dropout: f64,
}

impl SequenceEncoderConfig {
    pub fn directions(&self) -> usize {
        if self.bidirectional { 2 } else { 1 }
    }

    /// Width of the encoded vector
    pub fn output_size(&self) -> usize {
        self.hidden_size * self.directions()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SequenceEncoder<B> {
        let layer_input = |layer: usize| {
            if layer == 0 { self.input_size } else { self.output_size() }
        };
        let build = |layer: usize| GruConfig::new(layer_input(layer), self.hidden_size, true).init(device);

        let forward_layers = (0..self.n_layers).map(&build).collect();
        let backward_layers = if self.bidirectional {
            (0..self.n_layers).map(&build).collect()
        } else {
            Vec::new()
        };

        SequenceEncoder {
            forward_layers,
            backward_layers,
            dropout:     DropoutConfig::new(self.dropout).init(),
            hidden_size: self.hidden_size,
        }
    }
}

#[derive(Module, Debug)]
pub struct SequenceEncoder<B: Backend> {
    forward_layers:  Vec<Gru<B>>,
    /// Empty unless bidirectional
    backward_layers: Vec<Gru<B>>,
    dropout:         Dropout,
    hidden_size:     usize,
}

impl<B: Backend> SequenceEncoder<B> {
    pub fn is_bidirectional(&self) -> bool {
        !self.backward_layers.is_empty()
    }

    pub fn output_size(&self) -> usize {
        if self.is_bidirectional() { 2 * self.hidden_size } else { self.hidden_size }
    }

    /// Encode a batch sorted by descending true length.
    ///
    /// x: [batch, seq_len, input_size], lengths: [batch]
    /// → [batch, output_size]
    pub fn forward(&self, x: Tensor<B, 3>, lengths: &[usize]) -> QaResult<Tensor<B, 2>> {
        let [batch, seq_len, _] = x.dims();
        check_lengths(lengths, batch, seq_len)?;
        if !is_descending(lengths) {
            return Err(QaError::data(format!(
                "sequence lengths must be sorted descending before encoding, got {lengths:?}"
            )));
        }

        // GRU state starts at zero for every layer and direction
        let mut input = x;
        let mut last_forward  = None;
        let mut last_backward = None;

        for (layer, gru) in self.forward_layers.iter().enumerate() {
            if layer > 0 {
                input = self.dropout.forward(input);
            }
            let forward = gru.forward(input.clone(), None);

            let backward = self.backward_layers.get(layer).map(|gru_back| {
                let reversed = reverse_within_lengths(input.clone(), lengths);
                reverse_within_lengths(gru_back.forward(reversed, None), lengths)
            });

            input = match &backward {
                Some(backward) => Tensor::cat(vec![forward.clone(), backward.clone()], 2),
                None => forward.clone(),
            };
            last_forward  = Some(forward);
            last_backward = backward;
        }

        let last_positions: Vec<usize> = lengths.iter().map(|&l| l - 1).collect();
        let forward_state = last_forward
            .map(|states| states_at(states, &last_positions))
            .ok_or_else(|| QaError::config("sequence encoder has no layers"))?;

        Ok(match last_backward {
            // The backward pass ends at the first token
            Some(states) => Tensor::cat(vec![forward_state, states_at(states, &vec![0; batch])], 1),
            None => forward_state,
        })
    }

    /// Encode a batch in any order; the output keeps the input's row order.
    pub fn forward_unsorted(&self, x: Tensor<B, 3>, lengths: &[usize]) -> QaResult<Tensor<B, 2>> {
        if is_descending(lengths) {
            return self.forward(x, lengths);
        }
        let [batch, seq_len, _] = x.dims();
        check_lengths(lengths, batch, seq_len)?;

        let device  = x.device();
        let order   = descending_order(lengths);
        let sorted  = x.select(0, order_tensor::<B>(&order, &device));
        let encoded = self.forward(sorted, &permute(lengths, &order))?;

        Ok(encoded.select(0, order_tensor::<B>(&inverse_order(&order), &device)))
    }
}

/// Every length must be in 1..=seq_len, one per row.
pub fn check_lengths(lengths: &[usize], batch: usize, seq_len: usize) -> QaResult<()> {
    if lengths.len() != batch {
        return Err(QaError::data(format!(
            "{} lengths given for a batch of {batch}",
            lengths.len()
        )));
    }
    for (row, &len) in lengths.iter().enumerate() {
        if len == 0 || len > seq_len {
            return Err(QaError::data(format!(
                "row {row}: length {len} outside 1..={seq_len}"
            )));
        }
    }
    Ok(())
}

/// Pick `states[b, positions[b], :]` for every row.
fn states_at<B: Backend>(states: Tensor<B, 3>, positions: &[usize]) -> Tensor<B, 2> {
    let [batch, _, hidden] = states.dims();
    let index: Vec<i64> = positions
        .iter()
        .flat_map(|&p| std::iter::repeat(p as i64).take(hidden))
        .collect();
    let index = Tensor::<B, 3, Int>::from_data(TensorData::new(index, [batch, 1, hidden]), &states.device());

    states.gather(1, index).reshape([batch, hidden])
}

/// Reverse each row's first `lengths[b]` positions; padding stays in place.
/// Applying it twice gives back the input.
fn reverse_within_lengths<B: Backend>(x: Tensor<B, 3>, lengths: &[usize]) -> Tensor<B, 3> {
    let [batch, seq_len, dim] = x.dims();
    let mut index = Vec::with_capacity(batch * seq_len * dim);
    for &len in lengths {
        for t in 0..seq_len {
            let src = if t < len { len - 1 - t } else { t };
            index.extend(std::iter::repeat(src as i64).take(dim));
        }
    }
    let index = Tensor::<B, 3, Int>::from_data(TensorData::new(index, [batch, seq_len, dim]), &x.device());

    x.gather(1, index)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TB = NdArray;

    fn encoder(input: usize, hidden: usize, layers: usize, bidirectional: bool) -> SequenceEncoder<TB> {
        SequenceEncoderConfig::new(input, hidden)
            .with_n_layers(layers)
            .with_bidirectional(bidirectional)
            .init(&Default::default())
    }

    fn random_input(batch: usize, seq_len: usize, dim: usize) -> Tensor<TB, 3> {
        Tensor::random([batch, seq_len, dim], Distribution::Normal(0.0, 1.0), &Default::default())
    }

    fn rows(t: Tensor<TB, 2>) -> Vec<Vec<f32>> {
        let [_, width] = t.dims();
        let flat = t.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        flat.chunks(width).map(|c| c.to_vec()).collect()
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-5, "{x} != {y}");
        }
    }

    #[test]
    fn test_output_shape_follows_config() {
        let lengths = [6, 4, 4, 1];
        for (layers, bidirectional, width) in [(1, false, 8), (2, false, 8), (1, true, 16), (3, true, 16)] {
            let enc = encoder(5, 8, layers, bidirectional);
            let out = enc.forward(random_input(4, 6, 5), &lengths).unwrap();
            assert_eq!(out.dims(), [4, width]);
            assert_eq!(enc.output_size(), width);
        }
    }

    #[test]
    fn test_padding_does_not_change_encoding() {
        let enc = encoder(3, 6, 2, true);
        let x = random_input(2, 5, 3);
        let lengths = [5, 2];

        // Overwrite the padding of row 1 with different values
        let noise = random_input(1, 3, 3).mul_scalar(10.0);
        let altered = x.clone().slice_assign([1..2, 2..5, 0..3], noise);

        let a = rows(enc.forward(x, &lengths).unwrap());
        let b = rows(enc.forward(altered, &lengths).unwrap());
        assert_close(&a[0], &b[0]);
        assert_close(&a[1], &b[1]);
    }

    #[test]
    fn test_short_row_does_not_leak_into_long_row() {
        let enc = encoder(3, 4, 1, false);
        let x = random_input(2, 5, 3);

        let batched = rows(enc.forward(x.clone(), &[5, 2]).unwrap());
        let alone   = rows(enc.forward(x.slice([0..1, 0..5, 0..3]), &[5]).unwrap());
        assert_close(&batched[0], &alone[0]);
    }

    #[test]
    fn test_equals_encoding_truncated_sequence() {
        let enc = encoder(3, 4, 2, true);
        let x = random_input(1, 6, 3);

        let padded    = rows(enc.forward(x.clone(), &[4]).unwrap());
        let truncated = rows(enc.forward(x.slice([0..1, 0..4, 0..3]), &[4]).unwrap());
        assert_close(&padded[0], &truncated[0]);
    }

    #[test]
    fn test_unsorted_lengths_rejected() {
        let enc = encoder(3, 4, 1, false);
        let err = enc.forward(random_input(2, 5, 3), &[2, 5]).unwrap_err();
        assert!(matches!(err, QaError::Data(_)));
    }

    #[test]
    fn test_invalid_lengths_rejected() {
        let enc = encoder(3, 4, 1, false);
        assert!(enc.forward(random_input(2, 5, 3), &[5, 0]).is_err());
        assert!(enc.forward(random_input(2, 5, 3), &[6, 2]).is_err());
        assert!(enc.forward(random_input(2, 5, 3), &[5]).is_err());
    }

    #[test]
    fn test_forward_unsorted_keeps_row_order() {
        let enc = encoder(3, 4, 1, true);
        let x = random_input(3, 5, 3);

        let unsorted = rows(enc.forward_unsorted(x.clone(), &[2, 5, 3]).unwrap());
        for (row, len) in [(0usize, 2usize), (1, 5), (2, 3)] {
            let single = rows(enc.forward(x.clone().slice([row..row + 1, 0..5, 0..3]), &[len]).unwrap());
            assert_close(&unsorted[row], &single[0]);
        }
    }

    #[test]
    fn test_reverse_within_lengths_is_involution() {
        let x = random_input(2, 4, 2);
        let lengths = [4, 2];
        let twice = reverse_within_lengths(reverse_within_lengths(x.clone(), &lengths), &lengths);
        let a = x.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        let b = twice.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        assert_close(&a, &b);
    }

    #[test]
    fn test_reverse_within_lengths_keeps_padding() {
        let data: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let x = Tensor::<TB, 3>::from_data(TensorData::new(data, [2, 4, 1]), &Default::default());
        let out = reverse_within_lengths(x, &[4, 2]);
        let out = out.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        assert_eq!(out, vec![3.0, 2.0, 1.0, 0.0, 5.0, 4.0, 6.0, 7.0]);
    }
}
