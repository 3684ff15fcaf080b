// ============================================================
// Layer 5 — Length Sorting for Packed Sequences
// ============================================================
// The recurrent encoders only look at the true (unpadded)
// positions of each sequence and expect the batch in
// descending length order. Sorting a batch means producing one
// permutation from the story lengths and applying it to every
// parallel array (stories, queries, answers, both length
// arrays) so each row still describes the same instance.
//
// Example:
//   story lengths [2, 5, 3]  →  order [1, 2, 0]
//   sorted lengths           →  [5, 3, 2]
//   inverse order            →  [2, 0, 1]   (restores the input order)
//
// Ties keep their original relative order (stable sort).

use burn::prelude::*;
use burn::tensor::TensorData;

/// Row order that sorts `lengths` descending, ties in input order.
pub fn descending_order(lengths: &[usize]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..lengths.len()).collect();
    // sort_by is stable
    order.sort_by(|&a, &b| lengths[b].cmp(&lengths[a]));
    order
}

pub fn is_descending(lengths: &[usize]) -> bool {
    lengths.windows(2).all(|w| w[0] >= w[1])
}

/// Permutation that undoes `order`.
pub fn inverse_order(order: &[usize]) -> Vec<usize> {
    let mut inverse = vec![0; order.len()];
    for (new_pos, &old_pos) in order.iter().enumerate() {
        inverse[old_pos] = new_pos;
    }
    inverse
}

/// `out[i] = values[order[i]]`
pub fn permute<T: Clone>(values: &[T], order: &[usize]) -> Vec<T> {
    order.iter().map(|&i| values[i].clone()).collect()
}

/// Row indices as an Int tensor, for `Tensor::select` along dim 0.
pub fn order_tensor<B: Backend>(order: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let ids: Vec<i64> = order.iter().map(|&i| i as i64).collect();
    Tensor::<B, 1, Int>::from_data(TensorData::new(ids, [order.len()]), device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descending_order_is_stable() {
        assert_eq!(descending_order(&[2, 5, 3]), vec![1, 2, 0]);
        assert_eq!(descending_order(&[3, 4, 3, 4]), vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_inverse_restores_input_order() {
        let values = vec!['a', 'b', 'c', 'd'];
        let order  = descending_order(&[1, 4, 2, 3]);
        let sorted = permute(&values, &order);
        assert_eq!(sorted, vec!['b', 'd', 'c', 'a']);
        assert_eq!(permute(&sorted, &inverse_order(&order)), values);
    }

    #[test]
    fn test_parallel_arrays_stay_aligned() {
        // (story length, query, answer) triples keyed by original index
        let story_lengths = [2usize, 7, 4, 7, 1];
        let queries = ["q0", "q1", "q2", "q3", "q4"];
        let answers = [10, 11, 12, 13, 14];

        let order = descending_order(&story_lengths);
        let sl = permute(&story_lengths, &order);
        let q  = permute(&queries, &order);
        let a  = permute(&answers, &order);

        assert!(is_descending(&sl));
        for (pos, &orig) in order.iter().enumerate() {
            assert_eq!(sl[pos], story_lengths[orig]);
            assert_eq!(q[pos], queries[orig]);
            assert_eq!(a[pos], answers[orig]);
        }
    }

    #[test]
    fn test_is_descending() {
        assert!(is_descending(&[5, 5, 2, 1]));
        assert!(is_descending(&[]));
        assert!(!is_descending(&[2, 5]));
    }
}
