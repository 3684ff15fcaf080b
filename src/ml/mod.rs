// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// The network, its building blocks and the training loop.
//
//   packing.rs   — descending-length sort of a batch and the
//                  permutations that keep parallel arrays aligned
//
//   encoder.rs   — GRU sequence encoder that reads each row only
//                  up to its true length (uni- or bidirectional,
//                  stacked layers with dropout in between)
//
//   model.rs     — embeddings, question encoder, story encoder,
//                  fusion strategy, answer projection
//
//   trainer.rs   — training/evaluation loop with Adam, run
//                  history and evaluation records
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Cho et al. (2014) GRU

/// Length sorting and permutation helpers
pub mod packing;

/// Length-aware recurrent encoder
pub mod encoder;

/// Question-answering model architecture
pub mod model;

/// Full training loop with evaluation
pub mod trainer;
