// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns used by the other layers:
//
//   checkpoint.rs       — model weights via Burn's gzipped MessagePack recorder,
//                         plus the run's TrainConfig as JSON
//
//   vocabulary_store.rs — word-level vocabulary built from the
//                         bAbI corpus, persisted as tokenizer.json
//                         so a resumed model keeps its word ids
//
//   metrics.rs          — per-epoch metrics CSV
//
//   results.rs          — the run directory: loss/accuracy
//                         histories and decoded evaluation output

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Vocabulary building, saving, and loading
pub mod vocabulary_store;

/// Training metrics CSV logger
pub mod metrics;

/// Per-run results directory
pub mod results;
