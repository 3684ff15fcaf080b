// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// This layer takes bAbI task files all the way to tensor
// batches on the training device.
//
// The pipeline flows in this order:
//
//   bAbI .txt files
//       │
//       ▼
//   BabiFileLoader    → parses lines into BabiInstances
//       │
//       ▼
//   Vocabulary        → converts words to ids (infra layer)
//       │
//       ▼
//   BabiDataset       → padded samples, implements Burn's Dataset
//       │
//       ▼
//   BabiBatcher       → stacks samples into tensor batches
//       │
//       ▼
//   DataLoader        → Burn's loader, reshuffled per epoch (train)
//
// Each module is responsible for exactly one step.

/// Parses bAbI task files
pub mod loader;

/// Implements Burn's Dataset trait for padded bAbI samples
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;
