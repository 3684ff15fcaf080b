// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The application layer asks for question instances through
// InstanceSource and never learns where they come from.
//
// Implementations:
//   - BabiFileLoader → parses a bAbI task file

use anyhow::Result;
use crate::domain::instance::BabiInstance;

// ─── InstanceSource ───────────────────────────────────────────────────────────
/// Any component that can produce question instances.
pub trait InstanceSource {
    /// Load every instance this source holds, in file order.
    fn load_all(&self) -> Result<Vec<BabiInstance>>;
}
