// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs and traits describing the problem:
// stories, questions and answers in text form.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits

// One bAbI question with its story context
pub mod instance;

// Core abstractions (traits) that other layers implement
pub mod traits;
