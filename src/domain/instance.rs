// ============================================================
// Layer 3 — BabiInstance Domain Type
// ============================================================
// One question of a bAbI task together with the story that
// precedes it.
//
// A bAbI story is a numbered list of statements interleaved
// with questions. Every question is answered from the
// statements that came before it in the same story:
//
//   1 Mary moved to the bathroom.
//   2 John went to the hallway.
//   3 Where is Mary?        bathroom    1
//
// produces the instance
//   story:    ["Mary moved to the bathroom.", "John went to the hallway."]
//   question: "Where is Mary?"
//   answer:   "bathroom"
//   supporting_facts: [1]
//
// Supporting facts are line ids inside the story. The model
// never sees them; they are kept for error analysis.

use serde::{Deserialize, Serialize};

/// A single bAbI question with its story context, still in text form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BabiInstance {
    /// Statements of the current story up to the question, in order
    pub story: Vec<String>,

    /// The question sentence including its question mark
    pub question: String,

    /// The single answer word
    pub answer: String,

    /// Line ids of the statements that justify the answer
    pub supporting_facts: Vec<usize>,
}

impl BabiInstance {
    pub fn new(
        story:            Vec<String>,
        question:         impl Into<String>,
        answer:           impl Into<String>,
        supporting_facts: Vec<usize>,
    ) -> Self {
        Self {
            story,
            question: question.into(),
            answer:   answer.into(),
            supporting_facts,
        }
    }

    /// The story flattened into one passage, sentences separated by spaces
    pub fn story_text(&self) -> String {
        self.story.join(" ")
    }
}
