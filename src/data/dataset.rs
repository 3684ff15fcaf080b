// ============================================================
// Layer 4 — bAbI Dataset
// ============================================================
// Turns parsed BabiInstances into fixed-width id samples and
// exposes them through Burn's Dataset trait.
//
//   "Mary went to the kitchen ." → [12, 20, 18, 17, 11, 2, 0, 0]
//                                   └──── story_length 6 ────┘ pad
//
// Train and test are padded to one shared width pair, the
// longest story and the longest query of either split, so a
// model trained on one split can read the other.

use anyhow::Result;
use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

use crate::domain::instance::BabiInstance;
use crate::error::QaError;
use crate::infra::vocabulary_store::{Vocabulary, PAD_ID};

/// One vectorised question, padded to the run-wide widths.
/// Entries past `story_length` / `query_length` are padding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BabiSample {
    pub story:        Vec<u32>,
    pub query:        Vec<u32>,
    pub answer:       u32,
    pub story_length: usize,
    pub query_length: usize,
}

impl BabiSample {
    /// Build a sample from unpadded ids, padding up to the given widths.
    pub fn padded(
        story:       &[u32],
        query:       &[u32],
        answer:      u32,
        story_width: usize,
        query_width: usize,
    ) -> Self {
        Self {
            story:        pad(story, story_width),
            query:        pad(query, query_width),
            answer,
            story_length: story.len(),
            query_length: query.len(),
        }
    }
}

fn pad(ids: &[u32], width: usize) -> Vec<u32> {
    let mut out = ids.to_vec();
    out.resize(width.max(ids.len()), PAD_ID);
    out
}

/// Padded widths shared by every sample of a run (train and test
/// must agree so the model sees one story width and one query width).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PadWidths {
    pub story: usize,
    pub query: usize,
}

/// A tokenised instance before padding
struct Encoded {
    story:  Vec<u32>,
    query:  Vec<u32>,
    answer: u32,
}

fn encode(inst: &BabiInstance, vocab: &Vocabulary) -> Result<Encoded> {
    Ok(Encoded {
        story:  vocab.encode(&inst.story_text())?,
        query:  vocab.encode(&inst.question)?,
        answer: vocab.answer_id(&inst.answer)?,
    })
}

#[derive(Clone)]
pub struct BabiDataset {
    samples: Vec<BabiSample>,
    widths:  PadWidths,
}

impl BabiDataset {
    pub fn new(samples: Vec<BabiSample>, widths: PadWidths) -> Self {
        Self { samples, widths }
    }

    /// Vectorise instances against fixed padding widths.
    /// An instance longer than the widths, or with an empty story or
    /// query, is a data error.
    pub fn vectorize(
        instances: &[BabiInstance],
        vocab:     &Vocabulary,
        widths:    PadWidths,
    ) -> Result<Self> {
        let encoded = instances.iter().map(|i| encode(i, vocab)).collect::<Result<Vec<_>>>()?;
        Self::from_encoded(encoded, widths)
    }

    /// Vectorise the train and test splits with one vocabulary,
    /// padding both to the longest story and query of either split.
    pub fn vectorize_splits(
        train: &[BabiInstance],
        test:  &[BabiInstance],
        vocab: &Vocabulary,
    ) -> Result<(Self, Self)> {
        let train: Vec<Encoded> = train.iter().map(|i| encode(i, vocab)).collect::<Result<_>>()?;
        let test:  Vec<Encoded> = test.iter().map(|i| encode(i, vocab)).collect::<Result<_>>()?;

        let widths = train.iter().chain(&test).fold(
            PadWidths { story: 0, query: 0 },
            |w, e| PadWidths {
                story: w.story.max(e.story.len()),
                query: w.query.max(e.query.len()),
            },
        );

        let train = Self::from_encoded(train, widths)?;
        let test  = Self::from_encoded(test, widths)?;
        tracing::info!(
            "Vectorised {} train / {} test instances (story width {}, query width {})",
            train.sample_count(),
            test.sample_count(),
            widths.story,
            widths.query,
        );
        Ok((train, test))
    }

    fn from_encoded(encoded: Vec<Encoded>, widths: PadWidths) -> Result<Self> {
        let samples = encoded
            .into_iter()
            .enumerate()
            .map(|(i, e)| -> Result<BabiSample> {
                if e.story.is_empty() || e.query.is_empty() {
                    return Err(QaError::data(format!("instance {i} has an empty story or query")).into());
                }
                if e.story.len() > widths.story || e.query.len() > widths.query {
                    return Err(QaError::data(format!(
                        "instance {i} ({} story / {} query tokens) exceeds widths {}/{}",
                        e.story.len(), e.query.len(), widths.story, widths.query,
                    )).into());
                }
                Ok(BabiSample::padded(&e.story, &e.query, e.answer, widths.story, widths.query))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(samples, widths))
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Padded widths every sample was built with
    pub fn widths(&self) -> PadWidths {
        self.widths
    }

    pub fn samples(&self) -> &[BabiSample] {
        &self.samples
    }
}

impl Dataset<BabiSample> for BabiDataset {
    fn get(&self, index: usize) -> Option<BabiSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instances() -> (Vec<BabiInstance>, Vec<BabiInstance>) {
        let train = vec![BabiInstance::new(
            vec!["Mary moved to the bathroom.".into(), "John went to the hallway.".into()],
            "Where is Mary?",
            "bathroom",
            vec![1],
        )];
        let test = vec![BabiInstance::new(
            vec!["John went to the hallway.".into()],
            "Where is the John?",
            "hallway",
            vec![1],
        )];
        (train, test)
    }

    #[test]
    fn test_padded_records_true_lengths() {
        let s = BabiSample::padded(&[5, 6, 7], &[8], 6, 5, 3);
        assert_eq!(s.story, vec![5, 6, 7, PAD_ID, PAD_ID]);
        assert_eq!(s.query, vec![8, PAD_ID, PAD_ID]);
        assert_eq!(s.story_length, 3);
        assert_eq!(s.query_length, 1);
    }

    #[test]
    fn test_splits_share_widths() {
        let (train, test) = instances();
        let vocab = Vocabulary::build(train.iter().chain(&test)).unwrap();
        let (train_ds, test_ds) = BabiDataset::vectorize_splits(&train, &test, &vocab).unwrap();

        // story: "mary moved to the bathroom . john went to the hallway ." = 12
        // query: "where is the john ?" = 5
        assert_eq!(train_ds.widths(), PadWidths { story: 12, query: 5 });
        assert_eq!(test_ds.widths(), train_ds.widths());

        let t = test_ds.get(0).unwrap();
        assert_eq!(t.story.len(), 12);
        assert_eq!(t.story_length, 6);
        assert_eq!(t.query_length, 5);
        assert_eq!(t.answer, vocab.word_to_id("hallway").unwrap());
    }

    #[test]
    fn test_unknown_answer_fails() {
        let (train, _) = instances();
        let test = vec![BabiInstance::new(
            vec!["Mary went to the kitchen.".into()],
            "Where is Mary?",
            "kitchen",
            vec![1],
        )];
        let vocab = Vocabulary::build(&train).unwrap();
        assert!(BabiDataset::vectorize_splits(&train, &test, &vocab).is_err());
    }

    #[test]
    fn test_vectorize_rejects_overlong_instance() {
        let (train, _) = instances();
        let vocab = Vocabulary::build(&train).unwrap();
        let narrow = PadWidths { story: 4, query: 4 };
        assert!(BabiDataset::vectorize(&train, &vocab, narrow).is_err());

        let wide = PadWidths { story: 20, query: 6 };
        let ds = BabiDataset::vectorize(&train, &vocab, wide).unwrap();
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.get(0).unwrap().story.len(), 20);
    }
}
