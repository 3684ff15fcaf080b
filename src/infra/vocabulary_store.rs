// ============================================================
// Layer 6 — Vocabulary Store
// ============================================================
// Builds, saves and loads the word vocabulary.
//
// The vocabulary is a HuggingFace WordLevel tokenizer written
// as JSON and loaded back through `tokenizers`, so training and
// evaluation runs tokenise text exactly the same way.
//
// Id layout (dense, zero-based):
//   0  <pad>   — padding, never a real word
//   1  <unk>   — words unseen while building
//   2… corpus words, sorted lexicographically
//
// Sorting makes the ids independent of file order, so two
// builds over the same corpus always agree.
//
// Text is lower-cased and split into runs of word characters
// and runs of punctuation ("Where is Mary?" → where / is /
// mary / ?). Building runs the tokenizer's own Whitespace
// pre-tokenizer, so every word it collects is one `encode` finds.

use anyhow::{Context, Result};
use std::{collections::BTreeSet, path::PathBuf, str::FromStr};
use tokenizers::{
    pre_tokenizers::whitespace::Whitespace, OffsetReferential, OffsetType, PreTokenizedString,
    PreTokenizer, Tokenizer,
};

use crate::domain::instance::BabiInstance;
use crate::error::{QaError, QaResult};

pub const PAD_TOKEN: &str = "<pad>";
pub const UNK_TOKEN: &str = "<unk>";
pub const PAD_ID: u32 = 0;
pub const UNK_ID: u32 = 1;

const VOCAB_FILE: &str = "tokenizer.json";

// ─── Vocabulary ───────────────────────────────────────────────────────────────
/// Immutable word ↔ id mapping backed by a WordLevel tokenizer.
#[derive(Clone)]
pub struct Vocabulary {
    tokenizer: Tokenizer,
}

impl Vocabulary {
    /// Build a vocabulary from every word of the given instances.
    /// Answers are added as whole words so each maps to one id.
    pub fn build<'a>(instances: impl IntoIterator<Item = &'a BabiInstance>) -> Result<Self> {
        let mut words = BTreeSet::new();

        for inst in instances {
            for sentence in &inst.story {
                words.extend(split_words(sentence)?);
            }
            words.extend(split_words(&inst.question)?);
            words.insert(inst.answer.to_lowercase());
        }
        words.remove(PAD_TOKEN);
        words.remove(UNK_TOKEN);

        let mut vocab = serde_json::Map::new();
        vocab.insert(PAD_TOKEN.into(), serde_json::json!(PAD_ID));
        vocab.insert(UNK_TOKEN.into(), serde_json::json!(UNK_ID));
        for (i, word) in words.into_iter().enumerate() {
            vocab.insert(word, serde_json::json!(i + 2));
        }

        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [
                {"id": PAD_ID, "content": PAD_TOKEN, "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": UNK_ID, "content": UNK_TOKEN, "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
            ],
            "normalizer": { "type": "Lowercase" },
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": UNK_TOKEN
            }
        });

        let tokenizer = Tokenizer::from_str(&tokenizer_json.to_string())
            .map_err(|e| anyhow::anyhow!("Cannot build vocabulary tokenizer: {e}"))?;
        Ok(Self { tokenizer })
    }

    /// Number of ids, including <pad> and <unk>
    pub fn len(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    /// True when the corpus contributed no words
    pub fn is_empty(&self) -> bool {
        self.len() <= 2
    }

    /// Tokenise a sentence or passage into word ids
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let enc = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;
        Ok(enc.get_ids().to_vec())
    }

    pub fn word_to_id(&self, word: &str) -> Option<u32> {
        self.tokenizer.token_to_id(&word.to_lowercase())
    }

    pub fn id_to_word(&self, id: u32) -> Option<String> {
        self.tokenizer.id_to_token(id)
    }

    /// Id of an answer word. An answer must be a single known word.
    pub fn answer_id(&self, answer: &str) -> QaResult<u32> {
        self.word_to_id(answer)
            .ok_or_else(|| QaError::data(format!("answer '{answer}' is not in the vocabulary")))
    }

    /// Render an id row as text, dropping padding
    pub fn decode<I>(&self, ids: I) -> String
    where
        I: IntoIterator,
        I::Item: TryInto<u32>,
    {
        ids.into_iter()
            .filter_map(|id| id.try_into().ok())
            .filter(|&id| id != PAD_ID)
            .map(|id| self.id_to_word(id).unwrap_or_else(|| UNK_TOKEN.to_string()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Debug for Vocabulary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vocabulary").field("len", &self.len()).finish()
    }
}

/// Lower-cased `\w+|[^\w\s]+` runs, as the saved tokenizer splits them
fn split_words(text: &str) -> Result<Vec<String>> {
    let mut pretokenized = PreTokenizedString::from(text.to_lowercase());
    Whitespace::default()
        .pre_tokenize(&mut pretokenized)
        .map_err(|e| anyhow::anyhow!("Cannot split '{text}' into words: {e}"))?;

    Ok(pretokenized
        .get_splits(OffsetReferential::Original, OffsetType::Byte)
        .into_iter()
        .map(|(word, _, _)| word.to_string())
        .collect())
}

// ─── VocabularyStore ──────────────────────────────────────────────────────────
/// Persists a vocabulary as `tokenizer.json` inside a directory.
pub struct VocabularyStore {
    dir: PathBuf,
}

impl VocabularyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(VOCAB_FILE)
    }

    /// Load an existing vocabulary or build one from the instances
    pub fn load_or_build<'a>(
        &self,
        instances: impl IntoIterator<Item = &'a BabiInstance>,
    ) -> Result<Vocabulary> {
        if self.path().exists() {
            tracing::info!("Loading existing vocabulary from '{}'", self.path().display());
            self.load()
        } else {
            let vocab = Vocabulary::build(instances)?;
            tracing::info!("Built vocabulary with {} words", vocab.len());
            Ok(vocab)
        }
    }

    pub fn load(&self) -> Result<Vocabulary> {
        let path = self.path();
        let tokenizer = Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Cannot load vocabulary from '{}': {}", path.display(), e))?;
        Ok(Vocabulary { tokenizer })
    }

    pub fn save(&self, vocab: &Vocabulary) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;
        let path = self.path();
        vocab
            .tokenizer
            .save(&path, true)
            .map_err(|e| anyhow::anyhow!("Cannot write vocabulary to '{}': {}", path.display(), e))?;
        tracing::debug!("Saved vocabulary to '{}'", path.display());
        Ok(())
    }
}
