// ============================================================
// Layer 6 — Run Results
// ============================================================
// Every run gets its own directory:
//
//   <output_dir>/<timestamp>_<param string>/
//     train_loss.csv       per training batch    ;-separated, one line
//     test_loss.csv        per evaluation batch  ;-separated, one line
//     train_accuracy.csv   per epoch (percent)   ;-separated, one line
//     test_accuracy.csv    per epoch (percent)   ;-separated, one line
//     answers.csv          correct;story_length;query_length per instance
//     stories.csv          decoded story per evaluated instance
//     queries.csv          decoded query per evaluated instance
//     params.txt           human-readable settings
//
// A run never reuses a directory: when the name is already
// taken (same second, same settings) `_2`, `_3`, … is appended.
//
// The checkpoint manager and vocabulary store write their own
// files (model.mpk.gz, train_config.json, tokenizer.json) into
// the same directory.

use anyhow::{Context, Result};
use chrono::Local;
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::application::train_use_case::TrainConfig;
use crate::infra::vocabulary_store::Vocabulary;
use crate::ml::trainer::{EvalRecord, RunHistory};

pub struct ResultsWriter {
    dir: PathBuf,
}

impl ResultsWriter {
    /// Create a fresh `<output_dir>/<timestamp>_<params>/`
    pub fn create(output_dir: impl AsRef<Path>, params: &str) -> Result<Self> {
        let output_dir = output_dir.as_ref();
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Cannot create output directory '{}'", output_dir.display()))?;

        let base = format!("{}_{params}", Local::now().format("%Y_%m_%d_%H_%M_%S"));
        let mut attempt = 1usize;
        loop {
            let name = if attempt == 1 { base.clone() } else { format!("{base}_{attempt}") };
            let dir  = output_dir.join(name);
            match fs::create_dir(&dir) {
                Ok(()) => {
                    tracing::info!("Writing results to '{}'", dir.display());
                    return Ok(Self { dir });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Cannot create results directory '{}'", dir.display())
                    })
                }
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_history(&self, history: &RunHistory) -> Result<()> {
        self.write("train_loss.csv",     &semicolon_line(&history.train_loss))?;
        self.write("test_loss.csv",      &semicolon_line(&history.test_loss))?;
        self.write("train_accuracy.csv", &semicolon_line(&history.train_accuracy))?;
        self.write("test_accuracy.csv",  &semicolon_line(&history.test_accuracy))?;
        Ok(())
    }

    /// One row per evaluated instance, in the order the model saw them.
    pub fn write_eval_records(&self, records: &[EvalRecord], vocab: &Vocabulary) -> Result<()> {
        let mut answers = String::from("correct;story_length;query_length\n");
        let mut stories = String::from("id;story\n");
        let mut queries = String::from("id;query\n");

        let instances = records.iter().flat_map(|r| {
            r.correct()
                .zip(&r.story_lengths)
                .zip(&r.query_lengths)
                .zip(r.stories.iter().zip(&r.queries))
        });
        for (id, (((correct, story_len), query_len), (story, query))) in instances.enumerate() {
            answers.push_str(&format!("{};{story_len};{query_len}\n", u8::from(correct)));
            stories.push_str(&format!("{id};{}\n", vocab.decode(story.iter().copied())));
            queries.push_str(&format!("{id};{}\n", vocab.decode(query.iter().copied())));
        }

        self.write("answers.csv", &answers)?;
        self.write("stories.csv", &stories)?;
        self.write("queries.csv", &queries)?;
        Ok(())
    }

    pub fn write_params(&self, cfg: &TrainConfig, vocab_size: usize) -> Result<()> {
        let text = format!(
            "train_file: {}\n\
             test_file: {}\n\
             vocab_file: {}\n\
             vocab_size: {vocab_size}\n\
             embedding_size: {}\n\
             story_hidden_size: {}\n\
             query_hidden_size: {}\n\
             layers: {}\n\
             bidirectional: {}\n\
             fusion: {}\n\
             shared_embedding: {}\n\
             batch_size: {}\n\
             lr: {}\n\
             epochs: {}\n\
             resume_from: {}\n\
             evaluate_only: {}\n\
             device: {}\n\
             seed: {}\n",
            cfg.train_file,
            cfg.test_file,
            cfg.vocab_file.as_deref().unwrap_or("-"),
            cfg.embedding_size,
            cfg.story_hidden_size,
            cfg.query_hidden_size,
            cfg.n_layers,
            cfg.bidirectional,
            cfg.fusion,
            cfg.shared_embedding,
            cfg.batch_size,
            cfg.lr,
            cfg.epochs,
            cfg.resume_from.as_deref().unwrap_or("-"),
            cfg.evaluate_only,
            cfg.device,
            cfg.seed,
        );
        self.write("params.txt", &text)
    }

    fn write(&self, name: &str, contents: &str) -> Result<()> {
        let path = self.dir.join(name);
        fs::write(&path, contents).with_context(|| format!("Cannot write '{}'", path.display()))
    }
}

fn semicolon_line(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(";")
}
