// ============================================================
// Layer 4 — bAbI Task Loader
// ============================================================
// Parses a bAbI task file into BabiInstances.
//
// File format (one entry per line):
//
//   <id> <statement>
//   <id> <question>?\t<answer>\t<supporting ids>
//
// Ids restart at 1 whenever a new story begins. Every question
// becomes one instance whose story is every statement seen so
// far in the current story. Questions are never part of the
// story of later questions.
//
// Example:
//   1 Mary moved to the bathroom.
//   2 John went to the hallway.
//   3 Where is Mary? 	bathroom	1
//   4 Daniel went back to the hallway.
//   5 Where is Daniel? 	hallway	4
//
// yields two instances; the second one has a three-sentence story.

use anyhow::{Context, Result};
use std::{fs, path::PathBuf};

use crate::domain::instance::BabiInstance;
use crate::domain::traits::InstanceSource;
use crate::error::{QaError, QaResult};

/// Loads every question instance of one bAbI task file.
pub struct BabiFileLoader {
    path: PathBuf,
}

impl BabiFileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl InstanceSource for BabiFileLoader {
    fn load_all(&self) -> Result<Vec<BabiInstance>> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Cannot read bAbI file '{}'", self.path.display()))?;

        let instances = parse_babi(&text)
            .with_context(|| format!("Malformed bAbI file '{}'", self.path.display()))?;

        tracing::debug!(
            "Loaded {} instances from '{}'",
            instances.len(),
            self.path.display()
        );
        Ok(instances)
    }
}

/// Parse the full contents of a bAbI task file.
pub fn parse_babi(text: &str) -> QaResult<Vec<BabiInstance>> {
    let mut instances = Vec::new();
    let mut story: Vec<String> = Vec::new();

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r').trim();
        if line.is_empty() {
            continue;
        }
        let line_no = line_no + 1;

        let (id, body) = split_line_id(line)
            .ok_or_else(|| QaError::data(format!("line {line_no}: missing line id in '{line}'")))?;

        // A new story starts at id 1
        if id == 1 {
            story.clear();
        }

        if body.contains('\t') {
            instances.push(parse_question(body, &story, line_no)?);
        } else {
            story.push(body.trim().to_string());
        }
    }

    Ok(instances)
}

fn split_line_id(line: &str) -> Option<(usize, &str)> {
    let (id, body) = line.split_once(char::is_whitespace)?;
    let id = id.parse::<usize>().ok()?;
    Some((id, body))
}

fn parse_question(body: &str, story: &[String], line_no: usize) -> QaResult<BabiInstance> {
    let mut fields = body.split('\t');

    let question = fields.next().unwrap_or_default().trim();
    let answer   = fields.next().map(str::trim).unwrap_or_default();
    if question.is_empty() || answer.is_empty() {
        return Err(QaError::data(format!(
            "line {line_no}: question line needs '<question>\\t<answer>'"
        )));
    }

    let supporting_facts = match fields.next() {
        Some(ids) => ids
            .split_whitespace()
            .map(|id| {
                id.parse::<usize>().map_err(|_| {
                    QaError::data(format!("line {line_no}: bad supporting fact id '{id}'"))
                })
            })
            .collect::<QaResult<Vec<_>>>()?,
        None => Vec::new(),
    };

    Ok(BabiInstance::new(story.to_vec(), question, answer, supporting_facts))
}
