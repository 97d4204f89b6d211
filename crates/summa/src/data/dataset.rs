use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::config::SummarizerConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Validation,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Validation => "validation",
            Split::Test => "test",
        }
    }
}

/// One (document, summary) pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Example {
    pub source: String,
    pub target: String,
}

impl Example {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Reads `<root>/{split}.jsonl` (or `.jsonl.gz`), one JSON object per line.
#[derive(Clone, Debug)]
pub struct DatasetProvider {
    root: PathBuf,
    source_column: String,
    target_column: String,
}

impl DatasetProvider {
    pub fn new(root: impl Into<PathBuf>, source_column: &str, target_column: &str) -> Self {
        Self {
            root: root.into(),
            source_column: source_column.to_string(),
            target_column: target_column.to_string(),
        }
    }

    /// `<data_root>/<dataset>/<dataset_version>` with the configured columns.
    pub fn from_config(cfg: &SummarizerConfig) -> Self {
        Self::new(
            cfg.data_root.join(&cfg.dataset).join(&cfg.dataset_version),
            &cfg.data_example_column,
            &cfg.data_summarized_column,
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn columns(&self) -> (&str, &str) {
        (&self.source_column, &self.target_column)
    }

    pub fn split_path(&self, split: Split) -> Result<PathBuf> {
        let plain = self.root.join(format!("{}.jsonl", split.as_str()));
        if plain.exists() {
            return Ok(plain);
        }
        let gz = self.root.join(format!("{}.jsonl.gz", split.as_str()));
        if gz.exists() {
            return Ok(gz);
        }
        anyhow::bail!(
            "No {} split found at {:?} (expected {}.jsonl or {}.jsonl.gz)",
            split.as_str(),
            self.root,
            split.as_str(),
            split.as_str()
        )
    }

    pub fn load_split(&self, split: Split) -> Result<Vec<Example>> {
        let path = self.split_path(split)?;
        let file = File::open(&path).with_context(|| format!("Failed to open {:?}", path))?;
        let reader: Box<dyn BufRead> = if path.extension().is_some_and(|e| e == "gz") {
            Box::new(BufReader::new(GzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        self.parse_lines(reader)
            .with_context(|| format!("Failed to read split {:?}", path))
    }

    pub fn parse_lines<R: BufRead>(&self, reader: R) -> Result<Vec<Example>> {
        let mut examples = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&line)
                .with_context(|| format!("Line {}: invalid JSON", idx + 1))?;
            let column = |name: &str| -> Result<String> {
                value
                    .get(name)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .with_context(|| format!("Line {}: missing string column '{}'", idx + 1, name))
            };
            examples.push(Example {
                source: column(&self.source_column)?,
                target: column(&self.target_column)?,
            });
        }
        Ok(examples)
    }
}
