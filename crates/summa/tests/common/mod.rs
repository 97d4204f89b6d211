#![allow(dead_code)]

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use summa::config::SummarizerConfig;
use summa::data::Example;
use summa::tokenizer::{HfTokenizer, SummaryTokenizer};

const SPECIALS: &[&str] = &["[PAD]", "[UNK]", "[CLS]", "[SEP]", "[unused0]", "[unused1]"];
const WORDS: &[&str] = &[
    "the", "cat", "sat", "on", "mat", "dogs", "run", "ran", "fast", "a", "long", "story", "about",
    "short", ".",
];

pub fn word_level_tokenizer() -> SummaryTokenizer {
    let vocab: serde_json::Map<String, serde_json::Value> = SPECIALS
        .iter()
        .chain(WORDS.iter())
        .enumerate()
        .map(|(i, w)| (w.to_string(), serde_json::json!(i)))
        .collect();
    let added: Vec<serde_json::Value> = SPECIALS[..4]
        .iter()
        .enumerate()
        .map(|(i, t)| {
            serde_json::json!({
                "id": i, "content": t, "single_word": false, "lstrip": false,
                "rstrip": false, "normalized": false, "special": true
            })
        })
        .collect();
    let json = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": added,
        "normalizer": {"type": "Lowercase"},
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": {"type": "BertProcessing", "sep": ["[SEP]", 3], "cls": ["[CLS]", 2]},
        "decoder": null,
        "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]"}
    })
    .to_string();
    let codec = HfTokenizer::from_json(&json).expect("valid tokenizer json");
    SummaryTokenizer::new(Box::new(codec)).expect("markers register")
}

#[derive(Parser)]
struct Harness {
    #[command(flatten)]
    config: SummarizerConfig,
}

/// Tiny CPU configuration rooted at `root`, plus any extra flags.
pub fn tiny_config(root: &Path, extra: &[&str]) -> Result<SummarizerConfig> {
    let root = root.to_string_lossy().to_string();
    let mut argv = vec![
        "summa",
        "--cpu",
        "--batch-size",
        "2",
        "--max-seq-len",
        "12",
        "--hidden-dim",
        "8",
        "--num-layers",
        "1",
        "--num-heads",
        "2",
        "--dataloader-num-workers",
        "0",
        "--default-root-dir",
        root.as_str(),
    ];
    argv.extend_from_slice(extra);
    Ok(Harness::try_parse_from(argv)?.config)
}

pub fn examples() -> Vec<Example> {
    vec![
        Example::new("the cat sat on the mat .", "the cat sat"),
        Example::new("dogs run fast on the mat .", "dogs run"),
        Example::new("a long story about the cat .", "a cat story"),
        Example::new("the dogs ran fast .", "dogs ran"),
        Example::new("a short story about dogs .", "short story"),
        Example::new("the cat ran on a mat .", "cat ran"),
    ]
}

/// Writes `<root>/<split>.jsonl` with `article` / `highlights` columns.
pub fn write_split(root: &Path, split: &str, examples: &[Example]) -> Result<()> {
    std::fs::create_dir_all(root)?;
    let lines: Vec<String> = examples
        .iter()
        .map(|e| serde_json::json!({"article": e.source, "highlights": e.target}).to_string())
        .collect();
    std::fs::write(root.join(format!("{}.jsonl", split)), lines.join("\n"))?;
    Ok(())
}
