//! Tokenizer Codec - text <-> id mapping with summary boundary markers
//!
//! - TokenCodec: the raw codec capability (implemented for HuggingFace tokenizers)
//! - SummaryTokenizer: codec plus the reserved begin/end-of-summary ids

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokenizers::{AddedToken, Tokenizer};
use tracing::info;

/// Reserved vocabulary slots used to frame target summaries.
pub const BOSEQ_TOKEN: &str = "[unused0]";
pub const EOSEQ_TOKEN: &str = "[unused1]";
pub const PAD_TOKEN: &str = "[PAD]";

pub const TOKENIZER_FILE: &str = "tokenizer.json";

pub trait TokenCodec: Send + Sync {
    fn encode_batch(&self, texts: &[String], add_special_tokens: bool) -> Result<Vec<Vec<u32>>>;

    fn decode_batch(&self, ids: &[Vec<u32>], skip_special_tokens: bool) -> Result<Vec<String>>;

    fn token_to_id(&self, token: &str) -> Option<u32>;

    /// Marks `tokens` as special (adding them if unknown) so decoding can skip them.
    fn register_special_tokens(&mut self, tokens: &[&str]) -> Result<()>;

    fn vocab_size(&self) -> usize;

    fn pad_id(&self) -> u32;

    fn save(&self, path: &Path) -> Result<()>;

    /// Serialized definition; equal fingerprints encode text identically.
    fn fingerprint(&self) -> Result<String>;
}

/// [`TokenCodec`] backed by a `tokenizers` JSON definition.
pub struct HfTokenizer(Tokenizer);

impl HfTokenizer {
    pub fn from_json(json: &str) -> Result<Self> {
        let tokenizer = Tokenizer::from_bytes(json.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to parse tokenizer definition: {}", e))?;
        Ok(Self(tokenizer))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
        Ok(Self(tokenizer))
    }

    /// Resolves a local directory, a tokenizer file, or a hub model id.
    pub fn resolve(name_or_path: &str) -> Result<Self> {
        let path = Path::new(name_or_path);
        let file: PathBuf = if path.is_dir() {
            path.join(TOKENIZER_FILE)
        } else if path.is_file() {
            path.to_path_buf()
        } else {
            info!("📥 Fetching tokenizer for '{}' from the hub", name_or_path);
            let api = hf_hub::api::sync::Api::new().context("Failed to create hub client")?;
            api.model(name_or_path.to_string())
                .get(TOKENIZER_FILE)
                .with_context(|| format!("Failed to fetch {} for '{}'", TOKENIZER_FILE, name_or_path))?
        };
        info!("Loading Tokenizer from: {:?}", file);
        Self::from_file(&file)
    }
}

impl TokenCodec for HfTokenizer {
    fn encode_batch(&self, texts: &[String], add_special_tokens: bool) -> Result<Vec<Vec<u32>>> {
        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let encodings = self
            .0
            .encode_batch(inputs, add_special_tokens)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;
        Ok(encodings.into_iter().map(|e| e.get_ids().to_vec()).collect())
    }

    fn decode_batch(&self, ids: &[Vec<u32>], skip_special_tokens: bool) -> Result<Vec<String>> {
        let slices: Vec<&[u32]> = ids.iter().map(Vec::as_slice).collect();
        self.0
            .decode_batch(&slices, skip_special_tokens)
            .map_err(|e| anyhow::anyhow!("Decoding failed: {}", e))
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.0.token_to_id(token)
    }

    fn register_special_tokens(&mut self, tokens: &[&str]) -> Result<()> {
        let added: Vec<AddedToken> = tokens.iter().map(|t| AddedToken::from(*t, true)).collect();
        self.0.add_special_tokens(&added);
        Ok(())
    }

    fn vocab_size(&self) -> usize {
        self.0.get_vocab_size(true)
    }

    fn pad_id(&self) -> u32 {
        self.0
            .get_padding()
            .map(|p| p.pad_id)
            .or_else(|| self.0.token_to_id(PAD_TOKEN))
            .unwrap_or(0)
    }

    fn save(&self, path: &Path) -> Result<()> {
        self.0
            .save(path, false)
            .map_err(|e| anyhow::anyhow!("Failed to save tokenizer to {:?}: {}", path, e))
    }

    fn fingerprint(&self) -> Result<String> {
        self.0
            .to_string(false)
            .map_err(|e| anyhow::anyhow!("Failed to serialize tokenizer: {}", e))
    }
}

/// Ids the framing and generation stages agree on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpecialIds {
    pub boseq: u32,
    pub eoseq: u32,
    pub pad: u32,
}

/// A codec whose begin/end-of-summary markers are registered as special tokens.
pub struct SummaryTokenizer {
    codec: Box<dyn TokenCodec>,
    ids: SpecialIds,
}

impl SummaryTokenizer {
    pub fn new(mut codec: Box<dyn TokenCodec>) -> Result<Self> {
        codec.register_special_tokens(&[BOSEQ_TOKEN, EOSEQ_TOKEN])?;
        let lookup = |token: &str| {
            codec
                .token_to_id(token)
                .with_context(|| format!("Token {} missing after registration", token))
        };
        let ids = SpecialIds {
            boseq: lookup(BOSEQ_TOKEN)?,
            eoseq: lookup(EOSEQ_TOKEN)?,
            pad: codec.pad_id(),
        };
        if ids.boseq == ids.pad || ids.eoseq == ids.pad || ids.boseq == ids.eoseq {
            anyhow::bail!(
                "Summary markers must be distinct from each other and from padding: {:?}",
                ids
            );
        }
        info!(
            "✅ Tokenizer ready. Vocab: {}, BOSEQ: {}, EOSEQ: {}, PAD: {}",
            codec.vocab_size(),
            ids.boseq,
            ids.eoseq,
            ids.pad
        );
        Ok(Self { codec, ids })
    }

    pub fn load(name_or_path: &str) -> Result<Self> {
        Self::new(Box::new(HfTokenizer::resolve(name_or_path)?))
    }

    pub fn ids(&self) -> SpecialIds {
        self.ids
    }

    pub fn codec(&self) -> &dyn TokenCodec {
        self.codec.as_ref()
    }

    pub fn vocab_size(&self) -> usize {
        self.codec.vocab_size()
    }

    /// Decodes without special tokens and strips surrounding whitespace.
    pub fn decode_clean(&self, ids: &[Vec<u32>]) -> Result<Vec<String>> {
        Ok(self
            .codec
            .decode_batch(ids, true)?
            .into_iter()
            .map(|s| s.trim().to_string())
            .collect())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.codec.save(path)
    }

    pub fn fingerprint(&self) -> Result<String> {
        self.codec.fingerprint()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const WORDS: &[&str] = &[
        "the", "cat", "sat", "on", "mat", "dogs", "run", "ran", "fast", "a", "long", "story",
        "about", "short", ".",
    ];

    /// Lowercasing word-level tokenizer with BERT-style specials at ids 0..=5.
    pub(crate) fn word_level_json() -> String {
        let specials = ["[PAD]", "[UNK]", "[CLS]", "[SEP]", "[unused0]", "[unused1]"];
        let vocab: serde_json::Map<String, serde_json::Value> = specials
            .iter()
            .chain(WORDS.iter())
            .enumerate()
            .map(|(i, w)| (w.to_string(), serde_json::json!(i)))
            .collect();
        let added: Vec<serde_json::Value> = specials[..4]
            .iter()
            .enumerate()
            .map(|(i, t)| {
                serde_json::json!({
                    "id": i, "content": t, "single_word": false, "lstrip": false,
                    "rstrip": false, "normalized": false, "special": true
                })
            })
            .collect();
        serde_json::json!({
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
        .to_string()
    }

    pub(crate) fn word_level_tokenizer() -> SummaryTokenizer {
        let codec = HfTokenizer::from_json(&word_level_json()).expect("valid tokenizer json");
        SummaryTokenizer::new(Box::new(codec)).expect("markers register")
    }

    #[test]
    fn test_markers_resolve_to_reserved_slots() {
        let tok = word_level_tokenizer();
        assert_eq!(
            tok.ids(),
            SpecialIds {
                boseq: 4,
                eoseq: 5,
                pad: 0
            }
        );
    }

    #[test]
    fn test_decode_clean_skips_markers() -> Result<()> {
        let tok = word_level_tokenizer();
        let text = tok.decode_clean(&[vec![4, 6, 7, 8, 5, 0, 0]])?;
        assert_eq!(text, vec!["the cat sat".to_string()]);
        Ok(())
    }

    #[test]
    fn test_save_and_reload() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(TOKENIZER_FILE);
        word_level_tokenizer().save(&path)?;
        let reloaded = SummaryTokenizer::load(dir.path().to_str().unwrap_or("."))?;
        assert_eq!(reloaded.ids().eoseq, 5);
        Ok(())
    }
}
