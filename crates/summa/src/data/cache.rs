//! Encoded-split cache
//!
//! Layout of `<dir>/<sha256>.u32` (little-endian u32 words):
//! `width, count, then count x [source_ids, source_mask, target_ids, target_mask]`.

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::dataset::Example;
use super::framer::{encode_split, EncodedExample, EncodedSplit};
use crate::tokenizer::{SpecialIds, SummaryTokenizer};

pub struct EncodedSplitCache {
    dir: PathBuf,
}

impl EncodedSplitCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Hash over everything that determines the encoded output.
    pub fn key(
        examples: &[Example],
        columns: (&str, &str),
        tokenizer_fingerprint: &str,
        ids: SpecialIds,
        width: usize,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(columns.0.as_bytes());
        hasher.update([0u8]);
        hasher.update(columns.1.as_bytes());
        hasher.update([0u8]);
        hasher.update((tokenizer_fingerprint.len() as u64).to_le_bytes());
        hasher.update(tokenizer_fingerprint.as_bytes());
        for v in [ids.boseq, ids.eoseq, ids.pad, width as u32] {
            hasher.update(v.to_le_bytes());
        }
        for ex in examples {
            hasher.update((ex.source.len() as u64).to_le_bytes());
            hasher.update(ex.source.as_bytes());
            hasher.update((ex.target.len() as u64).to_le_bytes());
            hasher.update(ex.target.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.u32", key))
    }

    pub fn load(&self, key: &str) -> Result<Option<EncodedSplit>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(&path).with_context(|| format!("Failed to open {:?}", path))?;
        read_split(&mut BufReader::new(file))
            .map(Some)
            .with_context(|| format!("Corrupt cache file {:?}", path))
    }

    pub fn store(&self, key: &str, split: &EncodedSplit) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("u32.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            write_split(&mut writer, split)?;
            writer.flush()?;
        }
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Returns the cached encoding of `examples`, encoding and storing it on a miss.
    pub fn load_or_encode(
        &self,
        tokenizer: &SummaryTokenizer,
        examples: &[Example],
        columns: (&str, &str),
        width: usize,
        num_workers: usize,
    ) -> Result<EncodedSplit> {
        let key = Self::key(examples, columns, &tokenizer.fingerprint()?, tokenizer.ids(), width);
        match self.load(&key) {
            Ok(Some(split)) => {
                info!("📂 Encoded split cache hit: {}", key);
                return Ok(split);
            }
            Ok(None) => {}
            Err(e) => warn!("⚠️ Ignoring unreadable cache entry: {:#}", e),
        }
        info!("Encoding {} examples (workers: {})", examples.len(), num_workers);
        let split = encode_split(tokenizer, examples, width, num_workers)?;
        let path = self.store(&key, &split)?;
        info!("✅ Encoded split cached at {:?}", path);
        Ok(split)
    }
}

fn write_split<W: Write>(writer: &mut W, split: &EncodedSplit) -> Result<()> {
    writer.write_u32::<LittleEndian>(split.width as u32)?;
    writer.write_u32::<LittleEndian>(split.examples.len() as u32)?;
    for ex in &split.examples {
        for row in [&ex.source_ids, &ex.source_mask, &ex.target_ids, &ex.target_mask] {
            if row.len() != split.width {
                anyhow::bail!("Row of width {} in split of width {}", row.len(), split.width);
            }
            for &v in row.iter() {
                writer.write_u32::<LittleEndian>(v)?;
            }
        }
    }
    Ok(())
}

fn read_split<R: ReadBytesExt>(reader: &mut R) -> Result<EncodedSplit> {
    let width = reader.read_u32::<LittleEndian>()? as usize;
    let count = reader.read_u32::<LittleEndian>()? as usize;
    let read_row = |reader: &mut R| -> Result<Vec<u32>> {
        let mut row = vec![0u32; width];
        reader.read_u32_into::<LittleEndian>(&mut row)?;
        Ok(row)
    };
    let mut examples = Vec::with_capacity(count);
    for _ in 0..count {
        examples.push(EncodedExample {
            source_ids: read_row(reader)?,
            source_mask: read_row(reader)?,
            target_ids: read_row(reader)?,
            target_mask: read_row(reader)?,
        });
    }
    Ok(EncodedSplit { width, examples })
}

pub fn default_cache_dir(root: &Path) -> PathBuf {
    root.join(".cache")
}
