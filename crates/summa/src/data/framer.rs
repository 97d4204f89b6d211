//! Sequence Framer - fixed-width ids and masks for sources and targets

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use super::dataset::Example;
use crate::tokenizer::{SpecialIds, SummaryTokenizer};

const ENCODE_CHUNK: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedExample {
    pub source_ids: Vec<u32>,
    pub source_mask: Vec<u32>,
    pub target_ids: Vec<u32>,
    pub target_mask: Vec<u32>,
}

impl EncodedExample {
    pub fn width(&self) -> usize {
        self.source_ids.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedSplit {
    pub width: usize,
    pub examples: Vec<EncodedExample>,
}

impl EncodedSplit {
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

fn ensure_width(width: usize) -> Result<()> {
    if width < 2 {
        anyhow::bail!("Sequence width {} cannot hold the summary markers", width);
    }
    Ok(())
}

/// Right-pads `ids` with `pad_id` (mask 0) after truncating to `width`.
pub fn pad_to_width(ids: &[u32], pad_id: u32, width: usize) -> (Vec<u32>, Vec<u32>) {
    let len = ids.len().min(width);
    let mut padded = Vec::with_capacity(width);
    padded.extend_from_slice(&ids[..len]);
    padded.resize(width, pad_id);
    let mut mask = vec![1u32; len];
    mask.resize(width, 0);
    (padded, mask)
}

/// `[BOSEQ] body[..width - 2] [EOSEQ]`, right-padded to `width`.
///
/// EOSEQ is appended even when truncation cut the body short.
pub fn frame_target(body: &[u32], ids: SpecialIds, width: usize) -> (Vec<u32>, Vec<u32>) {
    let keep = body.len().min(width.saturating_sub(2));
    let mut framed = Vec::with_capacity(keep + 2);
    framed.push(ids.boseq);
    framed.extend_from_slice(&body[..keep]);
    framed.push(ids.eoseq);
    pad_to_width(&framed, ids.pad, width)
}

pub fn frame_targets(
    tokenizer: &SummaryTokenizer,
    texts: &[String],
    width: usize,
) -> Result<Vec<(Vec<u32>, Vec<u32>)>> {
    ensure_width(width)?;
    let ids = tokenizer.ids();
    Ok(tokenizer
        .codec()
        .encode_batch(texts, false)?
        .iter()
        .map(|body| frame_target(body, ids, width))
        .collect())
}

/// Sources keep the codec's own special tokens and are truncated to `width`.
pub fn encode_sources(
    tokenizer: &SummaryTokenizer,
    texts: &[String],
    width: usize,
) -> Result<Vec<(Vec<u32>, Vec<u32>)>> {
    let pad = tokenizer.ids().pad;
    Ok(tokenizer
        .codec()
        .encode_batch(texts, true)?
        .iter()
        .map(|ids| pad_to_width(ids, pad, width))
        .collect())
}

pub fn encode_examples(
    tokenizer: &SummaryTokenizer,
    examples: &[Example],
    width: usize,
) -> Result<Vec<EncodedExample>> {
    let sources: Vec<String> = examples.iter().map(|e| e.source.clone()).collect();
    let targets: Vec<String> = examples.iter().map(|e| e.target.clone()).collect();
    let sources = encode_sources(tokenizer, &sources, width)?;
    let targets = frame_targets(tokenizer, &targets, width)?;
    Ok(sources
        .into_iter()
        .zip(targets)
        .map(|((source_ids, source_mask), (target_ids, target_mask))| EncodedExample {
            source_ids,
            source_mask,
            target_ids,
            target_mask,
        })
        .collect())
}

/// Encodes a whole split, chunked over `num_workers` threads (0 = current thread).
/// Example order is preserved.
pub fn encode_split(
    tokenizer: &SummaryTokenizer,
    examples: &[Example],
    width: usize,
    num_workers: usize,
) -> Result<EncodedSplit> {
    ensure_width(width)?;

    let pb = ProgressBar::new(examples.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} examples ({eta})")?
            .progress_chars("#>-"),
    );

    let encode_chunk = |chunk: &[Example]| -> Result<Vec<EncodedExample>> {
        let encoded = encode_examples(tokenizer, chunk, width)?;
        pb.inc(chunk.len() as u64);
        Ok(encoded)
    };

    let chunks: Vec<Vec<EncodedExample>> = if num_workers == 0 {
        examples
            .chunks(ENCODE_CHUNK)
            .map(&encode_chunk)
            .collect::<Result<Vec<_>>>()?
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .build()?;
        pool.install(|| {
            examples
                .par_chunks(ENCODE_CHUNK)
                .map(&encode_chunk)
                .collect::<Result<Vec<_>>>()
        })?
    };
    pb.finish_and_clear();

    Ok(EncodedSplit {
        width,
        examples: chunks.into_iter().flatten().collect(),
    })
}
