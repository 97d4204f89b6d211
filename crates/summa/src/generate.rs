//! Generation Adapter - fixed decoding constraints around the model's beam search

use anyhow::Result;
use candle_core::Tensor;
use std::time::Instant;
use summa_engine::{GenerationParams, Seq2SeqModel};

use crate::tokenizer::SpecialIds;

pub const TEST_NUM_BEAMS: usize = 5;
pub const PREDICT_NUM_BEAMS: usize = 3;
pub const NO_REPEAT_NGRAM_SIZE: usize = 3;

#[derive(Clone, Copy, Debug)]
pub struct GenerationAdapter {
    params: GenerationParams,
}

impl GenerationAdapter {
    /// Decoding starts at BOSEQ and stops (and pads) at EOSEQ.
    pub fn new(ids: SpecialIds, num_beams: usize, max_length: usize) -> Self {
        let params = GenerationParams::new(num_beams, ids.boseq, ids.eoseq, max_length)
            .with_pad_token_id(ids.eoseq)
            .with_no_repeat_ngram_size(NO_REPEAT_NGRAM_SIZE)
            .with_cache(true);
        Self { params }
    }

    pub fn for_test(ids: SpecialIds, max_length: usize) -> Self {
        Self::new(ids, TEST_NUM_BEAMS, max_length)
    }

    pub fn for_predict(ids: SpecialIds, max_length: usize) -> Self {
        Self::new(ids, PREDICT_NUM_BEAMS, max_length)
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// One id sequence per source row, plus the wall-clock seconds spent.
    pub fn generate<M: Seq2SeqModel + ?Sized>(
        &self,
        model: &M,
        source_ids: &Tensor,
        source_mask: &Tensor,
    ) -> Result<(Vec<Vec<u32>>, f64)> {
        let start = Instant::now();
        let generated = model.generate(source_ids, source_mask, &self.params)?;
        Ok((generated, start.elapsed().as_secs_f64()))
    }
}
