use candle_core::{Device, Result, Tensor};
use rand::seq::SliceRandom;
use rand::Rng;

use super::framer::EncodedExample;

/// Stacked Encoded Examples; every tensor is `[rows, width]` u32.
#[derive(Clone, Debug)]
pub struct Batch {
    pub source_ids: Tensor,
    pub source_mask: Tensor,
    pub target_ids: Tensor,
    pub target_mask: Tensor,
}

impl Batch {
    pub fn from_examples(examples: &[&EncodedExample], device: &Device) -> Result<Self> {
        let rows = examples.len();
        let width = examples.first().map(|e| e.width()).unwrap_or(0);
        let stack = |field: fn(&EncodedExample) -> &Vec<u32>| -> Result<Tensor> {
            let mut flat = Vec::with_capacity(rows * width);
            for ex in examples {
                let row = field(ex);
                if row.len() != width {
                    candle_core::bail!("ragged batch: row of width {} in batch of width {}", row.len(), width);
                }
                flat.extend_from_slice(row);
            }
            Tensor::from_vec(flat, (rows, width), device)
        };
        Ok(Self {
            source_ids: stack(|e| &e.source_ids)?,
            source_mask: stack(|e| &e.source_mask)?,
            target_ids: stack(|e| &e.target_ids)?,
            target_mask: stack(|e| &e.target_mask)?,
        })
    }

    pub fn rows(&self) -> usize {
        self.source_ids.dims().first().copied().unwrap_or(0)
    }
}

pub fn num_batches(len: usize, batch_size: usize) -> usize {
    len.div_ceil(batch_size.max(1))
}

/// Yields consecutive batches of `batch_size`; the last one may be smaller.
pub struct BatchIter<'a> {
    examples: &'a [EncodedExample],
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
    limit: usize,
    device: Device,
}

impl<'a> BatchIter<'a> {
    pub fn new(examples: &'a [EncodedExample], batch_size: usize, device: &Device) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            examples,
            order: (0..examples.len()).collect(),
            batch_size,
            cursor: 0,
            limit: num_batches(examples.len(), batch_size),
            device: device.clone(),
        }
    }

    pub fn shuffled<R: Rng>(mut self, rng: &mut R) -> Self {
        self.order.shuffle(rng);
        self
    }

    /// Stops after `max_batches` batches.
    pub fn take_batches(mut self, max_batches: usize) -> Self {
        self.limit = self.limit.min(max_batches);
        self
    }

    pub fn num_batches(&self) -> usize {
        self.limit
    }
}

impl Iterator for BatchIter<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.limit {
            return None;
        }
        let start = self.cursor * self.batch_size;
        let end = (start + self.batch_size).min(self.order.len());
        self.cursor += 1;
        let rows: Vec<&EncodedExample> = self.order[start..end]
            .iter()
            .map(|&i| &self.examples[i])
            .collect();
        Some(Batch::from_examples(&rows, &self.device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn example(v: u32) -> EncodedExample {
        EncodedExample {
            source_ids: vec![v, v, 0],
            source_mask: vec![1, 1, 0],
            target_ids: vec![4, v, 5],
            target_mask: vec![1, 1, 1],
        }
    }

    #[test]
    fn test_last_batch_is_smaller() -> anyhow::Result<()> {
        let examples: Vec<_> = (10..15).map(example).collect();
        let batches: Vec<Batch> = BatchIter::new(&examples, 2, &Device::Cpu).collect::<Result<_>>()?;
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].rows(), 1);
        assert_eq!(batches[0].source_ids.to_vec2::<u32>()?, vec![vec![10, 10, 0], vec![11, 11, 0]]);
        assert_eq!(batches[2].target_ids.to_vec2::<u32>()?, vec![vec![4, 14, 5]]);
        Ok(())
    }

    #[test]
    fn test_shuffle_is_a_permutation() -> anyhow::Result<()> {
        let examples: Vec<_> = (0..20).map(example).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen: Vec<u32> = Vec::new();
        for batch in BatchIter::new(&examples, 6, &Device::Cpu).shuffled(&mut rng) {
            for row in batch?.source_ids.to_vec2::<u32>()? {
                seen.push(row[0]);
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_take_batches_limits_iteration() {
        let examples: Vec<_> = (0..10).map(example).collect();
        let iter = BatchIter::new(&examples, 3, &Device::Cpu).take_batches(2);
        assert_eq!(iter.num_batches(), 2);
        assert_eq!(iter.count(), 2);
    }
}
