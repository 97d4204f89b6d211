//! Data Module - from raw split files to model-ready batches
//!
//! - dataset: JSON Lines split reader (Example pairs)
//! - framer: Sequence Framer (target markers, padding, masks)
//! - cache: content-addressed encoded-split cache
//! - batch: Batch tensors and batch iteration
//! - sanitize: Batch Sanitizer (all-pad column trimming)

pub mod batch;
pub mod cache;
pub mod dataset;
pub mod framer;
pub mod sanitize;

pub use batch::{Batch, BatchIter};
pub use cache::EncodedSplitCache;
pub use dataset::{DatasetProvider, Example, Split};
pub use framer::{encode_split, EncodedExample, EncodedSplit};
pub use sanitize::trim_batch;
