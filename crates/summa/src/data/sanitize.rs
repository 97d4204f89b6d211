//! Batch Sanitizer - drops columns that are padding in every row

use candle_core::{Result, Tensor};

/// Indices of columns holding at least one non-pad id.
pub fn kept_columns(rows: &[Vec<u32>], pad_id: u32) -> Vec<u32> {
    let width = rows.first().map(Vec::len).unwrap_or(0);
    (0..width)
        .filter(|&col| rows.iter().any(|row| row[col] != pad_id))
        .map(|col| col as u32)
        .collect()
}

fn select_columns(t: &Tensor, keep: &[u32]) -> Result<Tensor> {
    if keep.is_empty() {
        return t.narrow(1, 0, 0);
    }
    let index = Tensor::new(keep, t.device())?;
    t.index_select(&index, 1)
}

/// Trims `ids` (and the parallel `mask`) to the columns that are not pure padding.
///
/// # Panics
/// Panics when `mask` is given with a different shape than `ids`.
pub fn trim_batch(ids: &Tensor, pad_id: u32, mask: Option<&Tensor>) -> Result<(Tensor, Option<Tensor>)> {
    if let Some(mask) = mask {
        assert_eq!(
            ids.dims(),
            mask.dims(),
            "ids and mask must share a shape"
        );
    }
    let keep = kept_columns(&ids.to_vec2::<u32>()?, pad_id);
    let trimmed = select_columns(ids, &keep)?;
    let mask = mask.map(|m| select_columns(m, &keep)).transpose()?;
    Ok((trimmed, mask))
}
