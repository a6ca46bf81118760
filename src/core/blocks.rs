use crate::types::{BlockBox, ClosureError, ClosureResult};

/// Bytes of one phase sample as held in memory
pub const BYTES_PER_SAMPLE: usize = std::mem::size_of::<f32>();

/// Default memory budget for the phase data of one block
pub const DEFAULT_MEMORY_BUDGET: usize = 100_000_000;

/// Round a positive number to one significant figure, e.g. 347 -> 300, 0.0468 -> 0.05
pub fn round_to_1(x: f64) -> f64 {
    if x == 0.0 || !x.is_finite() {
        return x;
    }
    let scale = 10f64.powi(x.abs().log10().floor() as i32);
    (x / scale).round() * scale
}

/// Split a (num_ifgram, length, width) stack into full-width row strips so that
/// each strip holds about `memory_budget` bytes of phase data.
pub fn split_into_blocks(
    num_ifgram: usize,
    length: usize,
    width: usize,
    memory_budget: usize,
) -> ClosureResult<Vec<BlockBox>> {
    if num_ifgram == 0 || length == 0 || width == 0 {
        return Err(ClosureError::InvalidInput(format!(
            "Cannot split empty stack of size ({}, {}, {})",
            num_ifgram, length, width
        )));
    }
    if memory_budget == 0 {
        return Err(ClosureError::InvalidInput("Memory budget must be positive".to_string()));
    }

    let row_bytes = (num_ifgram * width * BYTES_PER_SAMPLE) as f64;
    let row_step = (round_to_1(memory_budget as f64 / row_bytes) as usize).max(1);
    let num_blocks = (length - 1) / row_step + 1;

    let blocks: Vec<BlockBox> = (0..num_blocks)
        .map(|i| BlockBox::new(0, i * row_step, width, ((i + 1) * row_step).min(length)))
        .collect();

    log::debug!(
        "Split {}x{} raster of {} interferograms into {} blocks of {} rows",
        length,
        width,
        num_ifgram,
        blocks.len(),
        row_step
    );
    Ok(blocks)
}
