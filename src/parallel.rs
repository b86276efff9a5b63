//! Splitting a batch across devices.

use std::ops::Range;

use burn::prelude::*;

/// Partition `len` samples into at most `parts` contiguous slices.
///
/// Each slice holds `len / parts` samples and the last one also takes the
/// remainder. With fewer samples than parts, every sample gets its own slice.
pub fn split_ranges(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1).min(len.max(1));
    let step = len / parts;
    (0..parts)
        .map(|i| {
            let start = i * step;
            let end = if i + 1 == parts { len } else { start + step };
            start..end
        })
        .collect()
}

/// Slice of a batch moved onto its device.
pub struct Shard<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
    pub device: B::Device,
    /// Fraction of the whole batch held by this shard.
    pub weight: f64,
}

pub fn shard<B: Backend>(
    images: Tensor<B, 4>,
    targets: Tensor<B, 1, Int>,
    devices: &[B::Device],
) -> Vec<Shard<B>> {
    let len = targets.dims()[0];
    split_ranges(len, devices.len())
        .into_iter()
        .zip(devices)
        .map(|(range, device)| Shard {
            weight: range.len() as f64 / len.max(1) as f64,
            images: images.clone().slice([range.clone()]).to_device(device),
            targets: targets.clone().slice([range]).to_device(device),
            device: device.clone(),
        })
        .collect()
}
