//! Layout of `TF_STRING` tensor buffers
//!
//! A string tensor of `n` elements is stored as `n` little-endian `u64`
//! offsets followed by the runtime-encoded element bodies. Offsets are
//! relative to the start of the body section. The bodies themselves are
//! produced and parsed by the runtime (`TF_StringEncode` /
//! `TF_StringDecode`); this module only handles the offset table.

use crate::error::{Result, TfError};

/// Width of one offset table entry
pub(crate) const OFFSET_WIDTH: usize = 8;

/// Total buffer size for bodies of the given encoded sizes
pub(crate) fn buffer_len(encoded_sizes: &[usize]) -> usize {
    encoded_sizes.len() * OFFSET_WIDTH + encoded_sizes.iter().sum::<usize>()
}

/// Write the offset table into the front of `buffer`.
///
/// Returns the byte range each body occupies in `buffer`.
pub(crate) fn write_offsets(
    buffer: &mut [u8],
    encoded_sizes: &[usize],
) -> Vec<std::ops::Range<usize>> {
    let header = encoded_sizes.len() * OFFSET_WIDTH;
    let mut ranges = Vec::with_capacity(encoded_sizes.len());
    let mut offset = 0usize;
    for (i, size) in encoded_sizes.iter().enumerate() {
        let slot = &mut buffer[i * OFFSET_WIDTH..(i + 1) * OFFSET_WIDTH];
        slot.copy_from_slice(&(offset as u64).to_le_bytes());
        ranges.push(header + offset..header + offset + size);
        offset += size;
    }
    ranges
}

/// Split a string tensor buffer of `count` elements into encoded bodies
pub(crate) fn split_bodies(buffer: &[u8], count: usize) -> Result<Vec<&[u8]>> {
    let header = count
        .checked_mul(OFFSET_WIDTH)
        .filter(|h| *h <= buffer.len())
        .ok_or_else(|| {
            TfError::InvalidString(format!(
                "buffer of {} bytes cannot hold {} offsets",
                buffer.len(),
                count
            ))
        })?;
    let data = &buffer[header..];

    let offsets: Vec<usize> = buffer[..header]
        .chunks_exact(OFFSET_WIDTH)
        .map(|chunk| {
            let mut raw = [0u8; OFFSET_WIDTH];
            raw.copy_from_slice(chunk);
            u64::from_le_bytes(raw) as usize
        })
        .collect();

    let mut bodies = Vec::with_capacity(count);
    for (i, &start) in offsets.iter().enumerate() {
        let end = offsets.get(i + 1).copied().unwrap_or(data.len());
        if start > end || end > data.len() {
            return Err(TfError::InvalidString(format!(
                "element {} spans {}..{} outside {} data bytes",
                i,
                start,
                end,
                data.len()
            )));
        }
        bodies.push(&data[start..end]);
    }
    Ok(bodies)
}
