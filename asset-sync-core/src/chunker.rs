//! Splits asset content into bounded, ordered slices.

use std::num::NonZeroUsize;

use bytes::Bytes;

/// Default chunk size: 512 KiB, below the store's per-call payload ceiling.
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

/// Default number of chunks uploaded per `create_chunks` call.
pub const MAX_CHUNKS_PER_BATCH: usize = 5;

/// Split `content` into consecutive slices of `chunk_size` bytes; the last may be shorter.
///
/// The slices share `content`'s allocation. Empty input yields no slices.
pub fn chunk(content: &Bytes, chunk_size: NonZeroUsize) -> Vec<Bytes> {
    let size = chunk_size.get();
    (0..content.len())
        .step_by(size)
        .map(|start| content.slice(start..(start + size).min(content.len())))
        .collect()
}

/// Group chunks for upload, at most `group_size` per group, preserving order.
pub fn group(chunks: &[Bytes], group_size: NonZeroUsize) -> Vec<Vec<Bytes>> {
    chunks
        .chunks(group_size.get())
        .map(<[Bytes]>::to_vec)
        .collect()
}
