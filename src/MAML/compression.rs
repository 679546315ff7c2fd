// Optional lz4 payload compression (size-prepended block format).

use super::error::{Error, Result};
use super::message::Message;
use super::stats::MessageStats;
use std::time::Instant;

pub(crate) fn compress(message: &mut Message, stats: Option<&MessageStats>) -> Result<()> {
    let start = Instant::now();
    let original = message.size();
    let compressed = lz4_flex::compress_prepend_size(message.data());
    let compressed_len = compressed.len();
    message.replace_payload(compressed)?;

    if let Some(stats) = stats {
        stats.record_compress(start.elapsed(), compressed_len, original);
    }
    Ok(())
}

pub(crate) fn decompress(message: &mut Message, stats: Option<&MessageStats>) -> Result<()> {
    let start = Instant::now();
    let compressed_len = message.size();
    let original = lz4_flex::decompress_size_prepended(message.data())
        .map_err(|e| Error::Decompress(e.to_string()))?;
    let original_len = original.len();
    message.replace_payload(original)?;

    if let Some(stats) = stats {
        stats.record_decompress(start.elapsed(), compressed_len, original_len);
    }
    Ok(())
}
