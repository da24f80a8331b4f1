//! Cache payload encoding: entry JSON, zlib compressed.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::document::Entry;
use crate::error::{BmrbError, Result};

pub fn compress_entry(entry: &Entry) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(entry)?;
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(json.len() / 4), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

/// Inflates a cached payload back to its JSON text.
pub fn decompress_json(payload: &[u8]) -> Result<String> {
    let mut json = String::new();
    ZlibDecoder::new(payload)
        .read_to_string(&mut json)
        .map_err(|e| BmrbError::Codec(format!("corrupt cache payload: {e}")))?;
    Ok(json)
}

pub fn decompress_entry(payload: &[u8]) -> Result<Entry> {
    let json = decompress_json(payload)?;
    Ok(serde_json::from_str(&json)?)
}
