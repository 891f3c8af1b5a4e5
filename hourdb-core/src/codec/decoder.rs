//! Vector deserialization and decompression

use crate::{DType, SeriesData};
use bytes::Buf;
use flate2::read::ZlibDecoder;
use std::io::Read;

/// Rebuild a vector from its little-endian dump
pub fn deserialize(bytes: &[u8], dtype: DType) -> Result<SeriesData, String> {
    let width = dtype.width();
    if bytes.len() % width != 0 {
        return Err(format!(
            "{} bytes is not a multiple of the {}-byte element width",
            bytes.len(),
            width
        ));
    }

    let n = bytes.len() / width;
    let mut buf = bytes;

    let data = match dtype {
        DType::I8 => SeriesData::I8((0..n).map(|_| buf.get_i8()).collect()),
        DType::U8 => SeriesData::U8(bytes.to_vec()),
        DType::I16 => SeriesData::I16((0..n).map(|_| buf.get_i16_le()).collect()),
        DType::U16 => SeriesData::U16((0..n).map(|_| buf.get_u16_le()).collect()),
        DType::I32 => SeriesData::I32((0..n).map(|_| buf.get_i32_le()).collect()),
        DType::U32 => SeriesData::U32((0..n).map(|_| buf.get_u32_le()).collect()),
        DType::I64 => SeriesData::I64((0..n).map(|_| buf.get_i64_le()).collect()),
        DType::U64 => SeriesData::U64((0..n).map(|_| buf.get_u64_le()).collect()),
        DType::F32 => SeriesData::F32((0..n).map(|_| buf.get_f32_le()).collect()),
        DType::F64 => SeriesData::F64((0..n).map(|_| buf.get_f64_le()).collect()),
    };

    Ok(data)
}

/// Inflate a zlib stream of at most `limit` bytes
///
/// Output past `limit` is not buffered; the stream is rejected instead.
pub fn decompress(blob: &[u8], limit: usize) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(blob)
        .take((limit as u64).saturating_add(1))
        .read_to_end(&mut out)?;

    if out.len() > limit {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("inflates past the expected {} bytes", limit),
        ));
    }
    Ok(out)
}
