//! Vector serialization and compression

use crate::{Result, SeriesData};
use bytes::{BufMut, BytesMut};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

/// Dump a vector as little-endian fixed-width elements
pub fn serialize(data: &SeriesData) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(data.len() * data.dtype().width());

    match data {
        SeriesData::I8(v) => v.iter().for_each(|x| buf.put_i8(*x)),
        SeriesData::U8(v) => buf.put_slice(v),
        SeriesData::I16(v) => v.iter().for_each(|x| buf.put_i16_le(*x)),
        SeriesData::U16(v) => v.iter().for_each(|x| buf.put_u16_le(*x)),
        SeriesData::I32(v) => v.iter().for_each(|x| buf.put_i32_le(*x)),
        SeriesData::U32(v) => v.iter().for_each(|x| buf.put_u32_le(*x)),
        SeriesData::I64(v) => v.iter().for_each(|x| buf.put_i64_le(*x)),
        SeriesData::U64(v) => v.iter().for_each(|x| buf.put_u64_le(*x)),
        SeriesData::F32(v) => v.iter().for_each(|x| buf.put_f32_le(*x)),
        SeriesData::F64(v) => v.iter().for_each(|x| buf.put_f64_le(*x)),
    }

    buf.to_vec()
}

/// zlib-compress a raw dump
pub fn compress(raw: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 8), Compression::new(level));
    encoder.write_all(raw)?;
    Ok(encoder.finish()?)
}
