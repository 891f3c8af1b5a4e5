//! Core types for HourDB

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hour index within a month (0-based)
pub type Hour = usize;

/// Shard identifier within a fragment
pub type ShardId = u32;

/// Element type of a stored vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl DType {
    /// All supported element types
    pub const ALL: [DType; 10] = [
        DType::I8,
        DType::U8,
        DType::I16,
        DType::U16,
        DType::I32,
        DType::U32,
        DType::I64,
        DType::U64,
        DType::F32,
        DType::F64,
    ];

    /// One-character type code stored in the `dtype` column
    pub fn code(self) -> char {
        match self {
            DType::I8 => 'b',
            DType::U8 => 'B',
            DType::I16 => 'h',
            DType::U16 => 'H',
            DType::I32 => 'i',
            DType::U32 => 'I',
            DType::I64 => 'q',
            DType::U64 => 'Q',
            DType::F32 => 'f',
            DType::F64 => 'd',
        }
    }

    /// Parse a type code
    pub fn from_code(code: char) -> Option<Self> {
        DType::ALL.iter().copied().find(|d| d.code() == code)
    }

    /// Element width in bytes
    pub fn width(self) -> usize {
        match self {
            DType::I8 | DType::U8 => 1,
            DType::I16 | DType::U16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 => 8,
        }
    }
}

impl Default for DType {
    fn default() -> Self {
        DType::F32
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A vector of hourly values, tagged by element type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SeriesData {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Apply an expression to the inner vector of every variant
macro_rules! each_variant {
    ($value:expr, $v:ident => $body:expr) => {
        match $value {
            SeriesData::I8($v) => $body,
            SeriesData::U8($v) => $body,
            SeriesData::I16($v) => $body,
            SeriesData::U16($v) => $body,
            SeriesData::I32($v) => $body,
            SeriesData::U32($v) => $body,
            SeriesData::I64($v) => $body,
            SeriesData::U64($v) => $body,
            SeriesData::F32($v) => $body,
            SeriesData::F64($v) => $body,
        }
    };
}

impl SeriesData {
    /// All-zero vector of the given type
    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::I8 => SeriesData::I8(vec![0; len]),
            DType::U8 => SeriesData::U8(vec![0; len]),
            DType::I16 => SeriesData::I16(vec![0; len]),
            DType::U16 => SeriesData::U16(vec![0; len]),
            DType::I32 => SeriesData::I32(vec![0; len]),
            DType::U32 => SeriesData::U32(vec![0; len]),
            DType::I64 => SeriesData::I64(vec![0; len]),
            DType::U64 => SeriesData::U64(vec![0; len]),
            DType::F32 => SeriesData::F32(vec![0.0; len]),
            DType::F64 => SeriesData::F64(vec![0.0; len]),
        }
    }

    /// Element type tag
    pub fn dtype(&self) -> DType {
        match self {
            SeriesData::I8(_) => DType::I8,
            SeriesData::U8(_) => DType::U8,
            SeriesData::I16(_) => DType::I16,
            SeriesData::U16(_) => DType::U16,
            SeriesData::I32(_) => DType::I32,
            SeriesData::U32(_) => DType::U32,
            SeriesData::I64(_) => DType::I64,
            SeriesData::U64(_) => DType::U64,
            SeriesData::F32(_) => DType::F32,
            SeriesData::F64(_) => DType::F64,
        }
    }

    /// Number of hours
    pub fn len(&self) -> usize {
        each_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of absolute values in double precision, skipping NaN
    pub fn total(&self) -> f64 {
        self.iter_f64()
            .filter(|x| !x.is_nan())
            .map(f64::abs)
            .sum()
    }

    /// Value at an hour widened to f64
    pub fn get_f64(&self, hour: Hour) -> Option<f64> {
        each_variant!(self, v => v.get(hour).map(|x| *x as f64))
    }

    /// Iterate over the values widened to f64
    pub fn iter_f64(&self) -> Box<dyn Iterator<Item = f64> + '_> {
        each_variant!(self, v => Box::new(v.iter().map(|x| *x as f64)))
    }

    /// Copy of the values widened to f64
    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.iter_f64().collect()
    }

    /// Append another vector of the same type
    ///
    /// Returns false, leaving `self` unchanged, if the types differ.
    pub fn extend_from(&mut self, other: &SeriesData) -> bool {
        match (self, other) {
            (SeriesData::I8(a), SeriesData::I8(b)) => a.extend_from_slice(b),
            (SeriesData::U8(a), SeriesData::U8(b)) => a.extend_from_slice(b),
            (SeriesData::I16(a), SeriesData::I16(b)) => a.extend_from_slice(b),
            (SeriesData::U16(a), SeriesData::U16(b)) => a.extend_from_slice(b),
            (SeriesData::I32(a), SeriesData::I32(b)) => a.extend_from_slice(b),
            (SeriesData::U32(a), SeriesData::U32(b)) => a.extend_from_slice(b),
            (SeriesData::I64(a), SeriesData::I64(b)) => a.extend_from_slice(b),
            (SeriesData::U64(a), SeriesData::U64(b)) => a.extend_from_slice(b),
            (SeriesData::F32(a), SeriesData::F32(b)) => a.extend_from_slice(b),
            (SeriesData::F64(a), SeriesData::F64(b)) => a.extend_from_slice(b),
            _ => return false,
        }
        true
    }
}

impl From<Vec<f32>> for SeriesData {
    fn from(v: Vec<f32>) -> Self {
        SeriesData::F32(v)
    }
}

impl From<Vec<f64>> for SeriesData {
    fn from(v: Vec<f64>) -> Self {
        SeriesData::F64(v)
    }
}

impl From<Vec<i32>> for SeriesData {
    fn from(v: Vec<i32>) -> Self {
        SeriesData::I32(v)
    }
}

impl From<Vec<u32>> for SeriesData {
    fn from(v: Vec<u32>) -> Self {
        SeriesData::U32(v)
    }
}

/// A named, decoded series
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    /// Full series name (e.g., "en/Cat")
    pub name: String,
    /// Stored total (sum of absolute values)
    pub total: f64,
    /// Hourly values
    pub data: SeriesData,
}
