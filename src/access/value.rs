use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-width physical representation of a column cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageType {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl StorageType {
    /// Size of one cell in bytes
    pub fn byte_size(&self) -> usize {
        match self {
            StorageType::Boolean | StorageType::Int8 => 1,
            StorageType::Int16 => 2,
            StorageType::Int32 | StorageType::Float32 => 4,
            StorageType::Int64 | StorageType::Float64 => 8,
        }
    }

    pub fn bits(&self) -> u32 {
        self.byte_size() as u32 * 8
    }

    pub fn is_float(&self) -> bool {
        matches!(self, StorageType::Float32 | StorageType::Float64)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            StorageType::Int8 | StorageType::Int16 | StorageType::Int32 | StorageType::Int64
        )
    }
}

/// Column kinds known to the storage layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Dictionary-encoded string, stored as a 32-bit key
    Symbol,
    /// Fixed-precision geohash; storage width follows the precision
    GeoHash { bits: u8 },
    Varchar,
    Binary,
    Long256,
    Array,
}

/// Maximum geohash precision in bits
pub const GEOHASH_MAX_BITS: u8 = 60;

/// Null marker for geohash columns of every width
pub const GEOHASH_NULL: i64 = -1;

impl DataType {
    /// Physical storage of this kind, `None` for variable-length kinds
    pub fn storage(&self) -> Option<StorageType> {
        match self {
            DataType::Boolean => Some(StorageType::Boolean),
            DataType::Int8 => Some(StorageType::Int8),
            DataType::Int16 => Some(StorageType::Int16),
            DataType::Int32 | DataType::Symbol => Some(StorageType::Int32),
            DataType::Int64 => Some(StorageType::Int64),
            DataType::Float32 => Some(StorageType::Float32),
            DataType::Float64 => Some(StorageType::Float64),
            DataType::GeoHash { bits } => match bits {
                1..=7 => Some(StorageType::Int8),
                8..=15 => Some(StorageType::Int16),
                16..=31 => Some(StorageType::Int32),
                32..=GEOHASH_MAX_BITS => Some(StorageType::Int64),
                _ => None,
            },
            DataType::Varchar | DataType::Binary | DataType::Long256 | DataType::Array => None,
        }
    }

    /// Whether this kind takes part in numeric promotion
    pub fn is_numeric(&self) -> bool {
        self.numeric_rank().is_some()
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// Position on the promotion ladder int8 < int16 < int32 < int64 < float32 < float64
    pub fn numeric_rank(&self) -> Option<u8> {
        match self {
            DataType::Int8 => Some(0),
            DataType::Int16 => Some(1),
            DataType::Int32 => Some(2),
            DataType::Int64 => Some(3),
            DataType::Float32 => Some(4),
            DataType::Float64 => Some(5),
            _ => None,
        }
    }

    /// Least common kind of two numeric kinds on the promotion ladder
    pub fn promote(left: DataType, right: DataType) -> Option<DataType> {
        let left_rank = left.numeric_rank()?;
        let right_rank = right.numeric_rank()?;
        if left_rank >= right_rank {
            Some(left)
        } else {
            Some(right)
        }
    }

    /// In-band null value for integer-stored kinds.
    ///
    /// Floats use NaN and booleans are never null, so both return `None`.
    pub fn null_sentinel(&self) -> Option<i64> {
        match self {
            DataType::Int8 => Some(i8::MIN as i64),
            DataType::Int16 => Some(i16::MIN as i64),
            DataType::Int32 | DataType::Symbol => Some(i32::MIN as i64),
            DataType::Int64 => Some(i64::MIN),
            DataType::GeoHash { .. } => Some(GEOHASH_NULL),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => write!(f, "BOOLEAN"),
            DataType::Int8 => write!(f, "BYTE"),
            DataType::Int16 => write!(f, "SHORT"),
            DataType::Int32 => write!(f, "INT"),
            DataType::Int64 => write!(f, "LONG"),
            DataType::Float32 => write!(f, "FLOAT"),
            DataType::Float64 => write!(f, "DOUBLE"),
            DataType::Symbol => write!(f, "SYMBOL"),
            DataType::GeoHash { bits } => write!(f, "GEOHASH({}b)", bits),
            DataType::Varchar => write!(f, "VARCHAR"),
            DataType::Binary => write!(f, "BINARY"),
            DataType::Long256 => write!(f, "LONG256"),
            DataType::Array => write!(f, "ARRAY"),
        }
    }
}

/// Typed literal values produced by the planner
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    /// String literal; only meaningful against symbol columns
    String(String),
    GeoHash { bits: u8, value: i64 },
}

impl Value {
    /// Get the data type of this value
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Int8(_) => Some(DataType::Int8),
            Value::Int16(_) => Some(DataType::Int16),
            Value::Int32(_) => Some(DataType::Int32),
            Value::Int64(_) => Some(DataType::Int64),
            Value::Float32(_) => Some(DataType::Float32),
            Value::Float64(_) => Some(DataType::Float64),
            Value::String(_) => Some(DataType::Varchar),
            Value::GeoHash { bits, .. } => Some(DataType::GeoHash { bits: *bits }),
        }
    }

    /// Convert a fixed-width literal into its stored cell representation
    pub fn to_datum(&self) -> Option<Datum> {
        match self {
            Value::Boolean(b) => Some(Datum::Boolean(*b)),
            Value::Int8(v) => Some(Datum::Int8(*v)),
            Value::Int16(v) => Some(Datum::Int16(*v)),
            Value::Int32(v) => Some(Datum::Int32(*v)),
            Value::Int64(v) => Some(Datum::Int64(*v)),
            Value::Float32(v) => Some(Datum::Float32(*v)),
            Value::Float64(v) => Some(Datum::Float64(*v)),
            Value::GeoHash { bits, value } => {
                let storage = DataType::GeoHash { bits: *bits }.storage()?;
                Some(Datum::from_i64(storage, *value))
            }
            Value::Null | Value::String(_) => None,
        }
    }
}

/// A single decoded cell.
///
/// There is no null variant: nulls travel as the kind's sentinel bit pattern
/// (or NaN), exactly as they are stored in column memory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
}

impl Datum {
    pub fn storage_type(&self) -> StorageType {
        match self {
            Datum::Boolean(_) => StorageType::Boolean,
            Datum::Int8(_) => StorageType::Int8,
            Datum::Int16(_) => StorageType::Int16,
            Datum::Int32(_) => StorageType::Int32,
            Datum::Int64(_) => StorageType::Int64,
            Datum::Float32(_) => StorageType::Float32,
            Datum::Float64(_) => StorageType::Float64,
        }
    }

    /// Build a datum of the given storage from an integer, truncating to its width
    pub fn from_i64(storage: StorageType, value: i64) -> Self {
        match storage {
            StorageType::Boolean => Datum::Boolean(value != 0),
            StorageType::Int8 => Datum::Int8(value as i8),
            StorageType::Int16 => Datum::Int16(value as i16),
            StorageType::Int32 => Datum::Int32(value as i32),
            StorageType::Int64 => Datum::Int64(value),
            StorageType::Float32 => Datum::Float32(value as f32),
            StorageType::Float64 => Datum::Float64(value as f64),
        }
    }

    /// Sign-extended integer value of an integer cell
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int8(v) => Some(*v as i64),
            Datum::Int16(v) => Some(*v as i64),
            Datum::Int32(v) => Some(*v as i64),
            Datum::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Float32(v) => Some(*v as f64),
            Datum::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// The null representation of a kind, `None` for kinds that cannot be null
    pub fn null_of(data_type: DataType) -> Option<Self> {
        match data_type {
            DataType::Float32 => Some(Datum::Float32(f32::NAN)),
            DataType::Float64 => Some(Datum::Float64(f64::NAN)),
            _ => {
                let sentinel = data_type.null_sentinel()?;
                Some(Datum::from_i64(data_type.storage()?, sentinel))
            }
        }
    }

    /// Whether this cell holds the null representation of `data_type`
    pub fn is_null_of(&self, data_type: DataType) -> bool {
        match self {
            Datum::Float32(v) => v.is_nan(),
            Datum::Float64(v) => v.is_nan(),
            Datum::Boolean(_) => false,
            _ => match (self.as_i64(), data_type.null_sentinel()) {
                (Some(value), Some(sentinel)) => value == sentinel,
                _ => false,
            },
        }
    }
}
