use std::fmt::Display;
use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Datum, Float32Array, Float64Array, Int8Array,
    Int16Array, Int32Array, Int64Array, Scalar, StringArray, UInt8Array, UInt16Array,
    UInt32Array, UInt64Array,
};
use arrow_schema::DataType;
use arrow_select::take::take;
use tessera_error::TesseraResult;

/// A single typed value used as an expression literal.
#[derive(Debug, Clone)]
pub enum ScalarValue {
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Utf8(String),
    Binary(Vec<u8>),
}

impl ScalarValue {
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Boolean(_) => DataType::Boolean,
            ScalarValue::Int8(_) => DataType::Int8,
            ScalarValue::Int16(_) => DataType::Int16,
            ScalarValue::Int32(_) => DataType::Int32,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::UInt8(_) => DataType::UInt8,
            ScalarValue::UInt16(_) => DataType::UInt16,
            ScalarValue::UInt32(_) => DataType::UInt32,
            ScalarValue::UInt64(_) => DataType::UInt64,
            ScalarValue::Float32(_) => DataType::Float32,
            ScalarValue::Float64(_) => DataType::Float64,
            ScalarValue::Utf8(_) => DataType::Utf8,
            ScalarValue::Binary(_) => DataType::Binary,
        }
    }

    /// A one-element array holding this value.
    pub fn to_array(&self) -> ArrayRef {
        match self {
            ScalarValue::Boolean(v) => Arc::new(BooleanArray::from(vec![*v])),
            ScalarValue::Int8(v) => Arc::new(Int8Array::from(vec![*v])),
            ScalarValue::Int16(v) => Arc::new(Int16Array::from(vec![*v])),
            ScalarValue::Int32(v) => Arc::new(Int32Array::from(vec![*v])),
            ScalarValue::Int64(v) => Arc::new(Int64Array::from(vec![*v])),
            ScalarValue::UInt8(v) => Arc::new(UInt8Array::from(vec![*v])),
            ScalarValue::UInt16(v) => Arc::new(UInt16Array::from(vec![*v])),
            ScalarValue::UInt32(v) => Arc::new(UInt32Array::from(vec![*v])),
            ScalarValue::UInt64(v) => Arc::new(UInt64Array::from(vec![*v])),
            ScalarValue::Float32(v) => Arc::new(Float32Array::from(vec![*v])),
            ScalarValue::Float64(v) => Arc::new(Float64Array::from(vec![*v])),
            ScalarValue::Utf8(v) => Arc::new(StringArray::from(vec![v.as_str()])),
            ScalarValue::Binary(v) => Arc::new(BinaryArray::from(vec![v.as_slice()])),
        }
    }

    pub fn to_scalar(&self) -> Scalar<ArrayRef> {
        Scalar::new(self.to_array())
    }
}

// Floats compare by bit pattern.
impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScalarValue::Float32(a), ScalarValue::Float32(b)) => a.to_bits() == b.to_bits(),
            (ScalarValue::Float64(a), ScalarValue::Float64(b)) => a.to_bits() == b.to_bits(),
            (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => a == b,
            (ScalarValue::Int8(a), ScalarValue::Int8(b)) => a == b,
            (ScalarValue::Int16(a), ScalarValue::Int16(b)) => a == b,
            (ScalarValue::Int32(a), ScalarValue::Int32(b)) => a == b,
            (ScalarValue::Int64(a), ScalarValue::Int64(b)) => a == b,
            (ScalarValue::UInt8(a), ScalarValue::UInt8(b)) => a == b,
            (ScalarValue::UInt16(a), ScalarValue::UInt16(b)) => a == b,
            (ScalarValue::UInt32(a), ScalarValue::UInt32(b)) => a == b,
            (ScalarValue::UInt64(a), ScalarValue::UInt64(b)) => a == b,
            (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) => a == b,
            (ScalarValue::Binary(a), ScalarValue::Binary(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarValue::Boolean(v) => write!(f, "{v}"),
            ScalarValue::Int8(v) => write!(f, "{v}i8"),
            ScalarValue::Int16(v) => write!(f, "{v}i16"),
            ScalarValue::Int32(v) => write!(f, "{v}i32"),
            ScalarValue::Int64(v) => write!(f, "{v}i64"),
            ScalarValue::UInt8(v) => write!(f, "{v}u8"),
            ScalarValue::UInt16(v) => write!(f, "{v}u16"),
            ScalarValue::UInt32(v) => write!(f, "{v}u32"),
            ScalarValue::UInt64(v) => write!(f, "{v}u64"),
            ScalarValue::Float32(v) => write!(f, "{v}f32"),
            ScalarValue::Float64(v) => write!(f, "{v}f64"),
            ScalarValue::Utf8(v) => write!(f, "\"{v}\""),
            ScalarValue::Binary(v) => write!(f, "{} bytes", v.len()),
        }
    }
}

macro_rules! scalar_from {
    ($T:ty, $variant:ident) => {
        impl From<$T> for ScalarValue {
            fn from(value: $T) -> Self {
                ScalarValue::$variant(value)
            }
        }
    };
}

scalar_from!(bool, Boolean);
scalar_from!(i8, Int8);
scalar_from!(i16, Int16);
scalar_from!(i32, Int32);
scalar_from!(i64, Int64);
scalar_from!(u8, UInt8);
scalar_from!(u16, UInt16);
scalar_from!(u32, UInt32);
scalar_from!(u64, UInt64);
scalar_from!(f32, Float32);
scalar_from!(f64, Float64);
scalar_from!(String, Utf8);
scalar_from!(Vec<u8>, Binary);

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Utf8(value.to_string())
    }
}

impl From<&[u8]> for ScalarValue {
    fn from(value: &[u8]) -> Self {
        ScalarValue::Binary(value.to_vec())
    }
}

/// The result of evaluating an expression: either one value per row, or a single value that
/// applies to every row.
#[derive(Debug, Clone)]
pub enum ColumnarValue {
    Array(ArrayRef),
    Scalar(Scalar<ArrayRef>),
}

impl ColumnarValue {
    /// Materialize the value as an array of `num_rows` elements.
    pub fn into_array(self, num_rows: usize) -> TesseraResult<ArrayRef> {
        match self {
            ColumnarValue::Array(array) => Ok(array),
            ColumnarValue::Scalar(scalar) => {
                let (inner, _) = scalar.get();
                let indices = UInt64Array::from(vec![0u64; num_rows]);
                Ok(take(inner, &indices, None)?)
            }
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, ColumnarValue::Scalar(_))
    }
}

impl Datum for ColumnarValue {
    fn get(&self) -> (&dyn Array, bool) {
        match self {
            ColumnarValue::Array(array) => (array.as_ref(), false),
            ColumnarValue::Scalar(scalar) => scalar.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use arrow_array::cast::AsArray;
    use arrow_array::types::Int64Type;

    use super::*;

    #[test]
    fn scalar_broadcast() {
        let value = ColumnarValue::Scalar(ScalarValue::from(7i64).to_scalar());
        let array = value.into_array(3).unwrap();
        assert_eq!(array.len(), 3);
        assert_eq!(
            array.as_primitive::<Int64Type>().values().to_vec(),
            vec![7, 7, 7]
        );
    }

    #[test]
    fn float_equality_is_bitwise() {
        assert_eq!(ScalarValue::from(f64::NAN), ScalarValue::from(f64::NAN));
        assert_ne!(ScalarValue::from(1i32), ScalarValue::from(1i64));
    }

    #[test]
    fn display() {
        assert_eq!(ScalarValue::from(2i64).to_string(), "2i64");
        assert_eq!(ScalarValue::from("carol").to_string(), "\"carol\"");
    }
}
