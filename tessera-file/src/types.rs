use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use arrow_schema::{DataType, TimeUnit};
use tessera_error::{TesseraError, TesseraResult, tessera_bail, tessera_err};

/// The logical type of a [`Field`](crate::Field), independent of any in-memory representation.
///
/// Logical types persist in the manifest by their string name (see [`Display`] and
/// [`FromStr`]), so the names below are part of the file format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Date32,
    Date64,
    Timestamp(TimeUnit, Option<Arc<str>>),
    Utf8,
    LargeUtf8,
    Binary,
    LargeBinary,
    /// Integer keys into a per-column dictionary of string or binary values.
    Dictionary {
        key: Box<LogicalType>,
        value: Box<LogicalType>,
    },
    /// A struct whose members are the field's children.
    Struct,
    /// A variable-length list whose single child describes the elements.
    List,
}

impl LogicalType {
    /// Byte width of one value for fixed-width types.
    pub fn fixed_width(&self) -> Option<usize> {
        Some(match self {
            LogicalType::Int8 | LogicalType::UInt8 => 1,
            LogicalType::Int16 | LogicalType::UInt16 => 2,
            LogicalType::Int32 | LogicalType::UInt32 | LogicalType::Float32 => 4,
            LogicalType::Date32 => 4,
            LogicalType::Int64 | LogicalType::UInt64 | LogicalType::Float64 => 8,
            LogicalType::Date64 | LogicalType::Timestamp(..) => 8,
            _ => return None,
        })
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            LogicalType::Int8
                | LogicalType::Int16
                | LogicalType::Int32
                | LogicalType::Int64
                | LogicalType::UInt8
                | LogicalType::UInt16
                | LogicalType::UInt32
                | LogicalType::UInt64
        )
    }

    pub fn is_var_binary(&self) -> bool {
        matches!(
            self,
            LogicalType::Utf8 | LogicalType::LargeUtf8 | LogicalType::Binary | LogicalType::LargeBinary
        )
    }

    pub fn is_nested(&self) -> bool {
        matches!(self, LogicalType::Struct | LogicalType::List)
    }

    /// The Arrow type of a field with this logical type and the given children.
    ///
    /// Nested types are built by [`Field::to_arrow`](crate::Field::to_arrow), which knows the
    /// children; here they fail.
    pub(crate) fn to_arrow_leaf(&self) -> TesseraResult<DataType> {
        Ok(match self {
            LogicalType::Boolean => DataType::Boolean,
            LogicalType::Int8 => DataType::Int8,
            LogicalType::Int16 => DataType::Int16,
            LogicalType::Int32 => DataType::Int32,
            LogicalType::Int64 => DataType::Int64,
            LogicalType::UInt8 => DataType::UInt8,
            LogicalType::UInt16 => DataType::UInt16,
            LogicalType::UInt32 => DataType::UInt32,
            LogicalType::UInt64 => DataType::UInt64,
            LogicalType::Float32 => DataType::Float32,
            LogicalType::Float64 => DataType::Float64,
            LogicalType::Date32 => DataType::Date32,
            LogicalType::Date64 => DataType::Date64,
            LogicalType::Timestamp(unit, tz) => DataType::Timestamp(*unit, tz.clone()),
            LogicalType::Utf8 => DataType::Utf8,
            LogicalType::LargeUtf8 => DataType::LargeUtf8,
            LogicalType::Binary => DataType::Binary,
            LogicalType::LargeBinary => DataType::LargeBinary,
            LogicalType::Dictionary { key, value } => DataType::Dictionary(
                Box::new(key.to_arrow_leaf()?),
                Box::new(value.to_arrow_leaf()?),
            ),
            LogicalType::Struct | LogicalType::List => {
                tessera_bail!("{} is a nested type and has no leaf representation", self)
            }
        })
    }

    /// The logical type of an Arrow type. Nested Arrow types map to [`LogicalType::Struct`] and
    /// [`LogicalType::List`]; their children are converted by the caller.
    pub(crate) fn from_arrow(data_type: &DataType) -> TesseraResult<Self> {
        Ok(match data_type {
            DataType::Boolean => LogicalType::Boolean,
            DataType::Int8 => LogicalType::Int8,
            DataType::Int16 => LogicalType::Int16,
            DataType::Int32 => LogicalType::Int32,
            DataType::Int64 => LogicalType::Int64,
            DataType::UInt8 => LogicalType::UInt8,
            DataType::UInt16 => LogicalType::UInt16,
            DataType::UInt32 => LogicalType::UInt32,
            DataType::UInt64 => LogicalType::UInt64,
            DataType::Float32 => LogicalType::Float32,
            DataType::Float64 => LogicalType::Float64,
            DataType::Date32 => LogicalType::Date32,
            DataType::Date64 => LogicalType::Date64,
            DataType::Timestamp(unit, tz) => LogicalType::Timestamp(*unit, tz.clone()),
            DataType::Utf8 => LogicalType::Utf8,
            DataType::LargeUtf8 => LogicalType::LargeUtf8,
            DataType::Binary => LogicalType::Binary,
            DataType::LargeBinary => LogicalType::LargeBinary,
            DataType::Dictionary(key, value) => {
                let key = LogicalType::from_arrow(key)?;
                let value = LogicalType::from_arrow(value)?;
                if !key.is_integer() || !value.is_var_binary() {
                    tessera_bail!(
                        SchemaMismatch: "unsupported dictionary type {}",
                        data_type
                    );
                }
                LogicalType::Dictionary {
                    key: Box::new(key),
                    value: Box::new(value),
                }
            }
            DataType::Struct(_) => LogicalType::Struct,
            DataType::List(_) => LogicalType::List,
            other => tessera_bail!(SchemaMismatch: "{} has no logical type counterpart", other),
        })
    }
}

fn unit_name(unit: &TimeUnit) -> &'static str {
    match unit {
        TimeUnit::Second => "s",
        TimeUnit::Millisecond => "ms",
        TimeUnit::Microsecond => "us",
        TimeUnit::Nanosecond => "ns",
    }
}

impl Display for LogicalType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicalType::Boolean => write!(f, "bool"),
            LogicalType::Int8 => write!(f, "int8"),
            LogicalType::Int16 => write!(f, "int16"),
            LogicalType::Int32 => write!(f, "int32"),
            LogicalType::Int64 => write!(f, "int64"),
            LogicalType::UInt8 => write!(f, "uint8"),
            LogicalType::UInt16 => write!(f, "uint16"),
            LogicalType::UInt32 => write!(f, "uint32"),
            LogicalType::UInt64 => write!(f, "uint64"),
            LogicalType::Float32 => write!(f, "float32"),
            LogicalType::Float64 => write!(f, "float64"),
            LogicalType::Date32 => write!(f, "date32"),
            LogicalType::Date64 => write!(f, "date64"),
            LogicalType::Timestamp(unit, None) => write!(f, "timestamp:{}", unit_name(unit)),
            LogicalType::Timestamp(unit, Some(tz)) => {
                write!(f, "timestamp:{}:{}", unit_name(unit), tz)
            }
            LogicalType::Utf8 => write!(f, "string"),
            LogicalType::LargeUtf8 => write!(f, "large_string"),
            LogicalType::Binary => write!(f, "binary"),
            LogicalType::LargeBinary => write!(f, "large_binary"),
            LogicalType::Dictionary { key, value } => write!(f, "dict:{key}:{value}"),
            LogicalType::Struct => write!(f, "struct"),
            LogicalType::List => write!(f, "list"),
        }
    }
}

impl FromStr for LogicalType {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bool" => LogicalType::Boolean,
            "int8" => LogicalType::Int8,
            "int16" => LogicalType::Int16,
            "int32" => LogicalType::Int32,
            "int64" => LogicalType::Int64,
            "uint8" => LogicalType::UInt8,
            "uint16" => LogicalType::UInt16,
            "uint32" => LogicalType::UInt32,
            "uint64" => LogicalType::UInt64,
            "float32" => LogicalType::Float32,
            "float64" => LogicalType::Float64,
            "date32" => LogicalType::Date32,
            "date64" => LogicalType::Date64,
            "string" => LogicalType::Utf8,
            "large_string" => LogicalType::LargeUtf8,
            "binary" => LogicalType::Binary,
            "large_binary" => LogicalType::LargeBinary,
            "struct" => LogicalType::Struct,
            "list" => LogicalType::List,
            other => {
                if let Some(rest) = other.strip_prefix("timestamp:") {
                    let (unit, tz) = match rest.split_once(':') {
                        Some((unit, tz)) => (unit, Some(Arc::from(tz))),
                        None => (rest, None),
                    };
                    let unit = match unit {
                        "s" => TimeUnit::Second,
                        "ms" => TimeUnit::Millisecond,
                        "us" => TimeUnit::Microsecond,
                        "ns" => TimeUnit::Nanosecond,
                        _ => tessera_bail!(CorruptFile: "unknown time unit in {}", other),
                    };
                    LogicalType::Timestamp(unit, tz)
                } else if let Some(rest) = other.strip_prefix("dict:") {
                    let (key, value) = rest
                        .split_once(':')
                        .ok_or_else(|| tessera_err!(CorruptFile: "malformed type {}", other))?;
                    LogicalType::Dictionary {
                        key: Box::new(key.parse()?),
                        value: Box::new(value.parse()?),
                    }
                } else {
                    tessera_bail!(CorruptFile: "unknown logical type {}", other)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(LogicalType::Int64, "int64")]
    #[case(LogicalType::Utf8, "string")]
    #[case(LogicalType::Timestamp(TimeUnit::Microsecond, None), "timestamp:us")]
    #[case(LogicalType::Timestamp(TimeUnit::Second, Some("+08:00".into())), "timestamp:s:+08:00")]
    #[case(
        LogicalType::Dictionary { key: Box::new(LogicalType::Int16), value: Box::new(LogicalType::Utf8) },
        "dict:int16:string"
    )]
    fn persisted_names(#[case] logical: LogicalType, #[case] name: &str) {
        assert_eq!(logical.to_string(), name);
        assert_eq!(name.parse::<LogicalType>().unwrap(), logical);
    }

    #[test]
    fn unknown_name_is_corrupt() {
        assert!(matches!(
            "decimal128".parse::<LogicalType>(),
            Err(TesseraError::CorruptFile(..))
        ));
    }

    #[test]
    fn unsupported_arrow_types() {
        assert!(matches!(
            LogicalType::from_arrow(&DataType::Float16),
            Err(TesseraError::SchemaMismatch(..))
        ));
        assert!(matches!(
            LogicalType::from_arrow(&DataType::Dictionary(
                Box::new(DataType::Int32),
                Box::new(DataType::Int64)
            )),
            Err(TesseraError::SchemaMismatch(..))
        ));
    }
}
