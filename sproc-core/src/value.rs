//! Semantic data types and values for stored-procedure parameters and result columns.
//!
//! [`SqlType`] mirrors the parameter type system of the target database; [`SqlValue`]
//! carries a typed value. Rust types convert into values with `From`, and back out
//! with [`FromSqlValue`].
//!
//! ```rust
//! use sproc_core::{FromSqlValue, SqlType, SqlValue};
//!
//! let value: SqlValue = 42i32.into();
//! assert!(value.is_compatible_with(SqlType::BigInt));
//! assert_eq!(i64::from_sql_value(&value).unwrap(), 42);
//!
//! let missing = SqlValue::Null;
//! assert_eq!(Option::<i32>::from_sql_value(&missing).unwrap(), None);
//! ```

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SprocError, SprocResult};

/// Semantic data type of a parameter or column.
///
/// Length-carrying variants use `None` for `MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    /// Boolean bit.
    Bit,
    /// Unsigned 8-bit integer.
    TinyInt,
    /// 16-bit integer.
    SmallInt,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    BigInt,
    /// 32-bit float.
    Real,
    /// 64-bit float.
    Float,
    /// Fixed-point decimal.
    Decimal {
        /// Total number of digits.
        precision: u8,
        /// Digits after the decimal point.
        scale: u8,
    },
    /// Currency amount.
    Money,
    /// Unicode string.
    NVarChar(Option<u16>),
    /// Non-unicode string.
    VarChar(Option<u16>),
    /// Binary data.
    VarBinary(Option<u16>),
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Date and time without offset.
    DateTime2,
    /// Date and time with offset.
    DateTimeOffset,
    /// 128-bit GUID.
    UniqueIdentifier,
}

impl SqlType {
    /// Get the type declaration as written in a `DECLARE` statement.
    pub fn declaration(&self) -> String {
        fn len(n: Option<u16>) -> String {
            match n {
                Some(n) => n.to_string(),
                None => "MAX".to_string(),
            }
        }

        match self {
            Self::Bit => "BIT".to_string(),
            Self::TinyInt => "TINYINT".to_string(),
            Self::SmallInt => "SMALLINT".to_string(),
            Self::Int => "INT".to_string(),
            Self::BigInt => "BIGINT".to_string(),
            Self::Real => "REAL".to_string(),
            Self::Float => "FLOAT".to_string(),
            Self::Decimal { precision, scale } => format!("DECIMAL({}, {})", precision, scale),
            Self::Money => "MONEY".to_string(),
            Self::NVarChar(n) => format!("NVARCHAR({})", len(*n)),
            Self::VarChar(n) => format!("VARCHAR({})", len(*n)),
            Self::VarBinary(n) => format!("VARBINARY({})", len(*n)),
            Self::Date => "DATE".to_string(),
            Self::Time => "TIME".to_string(),
            Self::DateTime2 => "DATETIME2".to_string(),
            Self::DateTimeOffset => "DATETIMEOFFSET".to_string(),
            Self::UniqueIdentifier => "UNIQUEIDENTIFIER".to_string(),
        }
    }

    /// Check if this is an integer type.
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::TinyInt | Self::SmallInt | Self::Int | Self::BigInt)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.declaration())
    }
}

/// A typed value bound to a parameter or read from a column.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Unsigned 8-bit integer.
    U8(u8),
    /// 16-bit integer.
    I16(i16),
    /// 32-bit integer.
    I32(i32),
    /// 64-bit integer.
    I64(i64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// Fixed-point decimal.
    Decimal(Decimal),
    /// String value.
    String(String),
    /// Binary value.
    Binary(Vec<u8>),
    /// Calendar date.
    Date(NaiveDate),
    /// Time of day.
    Time(NaiveTime),
    /// Date and time without offset.
    DateTime(NaiveDateTime),
    /// Date and time in UTC.
    DateTimeOffset(DateTime<Utc>),
    /// GUID.
    Uuid(Uuid),
}

impl SqlValue {
    /// Check if the value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Name of the value's variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::U8(_) => "u8",
            Self::I16(_) => "i16",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Decimal(_) => "decimal",
            Self::String(_) => "string",
            Self::Binary(_) => "binary",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::DateTime(_) => "datetime",
            Self::DateTimeOffset(_) => "datetimeoffset",
            Self::Uuid(_) => "uuid",
        }
    }

    /// Check if the value can be bound to a parameter of the given type.
    ///
    /// NULL binds to every type. Integers bind to any integer or decimal type.
    pub fn is_compatible_with(&self, ty: SqlType) -> bool {
        use SqlType as T;

        match self {
            Self::Null => true,
            Self::Bool(_) => matches!(ty, T::Bit),
            Self::U8(_) | Self::I16(_) | Self::I32(_) | Self::I64(_) => {
                ty.is_integer() || matches!(ty, T::Decimal { .. } | T::Money)
            }
            Self::F32(_) | Self::F64(_) => matches!(ty, T::Real | T::Float),
            Self::Decimal(_) => matches!(ty, T::Decimal { .. } | T::Money),
            Self::String(_) => matches!(ty, T::NVarChar(_) | T::VarChar(_)),
            Self::Binary(_) => matches!(ty, T::VarBinary(_)),
            Self::Date(_) => matches!(ty, T::Date),
            Self::Time(_) => matches!(ty, T::Time),
            Self::DateTime(_) => matches!(ty, T::DateTime2),
            Self::DateTimeOffset(_) => matches!(ty, T::DateTimeOffset),
            Self::Uuid(_) => matches!(ty, T::UniqueIdentifier),
        }
    }
}

macro_rules! impl_from_for_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(v: $ty) -> Self {
                    SqlValue::$variant(v)
                }
            }
        )*
    };
}

impl_from_for_value! {
    bool => Bool,
    u8 => U8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    Decimal => Decimal,
    String => String,
    Vec<u8> => Binary,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    DateTime<Utc> => DateTimeOffset,
    Uuid => Uuid,
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::String(v.to_string())
    }
}

impl From<&[u8]> for SqlValue {
    fn from(v: &[u8]) -> Self {
        SqlValue::Binary(v.to_vec())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Conversion from a [`SqlValue`] into a Rust type.
pub trait FromSqlValue: Sized {
    /// Convert the value, failing on NULL or on an incompatible variant.
    fn from_sql_value(value: &SqlValue) -> SprocResult<Self>;
}

fn mismatch<T>(expected: &str, value: &SqlValue) -> SprocResult<T> {
    if value.is_null() {
        Err(SprocError::type_conversion(format!(
            "unexpected NULL, expected {}",
            expected
        )))
    } else {
        Err(SprocError::type_conversion(format!(
            "expected {}, found {}",
            expected,
            value.kind()
        )))
    }
}

fn narrow<T, S>(expected: &str, v: S) -> SprocResult<T>
where
    T: TryFrom<S>,
    S: fmt::Display + Copy,
{
    T::try_from(v)
        .map_err(|_| SprocError::type_conversion(format!("{} out of range for {}", v, expected)))
}

impl FromSqlValue for SqlValue {
    fn from_sql_value(value: &SqlValue) -> SprocResult<Self> {
        Ok(value.clone())
    }
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: &SqlValue) -> SprocResult<Self> {
        match value {
            SqlValue::Null => Ok(None),
            other => T::from_sql_value(other).map(Some),
        }
    }
}

impl FromSqlValue for bool {
    fn from_sql_value(value: &SqlValue) -> SprocResult<Self> {
        match value {
            SqlValue::Bool(v) => Ok(*v),
            other => mismatch("bool", other),
        }
    }
}

impl FromSqlValue for u8 {
    fn from_sql_value(value: &SqlValue) -> SprocResult<Self> {
        match value {
            SqlValue::U8(v) => Ok(*v),
            SqlValue::I16(v) => narrow("u8", *v),
            SqlValue::I32(v) => narrow("u8", *v),
            SqlValue::I64(v) => narrow("u8", *v),
            other => mismatch("u8", other),
        }
    }
}

impl FromSqlValue for i16 {
    fn from_sql_value(value: &SqlValue) -> SprocResult<Self> {
        match value {
            SqlValue::U8(v) => Ok(i16::from(*v)),
            SqlValue::I16(v) => Ok(*v),
            SqlValue::I32(v) => narrow("i16", *v),
            SqlValue::I64(v) => narrow("i16", *v),
            other => mismatch("i16", other),
        }
    }
}

impl FromSqlValue for i32 {
    fn from_sql_value(value: &SqlValue) -> SprocResult<Self> {
        match value {
            SqlValue::U8(v) => Ok(i32::from(*v)),
            SqlValue::I16(v) => Ok(i32::from(*v)),
            SqlValue::I32(v) => Ok(*v),
            SqlValue::I64(v) => narrow("i32", *v),
            other => mismatch("i32", other),
        }
    }
}

impl FromSqlValue for i64 {
    fn from_sql_value(value: &SqlValue) -> SprocResult<Self> {
        match value {
            SqlValue::U8(v) => Ok(i64::from(*v)),
            SqlValue::I16(v) => Ok(i64::from(*v)),
            SqlValue::I32(v) => Ok(i64::from(*v)),
            SqlValue::I64(v) => Ok(*v),
            other => mismatch("i64", other),
        }
    }
}

impl FromSqlValue for f32 {
    fn from_sql_value(value: &SqlValue) -> SprocResult<Self> {
        match value {
            SqlValue::F32(v) => Ok(*v),
            other => mismatch("f32", other),
        }
    }
}

impl FromSqlValue for f64 {
    fn from_sql_value(value: &SqlValue) -> SprocResult<Self> {
        match value {
            SqlValue::F32(v) => Ok(f64::from(*v)),
            SqlValue::F64(v) => Ok(*v),
            other => mismatch("f64", other),
        }
    }
}

impl FromSqlValue for Decimal {
    fn from_sql_value(value: &SqlValue) -> SprocResult<Self> {
        match value {
            SqlValue::Decimal(v) => Ok(*v),
            SqlValue::U8(v) => Ok(Decimal::from(*v)),
            SqlValue::I16(v) => Ok(Decimal::from(*v)),
            SqlValue::I32(v) => Ok(Decimal::from(*v)),
            SqlValue::I64(v) => Ok(Decimal::from(*v)),
            other => mismatch("decimal", other),
        }
    }
}

impl FromSqlValue for String {
    fn from_sql_value(value: &SqlValue) -> SprocResult<Self> {
        match value {
            SqlValue::String(v) => Ok(v.clone()),
            other => mismatch("string", other),
        }
    }
}

impl FromSqlValue for Vec<u8> {
    fn from_sql_value(value: &SqlValue) -> SprocResult<Self> {
        match value {
            SqlValue::Binary(v) => Ok(v.clone()),
            other => mismatch("binary", other),
        }
    }
}

impl FromSqlValue for NaiveDate {
    fn from_sql_value(value: &SqlValue) -> SprocResult<Self> {
        match value {
            SqlValue::Date(v) => Ok(*v),
            other => mismatch("date", other),
        }
    }
}

impl FromSqlValue for NaiveTime {
    fn from_sql_value(value: &SqlValue) -> SprocResult<Self> {
        match value {
            SqlValue::Time(v) => Ok(*v),
            other => mismatch("time", other),
        }
    }
}

impl FromSqlValue for NaiveDateTime {
    fn from_sql_value(value: &SqlValue) -> SprocResult<Self> {
        match value {
            SqlValue::DateTime(v) => Ok(*v),
            other => mismatch("datetime", other),
        }
    }
}

impl FromSqlValue for DateTime<Utc> {
    fn from_sql_value(value: &SqlValue) -> SprocResult<Self> {
        match value {
            SqlValue::DateTimeOffset(v) => Ok(*v),
            other => mismatch("datetimeoffset", other),
        }
    }
}

impl FromSqlValue for Uuid {
    fn from_sql_value(value: &SqlValue) -> SprocResult<Self> {
        match value {
            SqlValue::Uuid(v) => Ok(*v),
            other => mismatch("uuid", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_declarations() {
        assert_eq!(SqlType::Int.declaration(), "INT");
        assert_eq!(SqlType::NVarChar(Some(50)).declaration(), "NVARCHAR(50)");
        assert_eq!(SqlType::VarBinary(None).declaration(), "VARBINARY(MAX)");
        assert_eq!(
            SqlType::Decimal {
                precision: 18,
                scale: 2
            }
            .to_string(),
            "DECIMAL(18, 2)"
        );
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(SqlValue::from(true), SqlValue::Bool(true));
        assert_eq!(SqlValue::from("abc"), SqlValue::String("abc".to_string()));
        assert_eq!(SqlValue::from(None::<i32>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(7i64)), SqlValue::I64(7));
    }

    #[test]
    fn test_compatibility() {
        assert!(SqlValue::Null.is_compatible_with(SqlType::Date));
        assert!(SqlValue::I32(1).is_compatible_with(SqlType::TinyInt));
        assert!(SqlValue::I32(1).is_compatible_with(SqlType::Decimal {
            precision: 10,
            scale: 0
        }));
        assert!(!SqlValue::String("x".into()).is_compatible_with(SqlType::Int));
        assert!(!SqlValue::Bool(true).is_compatible_with(SqlType::Int));
    }

    #[test]
    fn test_from_sql_value_widening_and_narrowing() {
        assert_eq!(i64::from_sql_value(&SqlValue::U8(200)).unwrap(), 200);
        assert_eq!(i16::from_sql_value(&SqlValue::I64(-3)).unwrap(), -3);
        assert!(u8::from_sql_value(&SqlValue::I32(300)).is_err());
        assert!(i32::from_sql_value(&SqlValue::String("1".into())).is_err());
    }

    #[test]
    fn test_null_handling() {
        let err = i32::from_sql_value(&SqlValue::Null).unwrap_err();
        assert!(err.to_string().contains("unexpected NULL"));
        assert_eq!(Option::<String>::from_sql_value(&SqlValue::Null).unwrap(), None);
    }
}
