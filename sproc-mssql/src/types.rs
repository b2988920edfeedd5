//! Type conversions between engine values and SQL Server wire values.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sproc_core::{SqlType, SqlValue};
use tiberius::numeric::Numeric;
use tiberius::{ColumnData, FromSql, IntoSql, Query};
use uuid::Uuid;

use crate::error::{MssqlError, MssqlResult};

/// Bind a value to the next `@Pn` placeholder of a query.
///
/// NULL is bound with the declared type when one is known, so the server sees
/// a typed NULL instead of an NVARCHAR one.
pub fn bind_value(query: &mut Query<'_>, value: &SqlValue, declared: Option<SqlType>) {
    match value {
        SqlValue::Null => bind_null(query, declared),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::U8(v) => query.bind(*v),
        SqlValue::I16(v) => query.bind(*v),
        SqlValue::I32(v) => query.bind(*v),
        SqlValue::I64(v) => query.bind(*v),
        SqlValue::F32(v) => query.bind(*v),
        SqlValue::F64(v) => query.bind(*v),
        SqlValue::Decimal(v) => query.bind(numeric(*v)),
        SqlValue::String(v) => query.bind(v.clone()),
        SqlValue::Binary(v) => query.bind(v.clone()),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
        SqlValue::DateTime(v) => query.bind(*v),
        SqlValue::DateTimeOffset(v) => query.bind(v.fixed_offset()),
        SqlValue::Uuid(v) => query.bind(*v),
    }
}

/// Decimals go over the wire as TDS numerics carrying the value's own scale.
///
/// `DateTime<Utc>` encodes as DATETIME2, so offsets are sent as `DateTime<FixedOffset>`.
fn numeric(value: Decimal) -> Numeric {
    Numeric::new_with_scale(value.mantissa(), value.scale() as u8)
}

fn bind_null(query: &mut Query<'_>, declared: Option<SqlType>) {
    use SqlType as T;

    match declared {
        Some(T::Bit) => query.bind(Option::<bool>::None),
        Some(T::TinyInt) => query.bind(Option::<u8>::None),
        Some(T::SmallInt) => query.bind(Option::<i16>::None),
        Some(T::Int) => query.bind(Option::<i32>::None),
        Some(T::BigInt) => query.bind(Option::<i64>::None),
        Some(T::Real) => query.bind(Option::<f32>::None),
        Some(T::Float) => query.bind(Option::<f64>::None),
        Some(T::Decimal { .. } | T::Money) => query.bind(Option::<Numeric>::None),
        Some(T::VarBinary(_)) => query.bind(Option::<Vec<u8>>::None),
        Some(T::Date) => query.bind(Option::<NaiveDate>::None),
        Some(T::Time) => query.bind(Option::<NaiveTime>::None),
        Some(T::DateTime2) => query.bind(Option::<NaiveDateTime>::None),
        Some(T::DateTimeOffset) => query.bind(Option::<DateTime<FixedOffset>>::None),
        Some(T::UniqueIdentifier) => query.bind(Option::<Uuid>::None),
        Some(T::NVarChar(_) | T::VarChar(_)) | None => query.bind(Option::<String>::None),
    }
}

/// Convert a value into column data for a bulk-load row.
pub fn to_column_data(value: SqlValue, declared: Option<SqlType>) -> MssqlResult<ColumnData<'static>> {
    let value = match declared {
        Some(ty) => coerce(value, ty)?,
        None => value,
    };

    Ok(match value {
        SqlValue::Null => null_column(declared),
        SqlValue::Bool(v) => v.into_sql(),
        SqlValue::U8(v) => v.into_sql(),
        SqlValue::I16(v) => v.into_sql(),
        SqlValue::I32(v) => v.into_sql(),
        SqlValue::I64(v) => v.into_sql(),
        SqlValue::F32(v) => v.into_sql(),
        SqlValue::F64(v) => v.into_sql(),
        SqlValue::Decimal(v) => numeric(v).into_sql(),
        SqlValue::String(v) => v.into_sql(),
        SqlValue::Binary(v) => v.into_sql(),
        SqlValue::Date(v) => v.into_sql(),
        SqlValue::Time(v) => v.into_sql(),
        SqlValue::DateTime(v) => v.into_sql(),
        SqlValue::DateTimeOffset(v) => v.fixed_offset().into_sql(),
        SqlValue::Uuid(v) => v.into_sql(),
    })
}

fn null_column(declared: Option<SqlType>) -> ColumnData<'static> {
    use SqlType as T;

    match declared {
        Some(T::Bit) => ColumnData::Bit(None),
        Some(T::TinyInt) => ColumnData::U8(None),
        Some(T::SmallInt) => ColumnData::I16(None),
        Some(T::Int) => ColumnData::I32(None),
        Some(T::BigInt) => ColumnData::I64(None),
        Some(T::Real) => ColumnData::F32(None),
        Some(T::Float) => ColumnData::F64(None),
        Some(T::Decimal { .. } | T::Money) => ColumnData::Numeric(None),
        Some(T::VarBinary(_)) => ColumnData::Binary(None),
        Some(T::Date) => ColumnData::Date(None),
        Some(T::Time) => ColumnData::Time(None),
        Some(T::DateTime2) => ColumnData::DateTime2(None),
        Some(T::DateTimeOffset) => ColumnData::DateTimeOffset(None),
        Some(T::UniqueIdentifier) => ColumnData::Guid(None),
        Some(T::NVarChar(_) | T::VarChar(_)) | None => ColumnData::String(None),
    }
}

/// Convert column data read from the server into a value.
pub fn from_column_data(data: &ColumnData<'static>) -> MssqlResult<SqlValue> {
    let value = match data {
        ColumnData::U8(v) => v.map(SqlValue::U8),
        ColumnData::I16(v) => v.map(SqlValue::I16),
        ColumnData::I32(v) => v.map(SqlValue::I32),
        ColumnData::I64(v) => v.map(SqlValue::I64),
        ColumnData::F32(v) => v.map(SqlValue::F32),
        ColumnData::F64(v) => v.map(SqlValue::F64),
        ColumnData::Bit(v) => v.map(SqlValue::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| SqlValue::String(s.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|b| SqlValue::Binary(b.to_vec())),
        ColumnData::Guid(v) => v.map(SqlValue::Uuid),
        ColumnData::Numeric(_) => Decimal::from_sql(data)?.map(SqlValue::Decimal),
        ColumnData::Date(_) => NaiveDate::from_sql(data)?.map(SqlValue::Date),
        ColumnData::Time(_) => NaiveTime::from_sql(data)?.map(SqlValue::Time),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(data)?.map(SqlValue::DateTime)
        }
        ColumnData::DateTimeOffset(_) => DateTime::<Utc>::from_sql(data)?.map(SqlValue::DateTimeOffset),
        ColumnData::Xml(None) => None,
        #[allow(unreachable_patterns)]
        _ => {
            return Err(MssqlError::type_conversion(
                "column type is not supported (xml or sql_variant)",
            ));
        }
    };

    Ok(value.unwrap_or(SqlValue::Null))
}

/// Convert a value to the representation expected for a declared type.
///
/// Integers are widened or range-checked, floats and integers become decimals
/// for `DECIMAL`/`MONEY`, and `REAL` values widen for `FLOAT`.
pub fn coerce(value: SqlValue, ty: SqlType) -> MssqlResult<SqlValue> {
    use SqlType as T;

    let out_of_range = |v: &dyn std::fmt::Display| {
        MssqlError::type_conversion(format!("value {} is out of range for {}", v, ty))
    };

    if let Some(n) = integer(&value) {
        if ty.is_integer() || matches!(ty, T::Decimal { .. } | T::Money) {
            return Ok(match ty {
                T::TinyInt => SqlValue::U8(u8::try_from(n).map_err(|_| out_of_range(&n))?),
                T::SmallInt => SqlValue::I16(i16::try_from(n).map_err(|_| out_of_range(&n))?),
                T::Int => SqlValue::I32(i32::try_from(n).map_err(|_| out_of_range(&n))?),
                T::BigInt => SqlValue::I64(n),
                _ => SqlValue::Decimal(Decimal::from(n)),
            });
        }
    }

    Ok(match (value, ty) {
        (SqlValue::F64(f), T::Decimal { .. } | T::Money) => {
            SqlValue::Decimal(Decimal::try_from(f).map_err(|_| out_of_range(&f))?)
        }
        (SqlValue::F32(f), T::Decimal { .. } | T::Money) => {
            SqlValue::Decimal(Decimal::try_from(f).map_err(|_| out_of_range(&f))?)
        }
        (SqlValue::F32(f), T::Float) => SqlValue::F64(f64::from(f)),
        (SqlValue::DateTimeOffset(v), T::DateTime2) => SqlValue::DateTime(v.naive_utc()),
        (v, _) => v,
    })
}

fn integer(value: &SqlValue) -> Option<i64> {
    match value {
        SqlValue::U8(n) => Some(i64::from(*n)),
        SqlValue::I16(n) => Some(i64::from(*n)),
        SqlValue::I32(n) => Some(i64::from(*n)),
        SqlValue::I64(n) => Some(*n),
        _ => None,
    }
}

/// Map a `sys.types` name to a semantic type.
pub fn parse_type_name(name: &str, max_length: i16, precision: u8, scale: u8) -> Option<SqlType> {
    let len = |bytes: i16, unicode: bool| -> Option<u16> {
        match bytes {
            -1 => None,
            n if unicode => u16::try_from(n / 2).ok(),
            n => u16::try_from(n).ok(),
        }
    };

    Some(match name.to_lowercase().as_str() {
        "bit" => SqlType::Bit,
        "tinyint" => SqlType::TinyInt,
        "smallint" => SqlType::SmallInt,
        "int" => SqlType::Int,
        "bigint" => SqlType::BigInt,
        "real" => SqlType::Real,
        "float" => SqlType::Float,
        "decimal" | "numeric" => SqlType::Decimal { precision, scale },
        "money" | "smallmoney" => SqlType::Money,
        "nvarchar" | "nchar" | "ntext" | "sysname" => SqlType::NVarChar(len(max_length, true)),
        "varchar" | "char" | "text" => SqlType::VarChar(len(max_length, false)),
        "varbinary" | "binary" | "image" => SqlType::VarBinary(len(max_length, false)),
        "date" => SqlType::Date,
        "time" => SqlType::Time,
        "datetime2" | "datetime" | "smalldatetime" => SqlType::DateTime2,
        "datetimeoffset" => SqlType::DateTimeOffset,
        "uniqueidentifier" => SqlType::UniqueIdentifier,
        _ => return None,
    })
}
