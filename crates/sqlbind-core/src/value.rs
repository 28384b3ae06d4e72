//! Owned SQL values and the SQL type codes used for typed nulls and
//! output parameters.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Serialize, Serializer};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// SQL type codes, numbered like `java.sql.Types`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Bit,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Real,
    Double,
    Numeric,
    Decimal,
    Char,
    Varchar,
    LongVarchar,
    Date,
    Time,
    Timestamp,
    Binary,
    VarBinary,
    LongVarBinary,
    Null,
    Other,
    Boolean,
    Blob,
    Clob,
}

impl SqlType {
    pub fn code(self) -> i32 {
        match self {
            SqlType::Bit => -7,
            SqlType::TinyInt => -6,
            SqlType::SmallInt => 5,
            SqlType::Integer => 4,
            SqlType::BigInt => -5,
            SqlType::Float => 6,
            SqlType::Real => 7,
            SqlType::Double => 8,
            SqlType::Numeric => 2,
            SqlType::Decimal => 3,
            SqlType::Char => 1,
            SqlType::Varchar => 12,
            SqlType::LongVarchar => -1,
            SqlType::Date => 91,
            SqlType::Time => 92,
            SqlType::Timestamp => 93,
            SqlType::Binary => -2,
            SqlType::VarBinary => -3,
            SqlType::LongVarBinary => -4,
            SqlType::Null => 0,
            SqlType::Other => 1111,
            SqlType::Boolean => 16,
            SqlType::Blob => 2004,
            SqlType::Clob => 2005,
        }
    }

    pub fn is_character(self) -> bool {
        matches!(
            self,
            SqlType::Char | SqlType::Varchar | SqlType::LongVarchar | SqlType::Clob
        )
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt
        )
    }

    pub fn is_fractional(self) -> bool {
        matches!(self, SqlType::Float | SqlType::Real | SqlType::Double)
    }

    pub fn is_exact_numeric(self) -> bool {
        matches!(self, SqlType::Numeric | SqlType::Decimal)
    }

    pub fn is_binary(self) -> bool {
        matches!(
            self,
            SqlType::Binary | SqlType::VarBinary | SqlType::LongVarBinary | SqlType::Blob
        )
    }

    pub fn is_boolean(self) -> bool {
        matches!(self, SqlType::Bit | SqlType::Boolean)
    }

    pub fn is_temporal(self) -> bool {
        matches!(self, SqlType::Date | SqlType::Time | SqlType::Timestamp)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Exact numeric value kept in its textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Decimal(pub String);

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An owned SQL value.
///
/// Nulls remember the SQL type they were bound or read as, so a null
/// decimal is written to the driver as `NUMERIC` rather than an untyped null.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null(SqlType),
    Bool(bool),
    Int(i64),
    Double(f64),
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub const NULL: Value = Value::Null(SqlType::Null);

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }

    /// SQL type the value is written as.
    pub fn sql_type(&self) -> SqlType {
        match self {
            Value::Null(ty) => *ty,
            Value::Bool(_) => SqlType::Boolean,
            Value::Int(_) => SqlType::BigInt,
            Value::Double(_) => SqlType::Double,
            Value::Decimal(_) => SqlType::Numeric,
            Value::Text(_) => SqlType::Varchar,
            Value::Bytes(_) => SqlType::VarBinary,
            Value::Date(_) => SqlType::Date,
            Value::Time(_) => SqlType::Time,
            Value::Timestamp(_) => SqlType::Timestamp,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            Value::Double(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::Decimal(s) | Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::Decimal(s) | Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(v) => Some(*v != 0),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Some(true),
                "false" | "f" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Timestamp(ts) => Some(ts.date()),
            Value::Text(s) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok(),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<NaiveTime> {
        match self {
            Value::Time(t) => Some(*t),
            Value::Timestamp(ts) => Some(ts.time()),
            Value::Text(s) => NaiveTime::parse_from_str(s.trim(), TIME_FORMAT).ok(),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::Date(d) => d.and_hms_opt(0, 0, 0),
            Value::Text(s) => {
                let s = s.trim();
                NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
                    .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                    .ok()
            }
            _ => None,
        }
    }

    /// Converts the value into the family of `target`.
    ///
    /// Character types accept anything with a textual form, numeric types
    /// widen or parse, temporal types parse their canonical text format.
    /// Returns `None` when the value cannot represent `target`.
    pub fn coerce(&self, target: SqlType) -> Option<Value> {
        if let Value::Null(_) = self {
            return Some(Value::Null(target));
        }

        if target.is_character() {
            return Some(Value::Text(self.to_string()));
        }
        if target.is_integral() {
            return self.as_i64().map(Value::Int);
        }
        if target.is_fractional() {
            return self.as_f64().map(Value::Double);
        }
        if target.is_exact_numeric() {
            return match self {
                Value::Decimal(s) => Some(Value::Decimal(s.clone())),
                Value::Int(v) => Some(Value::Decimal(v.to_string())),
                Value::Double(v) => Some(Value::Decimal(v.to_string())),
                Value::Text(s) if s.trim().parse::<f64>().is_ok() => {
                    Some(Value::Decimal(s.trim().to_string()))
                }
                _ => None,
            };
        }
        if target.is_boolean() {
            return self.as_bool().map(Value::Bool);
        }
        if target.is_binary() {
            return self.as_bytes().map(|b| Value::Bytes(b.to_vec()));
        }

        match target {
            SqlType::Date => self.as_date().map(Value::Date),
            SqlType::Time => self.as_time().map(Value::Time),
            SqlType::Timestamp => self.as_timestamp().map(Value::Timestamp),
            _ => Some(self.clone()),
        }
    }

    /// Builds a value from JSON, as used by bean binding and the CLI.
    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::NULL,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Double(f)
                } else {
                    Value::Decimal(n.to_string())
                }
            }
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Double(f) => serde_json::Value::from(*f),
            Value::Bytes(b) => serde_json::Value::from(b.clone()),
            other => serde_json::Value::String(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null(_) => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Decimal(v) | Value::Text(v) => f.write_str(v),
            Value::Bytes(v) => {
                write!(f, "x'")?;
                for byte in v {
                    write!(f, "{byte:02x}")?;
                }
                write!(f, "'")
            }
            Value::Date(v) => write!(f, "{}", v.format(DATE_FORMAT)),
            Value::Time(v) => write!(f, "{}", v.format(TIME_FORMAT)),
            Value::Timestamp(v) => write!(f, "{}", v.format(TIMESTAMP_FORMAT)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident($conv:expr)),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant($conv(v))
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool(std::convert::identity),
    i8 => Int(i64::from),
    i16 => Int(i64::from),
    i32 => Int(i64::from),
    i64 => Int(std::convert::identity),
    u8 => Int(i64::from),
    u16 => Int(i64::from),
    u32 => Int(i64::from),
    f32 => Double(f64::from),
    f64 => Double(std::convert::identity),
    String => Text(std::convert::identity),
    Vec<u8> => Bytes(std::convert::identity),
    Decimal => Decimal(|d: Decimal| d.0),
    NaiveDate => Date(std::convert::identity),
    NaiveTime => Time(std::convert::identity),
    NaiveDateTime => Timestamp(std::convert::identity),
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::NULL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_keeps_type() {
        let value = Value::Null(SqlType::Numeric);
        assert!(value.is_null());
        assert_eq!(value.sql_type(), SqlType::Numeric);
        assert_eq!(value.to_string(), "NULL");
    }

    #[test]
    fn test_coerce_character_family() {
        assert_eq!(
            Value::Int(42).coerce(SqlType::Varchar),
            Some(Value::Text("42".into()))
        );
    }

    #[test]
    fn test_coerce_numeric_widening() {
        assert_eq!(Value::Int(3).coerce(SqlType::Double), Some(Value::Double(3.0)));
        assert_eq!(
            Value::Text(" 17 ".into()).coerce(SqlType::Integer),
            Some(Value::Int(17))
        );
        assert_eq!(
            Value::Int(5).coerce(SqlType::Decimal),
            Some(Value::Decimal("5".into()))
        );
        assert_eq!(Value::Text("abc".into()).coerce(SqlType::BigInt), None);
    }

    #[test]
    fn test_coerce_temporal_family() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(
            Value::Text("2024-02-29".into()).coerce(SqlType::Date),
            Some(Value::Date(date))
        );
        assert_eq!(
            Value::Text("2024-02-29 10:15:00".into()).coerce(SqlType::Timestamp),
            Some(Value::Timestamp(date.and_hms_opt(10, 15, 0).unwrap()))
        );
    }

    #[test]
    fn test_coerce_null_takes_target_type() {
        assert_eq!(
            Value::NULL.coerce(SqlType::Clob),
            Some(Value::Null(SqlType::Clob))
        );
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({"a": 1});
        assert_eq!(Value::from_json(&serde_json::json!(7)), Value::Int(7));
        assert_eq!(Value::from_json(&serde_json::json!(1.5)), Value::Double(1.5));
        assert_eq!(Value::from_json(&serde_json::Value::Null), Value::NULL);
        assert_eq!(Value::from_json(&json), Value::Text("{\"a\":1}".into()));
        assert_eq!(Value::Text("x".into()).to_json(), serde_json::json!("x"));
    }

    #[test]
    fn test_bytes_display() {
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_string(), "x'dead'");
    }

    #[test]
    fn test_from_option() {
        assert_eq!(Value::from(Some(3)), Value::Int(3));
        assert_eq!(Value::from(None::<i32>), Value::NULL);
    }
}
