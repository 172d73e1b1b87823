use crate::Error;
use serde_derive::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// The polymorphic value carried by a [`super::Reading`] or a write
/// request. Handlers produce and consume these; the core never
/// interprets the payload beyond applying [`super::Transform`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Flt(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Flt(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "\"{}\"", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl Value {
    /// Applies a numeric scale factor, in place, to `Int`/`Flt`
    /// values. Any other variant is returned unchanged -- scaling a
    /// string or boolean is not an error, it's simply a no-op, since
    /// transforms are applied uniformly to every reading produced by
    /// a device regardless of which variant the handler happened to
    /// emit that tick.
    pub fn scaled(self, factor: f64) -> Value {
        match self {
            Value::Int(v) => Value::Flt(v as f64 * factor),
            Value::Flt(v) => Value::Flt(v * factor),
            other => other,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        if let Value::Bool(v) = v {
            Ok(v)
        } else {
            Err(Error::Internal("value type mismatch".into()))
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        if let Value::Int(v) = v {
            Ok(v)
        } else {
            Err(Error::Internal("value type mismatch".into()))
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Flt(v)
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        if let Value::Flt(v) = v {
            Ok(v)
        } else {
            Err(Error::Internal("value type mismatch".into()))
        }
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.into())
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        if let Value::Str(v) = v {
            Ok(v)
        } else {
            Err(Error::Internal("value type mismatch".into()))
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!("true", format!("{}", Value::Bool(true)));
        assert_eq!("42", format!("{}", Value::Int(42)));
        assert_eq!("1.5", format!("{}", Value::Flt(1.5)));
        assert_eq!("\"hi\"", format!("{}", Value::Str("hi".into())));
        assert_eq!("<3 bytes>", format!("{}", Value::Bytes(vec![1, 2, 3])));
    }

    #[test]
    fn test_scale() {
        assert_eq!(Value::Flt(4.0), Value::Int(2).scaled(2.0));
        assert_eq!(Value::Flt(5.0), Value::Flt(2.5).scaled(2.0));
        assert_eq!(
            Value::Str("x".into()),
            Value::Str("x".into()).scaled(2.0)
        );
    }

    #[test]
    fn test_roundtrip() {
        assert_eq!(Value::Bool(true), Value::from(true));
        assert_eq!(bool::try_from(Value::Bool(true)), Ok(true));
        assert!(bool::try_from(Value::Int(1)).is_err());

        assert_eq!(Value::Int(7), Value::from(7i64));
        assert_eq!(i64::try_from(Value::Int(7)), Ok(7));

        assert_eq!(Value::Flt(1.5), Value::from(1.5));
        assert_eq!(f64::try_from(Value::Flt(1.5)), Ok(1.5));

        assert_eq!(Value::Str("a".into()), Value::from("a"));
        assert_eq!(String::try_from(Value::Str("a".into())), Ok("a".into()));
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        for value in [
            Value::Bool(true),
            Value::Int(-7),
            Value::Flt(3.25),
            Value::Str("hi".into()),
            Value::Bytes(vec![1, 2, 3]),
        ] {
            let encoded = serde_json::to_string(&value).unwrap();
            let decoded: Value = serde_json::from_str(&encoded).unwrap();
            let reencoded = serde_json::to_string(&decoded).unwrap();

            assert_eq!(value, decoded);
            assert_eq!(encoded, reencoded);
        }
    }
}
