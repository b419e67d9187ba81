//! Bus value model.
//!
//! A wire-independent subset of the D-Bus type system, used for method
//! arguments, replies, and signal bodies.

use std::fmt;

/// A single bus value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    ObjectPath(String),
    Signature(String),
    /// Homogeneous array.
    Array(Vec<Value>),
    /// Dictionary as ordered key/value pairs.
    Dict(Vec<(Value, Value)>),
    Struct(Vec<Value>),
    /// Boxed variant (`v`).
    Variant(Box<Value>),
}

impl Value {
    /// Create an object path value.
    pub fn object_path(path: impl Into<String>) -> Self {
        Value::ObjectPath(path.into())
    }

    /// Create a variant value.
    pub fn variant(inner: Value) -> Self {
        Value::Variant(Box::new(inner))
    }

    /// Try to get as string (strings and object paths).
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::ObjectPath(s) | Value::Signature(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as i64 (any integer that fits).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(n) => Some(i64::from(*n)),
            Value::I16(n) => Some(i64::from(*n)),
            Value::U16(n) => Some(i64::from(*n)),
            Value::I32(n) => Some(i64::from(*n)),
            Value::U32(n) => Some(i64::from(*n)),
            Value::I64(n) => Some(*n),
            Value::U64(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Try to get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Look through any number of variant wrappers.
    pub fn unwrap_variant(&self) -> &Value {
        match self {
            Value::Variant(inner) => inner.unwrap_variant(),
            other => other,
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from!(
    bool => Bool,
    u8 => Byte,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f64 => F64,
    String => Str,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Byte(n) => write!(f, "{}", n),
            Value::I16(n) => write!(f, "{}", n),
            Value::U16(n) => write!(f, "{}", n),
            Value::I32(n) => write!(f, "{}", n),
            Value::U32(n) => write!(f, "{}", n),
            Value::I64(n) => write!(f, "{}", n),
            Value::U64(n) => write!(f, "{}", n),
            Value::F64(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::ObjectPath(p) => write!(f, "objectpath {:?}", p),
            Value::Signature(s) => write!(f, "signature {:?}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Struct(fields) => {
                write!(f, "(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, ")")
            }
            Value::Variant(inner) => write!(f, "<{}>", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_scalars() {
        assert_eq!(Value::from(1i32), Value::I32(1));
        assert_eq!(Value::from("x"), Value::Str("x".to_string()));
        assert_eq!(Value::from(vec![1u32, 2]), Value::Array(vec![Value::U32(1), Value::U32(2)]));
    }

    #[test]
    fn test_as_i64_widens() {
        assert_eq!(Value::Byte(7).as_i64(), Some(7));
        assert_eq!(Value::U64(u64::MAX).as_i64(), None);
        assert_eq!(Value::Str("7".into()).as_i64(), None);
    }

    #[test]
    fn test_unwrap_variant_nested() {
        let v = Value::variant(Value::variant(Value::Bool(true)));
        assert_eq!(v.unwrap_variant(), &Value::Bool(true));
    }

    #[test]
    fn test_display() {
        let v = Value::Struct(vec![
            Value::I32(1),
            Value::from("a"),
            Value::variant(Value::Bool(false)),
        ]);
        assert_eq!(v.to_string(), "(1, \"a\", <false>)");
    }
}
