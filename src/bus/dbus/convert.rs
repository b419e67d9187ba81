//! Conversion between [`Value`] and zvariant values.

use tracing::debug;
use zbus::zvariant::{self, Array, ObjectPath, Signature, Structure, StructureBuilder};
use zbus::Message;

use crate::bus::Value;
use crate::error::{Error, Result};

fn invalid(e: impl std::fmt::Display) -> Error {
    Error::InvalidArgument(e.to_string())
}

/// Convert a received zvariant value.
///
/// Dictionaries and file descriptors are not decoded; they arrive as their
/// debug text.
pub(super) fn from_zvariant(value: &zvariant::Value<'_>) -> Value {
    match value {
        zvariant::Value::Bool(v) => Value::Bool(*v),
        zvariant::Value::U8(v) => Value::Byte(*v),
        zvariant::Value::I16(v) => Value::I16(*v),
        zvariant::Value::U16(v) => Value::U16(*v),
        zvariant::Value::I32(v) => Value::I32(*v),
        zvariant::Value::U32(v) => Value::U32(*v),
        zvariant::Value::I64(v) => Value::I64(*v),
        zvariant::Value::U64(v) => Value::U64(*v),
        zvariant::Value::F64(v) => Value::F64(*v),
        zvariant::Value::Str(s) => Value::Str(s.to_string()),
        zvariant::Value::Signature(s) => Value::Signature(s.to_string()),
        zvariant::Value::ObjectPath(p) => Value::ObjectPath(p.to_string()),
        zvariant::Value::Value(inner) => Value::Variant(Box::new(from_zvariant(inner))),
        zvariant::Value::Array(array) => {
            Value::Array(array.inner().iter().map(from_zvariant).collect())
        }
        zvariant::Value::Structure(s) => {
            Value::Struct(s.fields().iter().map(from_zvariant).collect())
        }
        other => Value::Str(format!("{:?}", other)),
    }
}

/// Convert an outgoing value.
///
/// Fails for dictionaries, empty arrays (no element type to infer), empty
/// structs, and malformed paths or signatures.
pub(super) fn to_zvariant(value: &Value) -> Result<zvariant::Value<'static>> {
    Ok(match value {
        Value::Bool(v) => zvariant::Value::Bool(*v),
        Value::Byte(v) => zvariant::Value::U8(*v),
        Value::I16(v) => zvariant::Value::I16(*v),
        Value::U16(v) => zvariant::Value::U16(*v),
        Value::I32(v) => zvariant::Value::I32(*v),
        Value::U32(v) => zvariant::Value::U32(*v),
        Value::I64(v) => zvariant::Value::I64(*v),
        Value::U64(v) => zvariant::Value::U64(*v),
        Value::F64(v) => zvariant::Value::F64(*v),
        Value::Str(s) => zvariant::Value::from(s.clone()),
        Value::ObjectPath(p) => {
            zvariant::Value::ObjectPath(ObjectPath::try_from(p.clone()).map_err(invalid)?)
        }
        Value::Signature(s) => {
            zvariant::Value::Signature(Signature::try_from(s.clone()).map_err(invalid)?)
        }
        Value::Variant(inner) => zvariant::Value::Value(Box::new(to_zvariant(inner)?)),
        Value::Array(items) => {
            let elements = items.iter().map(to_zvariant).collect::<Result<Vec<_>>>()?;
            let signature = elements
                .first()
                .map(|e| e.value_signature().into_owned())
                .ok_or_else(|| invalid("cannot infer the element type of an empty array"))?;
            let mut array = Array::new(signature);
            for element in elements {
                array.append(element).map_err(invalid)?;
            }
            zvariant::Value::Array(array)
        }
        Value::Struct(fields) => zvariant::Value::Structure(structure(fields)?),
        Value::Dict(_) => return Err(invalid("dictionary values are not supported")),
    })
}

/// Build a struct whose fields become the message body arguments.
pub(super) fn structure(fields: &[Value]) -> Result<Structure<'static>> {
    if fields.is_empty() {
        return Err(invalid("a struct needs at least one field"));
    }
    let mut builder = StructureBuilder::new();
    for field in fields {
        builder = builder.append_field(to_zvariant(field)?);
    }
    Ok(builder.build())
}

/// Arguments carried by a message body.
pub(super) fn body_args(msg: &Message) -> Vec<Value> {
    let body = msg.body();
    let has_args = body
        .signature()
        .map(|s| !s.as_str().is_empty())
        .unwrap_or(false);
    if !has_args {
        return Vec::new();
    }

    match body.deserialize::<Structure<'_>>() {
        Ok(fields) => fields.fields().iter().map(from_zvariant).collect(),
        Err(e) => {
            debug!(error = %e, "Failed to decode message body");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_conversion_preserves_value() {
        for value in [
            Value::Bool(true),
            Value::Byte(7),
            Value::I32(-3),
            Value::U64(u64::MAX),
            Value::from("hello"),
            Value::object_path("/com/example/Sender"),
        ] {
            let converted = to_zvariant(&value).unwrap();
            assert_eq!(from_zvariant(&converted), value);
        }
    }

    #[test]
    fn test_nested_array_and_variant() {
        let value = Value::Array(vec![
            Value::variant(Value::I32(1)),
            Value::variant(Value::from("two")),
        ]);
        let converted = to_zvariant(&value).unwrap();
        assert_eq!(from_zvariant(&converted), value);
    }

    #[test]
    fn test_struct_conversion() {
        let value = Value::Struct(vec![Value::U32(1), Value::from("x")]);
        let converted = to_zvariant(&value).unwrap();
        assert_eq!(from_zvariant(&converted), value);
    }

    #[test]
    fn test_rejects_unrepresentable_values() {
        assert!(to_zvariant(&Value::Array(Vec::new())).is_err());
        assert!(to_zvariant(&Value::Struct(Vec::new())).is_err());
        assert!(to_zvariant(&Value::Dict(Vec::new())).is_err());
        assert!(to_zvariant(&Value::object_path("not a path")).is_err());
    }
}
