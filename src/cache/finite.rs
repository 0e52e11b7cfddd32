//! Rejects non-finite floats before bindings are converted to JSON, where
//! they would silently become `null`.

use std::fmt;

use serde::Serialize;
use serde::ser;

#[derive(Debug)]
pub(crate) enum FiniteError {
    NonFinite,
    Custom(String),
}

impl fmt::Display for FiniteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonFinite => f.write_str("non-finite number"),
            Self::Custom(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for FiniteError {}

impl ser::Error for FiniteError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::Custom(msg.to_string())
    }
}

/// True when every float in `bindings` is finite.
///
/// Serializer errors other than non-finite numbers are ignored here; the
/// JSON conversion that follows reports them.
pub(crate) fn all_finite<B: Serialize + ?Sized>(bindings: &B) -> bool {
    !matches!(bindings.serialize(FiniteCheck), Err(FiniteError::NonFinite))
}

struct FiniteCheck;

fn check(value: f64) -> Result<(), FiniteError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(FiniteError::NonFinite)
    }
}

impl ser::Serializer for FiniteCheck {
    type Ok = ();
    type Error = FiniteError;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, _: bool) -> Result<(), FiniteError> {
        Ok(())
    }
    fn serialize_i8(self, _: i8) -> Result<(), FiniteError> {
        Ok(())
    }
    fn serialize_i16(self, _: i16) -> Result<(), FiniteError> {
        Ok(())
    }
    fn serialize_i32(self, _: i32) -> Result<(), FiniteError> {
        Ok(())
    }
    fn serialize_i64(self, _: i64) -> Result<(), FiniteError> {
        Ok(())
    }
    fn serialize_u8(self, _: u8) -> Result<(), FiniteError> {
        Ok(())
    }
    fn serialize_u16(self, _: u16) -> Result<(), FiniteError> {
        Ok(())
    }
    fn serialize_u32(self, _: u32) -> Result<(), FiniteError> {
        Ok(())
    }
    fn serialize_u64(self, _: u64) -> Result<(), FiniteError> {
        Ok(())
    }
    fn serialize_f32(self, value: f32) -> Result<(), FiniteError> {
        check(f64::from(value))
    }
    fn serialize_f64(self, value: f64) -> Result<(), FiniteError> {
        check(value)
    }
    fn serialize_char(self, _: char) -> Result<(), FiniteError> {
        Ok(())
    }
    fn serialize_str(self, _: &str) -> Result<(), FiniteError> {
        Ok(())
    }
    fn serialize_bytes(self, _: &[u8]) -> Result<(), FiniteError> {
        Ok(())
    }
    fn serialize_none(self) -> Result<(), FiniteError> {
        Ok(())
    }
    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<(), FiniteError> {
        value.serialize(self)
    }
    fn serialize_unit(self) -> Result<(), FiniteError> {
        Ok(())
    }
    fn serialize_unit_struct(self, _: &'static str) -> Result<(), FiniteError> {
        Ok(())
    }
    fn serialize_unit_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
    ) -> Result<(), FiniteError> {
        Ok(())
    }
    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        value: &T,
    ) -> Result<(), FiniteError> {
        value.serialize(self)
    }
    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> Result<(), FiniteError> {
        value.serialize(self)
    }
    fn serialize_seq(self, _: Option<usize>) -> Result<Self, FiniteError> {
        Ok(self)
    }
    fn serialize_tuple(self, _: usize) -> Result<Self, FiniteError> {
        Ok(self)
    }
    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self, FiniteError> {
        Ok(self)
    }
    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, FiniteError> {
        Ok(self)
    }
    fn serialize_map(self, _: Option<usize>) -> Result<Self, FiniteError> {
        Ok(self)
    }
    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self, FiniteError> {
        Ok(self)
    }
    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, FiniteError> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteCheck {
    type Ok = ();
    type Error = FiniteError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), FiniteError> {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Result<(), FiniteError> {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteCheck {
    type Ok = ();
    type Error = FiniteError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), FiniteError> {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Result<(), FiniteError> {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteCheck {
    type Ok = ();
    type Error = FiniteError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), FiniteError> {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Result<(), FiniteError> {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteCheck {
    type Ok = ();
    type Error = FiniteError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), FiniteError> {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Result<(), FiniteError> {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteCheck {
    type Ok = ();
    type Error = FiniteError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), FiniteError> {
        key.serialize(FiniteCheck)
    }
    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), FiniteError> {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Result<(), FiniteError> {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteCheck {
    type Ok = ();
    type Error = FiniteError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _: &'static str,
        value: &T,
    ) -> Result<(), FiniteError> {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Result<(), FiniteError> {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteCheck {
    type Ok = ();
    type Error = FiniteError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _: &'static str,
        value: &T,
    ) -> Result<(), FiniteError> {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Result<(), FiniteError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    #[test]
    fn finite_values_pass() {
        assert!(all_finite(&json!({"a": [1.5, 2], "b": {"c": null}})));
        assert!(all_finite(&(1, "x", Some(2.0f32))));
    }

    #[test]
    fn nested_non_finite_values_are_found() {
        let mut bindings = BTreeMap::new();
        bindings.insert("ratio", vec![1.0, f64::NAN]);
        assert!(!all_finite(&bindings));
        assert!(!all_finite(&Some(f32::INFINITY)));
    }
}
