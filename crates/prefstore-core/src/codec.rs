//! Value codec: classifies values, (de)serializes complex ones as JSON, and
//! maps stored values onto the typed slots backends offer.
//!
//! Doubles are written to the text slot in their decimal form while every
//! other primitive uses its native slot. Readers depend on that string form,
//! so the asymmetry is kept on purpose.

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::{
    error::StoreError,
    kv::Slot,
    value::{PreferenceValue, Primitive, PrimitiveKind, StoredValue, ValueKind},
};

/// Static classification of `value`'s type.
pub fn classify<T: PreferenceValue>(_value: &T) -> ValueKind {
    T::KIND
}

/// Serialize a complex value to its JSON text form.
pub fn serialize<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(StoreError::serialization)
}

/// Parse JSON text into `T`, reporting malformed input as an error.
pub fn try_deserialize<T: DeserializeOwned>(text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(StoreError::serialization)
}

/// Parse JSON text into `T`, falling back to `default` on any parse failure.
pub fn deserialize<T: DeserializeOwned>(text: &str, default: T) -> T {
    match try_deserialize(text) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "json decode failed, using default");
            default
        }
    }
}

/// Map a stored value onto the slot it occupies in a backend.
pub fn to_slot(value: StoredValue) -> Slot {
    match value {
        StoredValue::Primitive(Primitive::Bool(v)) => Slot::Bool(v),
        StoredValue::Primitive(Primitive::Int(v)) => Slot::Int(v),
        StoredValue::Primitive(Primitive::Float(v)) => Slot::Float(v),
        StoredValue::Primitive(Primitive::Long(v)) => Slot::Long(v),
        StoredValue::Primitive(Primitive::Double(v)) => Slot::Text(v.to_string()),
        StoredValue::Primitive(Primitive::Text(v)) => Slot::Text(v),
        StoredValue::SerializedComplex(json) => Slot::Text(json),
    }
}

/// Read a slot back as the requested kind.
///
/// A slot holding a different type is [`StoreError::UnsupportedType`]; the
/// value is never coerced.
pub fn from_slot(kind: ValueKind, slot: Slot) -> Result<StoredValue, StoreError> {
    let found = slot.type_name();
    match (kind, slot) {
        (ValueKind::Primitive(PrimitiveKind::Bool), Slot::Bool(v)) => Ok(Primitive::Bool(v).into()),
        (ValueKind::Primitive(PrimitiveKind::Int), Slot::Int(v)) => Ok(Primitive::Int(v).into()),
        (ValueKind::Primitive(PrimitiveKind::Float), Slot::Float(v)) => {
            Ok(Primitive::Float(v).into())
        }
        (ValueKind::Primitive(PrimitiveKind::Long), Slot::Long(v)) => Ok(Primitive::Long(v).into()),
        (ValueKind::Primitive(PrimitiveKind::Double), Slot::Text(v)) => {
            Primitive::parse(PrimitiveKind::Double, &v).map(StoredValue::Primitive)
        }
        (ValueKind::Primitive(PrimitiveKind::Text), Slot::Text(v)) => Ok(Primitive::Text(v).into()),
        (ValueKind::Complex, Slot::Text(json)) => Ok(StoredValue::SerializedComplex(json)),
        (kind, _) => Err(StoreError::UnsupportedType {
            expected: kind.name(),
            found,
        }),
    }
}

/// Interpret decrypted plaintext as the requested kind.
pub fn from_text(kind: ValueKind, text: String) -> Result<StoredValue, StoreError> {
    match kind {
        ValueKind::Primitive(kind) => Primitive::parse(kind, &text).map(StoredValue::Primitive),
        ValueKind::Complex => Ok(StoredValue::SerializedComplex(text)),
    }
}

impl From<Primitive> for StoredValue {
    fn from(value: Primitive) -> Self {
        StoredValue::Primitive(value)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde::Deserialize;

    use super::*;
    use crate::value::Json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Settings {
        theme: String,
        font_size: u32,
        recent: Vec<String>,
        flags: BTreeMap<String, bool>,
    }

    fn sample() -> Settings {
        Settings {
            theme: "dark".into(),
            font_size: 14,
            recent: vec!["a.txt".into(), "b.txt".into()],
            flags: BTreeMap::from([("beta".into(), true)]),
        }
    }

    #[test]
    fn complex_values_survive_serialization() {
        let text = serialize(&sample()).expect("serialize");
        let back: Settings = deserialize(&text, Settings {
            theme: String::new(),
            font_size: 0,
            recent: vec![],
            flags: BTreeMap::new(),
        });
        assert_eq!(back, sample());
    }

    #[test]
    fn malformed_json_falls_back_to_default() {
        let fallback = sample();
        let back: Settings = deserialize("{not json", fallback.clone());
        assert_eq!(back, fallback);
    }

    #[test]
    fn classify_follows_static_type() {
        assert_eq!(classify(&1_i32), ValueKind::Primitive(PrimitiveKind::Int));
        assert_eq!(classify(&2.5_f64), ValueKind::Primitive(PrimitiveKind::Double));
        assert_eq!(classify(&Json(sample())), ValueKind::Complex);
    }

    #[test]
    fn doubles_are_widened_to_text_slots() {
        let slot = to_slot(Primitive::Double(1.25).into());
        assert_eq!(slot, Slot::Text("1.25".into()));

        let back = from_slot(ValueKind::Primitive(PrimitiveKind::Double), slot).expect("decode");
        assert_eq!(back, StoredValue::Primitive(Primitive::Double(1.25)));
    }

    #[test]
    fn floats_keep_native_slots() {
        assert_eq!(to_slot(Primitive::Float(1.5).into()), Slot::Float(1.5));
        assert_eq!(to_slot(Primitive::Long(7).into()), Slot::Long(7));
    }

    #[test]
    fn slot_type_mismatch_is_unsupported() {
        let err = from_slot(ValueKind::Primitive(PrimitiveKind::Int), Slot::Text("1".into()))
            .expect_err("text slot is not i32");
        assert_eq!(
            err,
            StoreError::UnsupportedType {
                expected: "i32",
                found: "text",
            }
        );
    }
}
