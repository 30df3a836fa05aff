use std::ops::{Deref, DerefMut};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{codec, error::StoreError};

/// The closed set of kinds that backends store in native typed slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Bool,
    Int,
    Float,
    Long,
    Double,
    Text,
}

impl PrimitiveKind {
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Bool => "bool",
            PrimitiveKind::Int => "i32",
            PrimitiveKind::Float => "f32",
            PrimitiveKind::Long => "i64",
            PrimitiveKind::Double => "f64",
            PrimitiveKind::Text => "text",
        }
    }
}

/// A primitive value. Matched exhaustively everywhere; there is no fallthrough arm.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Bool(bool),
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Text(String),
}

impl Primitive {
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Primitive::Bool(_) => PrimitiveKind::Bool,
            Primitive::Int(_) => PrimitiveKind::Int,
            Primitive::Float(_) => PrimitiveKind::Float,
            Primitive::Long(_) => PrimitiveKind::Long,
            Primitive::Double(_) => PrimitiveKind::Double,
            Primitive::Text(_) => PrimitiveKind::Text,
        }
    }

    /// Text form used as the plaintext of encrypted values.
    ///
    /// Floats use Rust's shortest round-trip formatting, so `parse` recovers
    /// the exact bit pattern for every finite value.
    pub fn to_text(&self) -> String {
        match self {
            Primitive::Bool(v) => v.to_string(),
            Primitive::Int(v) => v.to_string(),
            Primitive::Float(v) => v.to_string(),
            Primitive::Long(v) => v.to_string(),
            Primitive::Double(v) => v.to_string(),
            Primitive::Text(v) => v.clone(),
        }
    }

    /// Parse text produced by [`Primitive::to_text`] back into the given kind.
    pub fn parse(kind: PrimitiveKind, text: &str) -> Result<Self, StoreError> {
        let parsed = match kind {
            PrimitiveKind::Bool => text.parse().map(Primitive::Bool).map_err(codec_err),
            PrimitiveKind::Int => text.parse().map(Primitive::Int).map_err(codec_err),
            PrimitiveKind::Float => text.parse().map(Primitive::Float).map_err(codec_err),
            PrimitiveKind::Long => text.parse().map(Primitive::Long).map_err(codec_err),
            PrimitiveKind::Double => text.parse().map(Primitive::Double).map_err(codec_err),
            PrimitiveKind::Text => Ok(Primitive::Text(text.to_string())),
        };
        parsed.map_err(|reason| StoreError::Serialization {
            reason: format!("cannot parse {} from text: {reason}", kind.name()),
        })
    }
}

fn codec_err<E: ToString>(err: E) -> String {
    err.to_string()
}

/// Static classification of a value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Primitive(PrimitiveKind),
    Complex,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Primitive(kind) => kind.name(),
            ValueKind::Complex => "complex",
        }
    }
}

/// Tagged representation of a value on its way to (or from) a backend slot.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Primitive(Primitive),
    /// A JSON document produced by [`codec::serialize`].
    SerializedComplex(String),
}

impl StoredValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            StoredValue::Primitive(p) => ValueKind::Primitive(p.kind()),
            StoredValue::SerializedComplex(_) => ValueKind::Complex,
        }
    }
}

/// A type that can be persisted under a preference key.
///
/// Implemented for the six primitives and for [`Json`]. The decode side must
/// be given the same [`ValueKind`] the encode side produced; anything else is
/// an [`StoreError::UnsupportedType`].
pub trait PreferenceValue: Clone + PartialEq + Send + Sync + 'static {
    const KIND: ValueKind;

    fn to_stored(&self) -> Result<StoredValue, StoreError>;

    fn from_stored(value: StoredValue) -> Result<Self, StoreError>;

    /// Equality used to skip redundant writes. Floats compare by bit pattern
    /// so that `NaN` equals itself.
    fn same_value(&self, other: &Self) -> bool {
        self == other
    }
}

/// The primitive subset of [`PreferenceValue`]; the only types the value cipher accepts.
pub trait PrimitiveValue: PreferenceValue {
    const PRIMITIVE: PrimitiveKind;

    fn to_primitive(&self) -> Primitive;

    fn from_primitive(value: Primitive) -> Result<Self, StoreError>;
}

macro_rules! primitive_value {
    ($ty:ty, $variant:ident) => {
        primitive_value!($ty, $variant, |a: &$ty, b: &$ty| a == b);
    };
    ($ty:ty, $variant:ident, $same:expr) => {
        impl PrimitiveValue for $ty {
            const PRIMITIVE: PrimitiveKind = PrimitiveKind::$variant;

            fn to_primitive(&self) -> Primitive {
                Primitive::$variant(<$ty as Clone>::clone(self))
            }

            fn from_primitive(value: Primitive) -> Result<Self, StoreError> {
                match value {
                    Primitive::$variant(inner) => Ok(inner),
                    other => Err(StoreError::UnsupportedType {
                        expected: PrimitiveKind::$variant.name(),
                        found: other.kind().name(),
                    }),
                }
            }
        }

        impl PreferenceValue for $ty {
            const KIND: ValueKind = ValueKind::Primitive(PrimitiveKind::$variant);

            fn to_stored(&self) -> Result<StoredValue, StoreError> {
                Ok(StoredValue::Primitive(self.to_primitive()))
            }

            fn from_stored(value: StoredValue) -> Result<Self, StoreError> {
                match value {
                    StoredValue::Primitive(p) => Self::from_primitive(p),
                    StoredValue::SerializedComplex(_) => Err(StoreError::UnsupportedType {
                        expected: PrimitiveKind::$variant.name(),
                        found: ValueKind::Complex.name(),
                    }),
                }
            }

            fn same_value(&self, other: &Self) -> bool {
                ($same)(self, other)
            }
        }
    };
}

primitive_value!(bool, Bool);
primitive_value!(i32, Int);
primitive_value!(f32, Float, |a: &f32, b: &f32| a.to_bits() == b.to_bits());
primitive_value!(i64, Long);
primitive_value!(f64, Double, |a: &f64, b: &f64| a.to_bits() == b.to_bits());
primitive_value!(String, Text);

/// Marks a serde type as a complex value stored as a JSON document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Json<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Json<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T> PreferenceValue for Json<T>
where
    T: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static,
{
    const KIND: ValueKind = ValueKind::Complex;

    fn to_stored(&self) -> Result<StoredValue, StoreError> {
        codec::serialize(&self.0).map(StoredValue::SerializedComplex)
    }

    fn from_stored(value: StoredValue) -> Result<Self, StoreError> {
        match value {
            StoredValue::SerializedComplex(text) => codec::try_deserialize(&text).map(Json),
            StoredValue::Primitive(p) => Err(StoreError::UnsupportedType {
                expected: ValueKind::Complex.name(),
                found: p.kind().name(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_compare_by_bit_pattern() {
        assert!(f64::NAN.same_value(&f64::NAN));
        assert!(f32::NAN.same_value(&f32::NAN));
        assert!(!0.0_f64.same_value(&-0.0));
        assert!(1.5_f32.same_value(&1.5));
        assert!("a".to_string().same_value(&"a".to_string()));
        assert!(!Json(vec![1]).same_value(&Json(vec![2])));
    }

    #[test]
    fn primitive_text_round_trips_exactly() {
        let values = [
            Primitive::Bool(true),
            Primitive::Int(i32::MIN),
            Primitive::Float(0.1),
            Primitive::Long(i64::MAX),
            Primitive::Double(std::f64::consts::PI),
            Primitive::Text("héllo, world".into()),
        ];
        for value in values {
            let parsed = Primitive::parse(value.kind(), &value.to_text()).expect("parse");
            assert_eq!(parsed, value);
        }
    }

    #[test]
    fn parse_rejects_text_of_another_kind() {
        let err = Primitive::parse(PrimitiveKind::Int, "true").expect_err("not an int");
        assert!(matches!(err, StoreError::Serialization { .. }));
    }

    #[test]
    fn mismatched_primitive_is_unsupported() {
        let err = i32::from_stored(StoredValue::Primitive(Primitive::Bool(false)))
            .expect_err("bool is not i32");
        assert_eq!(
            err,
            StoreError::UnsupportedType {
                expected: "i32",
                found: "bool",
            }
        );
    }

    #[test]
    fn json_wrapper_is_complex() {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct Profile {
            name: String,
            age: u8,
        }

        let value = Json(Profile {
            name: "ada".into(),
            age: 36,
        });
        let stored = value.to_stored().expect("serialize");
        assert_eq!(stored.kind(), ValueKind::Complex);
        assert_eq!(Json::<Profile>::from_stored(stored).expect("decode"), value);

        let err = Json::<Profile>::from_stored(StoredValue::Primitive(Primitive::Int(1)))
            .expect_err("int is not complex");
        assert!(matches!(err, StoreError::UnsupportedType { .. }));
    }
}
