//! Value marshalling — turns loosely-typed JSON parameters into typed host values.
//!
//! Handlers never poke at raw JSON for host-shaped data. They ask for a
//! [`ValueShape`] (or a Rust type implementing [`Marshal`]) and [`coerce`]
//! does the conversion: pass-through when the JSON is already the right
//! primitive, field extraction for the small numeric aggregates, and a
//! generic primitive conversion otherwise.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// The target type a raw parameter should be coerced into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueShape {
    Bool,
    Int,
    Float,
    String,
    Vector2,
    Vector3,
    Color,
    /// Any JSON value, passed through untouched.
    Json,
}

impl ValueShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Vector2 => "vector2",
            Self::Vector3 => "vector3",
            Self::Color => "color",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ValueShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// RGBA color with components nominally in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Default for Color {
    /// Opaque black.
    fn default() -> Self {
        Self {
            r: 0.0,
            g: 0.0,
            b: 0.0,
            a: 1.0,
        }
    }
}

/// A strongly-typed value living on the host side.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Vector2(Vector2),
    Vector3(Vector3),
    Color(Color),
    Json(Value),
}

impl HostValue {
    pub fn shape(&self) -> ValueShape {
        match self {
            Self::Bool(_) => ValueShape::Bool,
            Self::Int(_) => ValueShape::Int,
            Self::Float(_) => ValueShape::Float,
            Self::String(_) => ValueShape::String,
            Self::Vector2(_) => ValueShape::Vector2,
            Self::Vector3(_) => ValueShape::Vector3,
            Self::Color(_) => ValueShape::Color,
            Self::Json(_) => ValueShape::Json,
        }
    }

    /// Render back to JSON for a response payload.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => json!(i),
            Self::Float(f) => json!(f),
            Self::String(s) => Value::String(s.clone()),
            Self::Vector2(v) => json!({ "x": v.x, "y": v.y }),
            Self::Vector3(v) => json!({ "x": v.x, "y": v.y, "z": v.z }),
            Self::Color(c) => json!({ "r": c.r, "g": c.g, "b": c.b, "a": c.a }),
            Self::Json(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    #[error("missing parameter '{0}'")]
    Missing(String),

    #[error("cannot convert {found} to {expected}")]
    Incompatible {
        expected: ValueShape,
        found: &'static str,
    },

    #[error("field '{field}' of {target} must be numeric")]
    NonNumericField {
        field: &'static str,
        target: ValueShape,
    },

    #[error("{value} is out of range for {target}")]
    OutOfRange { value: String, target: &'static str },

    #[error("parameter '{field}': {source}")]
    Field {
        field: String,
        #[source]
        source: Box<MarshalError>,
    },
}

impl MarshalError {
    /// Attach the parameter name the error came from.
    pub fn for_field(self, field: &str) -> Self {
        match self {
            Self::Missing(_) | Self::Field { .. } => self,
            other => Self::Field {
                field: field.to_string(),
                source: Box::new(other),
            },
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Coerce a raw JSON value into the requested host shape.
pub fn coerce(raw: &Value, target: ValueShape) -> Result<HostValue, MarshalError> {
    let incompatible = || MarshalError::Incompatible {
        expected: target,
        found: json_kind(raw),
    };

    match target {
        ValueShape::Json => Ok(HostValue::Json(raw.clone())),
        ValueShape::Bool => match raw {
            Value::Bool(b) => Ok(HostValue::Bool(*b)),
            Value::Number(n) => n
                .as_f64()
                .map(|f| HostValue::Bool(f != 0.0))
                .ok_or_else(incompatible),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(HostValue::Bool(true)),
                "false" | "0" => Ok(HostValue::Bool(false)),
                _ => Err(incompatible()),
            },
            _ => Err(incompatible()),
        },
        ValueShape::Int => match raw {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(HostValue::Int(i)),
                None => n.as_f64().and_then(integral).ok_or_else(incompatible),
            },
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .map(HostValue::Int)
                    .or_else(|| s.parse::<f64>().ok().and_then(integral))
                    .ok_or_else(incompatible)
            }
            Value::Bool(b) => Ok(HostValue::Int(i64::from(*b))),
            _ => Err(incompatible()),
        },
        ValueShape::Float => match raw {
            Value::Number(n) => n.as_f64().map(HostValue::Float).ok_or_else(incompatible),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(HostValue::Float)
                .map_err(|_| incompatible()),
            Value::Bool(b) => Ok(HostValue::Float(if *b { 1.0 } else { 0.0 })),
            _ => Err(incompatible()),
        },
        ValueShape::String => match raw {
            Value::String(s) => Ok(HostValue::String(s.clone())),
            Value::Number(n) => Ok(HostValue::String(n.to_string())),
            Value::Bool(b) => Ok(HostValue::String(b.to_string())),
            _ => Err(incompatible()),
        },
        ValueShape::Vector2 => {
            let [x, y] = components(raw, target, ["x", "y"], [0.0, 0.0])?;
            Ok(HostValue::Vector2(Vector2 { x, y }))
        }
        ValueShape::Vector3 => {
            let [x, y, z] = components(raw, target, ["x", "y", "z"], [0.0; 3])?;
            Ok(HostValue::Vector3(Vector3 { x, y, z }))
        }
        ValueShape::Color => {
            let [r, g, b, a] = components(raw, target, ["r", "g", "b", "a"], [0.0, 0.0, 0.0, 1.0])?;
            Ok(HostValue::Color(Color { r, g, b, a }))
        }
    }
}

fn integral(f: f64) -> Option<HostValue> {
    // i64::MAX as f64 rounds up, so the upper bound is exclusive.
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64)
        .then(|| HostValue::Int(f as i64))
}

/// Pull numeric components out of a keyed map (by name) or an array (by position).
fn components<const N: usize>(
    raw: &Value,
    target: ValueShape,
    names: [&'static str; N],
    defaults: [f64; N],
) -> Result<[f64; N], MarshalError> {
    let mut out = defaults;
    match raw {
        Value::Object(map) => {
            for (slot, name) in out.iter_mut().zip(names) {
                if let Some(value) = lookup(map, name) {
                    *slot = numeric(value).ok_or(MarshalError::NonNumericField {
                        field: name,
                        target,
                    })?;
                }
            }
        }
        Value::Array(items) => {
            for ((slot, name), value) in out.iter_mut().zip(names).zip(items) {
                *slot = numeric(value).ok_or(MarshalError::NonNumericField {
                    field: name,
                    target,
                })?;
            }
        }
        other => {
            return Err(MarshalError::Incompatible {
                expected: target,
                found: json_kind(other),
            });
        }
    }
    Ok(out)
}

fn lookup<'a>(map: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    map.get(name).or_else(|| {
        map.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A Rust type that can be produced from (and turned back into) a [`HostValue`].
pub trait Marshal: Sized {
    const SHAPE: ValueShape;

    fn from_host(value: HostValue) -> Result<Self, MarshalError>;

    fn into_host(self) -> HostValue;

    /// Coerce a raw JSON value straight into `Self`.
    fn from_json(raw: &Value) -> Result<Self, MarshalError> {
        Self::from_host(coerce(raw, Self::SHAPE)?)
    }
}

fn mismatch<T: Marshal>(value: &HostValue) -> MarshalError {
    MarshalError::Incompatible {
        expected: T::SHAPE,
        found: value.shape().as_str(),
    }
}

macro_rules! marshal_variant {
    ($ty:ty, $variant:ident) => {
        impl Marshal for $ty {
            const SHAPE: ValueShape = ValueShape::$variant;

            fn from_host(value: HostValue) -> Result<Self, MarshalError> {
                match value {
                    HostValue::$variant(inner) => Ok(inner),
                    other => Err(mismatch::<Self>(&other)),
                }
            }

            fn into_host(self) -> HostValue {
                HostValue::$variant(self)
            }
        }
    };
}

marshal_variant!(bool, Bool);
marshal_variant!(i64, Int);
marshal_variant!(f64, Float);
marshal_variant!(String, String);
marshal_variant!(Vector2, Vector2);
marshal_variant!(Vector3, Vector3);
marshal_variant!(Color, Color);
marshal_variant!(Value, Json);

impl Marshal for i32 {
    const SHAPE: ValueShape = ValueShape::Int;

    fn from_host(value: HostValue) -> Result<Self, MarshalError> {
        let wide = i64::from_host(value)?;
        i32::try_from(wide).map_err(|_| MarshalError::OutOfRange {
            value: wide.to_string(),
            target: "i32",
        })
    }

    fn into_host(self) -> HostValue {
        HostValue::Int(i64::from(self))
    }
}

impl Marshal for f32 {
    const SHAPE: ValueShape = ValueShape::Float;

    fn from_host(value: HostValue) -> Result<Self, MarshalError> {
        f64::from_host(value).map(|f| f as f32)
    }

    fn into_host(self) -> HostValue {
        HostValue::Float(f64::from(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_primitives() {
        assert_eq!(coerce(&json!(true), ValueShape::Bool).unwrap(), HostValue::Bool(true));
        assert_eq!(coerce(&json!(42), ValueShape::Int).unwrap(), HostValue::Int(42));
        assert_eq!(coerce(&json!(1.5), ValueShape::Float).unwrap(), HostValue::Float(1.5));
        assert_eq!(
            coerce(&json!("cube"), ValueShape::String).unwrap(),
            HostValue::String("cube".into())
        );
    }

    #[test]
    fn test_json_shape_is_untouched() {
        let raw = json!({"nested": [1, 2, {"deep": null}]});
        assert_eq!(coerce(&raw, ValueShape::Json).unwrap(), HostValue::Json(raw));
    }

    #[test]
    fn test_vector3_from_map_with_zero_defaults() {
        let v = coerce(&json!({"x": 1.0, "z": -2}), ValueShape::Vector3).unwrap();
        assert_eq!(v, HostValue::Vector3(Vector3 { x: 1.0, y: 0.0, z: -2.0 }));
    }

    #[test]
    fn test_vector2_keys_are_case_insensitive() {
        let v = coerce(&json!({"X": 3, "Y": "4.5"}), ValueShape::Vector2).unwrap();
        assert_eq!(v, HostValue::Vector2(Vector2 { x: 3.0, y: 4.5 }));
    }

    #[test]
    fn test_color_alpha_defaults_to_one() {
        let c = coerce(&json!({"r": 1, "g": 0.5}), ValueShape::Color).unwrap();
        assert_eq!(
            c,
            HostValue::Color(Color { r: 1.0, g: 0.5, b: 0.0, a: 1.0 })
        );
    }

    #[test]
    fn test_aggregate_from_array() {
        let v = coerce(&json!([1, 2]), ValueShape::Vector3).unwrap();
        assert_eq!(v, HostValue::Vector3(Vector3 { x: 1.0, y: 2.0, z: 0.0 }));
        let c = coerce(&json!([0.1, 0.2, 0.3]), ValueShape::Color).unwrap();
        assert_eq!(c, HostValue::Color(Color { r: 0.1, g: 0.2, b: 0.3, a: 1.0 }));
    }

    #[test]
    fn test_aggregate_rejects_non_numeric_field() {
        let err = coerce(&json!({"x": "left"}), ValueShape::Vector3).unwrap_err();
        assert_eq!(
            err,
            MarshalError::NonNumericField {
                field: "x",
                target: ValueShape::Vector3
            }
        );
    }

    #[test]
    fn test_aggregate_rejects_scalar() {
        let err = coerce(&json!(5), ValueShape::Color).unwrap_err();
        assert!(matches!(err, MarshalError::Incompatible { found: "number", .. }));
    }

    #[test]
    fn test_primitive_conversions() {
        assert_eq!(coerce(&json!("12"), ValueShape::Int).unwrap(), HostValue::Int(12));
        assert_eq!(coerce(&json!("3.0"), ValueShape::Int).unwrap(), HostValue::Int(3));
        assert_eq!(coerce(&json!(4.0), ValueShape::Int).unwrap(), HostValue::Int(4));
        assert_eq!(coerce(&json!(" 2.5 "), ValueShape::Float).unwrap(), HostValue::Float(2.5));
        assert_eq!(coerce(&json!("TRUE"), ValueShape::Bool).unwrap(), HostValue::Bool(true));
        assert_eq!(coerce(&json!(0), ValueShape::Bool).unwrap(), HostValue::Bool(false));
        assert_eq!(
            coerce(&json!(7), ValueShape::String).unwrap(),
            HostValue::String("7".into())
        );
    }

    #[test]
    fn test_failed_conversions() {
        assert!(coerce(&json!(2.5), ValueShape::Int).is_err());
        assert!(coerce(&json!("abc"), ValueShape::Float).is_err());
        assert!(coerce(&json!("maybe"), ValueShape::Bool).is_err());
        assert!(coerce(&json!(null), ValueShape::String).is_err());
        assert!(coerce(&json!({"a": 1}), ValueShape::Int).is_err());
    }

    #[test]
    fn test_marshal_trait_round_trip() {
        let v = Vector3::from_json(&json!({"x": 1, "y": 2, "z": 3})).unwrap();
        assert_eq!(v.into_host().to_json(), json!({"x": 1.0, "y": 2.0, "z": 3.0}));

        assert_eq!(f32::from_json(&json!("0.5")).unwrap(), 0.5_f32);
        assert_eq!(i32::from_json(&json!(-7)).unwrap(), -7);
    }

    #[test]
    fn test_i32_out_of_range() {
        let err = i32::from_json(&json!(5_000_000_000_i64)).unwrap_err();
        assert!(matches!(err, MarshalError::OutOfRange { target: "i32", .. }));
    }

    #[test]
    fn test_for_field_wraps_once() {
        let err = MarshalError::Incompatible {
            expected: ValueShape::Int,
            found: "object",
        }
        .for_field("count");
        assert_eq!(err.to_string(), "parameter 'count': cannot convert object to int");
        assert_eq!(err.clone().for_field("other"), err);
    }
}
