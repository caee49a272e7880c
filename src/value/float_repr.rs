//! Serde representation for `f64` that survives JSON
//!
//! Finite values are written as numbers. NaN and the infinities, which JSON
//! cannot express, are written as the strings `"NaN"`, `"inf"` and `"-inf"`.
//! Use as `#[serde(with = "crate::value::float_repr")]`, or
//! `float_repr::seq` for a `Vec<f64>`.

use serde::de::{self, Deserialize, Deserializer, Visitor};
use serde::ser::Serializer;
use std::fmt;

const NAN: &str = "NaN";
const INFINITY: &str = "inf";
const NEG_INFINITY: &str = "-inf";

pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else if value.is_nan() {
        serializer.serialize_str(NAN)
    } else if *value > 0.0 {
        serializer.serialize_str(INFINITY)
    } else {
        serializer.serialize_str(NEG_INFINITY)
    }
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    deserializer.deserialize_any(FloatVisitor)
}

struct FloatVisitor;

impl<'de> Visitor<'de> for FloatVisitor {
    type Value = f64;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "a number or one of {:?}, {:?}, {:?}", NAN, INFINITY, NEG_INFINITY)
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<f64, E> {
        Ok(value)
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<f64, E> {
        Ok(value as f64)
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<f64, E> {
        Ok(value as f64)
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<f64, E> {
        match value {
            NAN => Ok(f64::NAN),
            INFINITY => Ok(f64::INFINITY),
            NEG_INFINITY => Ok(f64::NEG_INFINITY),
            other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
struct Repr(#[serde(with = "crate::value::float_repr")] f64);

pub mod seq {
    use super::*;

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|value| Repr(*value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let values = Vec::<Repr>::deserialize(deserializer)?;
        Ok(values.into_iter().map(|value| value.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, serde::Serialize, serde::Deserialize)]
    struct Sample {
        #[serde(with = "crate::value::float_repr")]
        x: f64,
        #[serde(with = "crate::value::float_repr::seq")]
        xs: Vec<f64>,
    }

    #[test]
    fn test_non_finite_values_round_trip() {
        let sample = Sample {
            x: f64::NAN,
            xs: vec![f64::INFINITY, f64::NEG_INFINITY, 1.5],
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(json, r#"{"x":"NaN","xs":["inf","-inf",1.5]}"#);

        let back: Sample = serde_json::from_str(&json).unwrap();
        assert!(back.x.is_nan());
        assert_eq!(back.xs[0], f64::INFINITY);
        assert_eq!(back.xs[1], f64::NEG_INFINITY);
        assert_eq!(back.xs[2], 1.5);
    }

    #[test]
    fn test_integers_and_unknown_strings() {
        let back: Sample = serde_json::from_str(r#"{"x":3,"xs":[]}"#).unwrap();
        assert_eq!(back.x, 3.0);
        assert!(serde_json::from_str::<Sample>(r#"{"x":"big","xs":[]}"#).is_err());
    }
}
