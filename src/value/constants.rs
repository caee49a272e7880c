//! Boundary and seeded constants for value injection
//!
//! The pool holds edge cases that random generation rarely hits (zero, empty,
//! representable extremes and one-past-boundary values) plus constants seeded
//! from the subject under test. Subject constants are kept separately so the
//! value pool can prefer them.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use super::Value;

#[derive(Debug, Clone)]
pub struct ConstantPool {
    pub integers: Vec<i64>,
    pub floats: Vec<f64>,
    pub strings: Vec<String>,
    pub bytes: Vec<Vec<u8>>,
    /// Constants harvested from the subject, by kind
    seeded_integers: Vec<i64>,
    seeded_floats: Vec<f64>,
    seeded_strings: Vec<String>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self {
            integers: vec![
                0, 1, -1,
                2, -2, 10, -10, 100, -100,
                i8::MIN as i64, i8::MAX as i64,
                i16::MIN as i64, i16::MAX as i64,
                i32::MIN as i64, i32::MAX as i64,
                i64::MIN, i64::MAX,
                // one past the narrower boundaries
                i32::MAX as i64 + 1, i32::MIN as i64 - 1,
                i64::MAX - 1, i64::MIN + 1,
            ],
            floats: vec![
                0.0, -0.0, 1.0, -1.0, 0.5, -0.5,
                f64::NAN, f64::INFINITY, f64::NEG_INFINITY,
                f64::MIN, f64::MAX, f64::MIN_POSITIVE, f64::EPSILON,
            ],
            strings: vec![
                String::new(),
                " ".to_string(),
                "a".to_string(),
                "\n".to_string(),
                "\t".to_string(),
                "\"".to_string(),
                "\\".to_string(),
                "0".to_string(),
                "α".to_string(),
            ],
            bytes: vec![vec![], vec![0], vec![255], vec![0, 255]],
            seeded_integers: Vec::new(),
            seeded_floats: Vec::new(),
            seeded_strings: Vec::new(),
        }
    }

    /// Add subject constants together with their immediate neighbours
    pub fn seed(&mut self, constants: &[Value]) {
        for constant in constants {
            match constant {
                Value::Int(i) => {
                    for candidate in [i.saturating_sub(1), *i, i.saturating_add(1)] {
                        if !self.seeded_integers.contains(&candidate) {
                            self.seeded_integers.push(candidate);
                        }
                    }
                }
                Value::Float(f) => {
                    for candidate in [*f - 1.0, *f, *f + 1.0] {
                        if !self.seeded_floats.iter().any(|x| x.to_bits() == candidate.to_bits()) {
                            self.seeded_floats.push(candidate);
                        }
                    }
                }
                Value::Str(s) => {
                    if !self.seeded_strings.contains(s) {
                        self.seeded_strings.push(s.clone());
                    }
                }
                _ => {}
            }
        }
        log::debug!(
            "Seeded constant pool: {} ints, {} floats, {} strings",
            self.seeded_integers.len(),
            self.seeded_floats.len(),
            self.seeded_strings.len()
        );
    }

    pub fn has_seeded(&self) -> bool {
        !(self.seeded_integers.is_empty() && self.seeded_floats.is_empty() && self.seeded_strings.is_empty())
    }

    pub fn integer(&self, rng: &mut ChaCha8Rng) -> i64 {
        pick(rng, &self.seeded_integers, &self.integers).copied().unwrap_or(0)
    }

    pub fn float(&self, rng: &mut ChaCha8Rng) -> f64 {
        pick(rng, &self.seeded_floats, &self.floats).copied().unwrap_or(0.0)
    }

    pub fn string(&self, rng: &mut ChaCha8Rng) -> String {
        pick(rng, &self.seeded_strings, &self.strings).cloned().unwrap_or_default()
    }

    pub fn byte_string(&self, rng: &mut ChaCha8Rng) -> Vec<u8> {
        self.bytes.choose(rng).cloned().unwrap_or_default()
    }
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Seeded constants win half of the time when present
fn pick<'a, T>(rng: &mut ChaCha8Rng, seeded: &'a [T], boundary: &'a [T]) -> Option<&'a T> {
    if !seeded.is_empty() && rng.gen_bool(0.5) {
        seeded.choose(rng)
    } else {
        boundary.choose(rng)
    }
}
