// src/features.rs
//
// Derives a representative position and a body-size estimate from a raw
// detection record's landmark columns. Pure and stateless: one record in,
// at most one detection out.

use crate::types::{euclidean, Detection, Record, Value};

pub struct FeatureDeriver {
    /// Ordered landmark names; landmark `body` reads columns `body_x`/`body_y`.
    landmarks: Vec<String>,
    /// Index of the designated reference landmark (median of the list).
    reference: usize,
}

impl FeatureDeriver {
    pub fn new(landmarks: Vec<String>) -> Self {
        let reference = landmarks.len() / 2;
        Self {
            landmarks,
            reference,
        }
    }

    /// Derive a detection from one record.
    ///
    /// Position is the reference landmark's coordinate, falling back to the
    /// first valid landmark when the reference is missing. Size is the sum
    /// of segment distances between consecutive valid landmarks; missing
    /// landmarks are skipped, and fewer than two valid landmarks give size 0.
    ///
    /// Returns `None` only when no landmark is valid at all; the record is
    /// then a data gap, not an error.
    pub fn derive(&self, record: &Record) -> Option<Detection> {
        let points: Vec<Option<(f64, f64)>> = self
            .landmarks
            .iter()
            .map(|name| read_landmark(record, name))
            .collect();

        let position = points
            .get(self.reference)
            .copied()
            .flatten()
            .or_else(|| points.iter().copied().flatten().next())?;

        let valid: Vec<(f64, f64)> = points.into_iter().flatten().collect();
        let size = valid
            .windows(2)
            .map(|pair| euclidean(pair[0], pair[1]))
            .sum();

        Some(Detection {
            position,
            size,
            original_values: record.values.clone(),
        })
    }
}

fn read_landmark(record: &Record, name: &str) -> Option<(f64, f64)> {
    let x = read_coordinate(record, name, "x")?;
    let y = read_coordinate(record, name, "y")?;
    Some((x, y))
}

fn read_coordinate(record: &Record, name: &str, axis: &str) -> Option<f64> {
    let value = record.values.get(&format!("{}_{}", name, axis))?;
    match value {
        Value::Null => None,
        v => v.as_f64().filter(|v| v.is_finite()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueMap;

    fn record(fields: &[(&str, Value)]) -> Record {
        let mut values = ValueMap::new();
        values.insert("frame".to_string(), Value::Int(0));
        for (key, value) in fields {
            values.insert(key.to_string(), value.clone());
        }
        Record { frame: 0, values }
    }

    fn deriver() -> FeatureDeriver {
        FeatureDeriver::new(vec![
            "head".to_string(),
            "body".to_string(),
            "tail".to_string(),
        ])
    }

    #[test]
    fn test_position_is_median_landmark() {
        let rec = record(&[
            ("head_x", Value::Float(0.0)),
            ("head_y", Value::Float(0.0)),
            ("body_x", Value::Float(3.0)),
            ("body_y", Value::Float(4.0)),
            ("tail_x", Value::Float(3.0)),
            ("tail_y", Value::Float(8.0)),
        ]);
        let det = deriver().derive(&rec).unwrap();
        assert_eq!(det.position, (3.0, 4.0));
        // head→body = 5, body→tail = 4
        assert!((det.size - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_missing_landmark_skipped_in_size() {
        // Body missing: position falls back to first valid landmark and the
        // size sums head→tail directly.
        let rec = record(&[
            ("head_x", Value::Float(0.0)),
            ("head_y", Value::Float(0.0)),
            ("body_x", Value::Null),
            ("body_y", Value::Null),
            ("tail_x", Value::Float(6.0)),
            ("tail_y", Value::Float(8.0)),
        ]);
        let det = deriver().derive(&rec).unwrap();
        assert_eq!(det.position, (0.0, 0.0));
        assert!((det.size - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_valid_landmark_gives_zero_size() {
        let rec = record(&[
            ("body_x", Value::Float(2.0)),
            ("body_y", Value::Float(2.0)),
        ]);
        let det = deriver().derive(&rec).unwrap();
        assert_eq!(det.position, (2.0, 2.0));
        assert_eq!(det.size, 0.0);
    }

    #[test]
    fn test_no_valid_landmarks_is_a_gap() {
        let rec = record(&[("head_x", Value::Null), ("head_y", Value::Null)]);
        assert!(deriver().derive(&rec).is_none());
    }

    #[test]
    fn test_non_finite_coordinate_is_invalid() {
        let rec = record(&[
            ("head_x", Value::Float(f64::NAN)),
            ("head_y", Value::Float(1.0)),
            ("body_x", Value::Float(5.0)),
            ("body_y", Value::Float(5.0)),
        ]);
        let det = deriver().derive(&rec).unwrap();
        assert_eq!(det.position, (5.0, 5.0));
    }

    #[test]
    fn test_integer_coordinates_accepted() {
        let rec = record(&[
            ("body_x", Value::Int(7)),
            ("body_y", Value::Int(9)),
        ]);
        let det = deriver().derive(&rec).unwrap();
        assert_eq!(det.position, (7.0, 9.0));
    }
}
