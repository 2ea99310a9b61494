//! The self-reported client identity and the vector distance metric
//! used for the nearest-neighbour hint at join time.

use crate::*;

/// The identity a client sends when it joins the hub.
///
/// Immutable after registration. The vector is used solely for the
/// nearest-neighbour hint on join.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDescriptor {
    /// Globally unique client id.
    pub id: ClientId,

    /// Client-reported join time. Opaque to the hub, echoed as-is.
    pub joined_at: String,

    /// Feature vector used for the nearest-neighbour hint.
    pub vector: Vec<f64>,
}

impl ClientDescriptor {
    /// Validate and extract a descriptor from a raw join payload.
    ///
    /// A descriptor missing `id` (non-empty string), `joinedAt` (string)
    /// or `vector` (sequence of numbers) is malformed.
    pub fn from_value(value: &serde_json::Value) -> CxResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| CxError::malformed("descriptor must be an object"))?;

        let id = match obj.get("id").and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() => ClientId::from(id),
            _ => {
                return Err(CxError::malformed(
                    "descriptor requires a non-empty string id",
                ))
            }
        };

        let joined_at = obj
            .get("joinedAt")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                CxError::malformed("descriptor requires a joinedAt string")
            })?
            .to_string();

        let vector = obj
            .get("vector")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                CxError::malformed("descriptor requires a vector of numbers")
            })?
            .iter()
            .map(|v| {
                v.as_f64().ok_or_else(|| {
                    CxError::malformed("descriptor vector entries must be numbers")
                })
            })
            .collect::<CxResult<Vec<f64>>>()?;

        Ok(Self {
            id,
            joined_at,
            vector,
        })
    }
}

/// Distance between two client vectors.
///
/// Euclidean distance over the shared prefix, plus the difference in
/// lengths as a penalty. Comparing against a zero-length vector is
/// infinitely distant.
pub fn vector_distance(a: &[f64], b: &[f64]) -> f64 {
    let l = a.len().min(b.len());
    if l == 0 {
        return f64::INFINITY;
    }
    let sq: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum();
    sq.sqrt() + (a.len() as f64 - b.len() as f64).abs()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn descriptor_happy_path() {
        let v = serde_json::json!({
            "id": "worker-1",
            "joinedAt": "2024-01-01T00:00:00Z",
            "vector": [0.5, 1, 2],
        });
        let d = ClientDescriptor::from_value(&v).unwrap();
        assert_eq!(ClientId::from("worker-1"), d.id);
        assert_eq!(vec![0.5, 1.0, 2.0], d.vector);
    }

    #[test]
    fn descriptor_rejects_missing_fields() {
        for v in [
            serde_json::json!("nope"),
            serde_json::json!({ "joinedAt": "t", "vector": [] }),
            serde_json::json!({ "id": "", "joinedAt": "t", "vector": [] }),
            serde_json::json!({ "id": "a", "vector": [] }),
            serde_json::json!({ "id": "a", "joinedAt": "t" }),
            serde_json::json!({ "id": "a", "joinedAt": "t", "vector": ["x"] }),
        ] {
            assert!(matches!(
                ClientDescriptor::from_value(&v),
                Err(CxError::Malformed { .. }),
            ));
        }
    }

    #[test]
    fn descriptor_wire_form_is_camel_case() {
        let d = ClientDescriptor {
            id: "a".into(),
            joined_at: "t".into(),
            vector: vec![1.0],
        };
        let enc = serde_json::to_value(&d).unwrap();
        assert_eq!(
            serde_json::json!({ "id": "a", "joinedAt": "t", "vector": [1.0] }),
            enc,
        );
    }

    #[test]
    fn distance_three_four_five() {
        assert_eq!(5.0, vector_distance(&[0.0, 0.0, 0.0], &[3.0, 4.0, 0.0]));
    }

    #[test]
    fn distance_is_symmetric_and_zero_on_self() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0];
        assert_eq!(vector_distance(&a, &b), vector_distance(&b, &a));
        assert_eq!(0.0, vector_distance(&a, &a));
    }

    #[test]
    fn distance_length_penalty() {
        // shared prefix identical, lengths differ by 2
        assert_eq!(2.0, vector_distance(&[1.0], &[1.0, 9.0, 9.0]));
    }

    #[test]
    fn distance_empty_is_infinite() {
        assert_eq!(f64::INFINITY, vector_distance(&[], &[1.0]));
        assert_eq!(f64::INFINITY, vector_distance(&[], &[]));
    }
}
