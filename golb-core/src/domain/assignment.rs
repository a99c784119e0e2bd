//! Weight assignments and the coordination-store key schema.
//!
//! Weights live in the store under `golb/function/<zone>/<function>` with a
//! JSON value of the form `{"ips": [...], "weights": [...]}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Leading segments shared by every function key.
pub const KEY_PREFIX: &str = "golb/function";

/// Index-aligned targets and weights for one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightAssignment {
    /// Target addresses (`host` or `host:port`).
    pub ips: Vec<String>,
    /// Relative traffic share of the target at the same index.
    pub weights: Vec<u32>,
}

impl WeightAssignment {
    /// Builds an assignment from parallel target and weight lists.
    pub fn new<S: Into<String>>(ips: impl IntoIterator<Item = S>, weights: Vec<u32>) -> Self {
        Self {
            ips: ips.into_iter().map(Into::into).collect(),
            weights,
        }
    }

    /// Decodes the JSON payload stored for a function key.
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| Error::MalformedChangeEvent(format!("error parsing weight update: {e}")))
    }

    /// Checks that the assignment can back a scheduler.
    pub fn validate(&self) -> Result<()> {
        if self.ips.is_empty() {
            return Err(Error::InvalidWeights("no targets".to_string()));
        }
        if self.ips.len() != self.weights.len() {
            return Err(Error::InvalidWeights(format!(
                "{} targets but {} weights",
                self.ips.len(),
                self.weights.len()
            )));
        }
        if let Some(i) = self.weights.iter().position(|w| *w == 0) {
            return Err(Error::InvalidWeights(format!(
                "weight of {} must be positive",
                self.ips[i]
            )));
        }
        Ok(())
    }

    /// Number of targets.
    pub fn len(&self) -> usize {
        self.ips.len()
    }

    /// Whether the assignment has no targets.
    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }

    /// Returns a copy with the entry at `index` removed from both lists.
    pub fn without(&self, index: usize) -> Self {
        let mut ips = self.ips.clone();
        let mut weights = self.weights.clone();
        if index < ips.len() {
            ips.remove(index);
        }
        if index < weights.len() {
            weights.remove(index);
        }
        Self { ips, weights }
    }
}

/// Prefix under which all functions of `zone` are stored.
pub fn zone_prefix(zone: &str) -> String {
    format!("{KEY_PREFIX}/{zone}/")
}

/// Store key of a single function.
pub fn function_key(zone: &str, function: &str) -> String {
    format!("{KEY_PREFIX}/{zone}/{function}")
}

/// Splits `golb/function/<zone>/<function>` into its zone and function.
pub fn parse_function_key(key: &str) -> Result<(String, String)> {
    let malformed = || {
        Error::MalformedChangeEvent(format!(
            "key does not adhere to format 'golb/function/<zone>/<function>': {key}"
        ))
    };

    let segments: Vec<&str> = key.split('/').collect();
    match segments.as_slice() {
        ["golb", "function", zone, function] if !zone.is_empty() && !function.is_empty() => {
            Ok((zone.to_string(), function.to_string()))
        }
        _ => Err(malformed()),
    }
}

/// A single notified change of one function's weights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Zone taken from the key.
    pub zone: String,
    /// Function taken from the key.
    pub function: String,
    /// The new assignment.
    pub weights: WeightAssignment,
}

impl ChangeEvent {
    /// Decodes a store key/value pair.
    pub fn decode(key: &str, value: &str) -> Result<Self> {
        let (zone, function) = parse_function_key(key)?;
        let weights = WeightAssignment::from_json(value)?;
        Ok(Self {
            zone,
            function,
            weights,
        })
    }
}

/// All weight assignments known for a zone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionState {
    /// Zone this state belongs to.
    pub zone: String,
    /// Assignment per function name.
    pub functions: BTreeMap<String, WeightAssignment>,
}

impl FunctionState {
    /// Creates an empty state for `zone`.
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            functions: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_function_key() {
        let (zone, function) = parse_function_key("golb/function/zone-a/nginx").unwrap();
        assert_eq!(zone, "zone-a");
        assert_eq!(function, "nginx");
    }

    #[test]
    fn test_parse_function_key_rejects_other_shapes() {
        for key in [
            "golb/function/zone-a",
            "golb/function/zone-a/nginx/extra",
            "golb/other/zone-a/nginx",
            "golb/function/zone-a/",
            "",
        ] {
            assert!(
                matches!(parse_function_key(key), Err(Error::MalformedChangeEvent(_))),
                "{key} should be rejected"
            );
        }
    }

    #[test]
    fn test_key_helpers() {
        assert_eq!(zone_prefix("z1"), "golb/function/z1/");
        assert_eq!(function_key("z1", "nginx"), "golb/function/z1/nginx");
    }

    #[test]
    fn test_decode_change_event() {
        let event = ChangeEvent::decode(
            "golb/function/z1/nginx",
            r#"{"ips": ["10.0.0.1", "192.168.1.5:8080"], "weights": [1, 4]}"#,
        )
        .unwrap();

        assert_eq!(event.zone, "z1");
        assert_eq!(event.function, "nginx");
        assert_eq!(event.weights.ips, vec!["10.0.0.1", "192.168.1.5:8080"]);
        assert_eq!(event.weights.weights, vec![1, 4]);
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        for payload in [
            "not json",
            r#"{"ips": ["a"]}"#,
            r#"{"weights": [1]}"#,
            r#"{"ips": ["a"], "weights": [-1]}"#,
        ] {
            let res = ChangeEvent::decode("golb/function/z1/nginx", payload);
            assert!(matches!(res, Err(Error::MalformedChangeEvent(_))), "{payload}");
        }
    }

    #[test]
    fn test_validate() {
        assert!(WeightAssignment::new(["a", "b"], vec![1, 2]).validate().is_ok());
        assert!(matches!(
            WeightAssignment::new(Vec::<String>::new(), vec![]).validate(),
            Err(Error::InvalidWeights(_))
        ));
        assert!(matches!(
            WeightAssignment::new(["a", "b"], vec![1]).validate(),
            Err(Error::InvalidWeights(_))
        ));
        assert!(matches!(
            WeightAssignment::new(["a"], vec![0]).validate(),
            Err(Error::InvalidWeights(_))
        ));
    }

    #[test]
    fn test_without() {
        let w = WeightAssignment::new(["a", "b", "c"], vec![1, 2, 3]);
        assert_eq!(w.without(1), WeightAssignment::new(["a", "c"], vec![1, 3]));
        assert_eq!(w.without(7), w);
    }
}
