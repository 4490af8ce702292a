//! Positional update parsing and validation.
//!
//! A positional update is an array whose index `i` addresses node (or link)
//! `i` of the live session. Elements are either bare values
//! (`[true, false, true]`) or objects carrying the field and, optionally, the
//! entity identity (`[{"id": "a", "selected": true}]`).
//!
//! Validation is pure: [`validate_positional`] only compares lengths. The
//! store decides what to do with a mismatch based on its [`LengthPolicy`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Identity;
use crate::error::HubError;

/// Which index space an update addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// `data.nodes`
    Nodes,
    /// `data.links`
    Links,
}

/// The positional updates the hub accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionalKind {
    /// `Node.selected`
    NodeSelections,
    /// `Node.cluster`
    NodeClusters,
    /// `Node.visible`
    NodeVisibilities,
    /// `Node.degree`
    NodeDegrees,
    /// `Link.visible`
    LinkVisibilities,
    /// `Link.mst`
    LinkMst,
}

impl PositionalKind {
    /// All kinds, in wire-name order.
    pub const ALL: [PositionalKind; 6] = [
        PositionalKind::NodeSelections,
        PositionalKind::NodeClusters,
        PositionalKind::NodeVisibilities,
        PositionalKind::NodeDegrees,
        PositionalKind::LinkVisibilities,
        PositionalKind::LinkMst,
    ];

    /// Index space addressed by this kind.
    pub fn scope(self) -> Scope {
        match self {
            PositionalKind::NodeSelections
            | PositionalKind::NodeClusters
            | PositionalKind::NodeVisibilities
            | PositionalKind::NodeDegrees => Scope::Nodes,
            PositionalKind::LinkVisibilities | PositionalKind::LinkMst => Scope::Links,
        }
    }

    /// Entity field written by this kind.
    pub fn field(self) -> &'static str {
        match self {
            PositionalKind::NodeSelections => "selected",
            PositionalKind::NodeClusters => "cluster",
            PositionalKind::NodeVisibilities | PositionalKind::LinkVisibilities => "visible",
            PositionalKind::NodeDegrees => "degree",
            PositionalKind::LinkMst => "mst",
        }
    }

    /// Wire message type, used both inbound and for the rebroadcast.
    pub fn message_type(self) -> &'static str {
        match self {
            PositionalKind::NodeSelections => "update-node-selections",
            PositionalKind::NodeClusters => "update-node-clusters",
            PositionalKind::NodeVisibilities => "update-node-visibilities",
            PositionalKind::NodeDegrees => "update-node-degrees",
            PositionalKind::LinkVisibilities => "update-link-visibilities",
            PositionalKind::LinkMst => "update-link-mst",
        }
    }

    /// Resolve a wire message type, including the older singular names.
    pub fn from_message_type(name: &str) -> Option<Self> {
        match name {
            "update-node-selections" | "update-node-selection" => {
                Some(PositionalKind::NodeSelections)
            }
            "update-node-clusters" | "update-node-cluster" => Some(PositionalKind::NodeClusters),
            "update-node-visibilities" | "update-node-visibility" => {
                Some(PositionalKind::NodeVisibilities)
            }
            "update-node-degrees" | "update-node-degree" => Some(PositionalKind::NodeDegrees),
            "update-link-visibilities" | "update-link-visibility" => {
                Some(PositionalKind::LinkVisibilities)
            }
            "update-link-mst" | "update-links-mst" => Some(PositionalKind::LinkMst),
            _ => None,
        }
    }

    fn expects_bool(self) -> bool {
        !matches!(
            self,
            PositionalKind::NodeClusters | PositionalKind::NodeDegrees
        )
    }

    /// Most bytes one write can add to the encoded dataset.
    ///
    /// `true` to `false` adds one; an `i64` field goes from 1 to at most 20
    /// characters.
    pub(crate) fn max_growth(self) -> usize {
        if self.expects_bool() {
            1
        } else {
            19
        }
    }
}

impl fmt::Display for PositionalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PositionalKind::NodeSelections => "node selections",
            PositionalKind::NodeClusters => "node clusters",
            PositionalKind::NodeVisibilities => "node visibilities",
            PositionalKind::NodeDegrees => "node degrees",
            PositionalKind::LinkVisibilities => "link visibilities",
            PositionalKind::LinkMst => "link mst",
        };
        f.write_str(name)
    }
}

/// A single field value carried by a positional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionalValue {
    /// For selection, visibility and MST flags.
    Flag(bool),
    /// For cluster ids and degrees.
    Int(i64),
}

impl PositionalValue {
    fn to_json(self) -> Value {
        match self {
            PositionalValue::Flag(b) => Value::Bool(b),
            PositionalValue::Int(n) => Value::from(n),
        }
    }
}

/// One element of a positional update.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionalEntry {
    /// New field value.
    pub value: PositionalValue,
    /// Identity the sender expects at this index.
    pub identity: Identity,
}

/// A parsed positional update.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionalUpdate {
    /// What is being updated.
    pub kind: PositionalKind,
    /// One entry per node or link, in index order.
    pub entries: Vec<PositionalEntry>,
}

impl PositionalUpdate {
    /// Build an update from bare values.
    pub fn from_values(kind: PositionalKind, values: impl IntoIterator<Item = PositionalValue>) -> Self {
        Self {
            kind,
            entries: values
                .into_iter()
                .map(|value| PositionalEntry {
                    value,
                    identity: Identity::Anonymous,
                })
                .collect(),
        }
    }

    /// Parse a wire payload.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::MalformedRequest`] if the payload is not an array
    /// or an element does not carry a value of the right type.
    pub fn from_json(kind: PositionalKind, payload: &Value) -> Result<Self, HubError> {
        let Value::Array(items) = payload else {
            return Err(HubError::MalformedRequest(format!(
                "{} expects an array payload",
                kind.message_type()
            )));
        };

        let mut entries = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let (raw, identity) = match item {
                Value::Object(object) => (
                    object.get(kind.field()).unwrap_or(&Value::Null),
                    Identity::of_object(kind.scope(), object),
                ),
                scalar => (scalar, Identity::Anonymous),
            };
            let value = parse_value(kind, raw).ok_or_else(|| {
                HubError::MalformedRequest(format!(
                    "{} entry {index} has no valid `{}` value",
                    kind.message_type(),
                    kind.field()
                ))
            })?;
            entries.push(PositionalEntry { value, identity });
        }

        Ok(Self { kind, entries })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the update carries no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The bare value array, as rebroadcast to other clients.
    pub fn values_json(&self) -> Value {
        Value::Array(self.entries.iter().map(|e| e.value.to_json()).collect())
    }
}

fn parse_value(kind: PositionalKind, raw: &Value) -> Option<PositionalValue> {
    if kind.expects_bool() {
        raw.as_bool().map(PositionalValue::Flag)
    } else {
        raw.as_i64()
            .or_else(|| {
                // JS clients send integral floats
                raw.as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| f as i64)
            })
            .map(PositionalValue::Int)
    }
}

/// Check a positional array against the current cardinality.
///
/// # Errors
///
/// Returns [`HubError::LengthMismatch`] when `entries.len() != expected`.
pub fn validate_positional<T>(
    kind: PositionalKind,
    entries: &[T],
    expected: usize,
) -> Result<(), HubError> {
    if entries.len() == expected {
        Ok(())
    } else {
        Err(HubError::LengthMismatch {
            kind,
            expected,
            actual: entries.len(),
        })
    }
}

/// What the store does with an update that fails validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthPolicy {
    /// Reject the whole update; nothing is mutated or broadcast.
    #[default]
    Strict,
    /// Log, apply the overlapping prefix and skip mismatched identities.
    Lenient,
}

impl FromStr for LengthPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(LengthPolicy::Strict),
            "lenient" => Ok(LengthPolicy::Lenient),
            other => Err(format!("unknown length policy: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_equal_length() {
        assert!(validate_positional(PositionalKind::NodeSelections, &[1, 2, 3][..], 3).is_ok());
    }

    #[test]
    fn test_validate_reports_expected_and_actual() {
        let err = validate_positional(PositionalKind::LinkMst, &[true][..], 4).unwrap_err();
        assert_eq!(
            err,
            HubError::LengthMismatch {
                kind: PositionalKind::LinkMst,
                expected: 4,
                actual: 1,
            }
        );
    }

    #[test]
    fn test_parse_bare_flags() {
        let update =
            PositionalUpdate::from_json(PositionalKind::NodeSelections, &json!([true, false]))
                .unwrap();
        assert_eq!(update.len(), 2);
        assert_eq!(update.entries[1].value, PositionalValue::Flag(false));
        assert_eq!(update.entries[0].identity, Identity::Anonymous);
    }

    #[test]
    fn test_parse_objects_with_identity() {
        let payload = json!([{"id": "a", "cluster": 2, "name": "x"}, {"id": "b", "cluster": 5.0}]);
        let update = PositionalUpdate::from_json(PositionalKind::NodeClusters, &payload).unwrap();

        assert_eq!(update.entries[0].value, PositionalValue::Int(2));
        assert_eq!(update.entries[0].identity, Identity::Id(json!("a")));
        assert_eq!(update.entries[1].value, PositionalValue::Int(5));
        assert_eq!(update.values_json(), json!([2, 5]));
    }

    #[test]
    fn test_parse_rejects_wrong_value_type() {
        let err = PositionalUpdate::from_json(PositionalKind::NodeVisibilities, &json!([true, 1]))
            .unwrap_err();
        assert!(matches!(err, HubError::MalformedRequest(_)));

        let err =
            PositionalUpdate::from_json(PositionalKind::NodeDegrees, &json!([1.5])).unwrap_err();
        assert!(matches!(err, HubError::MalformedRequest(_)));
    }

    #[test]
    fn test_parse_rejects_non_array() {
        let err = PositionalUpdate::from_json(PositionalKind::LinkMst, &json!({"mst": true}))
            .unwrap_err();
        assert!(matches!(err, HubError::MalformedRequest(_)));
    }

    #[test]
    fn test_message_type_aliases() {
        for kind in PositionalKind::ALL {
            assert_eq!(PositionalKind::from_message_type(kind.message_type()), Some(kind));
        }
        assert_eq!(
            PositionalKind::from_message_type("update-links-mst"),
            Some(PositionalKind::LinkMst)
        );
        assert_eq!(
            PositionalKind::from_message_type("update-node-selection"),
            Some(PositionalKind::NodeSelections)
        );
        assert_eq!(PositionalKind::from_message_type("update-clusters"), None);
    }

    #[test]
    fn test_length_policy_from_str() {
        assert_eq!("Lenient".parse::<LengthPolicy>(), Ok(LengthPolicy::Lenient));
        assert_eq!("strict".parse::<LengthPolicy>(), Ok(LengthPolicy::Strict));
        assert!("loose".parse::<LengthPolicy>().is_err());
    }
}
