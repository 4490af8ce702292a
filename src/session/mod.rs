//! Session data model.
//!
//! A [`Session`] is the single authoritative copy of the dataset plus the
//! UI-relevant state shared by every window. Node and link ordering is the
//! index space for positional updates: the store never reorders them once a
//! full replace has loaded them.
//!
//! # Module Structure
//!
//! - `mod.rs` - Session, Node, Link and the patch types clients send
//! - `store.rs` - [`SessionStore`], the owned mutation API
//! - `validate.rs` - positional update parsing and length validation

mod store;
mod validate;

pub use store::{Applied, SessionStore};
pub use validate::{
    validate_positional, LengthPolicy, PositionalEntry, PositionalKind, PositionalUpdate,
    PositionalValue, Scope,
};

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Default rendering opacity.
pub const DEFAULT_ALPHA: f64 = 0.3;

fn default_true() -> bool {
    true
}

/// A graph node. Fields the hub does not know about are carried in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Caller-defined identity (string or number).
    #[serde(default)]
    pub id: Value,
    /// Whether the node is selected.
    #[serde(default)]
    pub selected: bool,
    /// Cluster the node belongs to.
    #[serde(default)]
    pub cluster: i64,
    /// Whether the node is drawn.
    #[serde(default = "default_true")]
    pub visible: bool,
    /// Number of incident links.
    #[serde(default)]
    pub degree: i64,
    /// Arbitrary caller fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Node {
    /// Create a node with the given identity and default attributes.
    pub fn new(id: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            selected: false,
            cluster: 0,
            visible: true,
            degree: 0,
            extra: Map::new(),
        }
    }

    /// Identity used by the store's index map.
    pub fn identity(&self) -> Identity {
        Identity::of_node_id(&self.id)
    }
}

/// A graph link between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Source endpoint, by node identity.
    #[serde(default)]
    pub source: Value,
    /// Target endpoint, by node identity.
    #[serde(default)]
    pub target: Value,
    /// Whether the link is drawn.
    #[serde(default = "default_true")]
    pub visible: bool,
    /// Whether the link is part of the minimum spanning tree.
    #[serde(default)]
    pub mst: bool,
    /// Arbitrary caller fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Link {
    /// Create a visible, non-MST link.
    pub fn new(source: impl Into<Value>, target: impl Into<Value>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            visible: true,
            mst: false,
            extra: Map::new(),
        }
    }

    /// Identity used by the store's index map.
    ///
    /// An explicit `id` field wins over the endpoint pair.
    pub fn identity(&self) -> Identity {
        match self.extra.get("id") {
            Some(id) if !id.is_null() => Identity::Id(id.clone()),
            _ => Identity::of_endpoints(&self.source, &self.target),
        }
    }
}

/// Identity of a node or link at a given index.
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    /// Explicit identifier.
    Id(Value),
    /// Link endpoints, normalized to node ids.
    Endpoints(Value, Value),
    /// Nothing to compare against.
    Anonymous,
}

impl Identity {
    fn of_node_id(id: &Value) -> Self {
        if id.is_null() {
            Identity::Anonymous
        } else {
            Identity::Id(id.clone())
        }
    }

    fn of_endpoints(source: &Value, target: &Value) -> Self {
        if source.is_null() && target.is_null() {
            return Identity::Anonymous;
        }
        Identity::Endpoints(endpoint_key(source), endpoint_key(target))
    }

    /// Identity carried by an update element object, read with the same
    /// rules as the stored entity of the given scope.
    pub fn of_object(scope: Scope, object: &Map<String, Value>) -> Self {
        let id = object.get("id").unwrap_or(&Value::Null);
        match scope {
            Scope::Nodes => Identity::of_node_id(id),
            Scope::Links => {
                if !id.is_null() {
                    return Identity::Id(id.clone());
                }
                Identity::of_endpoints(
                    object.get("source").unwrap_or(&Value::Null),
                    object.get("target").unwrap_or(&Value::Null),
                )
            }
        }
    }

    /// Whether an update element with identity `self` may be applied to an
    /// entity stored as `stored`. Anonymous elements always match.
    pub fn matches(&self, stored: &Identity) -> bool {
        match self {
            Identity::Anonymous => true,
            other => other == stored,
        }
    }
}

/// Renderers replace link endpoints with whole node objects; compare by id.
fn endpoint_key(endpoint: &Value) -> Value {
    match endpoint {
        Value::Object(map) => map.get("id").cloned().unwrap_or(Value::Null),
        other => other.clone(),
    }
}

/// The dataset: nodes, links, clusters and the distance matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    /// Ordered nodes; the order is the positional index space.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Ordered links; the order is the positional index space.
    #[serde(default)]
    pub links: Vec<Link>,
    /// Cluster definitions, opaque to the hub.
    #[serde(default = "empty_array")]
    pub clusters: Value,
    /// Keyed distance matrix, opaque to the hub.
    #[serde(default = "empty_object")]
    pub distance_matrix: Value,
}

fn empty_array() -> Value {
    json!([])
}

fn empty_object() -> Value {
    json!({})
}

impl Default for SessionData {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            links: Vec::new(),
            clusters: empty_array(),
            distance_matrix: empty_object(),
        }
    }
}

/// UI state shared between windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    /// Cluster identifiers currently shown.
    #[serde(default)]
    pub visible_clusters: BTreeSet<i64>,
    /// Rendering opacity in [0, 1].
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

fn default_alpha() -> f64 {
    DEFAULT_ALPHA
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            visible_clusters: BTreeSet::new(),
            alpha: DEFAULT_ALPHA,
        }
    }
}

/// Root aggregate. Exactly one is live at a time, owned by the store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique identity of this session instance; a reset issues a new one.
    pub id: Uuid,
    /// Number of resets that preceded this session.
    pub generation: u64,
    /// Ingestion-source descriptors, opaque to the hub.
    pub files: Vec<Value>,
    /// The dataset.
    pub data: SessionData,
    /// Shared UI state.
    pub state: ViewState,
    /// Log and status lines.
    pub messages: Vec<String>,
}

impl Session {
    /// The empty skeleton a hub starts with.
    pub fn skeleton(generation: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            generation,
            files: Vec::new(),
            data: SessionData::default(),
            state: ViewState::default(),
            messages: Vec::new(),
        }
    }

    /// Whether the session holds nothing beyond the skeleton defaults.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
            && self.messages.is_empty()
            && self.data == SessionData::default()
            && self.state == ViewState::default()
    }
}

/// Partial `set-data` payload. Each present key replaces that field wholesale.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPatch {
    /// Replacement node list.
    #[serde(default)]
    pub nodes: Option<Vec<Node>>,
    /// Replacement link list.
    #[serde(default)]
    pub links: Option<Vec<Link>>,
    /// Replacement cluster definitions.
    #[serde(default)]
    pub clusters: Option<Value>,
    /// Replacement distance matrix.
    #[serde(default, alias = "distance_matrix")]
    pub distance_matrix: Option<Value>,
}

impl From<SessionData> for DataPatch {
    fn from(data: SessionData) -> Self {
        Self {
            nodes: Some(data.nodes),
            links: Some(data.links),
            clusters: Some(data.clusters),
            distance_matrix: Some(data.distance_matrix),
        }
    }
}

/// Partial `update-state` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePatch {
    /// Replacement set of visible clusters.
    #[serde(default)]
    pub visible_clusters: Option<BTreeSet<i64>>,
    /// Replacement opacity, clamped to [0, 1].
    #[serde(default)]
    pub alpha: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_keeps_unknown_fields() {
        let node: Node = serde_json::from_value(json!({
            "id": "seq-1",
            "selected": true,
            "_diff": 3,
            "origin": ["a.fasta"]
        }))
        .unwrap();

        assert_eq!(node.id, json!("seq-1"));
        assert!(node.selected);
        assert!(node.visible, "visible defaults to true");
        assert_eq!(node.extra.get("_diff"), Some(&json!(3)));

        let back = serde_json::to_value(&node).unwrap();
        assert_eq!(back["origin"], json!(["a.fasta"]));
        assert_eq!(back["cluster"], json!(0));
    }

    #[test]
    fn test_skeleton_serializes_with_camel_case_keys() {
        let session = Session::skeleton(0);
        let value = serde_json::to_value(&session).unwrap();

        assert_eq!(value["data"]["nodes"], json!([]));
        assert_eq!(value["data"]["links"], json!([]));
        assert_eq!(value["data"]["clusters"], json!([]));
        assert_eq!(value["data"]["distanceMatrix"], json!({}));
        assert_eq!(value["state"]["visibleClusters"], json!([]));
        assert_eq!(value["state"]["alpha"], json!(0.3));
        assert!(session.is_empty());
    }

    #[test]
    fn test_link_identity_prefers_explicit_id() {
        let mut link = Link::new("a", "b");
        assert_eq!(
            link.identity(),
            Identity::Endpoints(json!("a"), json!("b"))
        );

        link.extra.insert("id".to_string(), json!(7));
        assert_eq!(link.identity(), Identity::Id(json!(7)));
    }

    #[test]
    fn test_link_endpoints_normalize_node_objects() {
        let mut object = Map::new();
        object.insert("source".to_string(), json!({"id": "a", "x": 1.5}));
        object.insert("target".to_string(), json!("b"));

        let identity = Identity::of_object(Scope::Links, &object);
        assert_eq!(identity, Link::new("a", "b").identity());
    }

    #[test]
    fn test_anonymous_identity_matches_anything() {
        assert!(Identity::Anonymous.matches(&Identity::Id(json!(1))));
        assert!(!Identity::Id(json!(2)).matches(&Identity::Id(json!(1))));
    }

    #[test]
    fn test_data_patch_accepts_snake_case_matrix() {
        let patch: DataPatch =
            serde_json::from_value(json!({"distance_matrix": {"a": {"b": 1}}})).unwrap();
        assert_eq!(patch.distance_matrix, Some(json!({"a": {"b": 1}})));
        assert!(patch.nodes.is_none());
    }
}
