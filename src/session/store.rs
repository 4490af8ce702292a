//! The owned session store.
//!
//! [`SessionStore`] is the only place the live [`Session`] is mutated. The
//! hub owns exactly one store and drives it from its single event loop, so
//! every mutation is applied whole before the next request is looked at.
//!
//! Alongside the session the store keeps an index→identity map for nodes and
//! links, rebuilt on every full replace. Positional updates are checked
//! against it so a client working from a stale ordering cannot scribble over
//! the wrong entities.
//!
//! The dataset is sent whole (`set-data`), so it must always fit in one wire
//! frame. Every data mutation is checked against the snapshot limit after it
//! is applied and undone if the result would be too large to send.

use std::io;

use serde::Serialize;
use serde_json::Value;

use super::validate::{validate_positional, LengthPolicy, PositionalKind, PositionalUpdate, PositionalValue, Scope};
use super::{DataPatch, Identity, Session, SessionData, StatePatch};
use crate::error::HubError;
use crate::socket::framing::MAX_PAYLOAD_SIZE;

/// Outcome of a positional update that was (at least partly) applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// Entries written to the session.
    pub written: usize,
    /// Validation problem tolerated under [`LengthPolicy::Lenient`].
    pub tolerated: Option<HubError>,
}

/// Owner of the canonical session.
#[derive(Debug)]
pub struct SessionStore {
    session: Session,
    revision: u64,
    node_index: Vec<Identity>,
    link_index: Vec<Identity>,
    policy: LengthPolicy,
    /// Largest encoded dataset allowed.
    snapshot_limit: usize,
    /// Encoded dataset size as of the last check; may overestimate.
    snapshot_size: usize,
}

impl SessionStore {
    /// Create a store holding the empty skeleton session.
    pub fn new(policy: LengthPolicy) -> Self {
        let session = Session::skeleton(0);
        let snapshot_size = json_len(&session.data);
        Self {
            session,
            revision: 0,
            node_index: Vec::new(),
            link_index: Vec::new(),
            policy,
            snapshot_limit: MAX_PAYLOAD_SIZE,
            snapshot_size,
        }
    }

    /// Cap the encoded dataset at `limit` bytes instead of the frame limit.
    pub fn with_snapshot_limit(mut self, limit: usize) -> Self {
        self.snapshot_limit = limit;
        self
    }

    /// Read-only view of the live session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Read-only view of the dataset.
    pub fn data(&self) -> &SessionData {
        &self.session.data
    }

    /// Incremented by every successful mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Policy applied to positional updates.
    pub fn policy(&self) -> LengthPolicy {
        self.policy
    }

    /// Accepted length for node-scoped positional updates.
    pub fn node_count(&self) -> usize {
        self.session.data.nodes.len()
    }

    /// Accepted length for link-scoped positional updates.
    pub fn link_count(&self) -> usize {
        self.session.data.links.len()
    }

    /// Snapshot of the dataset as JSON, as sent over the wire.
    pub fn data_json(&self) -> Value {
        serde_json::to_value(&self.session.data).unwrap_or(Value::Null)
    }

    /// Replace each field present in `patch` wholesale.
    ///
    /// Supplying `nodes` or `links` resets the index space for positional
    /// updates of that scope.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::TooLarge`] and leaves the session unchanged if the
    /// resulting dataset could not be sent in one frame.
    pub fn replace_data(&mut self, patch: DataPatch) -> Result<(), HubError> {
        let displaced = self.swap_data(patch);
        if let Err(e) = self.check_snapshot("set-data") {
            self.swap_data(displaced);
            return Err(e);
        }
        self.bump();
        Ok(())
    }

    /// Install the fields present in `patch`, returning the ones they replaced.
    fn swap_data(&mut self, patch: DataPatch) -> DataPatch {
        let data = &mut self.session.data;
        let mut displaced = DataPatch::default();
        if let Some(nodes) = patch.nodes {
            self.node_index = nodes.iter().map(super::Node::identity).collect();
            displaced.nodes = Some(std::mem::replace(&mut data.nodes, nodes));
        }
        if let Some(links) = patch.links {
            self.link_index = links.iter().map(super::Link::identity).collect();
            displaced.links = Some(std::mem::replace(&mut data.links, links));
        }
        if let Some(clusters) = patch.clusters {
            displaced.clusters = Some(std::mem::replace(&mut data.clusters, clusters));
        }
        if let Some(matrix) = patch.distance_matrix {
            displaced.distance_matrix = Some(std::mem::replace(&mut data.distance_matrix, matrix));
        }
        displaced
    }

    /// Replace the cluster definitions.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::TooLarge`] and keeps the old clusters if the
    /// resulting dataset could not be sent in one frame.
    pub fn replace_clusters(&mut self, clusters: Value) -> Result<(), HubError> {
        let previous = std::mem::replace(&mut self.session.data.clusters, clusters);
        if let Err(e) = self.check_snapshot("update-clusters") {
            self.session.data.clusters = previous;
            return Err(e);
        }
        self.bump();
        Ok(())
    }

    /// Merge shared UI state.
    pub fn update_state(&mut self, patch: StatePatch) {
        let state = &mut self.session.state;
        if let Some(visible) = patch.visible_clusters {
            state.visible_clusters = visible;
        }
        if let Some(alpha) = patch.alpha {
            state.alpha = if alpha.is_nan() { state.alpha } else { alpha.clamp(0.0, 1.0) };
        }
        self.bump();
    }

    /// Append an ingestion-source descriptor.
    pub fn record_file(&mut self, file: Value) {
        self.session.files.push(file);
        self.bump();
    }

    /// Append a status line.
    pub fn push_message(&mut self, message: String) {
        self.session.messages.push(message);
        self.bump();
    }

    /// Apply a positional update.
    ///
    /// Under [`LengthPolicy::Strict`] the update is checked in full first and
    /// rejected without touching the session on any length or identity
    /// mismatch. Under [`LengthPolicy::Lenient`] the overlapping prefix is
    /// applied, entries whose identity disagrees are skipped, and the first
    /// problem is returned in [`Applied::tolerated`].
    ///
    /// Entries beyond the session's cardinality are never written, so node
    /// and link order is preserved under both policies.
    pub fn apply_positional(&mut self, update: &PositionalUpdate) -> Result<Applied, HubError> {
        let kind = update.kind;
        let index = match kind.scope() {
            Scope::Nodes => &self.node_index,
            Scope::Links => &self.link_index,
        };

        let mut tolerated = validate_positional(kind, &update.entries, index.len()).err();
        let mismatched: Vec<usize> = update
            .entries
            .iter()
            .zip(index.iter())
            .enumerate()
            .filter(|(_, (entry, stored))| !entry.identity.matches(stored))
            .map(|(i, _)| i)
            .collect();

        if self.policy == LengthPolicy::Strict {
            if let Some(err) = tolerated {
                return Err(err);
            }
            if let Some(&first) = mismatched.first() {
                return Err(HubError::IdentityMismatch { kind, index: first });
            }
        } else if tolerated.is_none() {
            if let Some(&first) = mismatched.first() {
                tolerated = Some(HubError::IdentityMismatch { kind, index: first });
            }
        }

        let mut skip = vec![false; update.entries.len()];
        for &i in &mismatched {
            skip[i] = true;
        }

        let mut previous = Vec::new();
        for (i, entry) in update.entries.iter().enumerate() {
            if skip[i] {
                continue;
            }
            if let Some(old) = self.read_field(kind, i) {
                if self.write_field(kind, i, entry.value) {
                    previous.push((i, old));
                }
            }
        }
        let written = previous.len();

        // Each write grows the encoded dataset by at most `max_growth` bytes;
        // only measure when that bound could cross the limit.
        let bound = self.snapshot_size + written * kind.max_growth();
        if bound > self.snapshot_limit {
            if let Err(e) = self.check_snapshot(kind.message_type()) {
                for (i, old) in previous {
                    self.write_field(kind, i, old);
                }
                return Err(e);
            }
        } else {
            self.snapshot_size = bound;
        }

        self.bump();
        Ok(Applied { written, tolerated })
    }

    fn read_field(&self, kind: PositionalKind, i: usize) -> Option<PositionalValue> {
        let data = &self.session.data;
        match kind {
            PositionalKind::NodeSelections => data.nodes.get(i).map(|n| PositionalValue::Flag(n.selected)),
            PositionalKind::NodeVisibilities => data.nodes.get(i).map(|n| PositionalValue::Flag(n.visible)),
            PositionalKind::NodeClusters => data.nodes.get(i).map(|n| PositionalValue::Int(n.cluster)),
            PositionalKind::NodeDegrees => data.nodes.get(i).map(|n| PositionalValue::Int(n.degree)),
            PositionalKind::LinkVisibilities => data.links.get(i).map(|l| PositionalValue::Flag(l.visible)),
            PositionalKind::LinkMst => data.links.get(i).map(|l| PositionalValue::Flag(l.mst)),
        }
    }

    fn write_field(&mut self, kind: PositionalKind, i: usize, value: PositionalValue) -> bool {
        let data = &mut self.session.data;
        match (kind, value) {
            (PositionalKind::NodeSelections, PositionalValue::Flag(v)) => {
                data.nodes.get_mut(i).map(|n| n.selected = v).is_some()
            }
            (PositionalKind::NodeVisibilities, PositionalValue::Flag(v)) => {
                data.nodes.get_mut(i).map(|n| n.visible = v).is_some()
            }
            (PositionalKind::NodeClusters, PositionalValue::Int(v)) => {
                data.nodes.get_mut(i).map(|n| n.cluster = v).is_some()
            }
            (PositionalKind::NodeDegrees, PositionalValue::Int(v)) => {
                data.nodes.get_mut(i).map(|n| n.degree = v).is_some()
            }
            (PositionalKind::LinkVisibilities, PositionalValue::Flag(v)) => {
                data.links.get_mut(i).map(|l| l.visible = v).is_some()
            }
            (PositionalKind::LinkMst, PositionalValue::Flag(v)) => {
                data.links.get_mut(i).map(|l| l.mst = v).is_some()
            }
            _ => false,
        }
    }

    /// Replace the live session with a fresh skeleton.
    ///
    /// The old session is dropped in one assignment; there is no moment at
    /// which a reader could see part of each.
    pub fn reset(&mut self) -> &Session {
        let generation = self.session.generation + 1;
        self.session = Session::skeleton(generation);
        self.node_index.clear();
        self.link_index.clear();
        self.snapshot_size = json_len(&self.session.data);
        self.bump();
        &self.session
    }

    /// Measure the dataset and refuse it if it is over the snapshot limit.
    fn check_snapshot(&mut self, what: &str) -> Result<(), HubError> {
        let size = json_len(&self.session.data);
        if size > self.snapshot_limit {
            return Err(HubError::TooLarge {
                what: format!("session data after {what}"),
                size,
                limit: self.snapshot_limit,
            });
        }
        self.snapshot_size = size;
        Ok(())
    }

    fn bump(&mut self) {
        self.revision += 1;
    }
}

/// Encoded JSON length of `value`, without building the bytes.
fn json_len(value: &impl Serialize) -> usize {
    struct Counter(usize);

    impl io::Write for Counter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0 += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let mut counter = Counter(0);
    match serde_json::to_writer(&mut counter, value) {
        Ok(()) => counter.0,
        Err(_) => usize::MAX,
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(LengthPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Link, Node};
    use serde_json::json;

    fn three_nodes_two_links(policy: LengthPolicy) -> SessionStore {
        let mut store = SessionStore::new(policy);
        store.replace_data(DataPatch {
            nodes: Some(vec![Node::new("a"), Node::new("b"), Node::new("c")]),
            links: Some(vec![Link::new("a", "b"), Link::new("b", "c")]),
            ..DataPatch::default()
        })
        .unwrap();
        store
    }

    fn node_ids(store: &SessionStore) -> Vec<Value> {
        store.data().nodes.iter().map(|n| n.id.clone()).collect()
    }

    #[test]
    fn test_new_store_holds_skeleton() {
        let store = SessionStore::default();
        assert!(store.session().is_empty());
        assert_eq!(store.revision(), 0);
        assert_eq!(store.policy(), LengthPolicy::Strict);
    }

    #[test]
    fn test_replace_data_sets_cardinality() {
        let store = three_nodes_two_links(LengthPolicy::Strict);
        assert_eq!(store.node_count(), 3);
        assert_eq!(store.link_count(), 2);
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_replace_data_keeps_absent_fields() {
        let mut store = three_nodes_two_links(LengthPolicy::Strict);
        store.replace_clusters(json!([{"id": 1}])).unwrap();

        store
            .replace_data(DataPatch {
                distance_matrix: Some(json!({"a": {"b": 0.5}})),
                ..DataPatch::default()
            })
            .unwrap();

        assert_eq!(store.node_count(), 3);
        assert_eq!(store.data().clusters, json!([{"id": 1}]));
        assert_eq!(store.data().distance_matrix, json!({"a": {"b": 0.5}}));
    }

    #[test]
    fn test_apply_selections() {
        let mut store = three_nodes_two_links(LengthPolicy::Strict);
        let update = PositionalUpdate::from_json(
            PositionalKind::NodeSelections,
            &json!([true, false, true]),
        )
        .unwrap();

        let applied = store.apply_positional(&update).unwrap();

        assert_eq!(applied.written, 3);
        assert!(applied.tolerated.is_none());
        let selected: Vec<bool> = store.data().nodes.iter().map(|n| n.selected).collect();
        assert_eq!(selected, vec![true, false, true]);
    }

    #[test]
    fn test_strict_rejects_short_array_without_mutation() {
        let mut store = three_nodes_two_links(LengthPolicy::Strict);
        let before = store.revision();
        let update =
            PositionalUpdate::from_json(PositionalKind::NodeSelections, &json!([true, true]))
                .unwrap();

        let err = store.apply_positional(&update).unwrap_err();

        assert_eq!(
            err,
            HubError::LengthMismatch {
                kind: PositionalKind::NodeSelections,
                expected: 3,
                actual: 2,
            }
        );
        assert!(store.data().nodes.iter().all(|n| !n.selected));
        assert_eq!(store.revision(), before);
    }

    #[test]
    fn test_lenient_applies_prefix_and_preserves_order() {
        let mut store = three_nodes_two_links(LengthPolicy::Lenient);
        let update = PositionalUpdate::from_json(
            PositionalKind::NodeClusters,
            &json!([4, 5, 6, 7, 8]),
        )
        .unwrap();

        let applied = store.apply_positional(&update).unwrap();

        assert_eq!(applied.written, 3);
        assert!(matches!(
            applied.tolerated,
            Some(HubError::LengthMismatch { expected: 3, actual: 5, .. })
        ));
        assert_eq!(node_ids(&store), vec![json!("a"), json!("b"), json!("c")]);
        let clusters: Vec<i64> = store.data().nodes.iter().map(|n| n.cluster).collect();
        assert_eq!(clusters, vec![4, 5, 6]);
    }

    #[test]
    fn test_lenient_short_array_leaves_tail_untouched() {
        let mut store = three_nodes_two_links(LengthPolicy::Lenient);
        let update =
            PositionalUpdate::from_json(PositionalKind::NodeVisibilities, &json!([false]))
                .unwrap();

        store.apply_positional(&update).unwrap();

        let visible: Vec<bool> = store.data().nodes.iter().map(|n| n.visible).collect();
        assert_eq!(visible, vec![false, true, true]);
        assert_eq!(node_ids(&store), vec![json!("a"), json!("b"), json!("c")]);
    }

    #[test]
    fn test_strict_rejects_reordered_identities() {
        let mut store = three_nodes_two_links(LengthPolicy::Strict);
        let payload = json!([
            {"id": "a", "selected": true},
            {"id": "c", "selected": true},
            {"id": "b", "selected": false}
        ]);
        let update = PositionalUpdate::from_json(PositionalKind::NodeSelections, &payload).unwrap();

        let err = store.apply_positional(&update).unwrap_err();

        assert_eq!(
            err,
            HubError::IdentityMismatch {
                kind: PositionalKind::NodeSelections,
                index: 1,
            }
        );
        assert!(store.data().nodes.iter().all(|n| !n.selected));
    }

    #[test]
    fn test_lenient_skips_mismatched_identities() {
        let mut store = three_nodes_two_links(LengthPolicy::Lenient);
        let payload = json!([
            {"id": "a", "selected": true},
            {"id": "zzz", "selected": true},
            {"id": "c", "selected": true}
        ]);
        let update = PositionalUpdate::from_json(PositionalKind::NodeSelections, &payload).unwrap();

        let applied = store.apply_positional(&update).unwrap();

        assert_eq!(applied.written, 2);
        let selected: Vec<bool> = store.data().nodes.iter().map(|n| n.selected).collect();
        assert_eq!(selected, vec![true, false, true]);
    }

    #[test]
    fn test_link_mst_uses_link_count() {
        let mut store = three_nodes_two_links(LengthPolicy::Strict);
        let update =
            PositionalUpdate::from_json(PositionalKind::LinkMst, &json!([true, false])).unwrap();
        store.apply_positional(&update).unwrap();
        assert!(store.data().links[0].mst);
        assert!(!store.data().links[1].mst);

        let too_long =
            PositionalUpdate::from_json(PositionalKind::LinkVisibilities, &json!([true, true, true]))
                .unwrap();
        assert!(store.apply_positional(&too_long).is_err());
    }

    #[test]
    fn test_link_objects_match_by_endpoints() {
        let mut store = three_nodes_two_links(LengthPolicy::Strict);
        let payload = json!([
            {"source": {"id": "a"}, "target": {"id": "b"}, "visible": false},
            {"source": "b", "target": "c", "visible": true}
        ]);
        let update =
            PositionalUpdate::from_json(PositionalKind::LinkVisibilities, &payload).unwrap();

        store.apply_positional(&update).unwrap();

        assert!(!store.data().links[0].visible);
        assert!(store.data().links[1].visible);
    }

    #[test]
    fn test_update_state_clamps_alpha() {
        let mut store = SessionStore::default();
        store.update_state(StatePatch {
            alpha: Some(1.7),
            visible_clusters: Some([1, 3].into_iter().collect()),
        });
        assert!((store.session().state.alpha - 1.0).abs() < f64::EPSILON);
        assert_eq!(store.session().state.visible_clusters.len(), 2);

        store.update_state(StatePatch {
            alpha: Some(-0.2),
            visible_clusters: None,
        });
        assert!(store.session().state.alpha.abs() < f64::EPSILON);
        assert_eq!(store.session().state.visible_clusters.len(), 2);
    }

    #[test]
    fn test_reset_issues_new_empty_session() {
        let mut store = three_nodes_two_links(LengthPolicy::Strict);
        store.push_message("parsed 3 sequences".to_string());
        let old_id = store.session().id;

        let session = store.reset();

        assert!(session.is_empty());
        assert_ne!(session.id, old_id);
        assert_eq!(session.generation, 1);
        assert_eq!(store.node_count(), 0);

        // Index space is gone as well: a 3-entry update is now a mismatch.
        let update = PositionalUpdate::from_values(
            PositionalKind::NodeSelections,
            [PositionalValue::Flag(true); 3],
        );
        assert!(store.apply_positional(&update).is_err());
    }

    fn labelled(id: &str, label_len: usize) -> Node {
        let mut node = Node::new(id);
        node.extra.insert("label".to_string(), json!("x".repeat(label_len)));
        node
    }

    fn encoded_len(store: &SessionStore) -> usize {
        serde_json::to_vec(&store.data_json()).unwrap().len()
    }

    #[test]
    fn test_merge_past_snapshot_limit_is_refused() {
        let mut store = SessionStore::new(LengthPolicy::Strict).with_snapshot_limit(1_000);
        store
            .replace_data(DataPatch {
                nodes: Some(vec![labelled("a", 600)]),
                ..DataPatch::default()
            })
            .unwrap();
        let revision = store.revision();

        // Each patch fits on its own; together they do not.
        let err = store
            .replace_data(DataPatch {
                distance_matrix: Some(json!({"a": "y".repeat(600)})),
                ..DataPatch::default()
            })
            .unwrap_err();

        assert_eq!(err.kind(), "too-large");
        assert_eq!(store.revision(), revision);
        assert_eq!(store.data().distance_matrix, json!({}));
        assert!(encoded_len(&store) <= 1_000);
    }

    #[test]
    fn test_refused_replace_keeps_index_space() {
        let mut store = SessionStore::new(LengthPolicy::Strict).with_snapshot_limit(1_000);
        store
            .replace_data(DataPatch {
                nodes: Some(vec![Node::new("a"), Node::new("b")]),
                ..DataPatch::default()
            })
            .unwrap();

        let big: Vec<Node> = (0..3).map(|i| labelled(&format!("n{i}"), 400)).collect();
        assert!(store
            .replace_data(DataPatch {
                nodes: Some(big),
                ..DataPatch::default()
            })
            .is_err());
        assert!(store.replace_clusters(json!(["z".repeat(2_000)])).is_err());

        assert_eq!(node_ids(&store), vec![json!("a"), json!("b")]);
        assert_eq!(store.data().clusters, json!([]));
        let update = PositionalUpdate::from_json(PositionalKind::NodeSelections, &json!([true, false])).unwrap();
        assert_eq!(store.apply_positional(&update).unwrap().written, 2);
    }

    #[test]
    fn test_positional_growth_past_limit_is_undone() {
        let base = encoded_len(&three_nodes_two_links(LengthPolicy::Strict));
        let mut store = SessionStore::new(LengthPolicy::Strict).with_snapshot_limit(base + 10);
        store
            .replace_data(DataPatch {
                nodes: Some(vec![Node::new("a"), Node::new("b"), Node::new("c")]),
                links: Some(vec![Link::new("a", "b"), Link::new("b", "c")]),
                ..DataPatch::default()
            })
            .unwrap();

        // Same encoded length: measured and accepted.
        let small = PositionalUpdate::from_json(PositionalKind::NodeClusters, &json!([1, 2, 3])).unwrap();
        store.apply_positional(&small).unwrap();

        let huge = PositionalUpdate::from_json(PositionalKind::NodeClusters, &json!([i64::MAX, i64::MAX, i64::MAX]))
            .unwrap();
        let revision = store.revision();
        let err = store.apply_positional(&huge).unwrap_err();

        assert_eq!(err.kind(), "too-large");
        assert_eq!(store.revision(), revision);
        let clusters: Vec<i64> = store.data().nodes.iter().map(|n| n.cluster).collect();
        assert_eq!(clusters, vec![1, 2, 3]);
    }
}
