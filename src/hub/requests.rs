//! Inbound request decoding.
//!
//! Turns a wire [`Envelope`] into a typed [`HubRequest`]. Decoding is the
//! only place request names are matched as strings; handlers work on the
//! enum. Several older single-entity names are accepted as aliases.

use serde::Deserialize;
use serde_json::Value;

use crate::client::{ClientId, ClientRole};
use crate::error::HubError;
use crate::session::{DataPatch, PositionalKind, PositionalUpdate, StatePatch};
use crate::socket::framing::Envelope;

/// A decoded client request.
#[derive(Debug, Clone, PartialEq)]
pub enum HubRequest {
    /// Identify the connection.
    Hello {
        /// Role to register as when no id is given.
        role: ClientRole,
        /// Id handed to a launched process.
        client_id: Option<ClientId>,
    },
    /// The client's receive handlers are installed.
    Ready,
    /// Ask for the current dataset.
    GetData,
    /// Replace dataset fields wholesale.
    SetData(DataPatch),
    /// Index-aligned update of one node or link attribute.
    Positional(PositionalUpdate),
    /// Replace cluster definitions.
    UpdateClusters(Value),
    /// Merge shared UI state.
    UpdateState(StatePatch),
    /// Start a parsing worker with these instructions.
    ParseFiles(Value),
    /// Stop the active parsing worker.
    CancelParsing,
    /// Start an MST worker over the current dataset.
    ComputeMst,
    /// Open a satellite view.
    LaunchView(String),
    /// Close non-primary clients and start a fresh session.
    Reset,
    /// Ask for the build manifest.
    GetManifest,
    /// Ask for a component's contents.
    GetComponent(String),
    /// Diagnostic line for the hub log.
    Log(Value),
    /// Progress tick, forwarded to the primary.
    Tick(Value),
    /// Status message, recorded and forwarded to the primary.
    Message(Value),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HelloPayload {
    #[serde(default)]
    role: ClientRole,
    #[serde(default)]
    client_id: Option<ClientId>,
}

impl HubRequest {
    /// Decode an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::MalformedRequest`] for unknown request types and
    /// payloads of the wrong shape.
    pub fn decode(envelope: &Envelope) -> Result<Self, HubError> {
        let payload = &envelope.payload;
        let kind = envelope.kind.as_str();

        if let Some(positional) = PositionalKind::from_message_type(kind) {
            return PositionalUpdate::from_json(positional, payload).map(HubRequest::Positional);
        }

        let request = match kind {
            "hello" => {
                let hello: HelloPayload = if payload.is_null() {
                    HelloPayload::default()
                } else {
                    parse(kind, payload)?
                };
                HubRequest::Hello {
                    role: hello.role,
                    client_id: hello.client_id,
                }
            }
            "ready" => HubRequest::Ready,
            "get-data" => HubRequest::GetData,
            "set-data" | "update-data" => HubRequest::SetData(parse(kind, payload)?),
            "update-clusters" => HubRequest::UpdateClusters(payload.clone()),
            "update-state" => HubRequest::UpdateState(parse(kind, payload)?),
            "parse-files" | "parse-file" => {
                if !payload.is_object() {
                    return Err(malformed(kind, "instructions must be an object"));
                }
                HubRequest::ParseFiles(payload.clone())
            }
            "cancel-parsing" => HubRequest::CancelParsing,
            "compute-mst" => HubRequest::ComputeMst,
            "launch-view" => HubRequest::LaunchView(named(kind, payload, &["viewId", "view"])?),
            "reset" => HubRequest::Reset,
            "get-manifest" => HubRequest::GetManifest,
            "get-component" => HubRequest::GetComponent(named(kind, payload, &["name"])?),
            "log" => HubRequest::Log(payload.clone()),
            "tick" => HubRequest::Tick(payload.clone()),
            "message" => HubRequest::Message(payload.clone()),
            other => {
                return Err(HubError::MalformedRequest(format!(
                    "unknown request type: {other}"
                )))
            }
        };
        Ok(request)
    }
}

fn parse<T: serde::de::DeserializeOwned>(kind: &str, payload: &Value) -> Result<T, HubError> {
    T::deserialize(payload).map_err(|e| malformed(kind, &e.to_string()))
}

/// A string payload, or an object carrying the string under one of `keys`.
fn named(kind: &str, payload: &Value, keys: &[&str]) -> Result<String, HubError> {
    let name = payload.as_str().or_else(|| {
        keys.iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_str))
    });
    match name {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(malformed(kind, &format!("expected a string or {{\"{}\": ...}}", keys[0]))),
    }
}

fn malformed(kind: &str, reason: &str) -> HubError {
    HubError::MalformedRequest(format!("{kind}: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(kind: &str, payload: Value) -> Result<HubRequest, HubError> {
        HubRequest::decode(&Envelope::new(kind, payload))
    }

    #[test]
    fn test_hello_defaults_to_satellite() {
        assert_eq!(
            decode("hello", Value::Null).unwrap(),
            HubRequest::Hello {
                role: ClientRole::Satellite,
                client_id: None
            }
        );
        assert_eq!(
            decode("hello", json!({"role": "worker", "clientId": "worker:7"})).unwrap(),
            HubRequest::Hello {
                role: ClientRole::Worker,
                client_id: Some(ClientId::new("worker:7"))
            }
        );
    }

    #[test]
    fn test_set_data_and_alias() {
        let payload = json!({"nodes": [{"id": "a"}], "distanceMatrix": {"a": {"a": 0}}});
        let HubRequest::SetData(patch) = decode("update-data", payload).unwrap() else {
            panic!("expected SetData");
        };
        assert_eq!(patch.nodes.unwrap().len(), 1);
        assert!(patch.links.is_none());
        assert!(patch.distance_matrix.is_some());
    }

    #[test]
    fn test_positional_requests() {
        let HubRequest::Positional(update) = decode("update-node-selections", json!([true, false])).unwrap() else {
            panic!("expected Positional");
        };
        assert_eq!(update.kind, PositionalKind::NodeSelections);
        assert_eq!(update.len(), 2);

        let HubRequest::Positional(update) = decode("update-links-mst", json!([true])).unwrap() else {
            panic!("expected Positional");
        };
        assert_eq!(update.kind, PositionalKind::LinkMst);

        assert!(matches!(
            decode("update-node-clusters", json!({"not": "an array"})),
            Err(HubError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_named_payloads() {
        assert_eq!(
            decode("get-component", json!("legend.html")).unwrap(),
            HubRequest::GetComponent("legend.html".to_string())
        );
        assert_eq!(
            decode("get-component", json!({"name": "legend.html"})).unwrap(),
            HubRequest::GetComponent("legend.html".to_string())
        );
        assert_eq!(
            decode("launch-view", json!({"viewId": "views/table.html"})).unwrap(),
            HubRequest::LaunchView("views/table.html".to_string())
        );
        assert!(decode("get-component", Value::Null).is_err());
    }

    #[test]
    fn test_parse_files_needs_object() {
        assert!(matches!(
            decode("parse-file", json!({"file": "a.csv"})).unwrap(),
            HubRequest::ParseFiles(_)
        ));
        assert!(decode("parse-files", json!("a.csv")).is_err());
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(
            decode("explode", Value::Null),
            Err(HubError::MalformedRequest("unknown request type: explode".to_string()))
        );
    }
}
