//! Canonical event vocabulary and the stateful mapper that normalizes raw
//! wire messages and target-reported events into it.
//!
//! `serde_json::Map` is a `BTreeMap` here (the `preserve_order` feature is
//! never enabled), so every `Event`'s `params` serialize in sorted-key
//! order for free — the canonicalization the trace guider needs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::Message;
use crate::schedule::NodeId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub params: Map<String, Value>,
}

impl Event {
    pub fn new(name: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// The abstract node this event is attributed to, used by the trace
    /// guider to build per-node causality chains.
    pub fn node(&self) -> Option<i64> {
        self.params.get("node").and_then(Value::as_i64)
    }
}

fn get_i64(v: &Value, key: &str) -> Option<i64> {
    v.get(key).and_then(Value::as_i64)
}

fn get_str<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str)
}

/// Normalizes raw `/message` and `/event` payloads into canonical
/// [`Event`]s. Keeps two pieces of state across a single run: a stable
/// request-number map (so repeated client payload bytes map to the same
/// comparable number across runs) and the last known leader id.
pub struct EventMapper {
    request_map: std::collections::HashMap<String, i64>,
    request_ctr: i64,
    leader_id: i64,
}

impl Default for EventMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl EventMapper {
    pub fn new() -> Self {
        Self {
            request_map: std::collections::HashMap::new(),
            request_ctr: 1,
            leader_id: -1,
        }
    }

    pub fn leader_id(&self) -> i64 {
        self.leader_id
    }

    fn request_number(&mut self, data: &str) -> i64 {
        if let Some(n) = self.request_map.get(data) {
            return *n;
        }
        let n = self.request_ctr;
        self.request_map.insert(data.to_string(), n);
        self.request_ctr += 1;
        n
    }

    /// Maps a wire [`Message`] to the Raft-canonical `params` map used by
    /// `SendMessage`/`DeliverMessage` events. Returns `None` for message
    /// types outside the four Raft wire types this fuzzer understands.
    pub fn message_event_params(&mut self, msg: &Message) -> Option<Map<String, Value>> {
        let msg_params = msg.params.as_ref()?;

        let mut params = Map::new();
        params.insert("from".into(), Value::from(msg.from as i64));
        params.insert("to".into(), Value::from(msg.to as i64));
        params.insert(
            "term".into(),
            Value::from(get_i64(msg_params, "term").unwrap_or(0)),
        );
        params.insert("entries".into(), Value::Array(Vec::new()));
        params.insert("commit".into(), Value::from(0));

        match msg.kind.as_str() {
            "append_entries_request" => {
                params.insert("type".into(), Value::from("MsgApp"));
                params.insert(
                    "log_term".into(),
                    Value::from(get_i64(msg_params, "prev_log_term").unwrap_or(0)),
                );
                let entries = msg_params
                    .get("entries")
                    .and_then(Value::as_object)
                    .map(|entries| {
                        entries
                            .values()
                            .filter(|entry| get_str(entry, "data").map(|d| !d.is_empty()).unwrap_or(false))
                            .map(|entry| {
                                let mut e = Map::new();
                                e.insert(
                                    "Term".into(),
                                    Value::from(get_i64(entry, "term").unwrap_or(0)),
                                );
                                let data = get_str(entry, "data").unwrap_or_default();
                                e.insert(
                                    "Data".into(),
                                    Value::from(self.request_number(data).to_string()),
                                );
                                Value::Object(e)
                            })
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                params.insert("entries".into(), Value::Array(entries));
                params.insert(
                    "index".into(),
                    Value::from(get_i64(msg_params, "prev_log_idx").unwrap_or(0)),
                );
                params.insert(
                    "commit".into(),
                    Value::from(get_i64(msg_params, "leader_commit").unwrap_or(0)),
                );
                params.insert("reject".into(), Value::from(false));
            }
            "append_entries_reply" => {
                params.insert("type".into(), Value::from("MsgAppResp"));
                params.insert("log_term".into(), Value::from(0));
                params.insert(
                    "index".into(),
                    Value::from(get_i64(msg_params, "current_idx").unwrap_or(0)),
                );
                let success = get_i64(msg_params, "success").unwrap_or(1);
                params.insert("reject".into(), Value::from(success == 0));
            }
            "request_vote_request" => {
                params.insert("type".into(), Value::from("MsgVote"));
                params.insert(
                    "log_term".into(),
                    Value::from(get_i64(msg_params, "last_log_term").unwrap_or(0)),
                );
                params.insert(
                    "index".into(),
                    Value::from(get_i64(msg_params, "last_log_idx").unwrap_or(0)),
                );
                params.insert("reject".into(), Value::from(false));
            }
            "request_vote_reply" => {
                params.insert("type".into(), Value::from("MsgVoteResp"));
                params.insert("log_term".into(), Value::from(0));
                params.insert("index".into(), Value::from(0));
                let reject = get_i64(msg_params, "reject").unwrap_or(0);
                params.insert("reject".into(), Value::from(reject == 0));
            }
            _ => return None,
        }

        Some(params)
    }

    /// Maps a raw `/event` body's `type` + fields to the canonical params
    /// for that event type. Returns `None` for event types this fuzzer
    /// doesn't track (dropped rather than erroring).
    pub fn event_params(&mut self, raw: &Value) -> Option<Map<String, Value>> {
        let kind = get_str(raw, "type")?;
        let mut params = Map::new();
        match kind {
            "ClientRequest" => {
                self.request_ctr += 1;
                params.insert("leader".into(), Value::from(get_i64(raw, "leader")?));
                params.insert("request".into(), Value::from(self.request_ctr - 1));
            }
            "BecomeLeader" => {
                let node = get_i64(raw, "node")?;
                self.leader_id = node;
                params.insert("node".into(), Value::from(node));
                params.insert("term".into(), Value::from(get_i64(raw, "term")?));
            }
            "Timeout" => {
                self.leader_id = -1;
                params.insert("node".into(), Value::from(get_i64(raw, "node")?));
            }
            "MembershipChange" => {
                params.insert(
                    "action".into(),
                    Value::from(get_str(raw, "action")?.to_string()),
                );
                params.insert("node".into(), Value::from(get_i64(raw, "node")?));
            }
            "UpdateSnapshot" => {
                params.insert("node".into(), Value::from(get_i64(raw, "server_id")?));
                params.insert(
                    "snapshot_index".into(),
                    Value::from(get_i64(raw, "snapshot_index")?),
                );
            }
            "AdvanceCommitIndex" => {
                let server_id = get_i64(raw, "server_id")?;
                params.insert("i".into(), Value::from(server_id));
                params.insert("node".into(), Value::from(server_id));
            }
            _ => return None,
        }
        Some(params)
    }

}

/// Builds the `ClientRequest` event the orchestrator emits directly when it
/// dispatches a client (bypassing the mapper's `/event`-driven
/// `event_params`, matching `Cluster.run`'s own `self.network.add_event`
/// call in the original rather than routing through `EventMapper`).
pub fn client_request_event(leader: NodeId, request: i64) -> Event {
    let mut params = Map::new();
    params.insert("leader".into(), Value::from(leader as i64));
    params.insert("request".into(), Value::from(request));
    params.insert("node".into(), Value::from(0));
    Event::new("ClientRequest", params)
}

pub fn membership_event(name: &str, node: NodeId) -> Event {
    let mut params = Map::new();
    params.insert("i".into(), Value::from(node as i64));
    params.insert("node".into(), Value::from(node as i64));
    Event::new(name, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_number_is_stable_for_repeated_payloads() {
        let mut mapper = EventMapper::new();
        let a = mapper.request_number("payload-a");
        let b = mapper.request_number("payload-b");
        let a2 = mapper.request_number("payload-a");
        assert_eq!(a, a2);
        assert_ne!(a, b);
    }

    #[test]
    fn become_leader_sets_and_timeout_clears_leader_hint() {
        let mut mapper = EventMapper::new();
        assert_eq!(mapper.leader_id(), -1);
        mapper
            .event_params(&json!({"type": "BecomeLeader", "node": 2, "term": 4}))
            .unwrap();
        assert_eq!(mapper.leader_id(), 2);
        mapper
            .event_params(&json!({"type": "Timeout", "node": 2}))
            .unwrap();
        assert_eq!(mapper.leader_id(), -1);
    }

    #[test]
    fn unknown_event_type_is_dropped() {
        let mut mapper = EventMapper::new();
        assert!(mapper
            .event_params(&json!({"type": "ShutdownReady"}))
            .is_none());
    }

    #[test]
    fn append_entries_request_maps_to_msg_app() {
        let mut mapper = EventMapper::new();
        let msg = Message {
            from: 1,
            to: 2,
            kind: "append_entries_request".to_string(),
            data: Value::Null,
            id: None,
            params: Some(json!({
                "term": 3,
                "prev_log_term": 2,
                "prev_log_idx": 5,
                "leader_commit": 4,
                "entries": {"0": {"term": 3, "data": "abc"}, "1": {"term": 3, "data": ""}}
            })),
        };
        let params = mapper.message_event_params(&msg).unwrap();
        assert_eq!(params["type"], "MsgApp");
        assert_eq!(params["from"], 1);
        assert_eq!(params["to"], 2);
        assert_eq!(params["entries"].as_array().unwrap().len(), 1);
    }
}
