//! Wire message envelope exchanged between the interception network and the
//! target servers over HTTP/JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schedule::NodeId;

/// A message intercepted off the wire. `to` is `None` for broadcast.
///
/// Field names (`from`/`to`/`type`/`data`/`id`/`params`) match the JSON
/// bodies the target already posts to `/message` — this struct is the
/// decode target, not an internal convenience shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "from")]
    pub from: NodeId,
    pub to: NodeId,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Message {
    pub fn mailbox_key(&self) -> (NodeId, NodeId) {
        (self.from, self.to)
    }

    /// A synthetic message used to tell a target it should terminate.
    pub fn shutdown(from: NodeId, to: NodeId) -> Self {
        Self {
            from,
            to,
            kind: "shutdown".to_string(),
            data: Value::String("shutting_down".to_string()),
            id: None,
            params: None,
        }
    }
}
