//! The interception network: an HTTP relay standing between a run's target
//! processes, recording every message and event that passes through it.

mod server;

pub use server::{run_network, NetworkHandle};

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::Value;

use crate::event::{Event, EventMapper};
use crate::message::Message;
use crate::schedule::NodeId;

#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkStats {
    pub messages_relayed: u64,
    pub messages_dropped_crashed: u64,
    pub events_recorded: u64,
}

pub(crate) struct NetworkInner {
    replicas: HashMap<NodeId, String>,
    mailboxes: HashMap<(NodeId, NodeId), VecDeque<Message>>,
    event_trace: Vec<Event>,
    mapper: EventMapper,
    stats: NetworkStats,
}

impl NetworkInner {
    fn new() -> Self {
        Self {
            replicas: HashMap::new(),
            mailboxes: HashMap::new(),
            event_trace: Vec::new(),
            mapper: EventMapper::new(),
            stats: NetworkStats::default(),
        }
    }

    fn add_event(&mut self, event: Event) {
        self.event_trace.push(event);
        self.stats.events_recorded += 1;
    }
}

/// Shared state behind the axum handlers, held by `Arc` so the HTTP server
/// task and the orchestrator's step loop both see live mailboxes.
pub struct NetworkState {
    pub(crate) inner: Mutex<NetworkInner>,
    pub(crate) http: reqwest::Client,
}

impl NetworkState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(NetworkInner::new()),
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(5))
                .build()
                .expect("reqwest client construction never fails with static config"),
        }
    }

    pub fn num_replicas(&self) -> usize {
        self.inner.lock().unwrap().replicas.len()
    }

    pub fn leader_id(&self) -> i64 {
        self.inner.lock().unwrap().mapper.leader_id()
    }

    pub fn event_trace(&self) -> Vec<Event> {
        self.inner.lock().unwrap().event_trace.clone()
    }

    pub fn stats(&self) -> NetworkStats {
        self.inner.lock().unwrap().stats
    }

    pub fn record_event(&self, event: Event) {
        self.inner.lock().unwrap().add_event(event);
    }

    pub fn record_client_request(&self, mapper_event: Event) {
        self.inner.lock().unwrap().add_event(mapper_event);
    }

    /// `POST /replica` — register or update `node`'s delivery address.
    pub fn register_replica(&self, node: NodeId, addr: String) {
        self.inner.lock().unwrap().replicas.insert(node, addr);
    }

    /// `POST /message` — push `msg` onto its edge's mailbox and append the
    /// `SendMessage` event, mirroring `Network.handle_message` in the
    /// original: the event's `node` is the message's sender.
    pub fn enqueue_message(&self, msg: Message) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(mut params) = inner.mapper.message_event_params(&msg) {
            params.insert("node".into(), Value::from(msg.from as i64));
            inner.add_event(Event::new("SendMessage", params));
        }
        inner.mailboxes.entry(msg.mailbox_key()).or_default().push_back(msg);
    }

    /// `POST /event` — map a raw, already-once-decoded `/event` body to a
    /// canonical [`Event`], or `None` if the mapper drops it.
    pub fn map_raw_event(&self, raw: &Value) -> Option<Event> {
        let mut inner = self.inner.lock().unwrap();
        let name = raw.get("type").and_then(Value::as_str)?.to_string();
        let mut params = inner.mapper.event_params(raw)?;
        if let Some(server_id) = raw.get("server_id") {
            params.insert("replica".into(), server_id.clone());
        }
        Some(Event::new(name, params))
    }

    fn addr_of(&self, node: NodeId) -> Option<String> {
        self.inner.lock().unwrap().replicas.get(&node).cloned()
    }

    /// Pops up to `max_msgs` queued messages on the `from -> to` edge and
    /// relays each to `to`'s registered address, unless `to` is currently
    /// crashed (in which case the messages are simply dropped — matching
    /// `schedule_node`'s `to_crashed` branch in the original).
    pub async fn schedule_node(&self, from: NodeId, to: NodeId, max_msgs: u32, to_crashed: bool) -> usize {
        let mut drained = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            let key = (from, to);
            if let Some(queue) = inner.mailboxes.get_mut(&key) {
                for _ in 0..max_msgs {
                    match queue.pop_front() {
                        Some(msg) => drained.push(msg),
                        None => break,
                    }
                }
            }
            for msg in &drained {
                if let Some(mut params) = inner.mapper.message_event_params(msg) {
                    params.insert("node".into(), Value::from(to as i64));
                    inner.add_event(Event::new("DeliverMessage", params));
                }
            }
        }

        if drained.is_empty() {
            return 0;
        }

        if to_crashed {
            let mut inner = self.inner.lock().unwrap();
            inner.stats.messages_dropped_crashed += drained.len() as u64;
            return drained.len();
        }

        let Some(addr) = self.addr_of(to) else {
            return drained.len();
        };

        for msg in &drained {
            let body = serde_json::to_string(msg).unwrap_or_default();
            let _ = self
                .http
                .post(format!("http://{addr}"))
                .json(&body)
                .send()
                .await;
        }
        self.inner.lock().unwrap().stats.messages_relayed += drained.len() as u64;

        drained.len()
    }

    pub fn message_exists(&self, from: NodeId, to: NodeId) -> bool {
        self.inner
            .lock()
            .unwrap()
            .mailboxes
            .get(&(from, to))
            .map(|q| !q.is_empty())
            .unwrap_or(false)
    }

    /// Broadcasts a shutdown message to every currently-registered replica.
    ///
    /// Unused by [`crate::orchestrator::run_cluster`]'s linear step loop,
    /// which tears a cluster down by killing supervisors rather than asking
    /// targets to exit — same as the original's own linear `Cluster.run`.
    /// Kept for the round-robin retry variant `spec.md` §9 calls out as a
    /// future extension, which would need a clean-shutdown path.
    pub async fn send_shutdown(&self) {
        let addrs: Vec<String> = {
            let inner = self.inner.lock().unwrap();
            inner.replicas.values().cloned().collect()
        };
        for addr in addrs {
            let msg = Message::shutdown(0, 0);
            let body = serde_json::to_string(&msg).unwrap_or_default();
            let _ = self.http.post(format!("http://{addr}")).json(&body).send().await;
        }
    }
}

impl Default for NetworkState {
    fn default() -> Self {
        Self::new()
    }
}
