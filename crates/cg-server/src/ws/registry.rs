//! In-memory registry for live WebSocket connections.
//!
//! One instance tracks SDK connections (keyed by environment id), another
//! tracks browser connections (keyed by session id). Browsers additionally
//! subscribe to environments so status changes can be fanned out to them.

use std::collections::BTreeMap;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

use cg_protocol::{HeaderFormat, SdkPackage};

/// Channel sender capable of pushing WS frames to a connected peer.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// What the gateway remembers about a connected SDK.
#[derive(Debug, Clone)]
pub struct SdkMetadata {
    pub package: SdkPackage,
    pub package_version: String,
    /// Negotiated once at connect time.
    pub header_format: HeaderFormat,
}

pub type SdkConnections = Connections<Message, SdkMetadata>;
pub type BrowserConnections = Connections<Message, ()>;

#[derive(Debug)]
struct Connection<T, M> {
    tx: mpsc::UnboundedSender<T>,
    metadata: M,
    /// Diagnostics only.
    last_send_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub id: String,
    pub last_send_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of a registry for operators.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RegistrySummary {
    pub connections: Vec<ConnectionSummary>,
    pub subscriptions: BTreeMap<String, Vec<String>>,
}

/// Connections keyed by id, plus a reverse subscription graph
/// (subscription id → subscribed connection ids).
#[derive(Debug)]
pub struct Connections<T, M> {
    connections: DashMap<String, Connection<T, M>>,
    subscriptions: DashMap<String, Vec<String>>,
}

impl<T, M> Default for Connections<T, M> {
    fn default() -> Self {
        Self {
            connections: DashMap::new(),
            subscriptions: DashMap::new(),
        }
    }
}

impl<T, M: Clone> Connections<T, M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection unless the id is already taken. The check and
    /// the insert happen under one shard lock, so of two racing callers only
    /// one wins.
    pub fn try_add(
        &self,
        id: &str,
        tx: mpsc::UnboundedSender<T>,
        subscribe_to: &[String],
        metadata: M,
    ) -> bool {
        match self.connections.entry(id.to_string()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(Connection {
                    tx,
                    metadata,
                    last_send_at: None,
                });
            }
        }

        for subscription in subscribe_to {
            let mut ids = self.subscriptions.entry(subscription.clone()).or_default();
            if !ids.iter().any(|existing| existing == id) {
                ids.push(id.to_string());
            }
        }
        true
    }

    /// Remove a connection and scrub it from every subscription, but only
    /// while `tx` still owns the entry. A socket that lost the race for its
    /// id must not evict the winner.
    pub fn remove(&self, id: &str, tx: &mpsc::UnboundedSender<T>) -> bool {
        let removed = self
            .connections
            .remove_if(id, |_, conn| conn.tx.same_channel(tx))
            .is_some();
        if !removed {
            return false;
        }

        self.subscriptions.retain(|_, ids| {
            ids.retain(|existing| existing != id);
            !ids.is_empty()
        });

        true
    }

    pub fn exists(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<M> {
        self.connections.get(id).map(|c| c.metadata.clone())
    }

    /// Send to one connection. Returns `false` if it is gone.
    pub fn push(&self, id: &str, data: T) -> bool {
        let Some(mut conn) = self.connections.get_mut(id) else {
            return false;
        };

        if conn.tx.send(data).is_err() {
            return false;
        }
        conn.last_send_at = Some(Utc::now());
        true
    }

    /// Send a per-recipient payload to everyone subscribed to
    /// `subscription_id`. Returns how many connections were pushed to.
    pub fn push_to_subscribers<F>(&self, subscription_id: &str, mut data: F) -> usize
    where
        F: FnMut(&str) -> Option<T>,
    {
        // Snapshot so no shard lock is held while building payloads.
        let ids = match self.subscriptions.get(subscription_id) {
            Some(ids) => ids.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for id in ids {
            if !self.exists(&id) {
                continue;
            }
            let Some(payload) = data(&id) else {
                continue;
            };
            if self.push(&id, payload) {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn summarize(&self) -> RegistrySummary {
        let mut connections: Vec<ConnectionSummary> = self
            .connections
            .iter()
            .map(|entry| ConnectionSummary {
                id: entry.key().clone(),
                last_send_at: entry.last_send_at,
            })
            .collect();
        connections.sort_by(|a, b| a.id.cmp(&b.id));

        let subscriptions = self
            .subscriptions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        RegistrySummary {
            connections,
            subscriptions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    type TestConnections = Connections<String, u32>;

    fn channel() -> (
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        mpsc::unbounded_channel()
    }

    fn subs(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn add_get_remove() {
        let reg = TestConnections::new();
        let (tx, _rx) = channel();

        assert!(reg.try_add("a", tx.clone(), &[], 7));
        assert!(reg.exists("a"));
        assert_eq!(reg.get("a"), Some(7));
        assert_eq!(reg.len(), 1);

        assert!(reg.remove("a", &tx));
        assert!(!reg.exists("a"));
        assert_eq!(reg.get("a"), None);
        assert!(!reg.remove("a", &tx));
    }

    #[test]
    fn occupied_id_is_not_replaced() {
        let reg = TestConnections::new();
        let (first, mut first_rx) = channel();
        let (second, _second_rx) = channel();

        assert!(reg.try_add("a", first.clone(), &subs(&["env"]), 1));
        assert!(!reg.try_add("a", second.clone(), &subs(&["other"]), 2));
        assert_eq!(reg.get("a"), Some(1));
        assert!(!reg.summarize().subscriptions.contains_key("other"));

        // The loser closing must leave the winner in place.
        assert!(!reg.remove("a", &second));
        assert!(reg.push("a", "still here".into()));
        assert_eq!(first_rx.try_recv().unwrap(), "still here");
        assert_eq!(reg.summarize().subscriptions["env"], vec!["a"]);

        assert!(reg.remove("a", &first));
        assert!(!reg.exists("a"));
    }

    #[test]
    fn racing_adds_register_once() {
        let reg = std::sync::Arc::new(TestConnections::new());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    let (tx, rx) = channel();
                    (reg.try_add("env", tx, &[], n), rx)
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|(won, _)| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn push_records_last_send() {
        let reg = TestConnections::new();
        let (tx, mut rx) = channel();
        reg.try_add("a", tx, &[], 0);

        assert!(reg.summarize().connections[0].last_send_at.is_none());
        assert!(reg.push("a", "hello".into()));
        assert_eq!(rx.try_recv().unwrap(), "hello");
        assert!(reg.summarize().connections[0].last_send_at.is_some());

        assert!(!reg.push("missing", "x".into()));
    }

    #[test]
    fn push_fails_once_receiver_is_gone() {
        let reg = TestConnections::new();
        let (tx, rx) = channel();
        reg.try_add("a", tx, &[], 0);
        drop(rx);
        assert!(!reg.push("a", "x".into()));
    }

    #[test]
    fn fan_out_builds_one_payload_per_subscriber() {
        let reg = TestConnections::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        let (tx3, mut rx3) = channel();
        reg.try_add("s1", tx1, &subs(&["env"]), 0);
        reg.try_add("s2", tx2, &subs(&["env", "other"]), 0);
        reg.try_add("s3", tx3, &subs(&["other"]), 0);

        let mut calls = Vec::new();
        let n = reg.push_to_subscribers("env", |id| {
            calls.push(id.to_string());
            Some(format!("to:{id}"))
        });

        assert_eq!(n, 2);
        calls.sort();
        assert_eq!(calls, vec!["s1", "s2"]);
        assert_eq!(rx1.try_recv().unwrap(), "to:s1");
        assert_eq!(rx2.try_recv().unwrap(), "to:s2");
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn fan_out_skips_removed_and_failed_payloads() {
        let reg = TestConnections::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        reg.try_add("s1", tx1.clone(), &subs(&["env"]), 0);
        reg.try_add("s2", tx2, &subs(&["env"]), 0);
        reg.remove("s1", &tx1);

        let mut calls = 0;
        let n = reg.push_to_subscribers("env", |_| {
            calls += 1;
            None
        });
        assert_eq!(n, 0);
        assert_eq!(calls, 1);

        assert_eq!(reg.push_to_subscribers("nobody", |id| Some(id.to_string())), 0);
    }

    #[test]
    fn duplicate_subscription_is_recorded_once() {
        let reg = TestConnections::new();
        let (tx, _rx) = channel();
        reg.try_add("s1", tx, &subs(&["env", "env"]), 0);
        assert_eq!(reg.summarize().subscriptions["env"], vec!["s1"]);
    }

    #[test]
    fn remove_prunes_empty_subscriptions() {
        let reg = TestConnections::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        reg.try_add("s1", tx1.clone(), &subs(&["a", "b"]), 0);
        reg.try_add("s2", tx2, &subs(&["b"]), 0);

        reg.remove("s1", &tx1);
        let summary = reg.summarize();
        assert!(!summary.subscriptions.contains_key("a"));
        assert_eq!(summary.subscriptions["b"], vec!["s2"]);
    }

    /// Drive a pseudo-random add/remove sequence and compare against a
    /// model of the expected registration set.
    #[test]
    fn registration_set_tracks_model() {
        let reg = TestConnections::new();
        let mut model: HashMap<String, Vec<String>> = HashMap::new();
        let mut senders = HashMap::new();
        let mut receivers = Vec::new();
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;

        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;

            let id = format!("c{}", seed % 12);
            if seed % 3 == 0 {
                let removed = senders
                    .remove(&id)
                    .is_some_and(|tx| reg.remove(&id, &tx));
                assert_eq!(removed, model.remove(&id).is_some());
            } else if !reg.exists(&id) {
                let topics = subs(&[["x", "y", "z"][((seed >> 8) % 3) as usize]]);
                let (tx, rx) = channel();
                receivers.push(rx);
                assert!(reg.try_add(&id, tx.clone(), &topics, 0));
                senders.insert(id.clone(), tx);
                model.insert(id, topics);
            }

            let summary = reg.summarize();
            let live: HashSet<_> = summary.connections.iter().map(|c| c.id.clone()).collect();
            let expected: HashSet<_> = model.keys().cloned().collect();
            assert_eq!(live, expected);

            for ids in summary.subscriptions.values() {
                assert!(!ids.is_empty());
                for id in ids {
                    assert!(model.contains_key(id), "{id} lingers in a subscription");
                }
            }
        }
    }
}
