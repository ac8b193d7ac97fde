//! Progress transport — per-client duplex channel routing.
//!
//! The hub keeps two maps: connection-id -> outbound sender, and
//! user-id -> set of connection-ids. `send_to_user` fans out to every
//! current connection for that user. A failed send silently disconnects
//! the offending connection. Ordering is preserved per connection by the
//! underlying mpsc channel; no cross-connection ordering is guaranteed.

use dashmap::DashMap;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::utils::CancelToken;

pub type OutboundSender = mpsc::UnboundedSender<String>;

pub struct ProgressHub {
    connections: DashMap<String, OutboundSender>,
    user_connections: DashMap<i64, HashSet<String>>,
    /// Shared cancel-event per in-flight chat request id.
    chat_cancels: DashMap<String, Arc<CancelToken>>,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHub {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_connections: DashMap::new(),
            chat_cancels: DashMap::new(),
        }
    }

    pub fn connect(&self, connection_id: &str, user_id: Option<i64>, sender: OutboundSender) {
        self.connections.insert(connection_id.to_string(), sender);
        if let Some(uid) = user_id {
            self.user_connections
                .entry(uid)
                .or_default()
                .insert(connection_id.to_string());
        }
        tracing::info!("Progress channel connected: {}", connection_id);
    }

    pub fn disconnect(&self, connection_id: &str, user_id: Option<i64>) {
        self.connections.remove(connection_id);
        if let Some(uid) = user_id {
            if let Some(mut set) = self.user_connections.get_mut(&uid) {
                set.remove(connection_id);
                if set.is_empty() {
                    drop(set);
                    self.user_connections.remove(&uid);
                }
            }
        }
        tracing::info!("Progress channel disconnected: {}", connection_id);
    }

    pub fn send_to_connection(&self, connection_id: &str, message: &serde_json::Value) {
        let failed = match self.connections.get(connection_id) {
            Some(sender) => sender.send(message.to_string()).is_err(),
            None => false,
        };
        if failed {
            // Receiver side is gone; drop the connection entry and any user
            // mapping that still points at it.
            self.connections.remove(connection_id);
            for mut entry in self.user_connections.iter_mut() {
                entry.value_mut().remove(connection_id);
            }
            tracing::debug!("Dropped dead progress connection: {}", connection_id);
        }
    }

    pub fn send_to_user(&self, user_id: i64, message: &serde_json::Value) {
        let conn_ids: Vec<String> = self
            .user_connections
            .get(&user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for conn_id in conn_ids {
            self.send_to_connection(&conn_id, message);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // -- progress event shapes --

    /// Emit a `<pipeline>_progress` event to the triggering user.
    pub fn emit_progress(
        &self,
        user_id: i64,
        pipeline: &str,
        run_id: &str,
        phase: &str,
        completed: usize,
        total: usize,
        detail: &str,
    ) {
        self.send_to_user(
            user_id,
            &json!({
                "type": format!("{}_progress", pipeline),
                "run_id": run_id,
                "phase": phase,
                "completed": completed,
                "total": total,
                "detail": detail,
                "status": "running",
            }),
        );
    }

    /// Emit a terminal event: `<pipeline>_complete`, `_failed`, or `_cancelled`.
    pub fn emit_terminal(
        &self,
        user_id: i64,
        pipeline: &str,
        run_id: &str,
        outcome: &str,
        extra: serde_json::Value,
    ) {
        let mut message = json!({
            "type": format!("{}_{}", pipeline, outcome),
            "run_id": run_id,
        });
        if let (Some(obj), Some(extra_obj)) = (message.as_object_mut(), extra.as_object()) {
            for (k, v) in extra_obj {
                obj.insert(k.clone(), v.clone());
            }
        }
        self.send_to_user(user_id, &message);
    }

    // -- chat cancellation events --

    pub fn register_chat_cancel(&self, request_id: &str) -> Arc<CancelToken> {
        let token = CancelToken::new();
        self.chat_cancels.insert(request_id.to_string(), Arc::clone(&token));
        token
    }

    pub fn cancel_chat(&self, request_id: &str) -> bool {
        if let Some(token) = self.chat_cancels.get(request_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub fn clear_chat_cancel(&self, request_id: &str) {
        self.chat_cancels.remove(request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_reaches_all_user_connections() {
        let hub = ProgressHub::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        hub.connect("c1", Some(7), tx1);
        hub.connect("c2", Some(7), tx2);

        hub.emit_progress(7, "extraction", "run-1", "discovery", 1, 10, "scanning");

        let m1 = rx1.recv().await.unwrap();
        let m2 = rx2.recv().await.unwrap();
        assert!(m1.contains("extraction_progress"));
        assert_eq!(m1, m2);
    }

    #[tokio::test]
    async fn dead_connection_is_dropped_silently() {
        let hub = ProgressHub::new();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        hub.connect("dead", Some(1), tx);

        hub.send_to_user(1, &json!({"type": "pong"}));
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn chat_cancel_round_trip() {
        let hub = ProgressHub::new();
        let token = hub.register_chat_cancel("req-1");
        assert!(!token.is_cancelled());
        assert!(hub.cancel_chat("req-1"));
        assert!(token.is_cancelled());
        assert!(!hub.cancel_chat("req-unknown"));
        hub.clear_chat_cancel("req-1");
    }

    #[tokio::test]
    async fn per_connection_order_is_preserved() {
        let hub = ProgressHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.connect("c", Some(3), tx);
        for i in 0..20 {
            hub.emit_progress(3, "analysis", "r", "fingerprint", i, 20, "step");
        }
        let mut last = -1i64;
        for _ in 0..20 {
            let msg = rx.recv().await.unwrap();
            let v: serde_json::Value = serde_json::from_str(&msg).unwrap();
            let completed = v["completed"].as_i64().unwrap();
            assert!(completed > last);
            last = completed;
        }
    }
}
