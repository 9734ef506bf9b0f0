//! connection → pattern subscription map, and path → subscriber lookup.
//! the transport (WebSocket framing, connection acceptance) is
//! an external collaborator; this core accepts an opaque connection handle.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::pattern::PatternCache;
use crate::util::normalize_path;

#[derive(Debug, Clone)]
struct SubscriptionEntry {
    group: Option<String>,
    created_at: i64,
}

/// incoming subscribe/unsubscribe message.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub path: Option<serde_json::Value>,
    #[serde(default)]
    pub recursive: Option<bool>,
    #[serde(default)]
    pub group: Option<String>,
}

/// structured reply to a watch message.
#[derive(Debug, Clone, Serialize)]
pub struct WatchReply {
    pub success: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WatchReply {
    fn ok(message_type: &str, path: &str) -> Self {
        WatchReply {
            success: true,
            message_type: Some(message_type.to_string()),
            path: Some(path.to_string()),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        WatchReply {
            success: false,
            message_type: None,
            path: None,
            error: Some(message.into()),
        }
    }
}

/// the subscription core: `connection -> pattern -> entry`, plus a shared
/// compiled-regex cache. generic over any connection handle the transport
/// layer uses (`Eq + Hash + Clone`).
pub struct WatchCore<C: Eq + Hash + Clone> {
    subscriptions: Mutex<HashMap<C, HashMap<String, SubscriptionEntry>>>,
    pattern_cache: PatternCache,
    max_per_connection: Option<usize>,
    clock: std::sync::Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl<C: Eq + Hash + Clone> WatchCore<C> {
    pub fn new(
        pattern_cache_capacity: usize,
        max_per_connection: Option<usize>,
        clock: std::sync::Arc<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        WatchCore {
            subscriptions: Mutex::new(HashMap::new()),
            pattern_cache: PatternCache::new(pattern_cache_capacity),
            max_per_connection,
            clock,
        }
    }

    /// subscribe `conn` to `path` (a pattern, not necessarily a concrete
    /// path). rejects empty patterns, enforces the per-connection cap, and
    /// de-dups an already-present pattern.
    pub fn subscribe(&self, conn: C, pattern: &str, group: Option<String>) -> bool {
        if pattern.is_empty() {
            return false;
        }
        let Ok(normalized) = normalize_path(pattern).or_else(|_| Ok::<_, crate::error::Error>(pattern.to_string())) else {
            return false;
        };

        let mut subs = self.subscriptions.lock().unwrap();
        let entry = subs.entry(conn).or_default();

        if entry.contains_key(&normalized) {
            return false;
        }
        if let Some(max) = self.max_per_connection {
            if entry.len() >= max {
                return false;
            }
        }

        entry.insert(
            normalized,
            SubscriptionEntry {
                group,
                created_at: (self.clock)(),
            },
        );
        true
    }

    pub fn unsubscribe(&self, conn: &C, pattern: &str) -> bool {
        let mut subs = self.subscriptions.lock().unwrap();
        match subs.get_mut(conn) {
            Some(patterns) => patterns.remove(pattern).is_some(),
            None => false,
        }
    }

    /// remove every subscription in `group` for `conn`; returns how many were
    /// removed.
    pub fn unsubscribe_group(&self, conn: &C, group: &str) -> usize {
        let mut subs = self.subscriptions.lock().unwrap();
        let Some(patterns) = subs.get_mut(conn) else {
            return 0;
        };
        let before = patterns.len();
        patterns.retain(|_, entry| entry.group.as_deref() != Some(group));
        before - patterns.len()
    }

    pub fn remove_connection(&self, conn: &C) {
        self.subscriptions.lock().unwrap().remove(conn);
    }

    /// every connection whose compiled pattern set matches `path`.
    pub fn get_subscribers_for_path(&self, path: &str) -> Vec<C> {
        let subs = self.subscriptions.lock().unwrap();
        let mut matched = Vec::new();
        for (conn, patterns) in subs.iter() {
            for pattern in patterns.keys() {
                if let Ok(regex) = self.pattern_cache.get_or_compile(pattern) {
                    if regex.is_match(path) {
                        matched.push(conn.clone());
                        break;
                    }
                }
            }
        }
        matched
    }

    pub fn get_matching_patterns(&self, conn: &C, path: &str) -> Vec<String> {
        let subs = self.subscriptions.lock().unwrap();
        let Some(patterns) = subs.get(conn) else {
            return Vec::new();
        };
        patterns
            .keys()
            .filter(|pattern| {
                self.pattern_cache
                    .get_or_compile(pattern)
                    .map(|r| r.is_match(path))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn has_pattern(&self, path: &str) -> bool {
        !self.get_subscribers_for_path(path).is_empty()
    }

    pub fn get_connection_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    pub fn subscription_count(&self, conn: &C) -> usize {
        self.subscriptions
            .lock()
            .unwrap()
            .get(conn)
            .map(|p| p.len())
            .unwrap_or(0)
    }

    /// handle a raw JSON watch message, returning the structured reply.
    pub fn handle_message(&self, conn: C, raw: &str) -> WatchReply {
        let parsed: serde_json::Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => return WatchReply::err("invalid JSON"),
        };

        let Some(message_type) = parsed.get("type").and_then(|v| v.as_str()) else {
            return WatchReply::err("missing or non-string type");
        };

        let Some(path_value) = parsed.get("path") else {
            return WatchReply::err("missing path");
        };
        let Some(path) = path_value.as_str() else {
            return WatchReply::err("path must be a string");
        };

        let group = parsed
            .get("group")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        match message_type {
            "subscribe" => {
                if self.subscribe(conn, path, group) {
                    WatchReply::ok("subscribe", path)
                } else {
                    WatchReply::err(format!("could not subscribe to {path}"))
                }
            }
            "unsubscribe" => {
                self.unsubscribe(&conn, path);
                WatchReply::ok("unsubscribe", path)
            }
            other => WatchReply::err(format!("unknown message type: {other}")),
        }
    }
}
