// ABOUTME: Per-execution progress log with live subscriber fan-out
// ABOUTME: Executions are deduplicated by content hash and dropped five minutes after creation

use crate::subscription::Subscription;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// How long an execution is kept after creation, completed or not
pub const EXECUTION_RETENTION: Duration = Duration::from_secs(5 * 60);

const COMPLETED_SUCCESS: &str = "Completed successfully";
const COMPLETED_ERROR: &str = "Completed with errors";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(rename = "type")]
    pub severity: Severity,
    /// Set on the terminal message recorded by `complete`
    #[serde(skip)]
    pub is_final: bool,
}

impl ProgressMessage {
    fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            severity,
            is_final: false,
        }
    }

    fn repeats(&self, other: &ProgressMessage) -> bool {
        self.message == other.message && self.severity == other.severity
    }
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressMessage) + Send + Sync>;

struct Execution {
    messages: Vec<ProgressMessage>,
    completed: bool,
    dedup_key: Option<String>,
    subscribers: Vec<Subscriber>,
}

struct Subscriber {
    id: u64,
    callback: ProgressCallback,
    /// Live messages held back while the history is still being replayed
    pending: Option<Vec<ProgressMessage>>,
}

impl Execution {
    /// Queue `message` for replaying subscribers and return the live callbacks
    fn fan_out(&mut self, message: &ProgressMessage) -> Vec<ProgressCallback> {
        let mut live = Vec::with_capacity(self.subscribers.len());
        for subscriber in &mut self.subscribers {
            match &mut subscriber.pending {
                Some(pending) => pending.push(message.clone()),
                None => live.push(subscriber.callback.clone()),
            }
        }
        live
    }
}

#[derive(Default)]
struct BusState {
    executions: HashMap<String, Execution>,
    dedup_index: HashMap<String, String>,
    next_subscriber: u64,
}

impl BusState {
    fn remove(&mut self, execution_id: &str) {
        if let Some(execution) = self.executions.remove(execution_id) {
            if let Some(key) = execution.dedup_key {
                if self.dedup_index.get(&key).map(String::as_str) == Some(execution_id) {
                    self.dedup_index.remove(&key);
                }
            }
        }
    }
}

/// Progress event bus keyed by execution id
#[derive(Clone)]
pub struct ProgressBus {
    state: Arc<Mutex<BusState>>,
    retention: Duration,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::with_retention(EXECUTION_RETENTION)
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState::default())),
            retention,
        }
    }

    /// Hex SHA-256 of the input that triggered an execution
    pub fn dedup_key(input: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Register a new execution and schedule its removal
    pub fn create(&self, execution_id: &str, dedup_key: Option<String>) {
        {
            let mut state = self.lock();
            if state.executions.contains_key(execution_id) {
                debug!("Progress execution {} already exists", execution_id);
                return;
            }
            if let Some(key) = &dedup_key {
                state
                    .dedup_index
                    .insert(key.clone(), execution_id.to_string());
            }
            state.executions.insert(
                execution_id.to_string(),
                Execution {
                    messages: Vec::new(),
                    completed: false,
                    dedup_key,
                    subscribers: Vec::new(),
                },
            );
        }

        self.schedule_removal(execution_id.to_string());
    }

    /// Append a message and notify subscribers
    ///
    /// Unknown or completed executions are ignored, as is an exact repeat of the last message.
    pub fn append(&self, execution_id: &str, message: impl Into<String>, severity: Severity) {
        let message = ProgressMessage::new(message, severity);
        let subscribers = {
            let mut state = self.lock();
            let Some(execution) = state.executions.get_mut(execution_id) else {
                drop(state);
                warn!("Progress append to unknown execution {}", execution_id);
                return;
            };
            if execution.completed {
                debug!("Ignoring append to completed execution {}", execution_id);
                return;
            }
            if execution
                .messages
                .last()
                .is_some_and(|last| last.repeats(&message))
            {
                return;
            }
            execution.messages.push(message.clone());
            execution.fan_out(&message)
        };

        notify(&subscribers, &message);
    }

    pub fn info(&self, execution_id: &str, message: impl Into<String>) {
        self.append(execution_id, message, Severity::Info);
    }

    pub fn success(&self, execution_id: &str, message: impl Into<String>) {
        self.append(execution_id, message, Severity::Success);
    }

    pub fn error(&self, execution_id: &str, message: impl Into<String>) {
        self.append(execution_id, message, Severity::Error);
    }

    /// Mark the execution completed and record its terminal message; repeated calls are no-ops
    pub fn complete(&self, execution_id: &str, success: bool) {
        let mut terminal = if success {
            ProgressMessage::new(COMPLETED_SUCCESS, Severity::Success)
        } else {
            ProgressMessage::new(COMPLETED_ERROR, Severity::Error)
        };
        terminal.is_final = true;

        let subscribers = {
            let mut state = self.lock();
            let Some(execution) = state.executions.get_mut(execution_id) else {
                drop(state);
                warn!("Progress completion for unknown execution {}", execution_id);
                return;
            };
            if execution.completed {
                return;
            }
            execution.completed = true;

            let repeats_last = execution
                .messages
                .last()
                .is_some_and(|last| last.repeats(&terminal));
            if repeats_last {
                if let Some(last) = execution.messages.last_mut() {
                    last.is_final = true;
                    terminal = last.clone();
                }
            } else {
                execution.messages.push(terminal.clone());
            }
            execution.fan_out(&terminal)
        };

        notify(&subscribers, &terminal);
    }

    /// Register a callback, optionally replaying the history to it before returning
    ///
    /// Messages appended while the history is replayed are delivered after it, in order.
    pub fn subscribe(
        &self,
        execution_id: &str,
        callback: impl Fn(&ProgressMessage) + Send + Sync + 'static,
        replay_existing: bool,
    ) -> Subscription {
        let callback: ProgressCallback = Arc::new(callback);

        let (subscriber_id, history) = {
            let mut state = self.lock();
            state.next_subscriber += 1;
            let subscriber_id = state.next_subscriber;
            let Some(execution) = state.executions.get_mut(execution_id) else {
                drop(state);
                warn!("Subscribe to unknown execution {}", execution_id);
                return Subscription::noop();
            };
            let history = if replay_existing {
                execution.messages.clone()
            } else {
                Vec::new()
            };
            execution.subscribers.push(Subscriber {
                id: subscriber_id,
                callback: callback.clone(),
                pending: (!history.is_empty()).then(Vec::new),
            });
            (subscriber_id, history)
        };

        if !history.is_empty() {
            notify_one(&callback, &history);
            self.drain_pending(execution_id, subscriber_id, &callback);
        }

        let weak: Weak<Mutex<BusState>> = Arc::downgrade(&self.state);
        let execution_id = execution_id.to_string();
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = lock_state(&state);
                if let Some(execution) = state.executions.get_mut(&execution_id) {
                    execution.subscribers.retain(|s| s.id != subscriber_id);
                }
            }
        })
    }

    /// Deliver messages queued during replay until none are left, then go live
    fn drain_pending(&self, execution_id: &str, subscriber_id: u64, callback: &ProgressCallback) {
        loop {
            let queued = {
                let mut state = self.lock();
                let Some(subscriber) = state
                    .executions
                    .get_mut(execution_id)
                    .and_then(|e| e.subscribers.iter_mut().find(|s| s.id == subscriber_id))
                else {
                    return;
                };
                match subscriber.pending.as_mut() {
                    Some(pending) if !pending.is_empty() => std::mem::take(pending),
                    _ => {
                        subscriber.pending = None;
                        return;
                    }
                }
            };
            notify_one(callback, &queued);
        }
    }

    pub fn lookup_by_dedup_key(&self, key: &str) -> Option<String> {
        self.lock().dedup_index.get(key).cloned()
    }

    pub fn messages(&self, execution_id: &str) -> Option<Vec<ProgressMessage>> {
        self.lock()
            .executions
            .get(execution_id)
            .map(|e| e.messages.clone())
    }

    pub fn is_completed(&self, execution_id: &str) -> Option<bool> {
        self.lock().executions.get(execution_id).map(|e| e.completed)
    }

    pub fn contains(&self, execution_id: &str) -> bool {
        self.lock().executions.contains_key(execution_id)
    }

    pub fn subscriber_count(&self, execution_id: &str) -> usize {
        self.lock()
            .executions
            .get(execution_id)
            .map_or(0, |e| e.subscribers.len())
    }

    fn schedule_removal(&self, execution_id: String) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                "No async runtime, execution {} will not be garbage-collected",
                execution_id
            );
            return;
        };

        let weak = Arc::downgrade(&self.state);
        let retention = self.retention;
        handle.spawn(async move {
            tokio::time::sleep(retention).await;
            if let Some(state) = weak.upgrade() {
                lock_state(&state).remove(&execution_id);
                debug!("Removed progress execution {}", execution_id);
            }
        });
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<BusState>) -> MutexGuard<'_, BusState> {
    state.lock().unwrap_or_else(|poisoned| {
        warn!("Progress bus mutex poisoned, recovering");
        poisoned.into_inner()
    })
}

fn notify_one(callback: &ProgressCallback, messages: &[ProgressMessage]) {
    for message in messages {
        callback(message);
    }
}

fn notify(subscribers: &[ProgressCallback], message: &ProgressMessage) {
    for callback in subscribers {
        callback(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn texts(bus: &ProgressBus, id: &str) -> Vec<String> {
        bus.messages(id)
            .unwrap()
            .into_iter()
            .map(|m| m.message)
            .collect()
    }

    #[tokio::test]
    async fn test_consecutive_duplicates_are_suppressed() {
        let bus = ProgressBus::new();
        bus.create("e", None);

        bus.info("e", "Installing");
        bus.info("e", "Installing");
        bus.error("e", "Installing");
        bus.info("e", "Building");
        bus.info("e", "Installing");

        assert_eq!(
            texts(&bus, "e"),
            vec!["Installing", "Installing", "Building", "Installing"]
        );
    }

    #[tokio::test]
    async fn test_complete_appends_once_and_freezes() {
        let bus = ProgressBus::new();
        bus.create("e", None);
        bus.info("e", "step");

        bus.complete("e", false);
        bus.complete("e", true);
        bus.info("e", "late");

        let messages = bus.messages("e").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].message, "Completed with errors");
        assert_eq!(messages[1].severity, Severity::Error);
        assert!(messages[1].is_final);
        assert_eq!(bus.is_completed("e"), Some(true));
    }

    #[tokio::test]
    async fn test_subscribe_replays_then_streams_until_unsubscribed() {
        let bus = ProgressBus::new();
        bus.create("e", None);
        bus.info("e", "first");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = bus.subscribe(
            "e",
            move |m| sink.lock().unwrap().push(m.message.clone()),
            true,
        );
        assert_eq!(*seen.lock().unwrap(), vec!["first"]);

        bus.info("e", "second");
        subscription.unsubscribe();
        bus.info("e", "third");

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(bus.subscriber_count("e"), 0);
    }

    #[test]
    fn test_replay_stays_ordered_while_a_writer_appends() {
        let bus = ProgressBus::new();
        bus.create("e", None);
        for i in 0..200 {
            bus.info("e", i.to_string());
        }

        let writer = {
            let bus = bus.clone();
            std::thread::spawn(move || {
                for i in 200..2000 {
                    bus.info("e", i.to_string());
                }
                bus.complete("e", true);
            })
        };

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = bus.subscribe(
            "e",
            move |m| {
                if !m.is_final {
                    std::thread::sleep(Duration::from_micros(20));
                }
                sink.lock().unwrap().push(m.message.clone());
            },
            true,
        );
        writer.join().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.last().map(String::as_str), Some("Completed successfully"));
        let numbers: Vec<u32> = seen[..seen.len() - 1]
            .iter()
            .map(|m| m.parse().unwrap())
            .collect();
        assert_eq!(numbers, (0..2000).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn test_callback_may_reenter_the_bus() {
        let bus = ProgressBus::new();
        bus.create("e", None);
        let inner = bus.clone();
        let _subscription = bus.subscribe(
            "e",
            move |m| {
                let _ = inner.messages("e");
                assert!(!m.message.is_empty());
            },
            false,
        );

        bus.info("e", "hello");
        bus.complete("e", true);
        assert_eq!(texts(&bus, "e"), vec!["hello", "Completed successfully"]);
    }

    #[tokio::test]
    async fn test_unknown_execution_is_tolerated() {
        let bus = ProgressBus::new();
        bus.info("missing", "x");
        bus.complete("missing", true);
        let subscription = bus.subscribe("missing", |_| {}, true);
        assert!(!subscription.is_active());
        assert!(bus.messages("missing").is_none());
    }

    #[tokio::test]
    async fn test_dedup_key_lookup() {
        let bus = ProgressBus::new();
        let key = ProgressBus::dedup_key("https://github.com/acme/site.git");
        assert_eq!(key.len(), 64);

        bus.create("setup-1", Some(key.clone()));
        assert_eq!(bus.lookup_by_dedup_key(&key).as_deref(), Some("setup-1"));
        assert_eq!(bus.lookup_by_dedup_key("other"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_expires_after_retention_even_when_running() {
        let bus = ProgressBus::new();
        let key = ProgressBus::dedup_key("input");
        bus.create("e", Some(key.clone()));
        bus.info("e", "still going");

        tokio::time::sleep(Duration::from_secs(4 * 60)).await;
        assert!(bus.contains("e"));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!bus.contains("e"));
        assert_eq!(bus.lookup_by_dedup_key(&key), None);
    }
}
