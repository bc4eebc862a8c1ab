// ABOUTME: In-memory session registry with change notification
// ABOUTME: Enforces forward-only build status and allocates preview ports atomically

use crate::error::{Result, SessionError};
use crate::subscription::Subscription;
use crate::types::{Session, SessionUpdate};
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub type SessionCallback = Arc<dyn Fn(&Session) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    by_session: HashMap<String, Vec<(u64, SessionCallback)>>,
}

/// Authoritative record of every live session
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
        }
    }

    pub async fn create_session(&self, session: Session) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.session_id) {
            return Err(SessionError::SessionAlreadyExists(session.session_id));
        }
        sessions.insert(session.session_id.clone(), session.clone());
        drop(sessions);

        info!("Created session {}", session.session_id);
        Ok(session)
    }

    /// Fetch a session, refreshing its last-activity timestamp
    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id)?;
        session.last_activity = Utc::now();
        Some(session.clone())
    }

    /// Merge `update` into the session and notify its subscribers
    pub async fn update_session(&self, session_id: &str, update: SessionUpdate) -> Result<Session> {
        let updated = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;

            if let Some(next) = update.build_status {
                if !session.build_status.can_transition_to(next) {
                    warn!(
                        "Rejected status change {} -> {} for session {}",
                        session.build_status, next, session_id
                    );
                    return Err(SessionError::InvalidTransition {
                        from: session.build_status,
                        to: next,
                    });
                }
                if next != session.build_status {
                    debug!(
                        "Session {} status {} -> {}",
                        session_id, session.build_status, next
                    );
                }
            }

            update.apply(session);
            session.last_activity = Utc::now();
            session.clone()
        };

        self.notify(&updated);
        Ok(updated)
    }

    /// Assign the lowest preview port at or above `floor` not held by another session
    ///
    /// Scan and commit happen under one write lock, so concurrent claims never collide.
    pub async fn claim_port(&self, session_id: &str, floor: u16) -> Result<u16> {
        let claimed = {
            let mut sessions = self.sessions.write().await;

            if let Some(port) = sessions.get(session_id).and_then(|s| s.preview_port) {
                return Ok(port);
            }

            let taken: BTreeSet<u16> = sessions.values().filter_map(|s| s.preview_port).collect();
            let port = (floor..=u16::MAX)
                .find(|port| !taken.contains(port))
                .ok_or(SessionError::NoPortAvailable { floor })?;

            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
            session.preview_port = Some(port);
            session.last_activity = Utc::now();
            session.clone()
        };

        self.notify(&claimed);
        claimed
            .preview_port
            .ok_or(SessionError::NoPortAvailable { floor })
    }

    pub async fn delete_session(&self, session_id: &str) -> Option<Session> {
        let removed = self.sessions.write().await.remove(session_id);
        if removed.is_some() {
            self.lock_subscribers().by_session.remove(session_id);
            info!("Deleted session {}", session_id);
        }
        removed
    }

    /// All sessions, oldest first
    pub async fn list_all(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Call `callback` with the new state after every change to the session
    pub fn subscribe(
        &self,
        session_id: &str,
        callback: impl Fn(&Session) + Send + Sync + 'static,
    ) -> Subscription {
        let subscriber_id = {
            let mut subscribers = self.lock_subscribers();
            subscribers.next_id += 1;
            let id = subscribers.next_id;
            subscribers
                .by_session
                .entry(session_id.to_string())
                .or_default()
                .push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Subscribers>> = Arc::downgrade(&self.subscribers);
        let session_id = session_id.to_string();
        Subscription::new(move || {
            if let Some(subscribers) = weak.upgrade() {
                let mut subscribers = lock(&subscribers);
                if let Some(list) = subscribers.by_session.get_mut(&session_id) {
                    list.retain(|(id, _)| *id != subscriber_id);
                }
            }
        })
    }

    /// Remove sessions idle for at least `max_inactivity`, returning their ids
    pub async fn sweep_stale(&self, max_inactivity: chrono::Duration) -> Vec<String> {
        let now = Utc::now();
        let mut removed: Vec<String> = {
            let mut sessions = self.sessions.write().await;
            let stale: Vec<String> = sessions
                .values()
                .filter(|s| s.last_activity + max_inactivity <= now)
                .map(|s| s.session_id.clone())
                .collect();
            for id in &stale {
                sessions.remove(id);
            }
            stale
        };
        removed.sort();

        if !removed.is_empty() {
            let mut subscribers = self.lock_subscribers();
            for id in &removed {
                subscribers.by_session.remove(id);
            }
            info!("Swept {} stale sessions", removed.len());
        }
        removed
    }

    fn notify(&self, session: &Session) {
        let callbacks: Vec<SessionCallback> = self
            .lock_subscribers()
            .by_session
            .get(&session.session_id)
            .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();

        for callback in callbacks {
            callback(session);
        }
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Subscribers> {
        lock(&self.subscribers)
    }

    #[cfg(test)]
    pub(crate) async fn backdate(&self, session_id: &str, by: chrono::Duration) {
        if let Some(session) = self.sessions.write().await.get_mut(session_id) {
            session.last_activity = session.last_activity - by;
        }
    }
}

fn lock(subscribers: &Mutex<Subscribers>) -> MutexGuard<'_, Subscribers> {
    subscribers.lock().unwrap_or_else(|poisoned| {
        warn!("Session subscriber mutex poisoned, recovering");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BuildStatus;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session(id: &str) -> Session {
        Session::new(id, format!("splitlab-session-{}", id), None, None)
    }

    #[tokio::test]
    async fn test_get_refreshes_last_activity() {
        let registry = SessionRegistry::new();
        registry.create_session(session("a")).await.unwrap();
        registry.backdate("a", chrono::Duration::minutes(30)).await;

        let before = Utc::now();
        let fetched = registry.get_session("a").await.unwrap();
        assert!(fetched.last_activity >= before);
    }

    #[tokio::test]
    async fn test_rejects_duplicate_ids() {
        let registry = SessionRegistry::new();
        registry.create_session(session("a")).await.unwrap();
        let err = registry.create_session(session("a")).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionAlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_status_never_moves_backwards() {
        let registry = SessionRegistry::new();
        registry.create_session(session("a")).await.unwrap();

        registry
            .update_session("a", SessionUpdate::status(BuildStatus::Building))
            .await
            .unwrap();
        let err = registry
            .update_session("a", SessionUpdate::status(BuildStatus::Cloning))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { .. }));

        registry
            .update_session("a", SessionUpdate::failed("boom"))
            .await
            .unwrap();
        let current = registry.get_session("a").await.unwrap();
        assert_eq!(current.build_status, BuildStatus::Failed);
        assert_eq!(current.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_update_unknown_session() {
        let registry = SessionRegistry::new();
        let err = registry
            .update_session("ghost", SessionUpdate::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_subscribers_see_updates_until_dropped() {
        let registry = SessionRegistry::new();
        registry.create_session(session("a")).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let subscription = registry.subscribe("a", move |s| {
            assert_eq!(s.session_id, "a");
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registry
            .update_session("a", SessionUpdate::status(BuildStatus::Cloning))
            .await
            .unwrap();
        registry.claim_port("a", 4100).await.unwrap();
        drop(subscription);
        registry
            .update_session("a", SessionUpdate::status(BuildStatus::Building))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_claim_port_skips_held_ports() {
        let registry = SessionRegistry::new();
        for id in ["a", "b", "c"] {
            registry.create_session(session(id)).await.unwrap();
        }

        assert_eq!(registry.claim_port("a", 4100).await.unwrap(), 4100);
        assert_eq!(registry.claim_port("b", 4100).await.unwrap(), 4101);
        assert_eq!(registry.claim_port("a", 4100).await.unwrap(), 4100);

        registry.delete_session("a").await;
        assert_eq!(registry.claim_port("c", 4100).await.unwrap(), 4100);
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_unique() {
        let registry = Arc::new(SessionRegistry::new());
        let ids: Vec<String> = (0..20).map(|i| format!("s{}", i)).collect();
        for id in &ids {
            registry.create_session(session(id)).await.unwrap();
        }

        let mut handles = Vec::new();
        for id in ids {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.claim_port(&id, 4100).await.unwrap()
            }));
        }

        let mut ports = BTreeSet::new();
        for handle in handles {
            assert!(ports.insert(handle.await.unwrap()));
        }
        assert_eq!(ports.len(), 20);
        assert_eq!(ports.iter().next(), Some(&4100));
        assert_eq!(ports.iter().last(), Some(&4119));
    }

    #[tokio::test]
    async fn test_sweep_stale_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.create_session(session("old")).await.unwrap();
        registry.create_session(session("fresh")).await.unwrap();
        registry.backdate("old", chrono::Duration::hours(2)).await;

        let first = registry.sweep_stale(chrono::Duration::hours(1)).await;
        let second = registry.sweep_stale(chrono::Duration::hours(1)).await;

        assert_eq!(first, vec!["old".to_string()]);
        assert!(second.is_empty());
        assert_eq!(registry.len().await, 1);
    }
}
