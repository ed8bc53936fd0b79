// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::app::types::ServerInfo;

use super::SshSession;

/// What the cache needs from a pooled transport.
#[async_trait]
pub trait PooledSession: Send + Sync + 'static {
    fn is_closed(&self) -> bool;
    /// Opens a channel and runs a trivial command.
    async fn validate(&self) -> bool;
    async fn disconnect(&self);
}

#[async_trait]
impl PooledSession for SshSession {
    fn is_closed(&self) -> bool {
        SshSession::is_closed(self)
    }

    async fn validate(&self) -> bool {
        self.probe().await
    }

    async fn disconnect(&self) {
        SshSession::disconnect(self).await
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub login_user: String,
    pub host: String,
    pub port: u16,
    pub credential_token: String,
}

impl From<&ServerInfo> for SessionKey {
    fn from(server: &ServerInfo) -> Self {
        Self {
            login_user: server.login_user.clone(),
            host: server.host.clone(),
            port: server.port,
            credential_token: server.credential_token.clone(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}#{}",
            self.login_user, self.host, self.port, self.credential_token
        )
    }
}

struct Slot<S> {
    session: Option<Arc<S>>,
    last_used: Instant,
}

/// Sessions keyed by user, host, port and credential token.
///
/// Each key has its own async mutex, so lookup, validation and replacement
/// for one key are atomic while different keys proceed in parallel.
pub struct SessionCache<S: PooledSession> {
    slots: RwLock<HashMap<SessionKey, Arc<Mutex<Slot<S>>>>>,
    idle_timeout: Duration,
}

impl<S: PooledSession> SessionCache<S> {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    async fn slot(&self, key: &SessionKey) -> Arc<Mutex<Slot<S>>> {
        if let Some(slot) = self.slots.read().await.get(key) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Slot {
                    session: None,
                    last_used: Instant::now(),
                }))
            })
            .clone()
    }

    /// Returns the cached session when it is inside the idle window and still
    /// validates; otherwise connects a fresh one and disconnects the old one.
    pub async fn acquire<F, Fut, E>(&self, key: &SessionKey, connect: F) -> Result<Arc<S>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S, E>>,
    {
        let slot = self.slot(key).await;
        let mut slot = slot.lock().await;
        if let Some(existing) = slot.session.take() {
            let expired = slot.last_used.elapsed() >= self.idle_timeout;
            if !expired && !existing.is_closed() && existing.validate().await {
                slot.last_used = Instant::now();
                slot.session = Some(existing.clone());
                return Ok(existing);
            }
            tracing::debug!(session = %key, expired, "replacing cached session");
            existing.disconnect().await;
        }
        let fresh = Arc::new(connect().await?);
        slot.session = Some(fresh.clone());
        slot.last_used = Instant::now();
        Ok(fresh)
    }

    /// Drops and disconnects the session for `key`, if any.
    pub async fn invalidate(&self, key: &SessionKey) {
        let Some(slot) = self.slots.read().await.get(key).cloned() else {
            return;
        };
        let session = slot.lock().await.session.take();
        if let Some(session) = session {
            session.disconnect().await;
        }
    }

    /// Disconnects sessions idle for longer than the timeout. Slots that are
    /// currently being acquired are skipped.
    pub async fn evict_idle(&self) -> usize {
        let slots: Vec<(SessionKey, Arc<Mutex<Slot<S>>>)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect();
        let mut evicted = 0;
        for (key, slot) in slots {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            if guard.session.is_none() || guard.last_used.elapsed() < self.idle_timeout {
                continue;
            }
            if let Some(session) = guard.session.take() {
                tracing::debug!(session = %key, "evicting idle session");
                session.disconnect().await;
                evicted += 1;
            }
        }
        evicted
    }

    pub async fn active(&self) -> usize {
        let slots: Vec<Arc<Mutex<Slot<S>>>> = self.slots.read().await.values().cloned().collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.session.is_some() {
                count += 1;
            }
        }
        count
    }

    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = cache.evict_idle().await;
                if evicted > 0 {
                    tracing::info!(evicted, "evicted idle ssh sessions");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeSession {
        id: usize,
        closed: AtomicBool,
        healthy: AtomicBool,
        disconnects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PooledSession for FakeSession {
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        async fn validate(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        async fn disconnect(&self) {
            self.closed.store(true, Ordering::SeqCst);
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        cache: SessionCache<FakeSession>,
        connects: AtomicUsize,
        disconnects: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new(idle: Duration) -> Self {
            Self {
                cache: SessionCache::new(idle),
                connects: AtomicUsize::new(0),
                disconnects: Arc::new(AtomicUsize::new(0)),
            }
        }

        async fn acquire(&self, key: &SessionKey) -> Arc<FakeSession> {
            self.cache
                .acquire(key, || async {
                    let id = self.connects.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(FakeSession {
                        id,
                        closed: AtomicBool::new(false),
                        healthy: AtomicBool::new(true),
                        disconnects: self.disconnects.clone(),
                    })
                })
                .await
                .expect("acquire")
        }
    }

    fn key(user: &str) -> SessionKey {
        SessionKey {
            login_user: user.into(),
            host: "login.hpc.org".into(),
            port: 22,
            credential_token: "tok".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn same_session_within_idle_window() {
        let h = Harness::new(Duration::from_secs(1800));
        let first = h.acquire(&key("alice")).await;
        tokio::time::advance(Duration::from_secs(600)).await;
        let second = h.acquire(&key("alice")).await;
        assert_eq!(first.id, second.id);
        assert_eq!(h.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_and_disconnected_after_idle_window() {
        let h = Harness::new(Duration::from_secs(1800));
        let first = h.acquire(&key("alice")).await;
        tokio::time::advance(Duration::from_secs(1801)).await;
        let second = h.acquire(&key("alice")).await;
        assert_ne!(first.id, second.id);
        assert!(first.is_closed());
        assert_eq!(h.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_validation_replaces_session() {
        let h = Harness::new(Duration::from_secs(1800));
        let first = h.acquire(&key("alice")).await;
        first.healthy.store(false, Ordering::SeqCst);
        let second = h.acquire(&key("alice")).await;
        assert_ne!(first.id, second.id);
        assert_eq!(h.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_get_distinct_sessions() {
        let h = Harness::new(Duration::from_secs(1800));
        let a = h.acquire(&key("alice")).await;
        let b = h.acquire(&key("bob")).await;
        assert_ne!(a.id, b.id);
        assert_eq!(h.cache.active().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_only_idle_sessions() {
        let h = Harness::new(Duration::from_secs(60));
        let old = h.acquire(&key("alice")).await;
        tokio::time::advance(Duration::from_secs(45)).await;
        let recent = h.acquire(&key("bob")).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(h.cache.evict_idle().await, 1);
        assert!(old.is_closed());
        assert!(!recent.is_closed());
        assert_eq!(h.cache.active().await, 1);
    }

    #[tokio::test]
    async fn failed_connect_leaves_slot_empty() {
        let cache: SessionCache<FakeSession> = SessionCache::new(Duration::from_secs(60));
        let err = cache
            .acquire(&key("alice"), || async { Err::<FakeSession, _>("refused") })
            .await
            .err();
        assert_eq!(err, Some("refused"));
        assert_eq!(cache.active().await, 0);
    }

    #[test]
    fn key_display_includes_token() {
        assert_eq!(key("alice").to_string(), "alice@login.hpc.org:22#tok");
    }
}
