use std::collections::HashMap;
use std::time::Duration;

use murmur_core::ConnectionId;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::RegistryError;
use crate::handle::ConnectionHandle;

struct SessionEntry {
    handle: ConnectionHandle,
    username: Option<String>,
    last_activity: Instant,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<ConnectionId, SessionEntry>,
    by_name: HashMap<String, ConnectionId>,
}

impl Inner {
    fn take(&mut self, id: &ConnectionId) -> Option<RemovedSession> {
        let entry = self.sessions.remove(id)?;
        if let Some(name) = &entry.username {
            self.by_name.remove(name);
        }
        Some(RemovedSession {
            handle: entry.handle,
            username: entry.username,
        })
    }
}

/// A session removed from the registry by [`SessionRegistry::remove`].
#[derive(Debug)]
pub struct RemovedSession {
    pub handle: ConnectionHandle,
    pub username: Option<String>,
}

/// A session whose last activity is older than the idle timeout.
#[derive(Clone, Debug)]
pub struct StaleSession {
    pub handle: ConnectionHandle,
    pub username: Option<String>,
    pub idle_for: Duration,
}

impl StaleSession {
    pub fn id(&self) -> &ConnectionId {
        self.handle.id()
    }
}

/// Store of every live session and its username binding.
///
/// Both maps sit behind one mutex, so the uniqueness check and the binding
/// happen in a single critical section. Every method takes the lock for the
/// duration of one lookup or mutation and never across a send.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new connection with no username.
    pub fn register_unauthenticated(
        &self,
        handle: ConnectionHandle,
        now: Instant,
    ) -> Result<ConnectionId, RegistryError> {
        let mut inner = self.inner.lock();
        let id = *handle.id();
        if inner.sessions.contains_key(&id) {
            return Err(RegistryError::DuplicateConnection(id));
        }
        inner.sessions.insert(
            id,
            SessionEntry {
                handle,
                username: None,
                last_activity: now,
            },
        );
        Ok(id)
    }

    /// Bind `name` to the session if no other session holds it.
    pub fn try_bind_username(&self, id: &ConnectionId, name: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        if inner.by_name.contains_key(name) {
            return Err(RegistryError::UsernameTaken(name.to_owned()));
        }
        let entry = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownSession(*id))?;
        if let Some(existing) = &entry.username {
            return Err(RegistryError::AlreadyNamed(existing.clone()));
        }
        entry.username = Some(name.to_owned());
        inner.by_name.insert(name.to_owned(), *id);
        Ok(())
    }

    /// Record activity. Timestamps never move backwards; absent sessions are
    /// ignored.
    pub fn touch_activity(&self, id: &ConnectionId, now: Instant) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.sessions.get_mut(id) {
            if now > entry.last_activity {
                entry.last_activity = now;
            }
        }
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<ConnectionHandle> {
        let inner = self.inner.lock();
        let id = inner.by_name.get(name)?;
        inner.sessions.get(id).map(|e| e.handle.clone())
    }

    pub fn username_of(&self, id: &ConnectionId) -> Option<String> {
        self.inner.lock().sessions.get(id)?.username.clone()
    }

    pub fn last_activity(&self, id: &ConnectionId) -> Option<Instant> {
        self.inner.lock().sessions.get(id).map(|e| e.last_activity)
    }

    /// Sorted snapshot of bound usernames.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of every named session's handle, minus `exclude`.
    pub fn named_connections(&self, exclude: Option<&ConnectionId>) -> Vec<ConnectionHandle> {
        let inner = self.inner.lock();
        inner
            .by_name
            .values()
            .filter(|id| Some(*id) != exclude)
            .filter_map(|id| inner.sessions.get(id))
            .map(|e| e.handle.clone())
            .collect()
    }

    /// Remove a session. Returns `None` if it was already gone, so exactly one
    /// of several concurrent callers observes the removal.
    pub fn remove(&self, id: &ConnectionId) -> Option<RemovedSession> {
        self.inner.lock().take(id)
    }

    /// Remove a session only if it is still idle for longer than
    /// `idle_timeout` as of `now`. Activity recorded after a stale snapshot
    /// keeps the session.
    pub fn remove_if_stale(
        &self,
        id: &ConnectionId,
        now: Instant,
        idle_timeout: Duration,
    ) -> Option<RemovedSession> {
        let mut inner = self.inner.lock();
        let last_activity = inner.sessions.get(id)?.last_activity;
        if now.saturating_duration_since(last_activity) <= idle_timeout {
            return None;
        }
        inner.take(id)
    }

    /// Sessions idle for longer than `idle_timeout` as of `now`.
    pub fn snapshot_stale_sessions(&self, now: Instant, idle_timeout: Duration) -> Vec<StaleSession> {
        let inner = self.inner.lock();
        inner
            .sessions
            .values()
            .filter_map(|e| {
                let idle_for = now.saturating_duration_since(e.last_activity);
                (idle_for > idle_timeout).then(|| StaleSession {
                    handle: e.handle.clone(),
                    username: e.username.clone(),
                    idle_for,
                })
            })
            .collect()
    }

    /// Drop every session and return their handles for closing.
    pub fn clear(&self) -> Vec<ConnectionHandle> {
        let mut inner = self.inner.lock();
        inner.by_name.clear();
        inner.sessions.drain().map(|(_, e)| e.handle).collect()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.inner.lock().sessions.contains_key(id)
    }

    /// Number of tracked sessions, named or not.
    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::Receiver<String>) {
        ConnectionHandle::channel(8, CancellationToken::new())
    }

    fn registered(registry: &SessionRegistry, now: Instant) -> ConnectionId {
        let (h, _rx) = handle();
        registry.register_unauthenticated(h, now).unwrap()
    }

    #[test]
    fn register_and_remove() {
        let registry = SessionRegistry::new();
        let id = registered(&registry, Instant::now());
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&id));
        assert_eq!(registry.username_of(&id), None);

        let removed = registry.remove(&id).unwrap();
        assert_eq!(removed.username, None);
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_handle_is_rejected() {
        let registry = SessionRegistry::new();
        let (h, _rx) = handle();
        registry.register_unauthenticated(h.clone(), Instant::now()).unwrap();
        let err = registry.register_unauthenticated(h.clone(), Instant::now()).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateConnection(*h.id()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn bind_username_is_unique() {
        let registry = SessionRegistry::new();
        let a = registered(&registry, Instant::now());
        let b = registered(&registry, Instant::now());

        registry.try_bind_username(&a, "alice").unwrap();
        assert_eq!(
            registry.try_bind_username(&b, "alice"),
            Err(RegistryError::UsernameTaken("alice".into()))
        );
        assert_eq!(registry.username_of(&b), None);
        assert_eq!(registry.lookup_by_name("alice").unwrap().id(), &a);
    }

    #[test]
    fn bind_twice_is_rejected() {
        let registry = SessionRegistry::new();
        let a = registered(&registry, Instant::now());
        registry.try_bind_username(&a, "alice").unwrap();
        assert_eq!(
            registry.try_bind_username(&a, "alicia"),
            Err(RegistryError::AlreadyNamed("alice".into()))
        );
        assert_eq!(registry.list_names(), vec!["alice".to_string()]);
    }

    #[test]
    fn bind_unknown_session_fails() {
        let registry = SessionRegistry::new();
        let ghost = ConnectionId::new();
        assert_eq!(
            registry.try_bind_username(&ghost, "alice"),
            Err(RegistryError::UnknownSession(ghost))
        );
        assert!(registry.list_names().is_empty());
    }

    #[test]
    fn concurrent_binds_have_one_winner() {
        let registry = Arc::new(SessionRegistry::new());
        let ids: Vec<ConnectionId> = (0..16)
            .map(|_| registered(&registry, Instant::now()))
            .collect();

        let threads: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.try_bind_username(&id, "same").is_ok())
            })
            .collect();
        let winners = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(registry.list_names(), vec!["same".to_string()]);
    }

    #[test]
    fn remove_is_idempotent_and_frees_name() {
        let registry = SessionRegistry::new();
        let a = registered(&registry, Instant::now());
        registry.try_bind_username(&a, "alice").unwrap();

        let removed = registry.remove(&a).unwrap();
        assert_eq!(removed.username.as_deref(), Some("alice"));
        assert!(registry.remove(&a).is_none());
        assert!(registry.lookup_by_name("alice").is_none());

        let b = registered(&registry, Instant::now());
        registry.try_bind_username(&b, "alice").unwrap();
    }

    #[test]
    fn touch_never_moves_backwards() {
        let registry = SessionRegistry::new();
        let start = Instant::now();
        let later = start + Duration::from_secs(5);
        let id = registered(&registry, start);

        registry.touch_activity(&id, later);
        registry.touch_activity(&id, start);
        assert_eq!(registry.last_activity(&id), Some(later));

        registry.touch_activity(&ConnectionId::new(), later);
    }

    #[test]
    fn list_names_skips_unauthenticated() {
        let registry = SessionRegistry::new();
        for name in ["carol", "alice", "bob"] {
            let id = registered(&registry, Instant::now());
            registry.try_bind_username(&id, name).unwrap();
        }
        registered(&registry, Instant::now());

        assert_eq!(registry.list_names(), vec!["alice", "bob", "carol"]);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn named_connections_honours_exclude() {
        let registry = SessionRegistry::new();
        let a = registered(&registry, Instant::now());
        let b = registered(&registry, Instant::now());
        registered(&registry, Instant::now());
        registry.try_bind_username(&a, "alice").unwrap();
        registry.try_bind_username(&b, "bob").unwrap();

        assert_eq!(registry.named_connections(None).len(), 2);
        let others = registry.named_connections(Some(&a));
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id(), &b);
    }

    #[test]
    fn stale_sessions_are_strictly_older_than_timeout() {
        let registry = SessionRegistry::new();
        let start = Instant::now();
        let timeout = Duration::from_secs(60);
        let idle = registered(&registry, start);
        let fresh = registered(&registry, start);
        registry.try_bind_username(&idle, "sleepy").unwrap();
        registry.touch_activity(&fresh, start + Duration::from_secs(30));

        assert!(registry.snapshot_stale_sessions(start + timeout, timeout).is_empty());

        let stale = registry.snapshot_stale_sessions(start + Duration::from_secs(61), timeout);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id(), &idle);
        assert_eq!(stale[0].username.as_deref(), Some("sleepy"));
        assert_eq!(stale[0].idle_for, Duration::from_secs(61));
    }

    #[test]
    fn remove_if_stale_rechecks_activity() {
        let registry = SessionRegistry::new();
        let start = Instant::now();
        let timeout = Duration::from_secs(60);
        let id = registered(&registry, start);
        registry.try_bind_username(&id, "sleepy").unwrap();
        let check = start + Duration::from_secs(61);

        assert_eq!(registry.snapshot_stale_sessions(check, timeout).len(), 1);
        registry.touch_activity(&id, start + Duration::from_secs(60));
        assert!(registry.remove_if_stale(&id, check, timeout).is_none());
        assert!(registry.contains(&id));

        let removed = registry
            .remove_if_stale(&id, start + Duration::from_secs(121), timeout)
            .unwrap();
        assert_eq!(removed.username.as_deref(), Some("sleepy"));
        assert!(registry.lookup_by_name("sleepy").is_none());
        assert!(registry.remove_if_stale(&id, check, timeout).is_none());
    }

    #[test]
    fn clear_returns_all_handles() {
        let registry = SessionRegistry::new();
        let a = registered(&registry, Instant::now());
        registered(&registry, Instant::now());
        registry.try_bind_username(&a, "alice").unwrap();

        assert_eq!(registry.clear().len(), 2);
        assert!(registry.is_empty());
        assert!(registry.list_names().is_empty());
    }
}
