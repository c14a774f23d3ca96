use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::solver::ChallengeSolver;
use crate::store::CredentialStore;
use crate::types::{Credential, Origin, SolveError};

type SolveOutcome = Result<Arc<Credential>, SolveError>;
type PendingSolve = Shared<BoxFuture<'static, SolveOutcome>>;

/// Owns the cached credential for one origin.
///
/// At most one solve runs per manager at any time: callers that arrive while a
/// solve is pending await the same shared future and observe its single outcome.
pub struct SessionManager {
    origin: Origin,
    solver: Arc<dyn ChallengeSolver>,
    store: Option<Arc<CredentialStore>>,
    session_state: Arc<Mutex<SessionState>>,
}

#[derive(Default)]
struct SessionState {
    /// Credential from the last completed solve (or restored from disk)
    credential: Option<Arc<Credential>>,

    /// Solve currently in flight
    pending: Option<PendingSolve>,

    /// Whether the persisted copy has already been consulted
    restore_attempted: bool,

    solves: u32,
    invalidations: u32,
    last_solved: Option<DateTime<Utc>>,
}

impl SessionManager {
    /// Create a manager for `origin`. Persistence is skipped when `store` is `None`.
    pub fn new(
        origin: Origin,
        solver: Arc<dyn ChallengeSolver>,
        store: Option<Arc<CredentialStore>>,
    ) -> Self {
        Self {
            origin,
            solver,
            store,
            session_state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    /// Origin served by this manager
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Current `Cookie` header value, solving first if there is no credential.
    pub async fn cookie_header(&self) -> Result<String, SolveError> {
        Ok(self.credential().await?.cookie_header())
    }

    /// Current credential, restoring it from disk or solving when absent.
    pub async fn credential(&self) -> Result<Arc<Credential>, SolveError> {
        let pending = {
            let mut state = self.session_state.lock().await;

            if let Some(credential) = &state.credential {
                return Ok(Arc::clone(credential));
            }

            if !state.restore_attempted {
                state.restore_attempted = true;
                if let Some(credential) = self.restore().await {
                    let credential = Arc::new(credential);
                    state.credential = Some(Arc::clone(&credential));
                    return Ok(credential);
                }
            }

            match &state.pending {
                Some(pending) => {
                    debug!("Joining in-flight solve for {}", self.origin);
                    pending.clone()
                }
                None => {
                    let pending = self.start_solve();
                    state.solves += 1;
                    state.pending = Some(pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Drop the cached credential and its persisted copy so the next request
    /// re-solves. An in-flight solve is left running.
    ///
    /// The file is deleted while the state lock is held, so a solve committed
    /// afterwards always finds the deletion finished before it writes.
    pub async fn invalidate(&self) {
        let mut state = self.session_state.lock().await;
        state.credential = None;
        state.restore_attempted = true;
        state.invalidations += 1;

        info!("[WAF] Invalidated session for {}", self.origin);
        self.remove_persisted().await;
    }

    /// Invalidate only if `stale` is still the cached credential.
    ///
    /// Requests that were challenged with the same credential all report it here;
    /// only the first clears it, later ones find a newer (or pending) credential
    /// and leave it alone. Returns whether anything was cleared.
    pub async fn invalidate_stale(&self, stale: &Arc<Credential>) -> bool {
        let mut state = self.session_state.lock().await;
        match &state.credential {
            Some(current) if Arc::ptr_eq(current, stale) => {
                state.credential = None;
                state.restore_attempted = true;
                state.invalidations += 1;
            }
            _ => {
                debug!(
                    "Credential for {} already replaced, not invalidating",
                    self.origin
                );
                return false;
            }
        }

        info!("[WAF] Invalidated session for {}", self.origin);
        self.remove_persisted().await;
        true
    }

    /// Snapshot of the manager's counters
    pub async fn stats(&self) -> SessionStats {
        let state = self.session_state.lock().await;

        SessionStats {
            origin: self.origin.clone(),
            has_credential: state.credential.is_some(),
            solve_pending: state.pending.is_some(),
            solves: state.solves,
            invalidations: state.invalidations,
            last_solved: state.last_solved,
        }
    }

    async fn restore(&self) -> Option<Credential> {
        let store = self.store.as_ref()?;

        match store.load(&self.origin).await {
            Ok(Some(credential)) => {
                info!(
                    "[WAF] Restored persisted session for {} ({} cookies)",
                    self.origin,
                    credential.cookies.len()
                );
                Some(credential)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to load persisted session for {}: {}", self.origin, e);
                None
            }
        }
    }

    async fn remove_persisted(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(&self.origin).await {
                warn!("Failed to delete persisted session for {}: {}", self.origin, e);
            }
        }
    }

    /// Build the shared solve future. It commits its own outcome so the
    /// credential and its persisted copy are written exactly once per solve,
    /// regardless of which waiter drives it.
    ///
    /// Saving happens under the state lock, like deleting in `invalidate`, so
    /// writes and deletes of the origin's file never interleave.
    fn start_solve(&self) -> PendingSolve {
        let origin = self.origin.clone();
        let solver = Arc::clone(&self.solver);
        let store = self.store.clone();
        let session_state = Arc::clone(&self.session_state);

        async move {
            let outcome = solver.solve(&origin).await.map(Arc::new);

            let mut state = session_state.lock().await;

            if let (Ok(credential), Some(store)) = (&outcome, &store) {
                if let Err(e) = store.save(credential).await {
                    warn!("Failed to persist session for {}: {}", origin, e);
                }
            }

            state.pending = None;
            if let Ok(credential) = &outcome {
                state.last_solved = Some(credential.solved_at);
                state.credential = Some(Arc::clone(credential));
            }

            outcome
        }
        .boxed()
        .shared()
    }
}

/// Statistics about one origin's session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub origin: Origin,
    pub has_credential: bool,
    pub solve_pending: bool,
    pub solves: u32,
    pub invalidations: u32,
    pub last_solved: Option<DateTime<Utc>>,
}

/// Process-wide map from origin to its [`SessionManager`], created lazily.
pub struct SessionRegistry {
    solver: Arc<dyn ChallengeSolver>,
    store: Option<Arc<CredentialStore>>,
    sessions: RwLock<HashMap<Origin, Arc<SessionManager>>>,
}

impl SessionRegistry {
    /// Create an empty registry sharing `solver` and `store` between origins
    pub fn new(solver: Arc<dyn ChallengeSolver>, store: Option<CredentialStore>) -> Self {
        Self {
            solver,
            store: store.map(Arc::new),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Manager for `origin`, creating it on first use.
    pub async fn session(&self, origin: &Origin) -> Arc<SessionManager> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(origin) {
                return Arc::clone(session);
            }
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(origin.clone()).or_insert_with(|| {
            debug!("Creating session manager for {}", origin);
            Arc::new(SessionManager::new(
                origin.clone(),
                Arc::clone(&self.solver),
                self.store.clone(),
            ))
        });
        Arc::clone(session)
    }

    /// `Cookie` header for `origin`
    pub async fn cookie_header(&self, origin: &Origin) -> Result<String, SolveError> {
        self.session(origin).await.cookie_header().await
    }

    /// Invalidate the session for `origin`
    pub async fn invalidate(&self, origin: &Origin) {
        self.session(origin).await.invalidate().await
    }

    /// Stats for every origin seen so far
    pub async fn stats(&self) -> Vec<SessionStats> {
        let sessions: Vec<Arc<SessionManager>> =
            self.sessions.read().await.values().cloned().collect();

        let mut stats = Vec::with_capacity(sessions.len());
        for session in sessions {
            stats.push(session.stats().await);
        }
        stats.sort_by(|a, b| a.origin.cmp(&b.origin));
        stats
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::Cookie;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Solver that counts calls and tracks how many run at once.
    pub(crate) struct CountingSolver {
        pub calls: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
        pub delay: Duration,
        pub fail: bool,
    }

    impl CountingSolver {
        pub(crate) fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                delay,
                fail: false,
            }
        }

        pub(crate) fn failing(delay: Duration) -> Self {
            Self {
                fail: true,
                ..Self::new(delay)
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChallengeSolver for CountingSolver {
        async fn solve(&self, origin: &Origin) -> Result<Credential, SolveError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(SolveError::Timeout(60));
            }

            Ok(Credential::new(
                origin.clone(),
                vec![Cookie {
                    name: "aws-waf-token".into(),
                    value: format!("token-{}", call),
                    domain: String::new(),
                    path: "/".into(),
                    expires: None,
                }],
            ))
        }
    }

    fn origin() -> Origin {
        Origin::from_url("https://camping.bcparks.ca/").unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_solve() {
        let solver = Arc::new(CountingSolver::new(Duration::from_millis(50)));
        let manager = Arc::new(SessionManager::new(origin(), solver.clone(), None));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { manager.cookie_header().await }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "aws-waf-token=token-1");
        }

        assert_eq!(solver.calls(), 1);
        assert_eq!(solver.max_in_flight.load(Ordering::SeqCst), 1);

        let stats = manager.stats().await;
        assert!(stats.has_credential);
        assert!(!stats.solve_pending);
        assert_eq!(stats.solves, 1);
    }

    #[tokio::test]
    async fn test_cached_credential_is_reused() {
        let solver = Arc::new(CountingSolver::new(Duration::ZERO));
        let manager = SessionManager::new(origin(), solver.clone(), None);

        manager.cookie_header().await.unwrap();
        manager.cookie_header().await.unwrap();

        assert_eq!(solver.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_exactly_one_new_solve() {
        let solver = Arc::new(CountingSolver::new(Duration::from_millis(10)));
        let manager = Arc::new(SessionManager::new(origin(), solver.clone(), None));

        assert_eq!(manager.cookie_header().await.unwrap(), "aws-waf-token=token-1");
        manager.invalidate().await;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { manager.cookie_header().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "aws-waf-token=token-2");
        }

        assert_eq!(solver.calls(), 2);
        assert_eq!(manager.stats().await.invalidations, 1);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter_and_is_not_cached() {
        let solver = Arc::new(CountingSolver::failing(Duration::from_millis(30)));
        let manager = Arc::new(SessionManager::new(origin(), solver.clone(), None));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { manager.cookie_header().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Err(SolveError::Timeout(60)));
        }
        assert_eq!(solver.calls(), 1);
        assert!(!manager.stats().await.has_credential);

        // the next call starts a fresh attempt
        assert!(manager.cookie_header().await.is_err());
        assert_eq!(solver.calls(), 2);
    }

    #[tokio::test]
    async fn test_persisted_credential_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::new(dir.path()));

        let first_solver = Arc::new(CountingSolver::new(Duration::ZERO));
        let first = SessionManager::new(origin(), first_solver.clone(), Some(store.clone()));
        let header = first.cookie_header().await.unwrap();
        assert_eq!(first_solver.calls(), 1);
        assert!(store.path_for(&origin()).exists());

        let second_solver = Arc::new(CountingSolver::new(Duration::ZERO));
        let second = SessionManager::new(origin(), second_solver.clone(), Some(store));
        assert_eq!(second.cookie_header().await.unwrap(), header);
        assert_eq!(second_solver.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_deletes_persisted_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::new(dir.path()));
        let solver = Arc::new(CountingSolver::new(Duration::ZERO));
        let manager = SessionManager::new(origin(), solver.clone(), Some(store.clone()));

        manager.cookie_header().await.unwrap();
        manager.invalidate().await;
        assert!(!store.path_for(&origin()).exists());

        manager.cookie_header().await.unwrap();
        assert_eq!(solver.calls(), 2);
        assert!(store.path_for(&origin()).exists());
    }

    #[tokio::test]
    async fn test_invalidate_stale_ignores_replaced_credential() {
        let solver = Arc::new(CountingSolver::new(Duration::ZERO));
        let manager = SessionManager::new(origin(), solver.clone(), None);

        let old = manager.credential().await.unwrap();
        assert!(manager.invalidate_stale(&old).await);
        let fresh = manager.credential().await.unwrap();

        // a second request challenged with the old credential must not discard the fresh one
        assert!(!manager.invalidate_stale(&old).await);
        assert!(Arc::ptr_eq(&manager.credential().await.unwrap(), &fresh));
        assert_eq!(solver.calls(), 2);
        assert_eq!(manager.stats().await.invalidations, 1);
    }

    #[tokio::test]
    async fn test_invalidate_never_deletes_a_newer_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::new(dir.path()));
        let solver = Arc::new(CountingSolver::new(Duration::ZERO));
        let manager = SessionManager::new(origin(), solver.clone(), Some(store.clone()));

        for _ in 0..20 {
            let stale = manager.credential().await.unwrap();

            // the delete of the stale file and the save of its replacement race
            let (cleared, fresh) =
                tokio::join!(manager.invalidate_stale(&stale), manager.credential());
            assert!(cleared);
            let fresh = fresh.unwrap();
            assert!(!Arc::ptr_eq(&stale, &fresh));

            let persisted = store.load(&origin()).await.unwrap();
            assert_eq!(persisted.as_ref(), Some(fresh.as_ref()));
        }
        assert_eq!(solver.calls(), 21);
    }

    #[tokio::test]
    async fn test_registry_invalidate_forces_one_new_solve() {
        let solver = Arc::new(CountingSolver::new(Duration::from_millis(10)));
        let registry = Arc::new(SessionRegistry::new(solver.clone(), None));
        let bc = origin();

        assert_eq!(registry.cookie_header(&bc).await.unwrap(), "aws-waf-token=token-1");
        registry.invalidate(&bc).await;

        let (x, y, z) = tokio::join!(
            registry.cookie_header(&bc),
            registry.cookie_header(&bc),
            registry.cookie_header(&bc),
        );
        for header in [x, y, z] {
            assert_eq!(header.unwrap(), "aws-waf-token=token-2");
        }
        assert_eq!(solver.calls(), 2);
    }

    #[tokio::test]
    async fn test_registry_keeps_one_manager_per_origin() {
        let solver = Arc::new(CountingSolver::new(Duration::from_millis(20)));
        let registry = Arc::new(SessionRegistry::new(solver.clone(), None));
        let bc = origin();
        let canada = Origin::from_url("https://reservation.pc.gc.ca/").unwrap();

        let a = registry.session(&bc).await;
        let b = registry.session(&bc).await;
        assert!(Arc::ptr_eq(&a, &b));

        let (x, y, z) = tokio::join!(
            registry.cookie_header(&bc),
            registry.cookie_header(&bc),
            registry.cookie_header(&canada),
        );
        assert!(x.is_ok() && y.is_ok() && z.is_ok());

        // one solve per origin; different origins may solve concurrently
        assert_eq!(solver.calls(), 2);

        let stats = registry.stats().await;
        assert_eq!(stats.len(), 2);
        assert!(stats.iter().all(|s| s.solves == 1));
    }
}
