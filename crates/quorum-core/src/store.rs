//! Per-peer session ownership and persistence
//!
//! Sessions live behind one mutex per peer inside a read-write locked map, so
//! operations on distinct peers run in parallel while operations on the same
//! peer are serialized. Every state change is committed to [`Storage`] before
//! the operation reports success.
//!
//! # Persistence Failures
//!
//! A failed commit keeps the in-memory transition (a consumed message key is
//! never handed out again), marks the peer dirty and surfaces `Persistence`.
//! [`SessionStore::flush`] rewrites dirty sessions on the next maintenance
//! tick.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    ids::PeerId,
    session::RatchetSession,
    storage::{SESSION_PREFIX, Storage, StorageError, load_record, save_record},
};

/// Shared handle to one peer's session
pub type SessionHandle = Arc<Mutex<RatchetSession>>;

/// Owns all pairwise sessions, keyed by peer id.
pub struct SessionStore<S: Storage> {
    storage: S,
    sessions: RwLock<HashMap<PeerId, SessionHandle>>,
    dirty: Mutex<HashSet<PeerId>>,
}

impl<S: Storage> SessionStore<S> {
    /// Create an empty store backed by `storage`.
    ///
    /// Sessions already in storage are loaded lazily on first access, or all
    /// at once through [`SessionStore::restore`].
    pub fn new(storage: S) -> Self {
        Self { storage, sessions: RwLock::new(HashMap::new()), dirty: Mutex::new(HashSet::new()) }
    }

    /// Load every persisted session into memory.
    ///
    /// Returns the number of sessions loaded. Corrupted records are logged
    /// and skipped; the peer has to handshake again.
    pub fn restore(&self) -> Result<usize> {
        let keys = self.storage.list_keys(SESSION_PREFIX)?;
        let mut loaded = 0;

        for key in keys {
            let Some(peer) = key.strip_prefix(SESSION_PREFIX).map(PeerId::new) else {
                continue;
            };
            match load_record::<S, RatchetSession>(&self.storage, &key) {
                Ok(Some(session)) => {
                    self.write_map().insert(peer, Arc::new(Mutex::new(session)));
                    loaded += 1;
                },
                Ok(None) => {},
                Err(error) => warn!(%peer, %error, "Skipping unreadable session"),
            }
        }

        debug!(loaded, "Restored sessions");
        Ok(loaded)
    }

    /// Session handle for `peer`, loading it from storage if needed.
    pub fn get(&self, peer: &PeerId) -> Result<Option<SessionHandle>> {
        if let Some(handle) = self.read_map().get(peer) {
            return Ok(Some(Arc::clone(handle)));
        }

        let Some(session) = load_record::<S, RatchetSession>(&self.storage, &session_key(peer))?
        else {
            return Ok(None);
        };

        let mut map = self.write_map();
        let handle = map.entry(peer.clone()).or_insert_with(|| Arc::new(Mutex::new(session)));
        Ok(Some(Arc::clone(handle)))
    }

    /// Whether a session exists for `peer` (in memory or in storage).
    pub fn contains(&self, peer: &PeerId) -> Result<bool> {
        Ok(self.get(peer)?.is_some())
    }

    /// Install a new session, replacing any existing one.
    ///
    /// The session is persisted first; on failure nothing is installed.
    ///
    /// The replaced session stays locked until the new one is installed, so an
    /// operation already waiting on it cannot write it back afterwards.
    pub fn insert(&self, peer: &PeerId, session: RatchetSession) -> Result<()> {
        let current = self.read_map().get(peer).map(Arc::clone);
        let _current_guard = current.as_ref().map(lock_session);

        save_record(&self.storage, &session_key(peer), &session)?;

        let previous = self.write_map().insert(peer.clone(), Arc::new(Mutex::new(session)));
        self.lock_dirty().remove(peer);

        if previous.is_some() {
            debug!(%peer, "Replaced existing session");
        }
        Ok(())
    }

    /// Run `op` on the session for `peer` while holding its lock.
    ///
    /// The handle is checked against the map after locking. A session that
    /// was replaced while waiting is retried once against its successor; one
    /// that was removed yields `SessionNotFound`.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` if no live session exists, otherwise whatever `op`
    /// returns.
    pub fn with_session<T>(
        &self,
        peer: &PeerId,
        op: impl FnOnce(&mut RatchetSession) -> Result<T>,
    ) -> Result<T> {
        for _ in 0..2 {
            let Some(handle) = self.get(peer)? else {
                break;
            };
            let mut session = lock_session(&handle);
            if !self.is_current(peer, &handle) {
                debug!(%peer, "Session changed while waiting for its lock");
                continue;
            }
            return op(&mut session);
        }
        Err(Error::SessionNotFound(peer.clone()))
    }

    /// Persist the current state of a session.
    ///
    /// Call while holding the session's lock (see [`Self::with_session`]) so
    /// commits for one peer are written in order and never after removal.
    pub fn commit(&self, peer: &PeerId, session: &RatchetSession) -> Result<()> {
        match save_record(&self.storage, &session_key(peer), session) {
            Ok(()) => {
                self.lock_dirty().remove(peer);
                Ok(())
            },
            Err(error) => {
                warn!(%peer, %error, "Session commit failed, will retry on flush");
                self.lock_dirty().insert(peer.clone());
                Err(Error::Persistence(error))
            },
        }
    }

    /// Remove a session from memory and storage.
    ///
    /// Returns true if a session existed. The session stays locked while it
    /// is deleted, so in-flight operations on it finish first or find it gone.
    pub fn remove(&self, peer: &PeerId) -> Result<bool> {
        let current = self.read_map().get(peer).map(Arc::clone);
        let _current_guard = current.as_ref().map(lock_session);

        let existed_in_storage = self.storage.load(&session_key(peer))?.is_some();
        self.storage.delete(&session_key(peer))?;

        let existed_in_memory = self.write_map().remove(peer).is_some();
        self.lock_dirty().remove(peer);

        Ok(existed_in_memory || existed_in_storage)
    }

    /// Rewrite every dirty session.
    ///
    /// Returns the number of sessions written. Sessions that still fail stay
    /// dirty; the first failure is returned after all were attempted.
    pub fn flush(&self) -> Result<usize> {
        let dirty: Vec<PeerId> = self.lock_dirty().iter().cloned().collect();
        let mut written = 0;
        let mut first_error: Option<StorageError> = None;

        for peer in dirty {
            let Some(handle) = self.read_map().get(&peer).map(Arc::clone) else {
                self.lock_dirty().remove(&peer);
                continue;
            };
            let session = lock_session(&handle);
            if !self.is_current(&peer, &handle) {
                continue;
            }
            match save_record(&self.storage, &session_key(&peer), &*session) {
                Ok(()) => {
                    self.lock_dirty().remove(&peer);
                    written += 1;
                },
                Err(error) => {
                    warn!(%peer, %error, "Flush failed");
                    first_error.get_or_insert(error);
                },
            }
        }

        match first_error {
            Some(error) => Err(Error::Persistence(error)),
            None => Ok(written),
        }
    }

    /// Drop skipped keys created at or before `cutoff_secs` from every loaded
    /// session, committing the sessions that changed.
    ///
    /// Returns the number of removed keys. Commit failures leave the session
    /// dirty for the next flush.
    pub fn purge_skipped_keys(&self, cutoff_secs: u64) -> usize {
        let handles: Vec<(PeerId, SessionHandle)> = self
            .read_map()
            .iter()
            .map(|(peer, handle)| (peer.clone(), Arc::clone(handle)))
            .collect();

        let mut removed = 0;
        for (peer, handle) in handles {
            let mut session = lock_session(&handle);
            if !self.is_current(&peer, &handle) {
                continue;
            }
            let purged = session.skipped.purge_created_before(cutoff_secs);
            if purged == 0 {
                continue;
            }
            removed += purged;
            debug!(%peer, purged, "Purged expired skipped keys");

            // Failure is logged and marked dirty by commit
            let _ = self.commit(&peer, &session);
        }
        removed
    }

    /// Peers with a loaded session.
    pub fn peers(&self) -> Vec<PeerId> {
        self.read_map().keys().cloned().collect()
    }

    /// Number of loaded sessions.
    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    /// Returns true if no session is loaded.
    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    /// Number of sessions waiting for a successful write.
    pub fn dirty_count(&self) -> usize {
        self.lock_dirty().len()
    }

    fn is_current(&self, peer: &PeerId, handle: &SessionHandle) -> bool {
        self.read_map().get(peer).is_some_and(|current| Arc::ptr_eq(current, handle))
    }

    fn read_map(&self) -> RwLockReadGuard<'_, HashMap<PeerId, SessionHandle>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, HashMap<PeerId, SessionHandle>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_dirty(&self) -> MutexGuard<'_, HashSet<PeerId>> {
        self.dirty.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Lock a session. Sessions are only replaced wholesale from a working copy,
/// so a poisoned lock still guards a consistent state.
pub fn lock_session(handle: &SessionHandle) -> MutexGuard<'_, RatchetSession> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

fn session_key(peer: &PeerId) -> String {
    format!("{SESSION_PREFIX}{peer}")
}
