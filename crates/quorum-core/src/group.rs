//! Group session management
//!
//! A group channel has a member set, an epoch and one symmetric key per
//! epoch. Every membership change advances the epoch and rekeys by mixing
//! fresh randomness into the previous key; past epoch keys are not retained,
//! so stale ciphertexts are rejected by epoch number.
//!
//! # State Machine
//!
//! ```text
//! NonExistent ──create──► Active(0) ──add/remove──► Active(1) ──► ... ──dissolve──► NonExistent
//! ```
//!
//! # Authorization
//!
//! - Only a current member may add or remove members (`Unauthorized`)
//! - Only a current member may encrypt or decrypt (`NotAMember`)

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use quorum_crypto::{Key32, NONCE_SIZE, advance_group_key, derive_group_key, open, seal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    env::Environment,
    error::{Error, Result},
    ids::{GroupId, MemberId},
    message::{GroupEnvelope, group_aad},
    storage::{GROUP_PREFIX, Storage, StorageError, load_record, save_record},
};

/// Persisted state of one group channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSession {
    group_id: GroupId,
    epoch: u64,
    members: BTreeSet<MemberId>,
    group_key: Key32,
    owner_id: MemberId,
}

impl GroupSession {
    /// Group identifier.
    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    /// Current epoch (starts at 0, +1 per membership change).
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Current members, sorted.
    pub fn members(&self) -> impl Iterator<Item = &MemberId> {
        self.members.iter()
    }

    /// Member that created the group.
    pub fn owner_id(&self) -> &MemberId {
        &self.owner_id
    }

    /// Check if a member is in the group
    pub fn is_member(&self, member: &MemberId) -> bool {
        self.members.contains(member)
    }

    /// Number of members in the group.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    fn rekey<E: Environment>(&mut self, env: &E) {
        let fresh = Key32::from_bytes(env.random_key());
        self.group_key = advance_group_key(&self.group_key, &fresh);
        self.epoch += 1;
    }
}

type GroupHandle = Arc<Mutex<GroupSession>>;

/// Creates groups, changes membership and encrypts group messages.
///
/// Each group lives behind its own mutex, so membership changes are atomic
/// with respect to encryption and decryption in the same group.
pub struct GroupSessionManager<E: Environment, S: Storage> {
    env: E,
    storage: S,
    groups: RwLock<HashMap<GroupId, GroupHandle>>,
    dirty: Mutex<HashSet<GroupId>>,
}

impl<E: Environment, S: Storage> GroupSessionManager<E, S> {
    /// Create a manager with no groups loaded.
    pub fn new(env: E, storage: S) -> Self {
        Self {
            env,
            storage,
            groups: RwLock::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
        }
    }

    /// Load every persisted group.
    ///
    /// Returns the number of groups loaded; unreadable records are skipped.
    pub fn restore(&self) -> Result<usize> {
        let mut loaded = 0;
        for key in self.storage.list_keys(GROUP_PREFIX)? {
            match load_record::<S, GroupSession>(&self.storage, &key) {
                Ok(Some(group)) => {
                    self.write_map().insert(group.group_id.clone(), Arc::new(Mutex::new(group)));
                    loaded += 1;
                },
                Ok(None) => {},
                Err(error) => warn!(%key, %error, "Skipping unreadable group"),
            }
        }
        debug!(loaded, "Restored groups");
        Ok(loaded)
    }

    /// Create a group at epoch 0 with `initial_members` plus the creator.
    ///
    /// # Errors
    ///
    /// - `GroupExists`: a group with this id is already active
    /// - `Persistence`: created in memory, but not stored yet
    pub fn create_group_session(
        &self,
        group_id: &GroupId,
        creator_id: &MemberId,
        initial_members: impl IntoIterator<Item = MemberId>,
    ) -> Result<u64> {
        let mut members: BTreeSet<MemberId> = initial_members.into_iter().collect();
        members.insert(creator_id.clone());

        let seed = Key32::from_bytes(self.env.random_key());
        let group = GroupSession {
            group_id: group_id.clone(),
            epoch: 0,
            members,
            group_key: derive_group_key(&seed, group_id.as_str().as_bytes()),
            owner_id: creator_id.clone(),
        };

        let handle = {
            let mut map = self.write_map();
            if map.contains_key(group_id) {
                return Err(Error::GroupExists(group_id.clone()));
            }
            let handle = Arc::new(Mutex::new(group));
            map.insert(group_id.clone(), Arc::clone(&handle));
            handle
        };

        let group = lock_group(&handle);
        if !self.is_current(group_id, &handle) {
            return Err(Error::GroupNotFound(group_id.clone()));
        }
        info!(group = %group_id, members = group.member_count(), "Group created");
        self.commit(&group)?;
        Ok(0)
    }

    /// Add a member and advance the epoch.
    ///
    /// Returns the new epoch.
    ///
    /// # Errors
    ///
    /// - `GroupNotFound`, `Unauthorized` (requester not a member)
    /// - `AlreadyMember`: nothing changes, the epoch is not advanced
    pub fn add_group_member(
        &self,
        group_id: &GroupId,
        new_member_id: &MemberId,
        requester_id: &MemberId,
    ) -> Result<u64> {
        self.with_group(group_id, |group| {
            if !group.is_member(requester_id) {
                return Err(Error::Unauthorized {
                    group: group_id.clone(),
                    requester: requester_id.clone(),
                });
            }
            if group.is_member(new_member_id) {
                return Err(Error::AlreadyMember {
                    group: group_id.clone(),
                    member: new_member_id.clone(),
                });
            }

            group.members.insert(new_member_id.clone());
            group.rekey(&self.env);

            info!(group = %group_id, member = %new_member_id, epoch = group.epoch, "Member added");
            self.commit(group)?;
            Ok(group.epoch)
        })
    }

    /// Remove a member and advance the epoch.
    ///
    /// Returns the new epoch. A member may remove itself.
    ///
    /// # Errors
    ///
    /// - `GroupNotFound`, `Unauthorized` (requester not a member)
    /// - `NotAMember`: the target is not in the group
    pub fn remove_group_member(
        &self,
        group_id: &GroupId,
        member_id: &MemberId,
        requester_id: &MemberId,
    ) -> Result<u64> {
        self.with_group(group_id, |group| {
            if !group.is_member(requester_id) {
                return Err(Error::Unauthorized {
                    group: group_id.clone(),
                    requester: requester_id.clone(),
                });
            }
            if !group.members.remove(member_id) {
                return Err(Error::NotAMember {
                    group: group_id.clone(),
                    member: member_id.clone(),
                });
            }
            group.rekey(&self.env);

            info!(group = %group_id, member = %member_id, epoch = group.epoch, "Member removed");
            self.commit(group)?;
            Ok(group.epoch)
        })
    }

    /// Encrypt a message under the current epoch key.
    ///
    /// # Errors
    ///
    /// - `GroupNotFound`, `NotAMember` (sender not a member)
    pub fn encrypt_group_message(
        &self,
        group_id: &GroupId,
        sender_id: &MemberId,
        plaintext: &[u8],
    ) -> Result<GroupEnvelope> {
        self.with_group(group_id, |group| self.seal_for(group, sender_id, plaintext))
    }

    /// Encrypt a message and list who should receive it.
    ///
    /// The recipients are every member except the sender, read under the
    /// same lock as the encryption so they all hold the envelope's epoch.
    ///
    /// # Errors
    ///
    /// - `GroupNotFound`, `NotAMember` (sender not a member)
    pub fn encrypt_group_broadcast(
        &self,
        group_id: &GroupId,
        sender_id: &MemberId,
        plaintext: &[u8],
    ) -> Result<(GroupEnvelope, Vec<MemberId>)> {
        self.with_group(group_id, |group| {
            let envelope = self.seal_for(group, sender_id, plaintext)?;
            let recipients =
                group.members.iter().filter(|member| *member != sender_id).cloned().collect();
            Ok((envelope, recipients))
        })
    }

    /// Decrypt a message for `receiver_id`.
    ///
    /// # Errors
    ///
    /// - `GroupNotFound`, `NotAMember` (receiver not a member)
    /// - `EpochMismatch`: message from another epoch
    /// - `AuthenticationFailed`: tampered message, or envelope relabelled
    ///   with another group, sender or epoch
    pub fn decrypt_group_message(
        &self,
        group_id: &GroupId,
        receiver_id: &MemberId,
        envelope: &GroupEnvelope,
    ) -> Result<Vec<u8>> {
        self.with_group(group_id, |group| {
            if !group.is_member(receiver_id) {
                return Err(Error::NotAMember {
                    group: group_id.clone(),
                    member: receiver_id.clone(),
                });
            }
            if envelope.epoch != group.epoch {
                return Err(Error::EpochMismatch { current: group.epoch, message: envelope.epoch });
            }

            let aad = group_aad(group_id, &envelope.sender_id, envelope.epoch);
            open(&group.group_key, &envelope.nonce, &aad, &envelope.ciphertext, &envelope.auth_tag)
                .map_err(|_| Error::AuthenticationFailed)
        })
    }

    /// Remove a group entirely (memory and storage).
    ///
    /// # Errors
    ///
    /// - `GroupNotFound`, `Unauthorized` (requester not a member)
    pub fn dissolve_group(&self, group_id: &GroupId, requester_id: &MemberId) -> Result<()> {
        // The group stays locked until it is unmapped, so waiting operations
        // find it gone instead of writing it back
        self.with_group(group_id, |group| {
            if !group.is_member(requester_id) {
                return Err(Error::Unauthorized {
                    group: group_id.clone(),
                    requester: requester_id.clone(),
                });
            }

            self.storage.delete(&group_key(group_id))?;
            self.write_map().remove(group_id);
            self.lock_dirty().remove(group_id);

            info!(group = %group_id, requester = %requester_id, "Group dissolved");
            Ok(())
        })
    }

    /// Current epoch of a group.
    pub fn epoch(&self, group_id: &GroupId) -> Result<u64> {
        Ok(lock_group(&self.handle(group_id)?).epoch)
    }

    /// Copy of a group's state (diagnostics and tests).
    pub fn group_snapshot(&self, group_id: &GroupId) -> Result<GroupSession> {
        Ok(lock_group(&self.handle(group_id)?).clone())
    }

    /// Whether a group exists.
    pub fn has_group(&self, group_id: &GroupId) -> bool {
        self.read_map().contains_key(group_id)
    }

    /// Rewrite groups whose last commit failed.
    pub fn flush(&self) -> Result<usize> {
        let dirty: Vec<GroupId> = self.lock_dirty().iter().cloned().collect();
        let mut written = 0;
        let mut first_error: Option<StorageError> = None;

        for group_id in dirty {
            let Some(handle) = self.read_map().get(&group_id).map(Arc::clone) else {
                self.lock_dirty().remove(&group_id);
                continue;
            };
            let group = lock_group(&handle);
            if !self.is_current(&group_id, &handle) {
                continue;
            }
            match save_record(&self.storage, &group_key(&group_id), &*group) {
                Ok(()) => {
                    self.lock_dirty().remove(&group_id);
                    written += 1;
                },
                Err(error) => {
                    warn!(group = %group_id, %error, "Flush failed");
                    first_error.get_or_insert(error);
                },
            }
        }

        match first_error {
            Some(error) => Err(Error::Persistence(error)),
            None => Ok(written),
        }
    }

    /// Number of groups waiting for a successful write.
    pub fn dirty_groups(&self) -> usize {
        self.lock_dirty().len()
    }

    fn commit(&self, group: &GroupSession) -> Result<()> {
        match save_record(&self.storage, &group_key(&group.group_id), group) {
            Ok(()) => {
                self.lock_dirty().remove(&group.group_id);
                Ok(())
            },
            Err(error) => {
                warn!(group = %group.group_id, %error, "Group commit failed, will retry on flush");
                self.lock_dirty().insert(group.group_id.clone());
                Err(Error::Persistence(error))
            },
        }
    }

    /// Run `op` on a group while holding its lock.
    ///
    /// A group dissolved while this call waited for the lock is reported as
    /// `GroupNotFound`, so nothing is written back for it.
    fn with_group<T>(
        &self,
        group_id: &GroupId,
        op: impl FnOnce(&mut GroupSession) -> Result<T>,
    ) -> Result<T> {
        let handle = self.handle(group_id)?;
        let mut group = lock_group(&handle);
        if !self.is_current(group_id, &handle) {
            debug!(group = %group_id, "Group dissolved while waiting for its lock");
            return Err(Error::GroupNotFound(group_id.clone()));
        }
        op(&mut group)
    }

    fn seal_for(
        &self,
        group: &GroupSession,
        sender_id: &MemberId,
        plaintext: &[u8],
    ) -> Result<GroupEnvelope> {
        if !group.is_member(sender_id) {
            return Err(Error::NotAMember {
                group: group.group_id.clone(),
                member: sender_id.clone(),
            });
        }

        let mut nonce = [0u8; NONCE_SIZE];
        self.env.random_bytes(&mut nonce);
        let aad = group_aad(&group.group_id, sender_id, group.epoch);
        let sealed = seal(&group.group_key, &nonce, &aad, plaintext);

        Ok(GroupEnvelope {
            group_id: group.group_id.clone(),
            sender_id: sender_id.clone(),
            epoch: group.epoch,
            ciphertext: sealed.ciphertext,
            nonce,
            auth_tag: sealed.tag,
        })
    }

    fn is_current(&self, group_id: &GroupId, handle: &GroupHandle) -> bool {
        self.read_map().get(group_id).is_some_and(|current| Arc::ptr_eq(current, handle))
    }

    fn handle(&self, group_id: &GroupId) -> Result<GroupHandle> {
        self.read_map()
            .get(group_id)
            .map(Arc::clone)
            .ok_or_else(|| Error::GroupNotFound(group_id.clone()))
    }

    fn read_map(&self) -> RwLockReadGuard<'_, HashMap<GroupId, GroupHandle>> {
        self.groups.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, HashMap<GroupId, GroupHandle>> {
        self.groups.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_dirty(&self) -> MutexGuard<'_, HashSet<GroupId>> {
        self.dirty.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock_group(handle: &GroupHandle) -> MutexGuard<'_, GroupSession> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

fn group_key(group_id: &GroupId) -> String {
    format!("{GROUP_PREFIX}{group_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{env::test_utils::MockEnv, storage::MemoryStorage};

    type Manager = GroupSessionManager<MockEnv, MemoryStorage>;

    fn manager() -> (Manager, MemoryStorage) {
        let storage = MemoryStorage::new();
        (GroupSessionManager::new(MockEnv::with_seed(9), storage.clone()), storage)
    }

    fn m(id: &str) -> MemberId {
        MemberId::from(id)
    }

    fn votes() -> GroupId {
        GroupId::from("votes")
    }

    #[test]
    fn create_includes_creator() {
        let (manager, storage) = manager();
        let epoch = manager.create_group_session(&votes(), &m("admin"), vec![m("alice")]).unwrap();

        let group = manager.group_snapshot(&votes()).unwrap();
        assert_eq!(epoch, 0);
        assert!(group.is_member(&m("admin")));
        assert!(group.is_member(&m("alice")));
        assert_eq!(group.owner_id(), &m("admin"));
        assert!(storage.load("group/votes").unwrap().is_some());
    }

    #[test]
    fn duplicate_create_fails() {
        let (manager, _) = manager();
        manager.create_group_session(&votes(), &m("admin"), vec![]).unwrap();

        let result = manager.create_group_session(&votes(), &m("other"), vec![]);
        assert!(matches!(result, Err(Error::GroupExists(_))));
        assert_eq!(manager.group_snapshot(&votes()).unwrap().owner_id(), &m("admin"));
    }

    #[test]
    fn membership_change_rekeys() {
        let (manager, _) = manager();
        manager.create_group_session(&votes(), &m("admin"), vec![]).unwrap();
        let before = manager.group_snapshot(&votes()).unwrap();

        assert_eq!(manager.add_group_member(&votes(), &m("bob"), &m("admin")).unwrap(), 1);
        let after = manager.group_snapshot(&votes()).unwrap();

        assert_ne!(before.group_key, after.group_key);
        assert_eq!(manager.remove_group_member(&votes(), &m("bob"), &m("admin")).unwrap(), 2);
    }

    #[test]
    fn adding_existing_member_keeps_epoch() {
        let (manager, _) = manager();
        manager.create_group_session(&votes(), &m("admin"), vec![m("alice")]).unwrap();

        let result = manager.add_group_member(&votes(), &m("alice"), &m("admin"));
        assert!(matches!(result, Err(Error::AlreadyMember { .. })));
        assert_eq!(manager.epoch(&votes()).unwrap(), 0);
    }

    #[test]
    fn non_member_cannot_change_membership() {
        let (manager, _) = manager();
        manager.create_group_session(&votes(), &m("admin"), vec![]).unwrap();

        let add = manager.add_group_member(&votes(), &m("mallory"), &m("mallory"));
        assert!(matches!(add, Err(Error::Unauthorized { .. })));

        let remove = manager.remove_group_member(&votes(), &m("admin"), &m("mallory"));
        assert!(matches!(remove, Err(Error::Unauthorized { .. })));
        assert_eq!(manager.epoch(&votes()).unwrap(), 0);
    }

    #[test]
    fn removing_non_member_fails() {
        let (manager, _) = manager();
        manager.create_group_session(&votes(), &m("admin"), vec![]).unwrap();

        let result = manager.remove_group_member(&votes(), &m("ghost"), &m("admin"));
        assert!(matches!(result, Err(Error::NotAMember { .. })));
    }

    #[test]
    fn group_round_trip() {
        let (manager, _) = manager();
        manager.create_group_session(&votes(), &m("admin"), vec![m("alice")]).unwrap();

        let envelope = manager.encrypt_group_message(&votes(), &m("admin"), b"result: 42").unwrap();
        let plaintext = manager.decrypt_group_message(&votes(), &m("alice"), &envelope).unwrap();
        assert_eq!(plaintext, b"result: 42");
    }

    #[test]
    fn stale_epoch_is_rejected() {
        let (manager, _) = manager();
        manager.create_group_session(&votes(), &m("admin"), vec![m("alice")]).unwrap();
        let envelope = manager.encrypt_group_message(&votes(), &m("admin"), b"old").unwrap();

        manager.add_group_member(&votes(), &m("bob"), &m("admin")).unwrap();

        let result = manager.decrypt_group_message(&votes(), &m("alice"), &envelope);
        assert!(matches!(result, Err(Error::EpochMismatch { current: 1, message: 0 })));
    }

    #[test]
    fn relabelled_sender_fails_authentication() {
        let (manager, _) = manager();
        manager.create_group_session(&votes(), &m("admin"), vec![m("alice")]).unwrap();
        let mut envelope = manager.encrypt_group_message(&votes(), &m("alice"), b"vote").unwrap();
        envelope.sender_id = m("admin");

        let result = manager.decrypt_group_message(&votes(), &m("admin"), &envelope);
        assert!(matches!(result, Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn non_member_cannot_encrypt_or_decrypt() {
        let (manager, _) = manager();
        manager.create_group_session(&votes(), &m("admin"), vec![]).unwrap();

        let encrypt = manager.encrypt_group_message(&votes(), &m("eve"), b"x");
        assert!(matches!(encrypt, Err(Error::NotAMember { .. })));

        let envelope = manager.encrypt_group_message(&votes(), &m("admin"), b"x").unwrap();
        let decrypt = manager.decrypt_group_message(&votes(), &m("eve"), &envelope);
        assert!(matches!(decrypt, Err(Error::NotAMember { .. })));
    }

    #[test]
    fn unknown_group_is_not_found() {
        let (manager, _) = manager();
        let result = manager.encrypt_group_message(&votes(), &m("admin"), b"x");
        assert!(matches!(result, Err(Error::GroupNotFound(_))));
    }

    #[test]
    fn dissolve_removes_group() {
        let (manager, storage) = manager();
        manager.create_group_session(&votes(), &m("admin"), vec![m("alice")]).unwrap();

        let denied = manager.dissolve_group(&votes(), &m("eve"));
        assert!(matches!(denied, Err(Error::Unauthorized { .. })));

        manager.dissolve_group(&votes(), &m("alice")).unwrap();
        assert!(!manager.has_group(&votes()));
        assert!(storage.load("group/votes").unwrap().is_none());

        // The id can be reused afterwards
        manager.create_group_session(&votes(), &m("admin"), vec![]).unwrap();
    }

    #[test]
    fn groups_survive_restart() {
        let (manager, storage) = manager();
        manager.create_group_session(&votes(), &m("admin"), vec![m("alice")]).unwrap();
        manager.add_group_member(&votes(), &m("bob"), &m("admin")).unwrap();
        let envelope = manager.encrypt_group_message(&votes(), &m("bob"), b"persisted").unwrap();

        let restarted = GroupSessionManager::new(MockEnv::with_seed(10), storage);
        assert_eq!(restarted.restore().unwrap(), 1);
        assert_eq!(restarted.epoch(&votes()).unwrap(), 1);
        assert_eq!(
            restarted.decrypt_group_message(&votes(), &m("alice"), &envelope).unwrap(),
            b"persisted"
        );
    }

    #[test]
    fn dissolve_wins_over_waiting_membership_change() {
        let (manager, storage) = manager();
        manager.create_group_session(&votes(), &m("admin"), vec![m("alice")]).unwrap();

        let handle = manager.handle(&votes()).unwrap();
        let guard = lock_group(&handle);
        std::thread::scope(|scope| {
            let add = scope.spawn(|| manager.add_group_member(&votes(), &m("bob"), &m("admin")));
            std::thread::sleep(std::time::Duration::from_millis(50));
            let dissolve = scope.spawn(|| manager.dissolve_group(&votes(), &m("admin")));
            std::thread::sleep(std::time::Duration::from_millis(50));
            drop(guard);

            let added = add.join().unwrap();
            assert!(matches!(added, Ok(1) | Err(Error::GroupNotFound(_))), "{added:?}");
            dissolve.join().unwrap().unwrap();
        });

        assert!(!manager.has_group(&votes()));
        assert!(storage.load("group/votes").unwrap().is_none());
        assert_eq!(manager.dirty_groups(), 0);
        let restarted = GroupSessionManager::new(MockEnv::with_seed(10), storage);
        assert_eq!(restarted.restore().unwrap(), 0);
    }

    #[test]
    fn dissolved_handle_is_not_current() {
        let (manager, _) = manager();
        manager.create_group_session(&votes(), &m("admin"), vec![]).unwrap();
        let old = manager.handle(&votes()).unwrap();

        manager.dissolve_group(&votes(), &m("admin")).unwrap();
        manager.create_group_session(&votes(), &m("admin"), vec![]).unwrap();

        assert!(!manager.is_current(&votes(), &old));
        assert!(manager.is_current(&votes(), &manager.handle(&votes()).unwrap()));
    }

    #[test]
    fn broadcast_goes_to_everyone_but_sender() {
        let (manager, _) = manager();
        manager.create_group_session(&votes(), &m("admin"), vec![m("alice"), m("bob")]).unwrap();

        let (envelope, recipients) =
            manager.encrypt_group_broadcast(&votes(), &m("alice"), b"tally").unwrap();

        assert_eq!(recipients, vec![m("admin"), m("bob")]);
        for recipient in &recipients {
            assert_eq!(
                manager.decrypt_group_message(&votes(), recipient, &envelope).unwrap(),
                b"tally"
            );
        }

        let outsider = manager.encrypt_group_broadcast(&votes(), &m("eve"), b"spam");
        assert!(matches!(outsider, Err(Error::NotAMember { .. })));
    }

    #[test]
    fn broadcast_recipients_share_the_envelope_epoch() {
        let (manager, _) = manager();
        manager.create_group_session(&votes(), &m("admin"), vec![m("alice")]).unwrap();

        let handle = manager.handle(&votes()).unwrap();
        let guard = lock_group(&handle);
        let (envelope, recipients) = std::thread::scope(|scope| {
            let broadcast =
                scope.spawn(|| manager.encrypt_group_broadcast(&votes(), &m("alice"), b"tally"));
            std::thread::sleep(std::time::Duration::from_millis(50));
            let add = scope.spawn(|| manager.add_group_member(&votes(), &m("carol"), &m("admin")));
            std::thread::sleep(std::time::Duration::from_millis(50));
            drop(guard);

            add.join().unwrap().unwrap();
            broadcast.join().unwrap().unwrap()
        });

        // Carol is listed exactly when the envelope was sealed after she joined
        let includes_carol = recipients.contains(&m("carol"));
        assert_eq!(envelope.epoch, u64::from(includes_carol));
        if includes_carol {
            assert_eq!(
                manager.decrypt_group_message(&votes(), &m("carol"), &envelope).unwrap(),
                b"tally"
            );
        }
    }
}
