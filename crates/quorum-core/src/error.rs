//! Error types for the Quorum protocol core.
//!
//! Every error is recoverable at the protocol layer: the affected session or
//! group is never left partially advanced. Callers branch on [`ErrorKind`] to
//! decide whether to retry, re-handshake, or drop the message.

use std::fmt;

use quorum_crypto::CryptoError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    ids::{GroupId, MemberId, PeerId},
    storage::StorageError,
};

/// Errors from handshake, ratchet and group operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Handshake input was malformed or produced an unusable shared secret
    #[error("handshake failed: {reason}")]
    HandshakeFailed {
        /// What was wrong with the handshake
        reason: String,
    },

    /// No session exists for this peer
    #[error("no session for peer {0}")]
    SessionNotFound(PeerId),

    /// Session exists but cannot send until the peer's first message arrives
    #[error("session with peer {0} has not received a ratchet key yet")]
    SessionNotReady(PeerId),

    /// Message key is not available (already consumed or never cached)
    #[error("no message key for message {message_number}")]
    KeyNotFound {
        /// Message number from the header
        message_number: u32,
    },

    /// Message would require deriving more keys than allowed
    #[error("too many skipped messages: {requested} keys requested, limit is {max_skip}")]
    TooManySkipped {
        /// Number of keys the message would require
        requested: u64,
        /// Configured limit
        max_skip: u32,
    },

    /// AEAD tag did not verify
    #[error("message authentication failed")]
    AuthenticationFailed,

    /// Member is not part of the group
    #[error("{member} is not a member of group {group}")]
    NotAMember {
        /// Group that was addressed
        group: GroupId,
        /// Member that is missing
        member: MemberId,
    },

    /// Requester may not change the group membership
    #[error("{requester} is not allowed to modify group {group}")]
    Unauthorized {
        /// Group that was addressed
        group: GroupId,
        /// Member that made the request
        requester: MemberId,
    },

    /// Group message was encrypted under a different epoch
    #[error("epoch mismatch: group is at {current}, message is from {message}")]
    EpochMismatch {
        /// Current group epoch
        current: u64,
        /// Epoch of the message
        message: u64,
    },

    /// Group does not exist
    #[error("group {0} not found")]
    GroupNotFound(GroupId),

    /// Group already exists
    #[error("group {0} already exists")]
    GroupExists(GroupId),

    /// Member is already part of the group
    #[error("{member} is already a member of group {group}")]
    AlreadyMember {
        /// Group that was addressed
        group: GroupId,
        /// Member that is already present
        member: MemberId,
    },

    /// State transition succeeded in memory but could not be persisted
    #[error("persistence failed: {0}")]
    Persistence(#[from] StorageError),

    /// Malformed wire frame or envelope
    #[error("codec error: {0}")]
    Codec(String),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::HandshakeFailed { .. } => ErrorKind::HandshakeFailed,
            Self::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Self::SessionNotReady(_) => ErrorKind::SessionNotReady,
            Self::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            Self::TooManySkipped { .. } => ErrorKind::TooManySkipped,
            Self::AuthenticationFailed => ErrorKind::AuthenticationFailed,
            Self::NotAMember { .. } => ErrorKind::NotAMember,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::EpochMismatch { .. } => ErrorKind::EpochMismatch,
            Self::GroupNotFound(_) => ErrorKind::GroupNotFound,
            Self::GroupExists(_) => ErrorKind::GroupExists,
            Self::AlreadyMember { .. } => ErrorKind::AlreadyMember,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::Codec(_) => ErrorKind::Codec,
        }
    }

    pub(crate) fn handshake(reason: impl Into<String>) -> Self {
        Self::HandshakeFailed { reason: reason.into() }
    }
}

impl From<CryptoError> for Error {
    /// Key errors outside a handshake come from a peer-supplied ratchet key;
    /// the message is rejected as unauthenticated.
    fn from(_: CryptoError) -> Self {
        Self::AuthenticationFailed
    }
}

/// Error classification, also carried in `signal-error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// See [`Error::HandshakeFailed`]
    HandshakeFailed,
    /// See [`Error::SessionNotFound`]
    SessionNotFound,
    /// See [`Error::SessionNotReady`]
    SessionNotReady,
    /// See [`Error::KeyNotFound`]
    KeyNotFound,
    /// See [`Error::TooManySkipped`]
    TooManySkipped,
    /// See [`Error::AuthenticationFailed`]
    AuthenticationFailed,
    /// See [`Error::NotAMember`]
    NotAMember,
    /// See [`Error::Unauthorized`]
    Unauthorized,
    /// See [`Error::EpochMismatch`]
    EpochMismatch,
    /// See [`Error::GroupNotFound`]
    GroupNotFound,
    /// See [`Error::GroupExists`]
    GroupExists,
    /// See [`Error::AlreadyMember`]
    AlreadyMember,
    /// See [`Error::Persistence`]
    Persistence,
    /// See [`Error::Codec`]
    Codec,
}

impl ErrorKind {
    /// Returns true if the pairwise session is unusable and the client should
    /// run a new handshake.
    ///
    /// A single bad message (`AuthenticationFailed`, `KeyNotFound`) never
    /// requires a new handshake; the session is untouched.
    pub fn requires_handshake(self) -> bool {
        matches!(
            self,
            Self::HandshakeFailed
                | Self::SessionNotFound
                | Self::TooManySkipped
                | Self::SessionNotReady
        )
    }

    /// Returns true if the operation may succeed on retry without any change
    /// on the caller's side.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Persistence)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result alias for protocol operations
pub type Result<T, E = Error> = std::result::Result<T, E>;
