//! Server driver.
//!
//! Ties together the pairwise [`SecureChannelEngine`], the
//! [`GroupSessionManager`] and periodic maintenance. The driver performs no
//! I/O: it turns [`ServerEvent`]s into [`ServerAction`]s which the runtime
//! executes.

use std::time::Duration;

use quorum_core::{
    EngineConfig, Environment, Error, Frame, GroupId, GroupSessionManager, MemberId, PeerId,
    SecureChannelEngine, Storage,
};

use crate::{
    error::ServerError,
    maintenance::{MaintenanceReport, run_maintenance},
};

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Ratchet limits and skipped-key retention
    pub engine: EngineConfig,
    /// Interval between maintenance ticks (GC and flush)
    pub maintenance_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { engine: EngineConfig::default(), maintenance_interval: Duration::from_secs(60 * 60) }
    }
}

/// Events that the server driver processes.
///
/// These are produced by the external runtime (simulation or production).
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Open a channel to `peer` (the server initiates the handshake)
    Connect {
        /// Peer to connect to
        peer: PeerId,
    },

    /// A frame was received from a peer
    FrameReceived {
        /// Peer that sent the frame
        peer: PeerId,
        /// Encoded frame
        bytes: Vec<u8>,
    },

    /// The application wants to send a message to a peer
    Send {
        /// Destination peer
        peer: PeerId,
        /// Message to encrypt
        plaintext: Vec<u8>,
    },

    /// The application wants to broadcast to a group
    GroupBroadcast {
        /// Target group
        group_id: GroupId,
        /// Member the message is sent as
        sender_id: MemberId,
        /// Message to encrypt
        plaintext: Vec<u8>,
    },

    /// Forget the session with a peer
    EndSession {
        /// Peer whose session is removed
        peer: PeerId,
    },

    /// Periodic tick for maintenance
    Tick,
}

/// Actions that the server driver produces.
///
/// These are executed by runtime-specific code (production or simulation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    /// Send an encoded frame to a peer
    SendFrame {
        /// Destination peer
        peer: PeerId,
        /// Encoded frame
        bytes: Vec<u8>,
    },

    /// Hand a decrypted message to the application
    Deliver {
        /// Peer the message came from
        peer: PeerId,
        /// Decrypted message
        plaintext: Vec<u8>,
    },

    /// Log a message (for debugging/monitoring)
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
    },
}

/// Log levels for server actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// Action-based server driver.
///
/// All methods take `&self`; the engine and group manager lock per peer and
/// per group internally.
pub struct ServerDriver<E, S>
where
    E: Environment,
    S: Storage,
{
    engine: SecureChannelEngine<E, S>,
    groups: GroupSessionManager<E, S>,
    config: ServerConfig,
}

impl<E, S> ServerDriver<E, S>
where
    E: Environment,
    S: Storage,
{
    /// Create a driver, loading the identity and restoring persisted sessions
    /// and groups.
    pub fn new(env: E, storage: S, config: ServerConfig) -> Result<Self, ServerError> {
        let engine = SecureChannelEngine::new(env.clone(), storage.clone(), config.engine.clone())?;
        let groups = GroupSessionManager::new(env, storage);
        groups.restore()?;

        Ok(Self { engine, groups, config })
    }

    /// Process a server event and return actions to execute.
    ///
    /// Failures caused by a peer's frame are answered with a `signal-error`
    /// frame and never returned as errors. Errors are returned for
    /// application requests (`Send`, `GroupBroadcast`, `EndSession`).
    pub fn process_event(&self, event: ServerEvent) -> Result<Vec<ServerAction>, ServerError> {
        match event {
            ServerEvent::Connect { peer } => self.handle_connect(peer),
            ServerEvent::FrameReceived { peer, bytes } => Ok(self.handle_frame_received(&peer, &bytes)),
            ServerEvent::Send { peer, plaintext } => self.handle_send(peer, &plaintext),
            ServerEvent::GroupBroadcast { group_id, sender_id, plaintext } => {
                self.handle_group_broadcast(&group_id, &sender_id, &plaintext)
            },
            ServerEvent::EndSession { peer } => {
                let existed = self.engine.end_session(&peer)?;
                Ok(vec![ServerAction::Log {
                    level: LogLevel::Info,
                    message: format!("session with {peer} ended (existed: {existed})"),
                }])
            },
            ServerEvent::Tick => Ok(self.handle_tick()),
        }
    }

    fn handle_connect(&self, peer: PeerId) -> Result<Vec<ServerAction>, ServerError> {
        let ephemeral_key = self.engine.begin_handshake(&peer);
        let bytes = Frame::HandshakeInitiate {
            identity_key: self.engine.identity_key().as_bytes().to_vec(),
            ephemeral_key: ephemeral_key.as_bytes().to_vec(),
        }
        .encode()?;

        Ok(vec![ServerAction::SendFrame { peer, bytes }])
    }

    /// Handle a frame received from a peer.
    fn handle_frame_received(&self, peer: &PeerId, bytes: &[u8]) -> Vec<ServerAction> {
        let result = Frame::decode(bytes).and_then(|frame| self.dispatch_frame(peer, frame));

        match result {
            Ok(actions) => actions,
            Err(error) => self.make_error_response(peer, &error),
        }
    }

    fn dispatch_frame(&self, peer: &PeerId, frame: Frame) -> Result<Vec<ServerAction>, Error> {
        match frame {
            Frame::HandshakeInitiate { identity_key, ephemeral_key } => {
                let response = self.engine.initiate_session(peer, &identity_key, &ephemeral_key)?;
                let bytes = Frame::HandshakeComplete {
                    identity_key: response.identity_key.as_bytes().to_vec(),
                    ephemeral_key: response.ephemeral_key.as_bytes().to_vec(),
                }
                .encode()?;

                Ok(vec![ServerAction::SendFrame { peer: peer.clone(), bytes }, ServerAction::Log {
                    level: LogLevel::Info,
                    message: format!("session with {peer} established"),
                }])
            },
            Frame::HandshakeComplete { identity_key, ephemeral_key } => {
                self.engine.complete_handshake(peer, &identity_key, &ephemeral_key)?;
                Ok(vec![ServerAction::Log {
                    level: LogLevel::Info,
                    message: format!("handshake with {peer} completed"),
                }])
            },
            Frame::Encrypted(envelope) => {
                let plaintext = self.engine.decrypt(peer, &envelope)?;
                Ok(vec![ServerAction::Deliver { peer: peer.clone(), plaintext }])
            },
            Frame::Error { kind, message } => Ok(vec![ServerAction::Log {
                level: LogLevel::Warn,
                message: format!("{peer} rejected a frame ({kind}): {message}"),
            }]),
        }
    }

    /// Answer a failed frame with a `signal-error` frame.
    fn make_error_response(&self, peer: &PeerId, error: &Error) -> Vec<ServerAction> {
        let log = ServerAction::Log {
            level: if error.kind().is_transient() { LogLevel::Error } else { LogLevel::Warn },
            message: format!("frame from {peer} rejected: {error}"),
        };

        match Frame::from_error(error).encode() {
            Ok(bytes) => vec![ServerAction::SendFrame { peer: peer.clone(), bytes }, log],
            Err(e) => vec![log, ServerAction::Log {
                level: LogLevel::Error,
                message: format!("failed to encode error response: {e}"),
            }],
        }
    }

    fn handle_send(&self, peer: PeerId, plaintext: &[u8]) -> Result<Vec<ServerAction>, ServerError> {
        let bytes = Frame::Encrypted(self.engine.encrypt(&peer, plaintext)?).encode()?;
        Ok(vec![ServerAction::SendFrame { peer, bytes }])
    }

    /// Encrypt once, send the same envelope to every other member.
    fn handle_group_broadcast(
        &self,
        group_id: &GroupId,
        sender_id: &MemberId,
        plaintext: &[u8],
    ) -> Result<Vec<ServerAction>, ServerError> {
        let (envelope, recipients) =
            self.groups.encrypt_group_broadcast(group_id, sender_id, plaintext)?;
        let bytes = envelope.encode()?;

        Ok(recipients
            .into_iter()
            .map(|member| ServerAction::SendFrame {
                peer: PeerId::new(member.as_str()),
                bytes: bytes.clone(),
            })
            .collect())
    }

    /// Handle periodic tick: skipped-key GC and write-behind flush.
    fn handle_tick(&self) -> Vec<ServerAction> {
        let report = self.run_maintenance();
        let level = if report.is_clean() { LogLevel::Debug } else { LogLevel::Warn };

        vec![ServerAction::Log {
            level,
            message: format!(
                "maintenance: purged {} skipped keys, flushed {} sessions and {} groups, {} still dirty",
                report.skipped_keys_purged,
                report.sessions_flushed,
                report.groups_flushed,
                report.still_dirty
            ),
        }]
    }

    /// Run maintenance once.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        run_maintenance(&self.engine, &self.groups)
    }

    /// Pairwise engine.
    pub fn engine(&self) -> &SecureChannelEngine<E, S> {
        &self.engine
    }

    /// Group session manager.
    pub fn groups(&self) -> &GroupSessionManager<E, S> {
        &self.groups
    }

    /// Driver configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl<E, S> std::fmt::Debug for ServerDriver<E, S>
where
    E: Environment,
    S: Storage,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDriver")
            .field("peers", &self.engine.peers().len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
