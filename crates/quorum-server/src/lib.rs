//! Quorum secure-messaging server.
//!
//! Production glue around [`quorum_core`]: durable storage, a system
//! environment, an outbound [`Transport`] and an async runtime that feeds
//! events to the [`ServerDriver`] and executes the actions it returns.
//!
//! # Architecture
//!
//! The [`ServerDriver`] is pure logic (events in, actions out). [`Server`]
//! owns the I/O: it receives [`ServerEvent`]s from a channel, sends frames
//! through the transport, hands decrypted messages to the application and
//! runs maintenance (skipped-key GC and write-behind flush) on a timer.
//!
//! # Components
//!
//! - [`ServerDriver`]: Action-based orchestrator (pure logic, no I/O)
//! - [`Server`]: Runtime that executes `ServerDriver` actions
//! - [`RedbStorage`]: Durable key-value storage
//! - [`ChaoticStorage`]: Fault-injecting storage wrapper for tests
//! - [`SystemEnv`]: Production environment (real time, crypto RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod error;
pub mod maintenance;
pub mod storage;
mod system_env;
mod transport;

use std::{path::PathBuf, sync::Arc, time::Duration};

pub use driver::{LogLevel, ServerAction, ServerConfig, ServerDriver, ServerEvent};
pub use error::ServerError;
pub use maintenance::MaintenanceReport;
use quorum_core::{Environment, PeerId};
pub use storage::{ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError};
pub use system_env::SystemEnv;
use tokio::sync::mpsc;
pub use transport::{MemoryTransport, Outbound, Transport};
use tracing::{info, warn};

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Path of the redb database holding identity, sessions and groups
    pub database_path: PathBuf,
    /// Driver configuration (ratchet limits, maintenance interval)
    pub driver: ServerConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self { database_path: PathBuf::from("quorum.redb"), driver: ServerConfig::default() }
    }
}

/// Decrypted message handed to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Peer the message came from
    pub peer: PeerId,
    /// Decrypted message
    pub plaintext: Vec<u8>,
}

/// Secure-messaging server runtime.
pub struct Server<E, S, T>
where
    E: Environment,
    S: Storage,
    T: Transport,
{
    driver: Arc<ServerDriver<E, S>>,
    transport: T,
    env: E,
    deliveries: mpsc::UnboundedSender<Delivery>,
}

impl<T: Transport> Server<SystemEnv, RedbStorage, T> {
    /// Open the database and create a production server.
    ///
    /// Returns the server and the receiver for decrypted messages.
    pub fn open(
        config: ServerRuntimeConfig,
        transport: T,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Delivery>), ServerError> {
        let storage = RedbStorage::open(&config.database_path)?;
        Self::new(SystemEnv::new(), storage, transport, config.driver)
    }
}

impl<E, S, T> Server<E, S, T>
where
    E: Environment,
    S: Storage,
    T: Transport,
{
    /// Create a server over any environment and storage.
    ///
    /// # Errors
    ///
    /// - `Config`: zero maintenance interval
    /// - `Core`: the identity or persisted state could not be loaded
    pub fn new(
        env: E,
        storage: S,
        transport: T,
        config: ServerConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Delivery>), ServerError> {
        if config.maintenance_interval.is_zero() {
            return Err(ServerError::Config("maintenance interval must be non-zero".to_string()));
        }

        let driver = Arc::new(ServerDriver::new(env.clone(), storage, config)?);
        let (deliveries, rx) = mpsc::unbounded_channel();

        Ok((Self { driver, transport, env, deliveries }, rx))
    }

    /// Process one event and execute the resulting actions.
    pub async fn handle(&self, event: ServerEvent) -> Result<(), ServerError> {
        let actions = self.driver.process_event(event)?;
        execute_actions(actions, &self.transport, &self.deliveries).await;
        Ok(())
    }

    /// Run until the inbound channel closes.
    ///
    /// Maintenance runs in a background task every
    /// [`ServerConfig::maintenance_interval`]; a final maintenance pass
    /// flushes pending writes before returning.
    pub async fn run(self, mut inbound: mpsc::Receiver<ServerEvent>) -> Result<(), ServerError> {
        info!(identity = ?self.driver.engine().identity_key(), "Server starting");

        let interval = self.driver.config().maintenance_interval;
        let maintenance =
            tokio::spawn(maintenance_loop(Arc::clone(&self.driver), self.env.clone(), interval));

        while let Some(event) = inbound.recv().await {
            if let Err(error) = self.handle(event).await {
                warn!(%error, "Event failed");
            }
        }

        maintenance.abort();
        let report = self.driver.run_maintenance();
        info!(dirty = report.still_dirty, "Server stopped");

        Ok(())
    }

    /// Action-based driver (engine and groups).
    pub fn driver(&self) -> &ServerDriver<E, S> {
        &self.driver
    }
}

async fn maintenance_loop<E: Environment, S: Storage>(
    driver: Arc<ServerDriver<E, S>>,
    env: E,
    interval: Duration,
) {
    loop {
        env.sleep(interval).await;
        match driver.process_event(ServerEvent::Tick) {
            Ok(actions) => {
                for action in actions {
                    if let ServerAction::Log { level, message } = action {
                        log(level, &message);
                    }
                }
            },
            Err(error) => warn!(%error, "Maintenance tick failed"),
        }
    }
}

/// Execute server actions.
async fn execute_actions<T: Transport>(
    actions: Vec<ServerAction>,
    transport: &T,
    deliveries: &mpsc::UnboundedSender<Delivery>,
) {
    for action in actions {
        match action {
            ServerAction::SendFrame { peer, bytes } => {
                if let Err(error) = transport.send(&peer, bytes).await {
                    warn!(%peer, %error, "SendFrame failed");
                }
            },
            ServerAction::Deliver { peer, plaintext } => {
                if deliveries.send(Delivery { peer, plaintext }).is_err() {
                    warn!("Delivery receiver dropped, message discarded");
                }
            },
            ServerAction::Log { level, message } => log(level, &message),
        }
    }
}

fn log(level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => tracing::debug!("{}", message),
        LogLevel::Info => tracing::info!("{}", message),
        LogLevel::Warn => tracing::warn!("{}", message),
        LogLevel::Error => tracing::error!("{}", message),
    }
}
