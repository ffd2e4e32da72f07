//! Owner-facing handle around the mapping worker thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::RwLock;

use super::error::ManagerError;
use super::gateway::GatewayClient;
use super::ports::PortSet;
use super::worker::Worker;
use super::ManagerConfig;
use crate::interrupt::CancellableWait;

/// Called once from the worker thread when it exits without being asked to
pub type FatalCallback = Box<dyn FnOnce() + Send + 'static>;

/// Where the worker is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManagerState {
    /// No worker has run yet
    #[default]
    Idle,
    /// Looking for a gateway
    Discovering,
    /// Every port is mapped
    Mapped,
    /// Some ports are mapped
    PartiallyMapped,
    /// Nothing is mapped; the next cycle rediscovers
    Unmapped,
    /// Re-asserting existing mappings on the open session
    Renewing,
    /// Removing mappings before exit
    Stopping,
    /// Worker has exited
    Stopped,
}

/// Snapshot of what the worker last published
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStatus {
    /// Current state
    pub state: ManagerState,
    /// Ports believed to be mapped, ascending
    pub mapped: Vec<u16>,
    /// Wait chosen after the last cycle
    pub next_wait: Option<Duration>,
    /// Completed mapping cycles
    pub cycles: u64,
    /// Discovery attempts, including the initial one
    pub discoveries: u64,
}

/// Keeps a set of ports mapped on the gateway from a dedicated worker thread.
///
/// Gateway and network failures never reach the caller; they are logged and
/// retried. The only failure signal is the optional [`FatalCallback`], fired
/// when the very first discovery fails or the worker panics.
pub struct MappingManager<C: GatewayClient> {
    name: String,
    client: Arc<C>,
    config: ManagerConfig,
    cancel: Arc<CancellableWait>,
    status: Arc<RwLock<ManagerStatus>>,
    ports: PortSet,
    worker: Option<JoinHandle<()>>,
}

impl<C: GatewayClient> MappingManager<C> {
    /// Create an idle manager. `name` becomes the worker thread's name.
    pub fn new(name: impl Into<String>, client: C, config: ManagerConfig) -> Self {
        Self {
            name: name.into(),
            client: Arc::new(client),
            config,
            cancel: Arc::new(CancellableWait::new()),
            status: Arc::new(RwLock::new(ManagerStatus::default())),
            ports: PortSet::default(),
            worker: None,
        }
    }

    /// Start managing `ports`, restarting the worker if one is running.
    pub fn start(
        &mut self,
        ports: impl Into<PortSet>,
        on_fatal_error: Option<FatalCallback>,
    ) -> Result<(), ManagerError> {
        let ports = ports.into();
        if ports.is_empty() {
            tracing::error!("Pass at least one port to map");
            return Err(ManagerError::EmptyPortSet);
        }

        self.stop();
        *self.status.write() = ManagerStatus::default();

        let name = self.name.clone();
        let client = self.client.clone();
        let worker_ports = ports.clone();
        let config = self.config.clone();
        let cancel = self.cancel.clone();
        let status = self.status.clone();

        // The worker is built on its own thread so a failed spawn drops the
        // callback without running it.
        let handle = thread::Builder::new().name(self.name.clone()).spawn(move || {
            tracing::debug!("Thread started");
            Worker::new(name, client, worker_ports, config, cancel, status, on_fatal_error).run();
            tracing::debug!("Thread exited");
        })?;

        self.ports = ports;
        self.worker = Some(handle);
        Ok(())
    }

    /// Cancel the worker and wait for it to unmap and exit. No-op if idle.
    pub fn stop(&mut self) {
        if let Some(handle) = self.worker.take() {
            tracing::debug!("Stopping {} ...", self.name);
            self.cancel.cancel();
            if handle.join().is_err() {
                tracing::error!("{} worker thread panicked", self.name);
            }
            self.ports = PortSet::default();
        }
        // Nobody can be waiting anymore
        self.cancel.reset();
    }

    /// Whether a worker thread exists and hasn't exited yet
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Ports of the current run, normalized
    pub fn ports(&self) -> &PortSet {
        &self.ports
    }

    /// Worker thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cycle timing used by every run
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Latest status published by the worker
    pub fn status(&self) -> ManagerStatus {
        self.status.read().clone()
    }
}

impl<C: GatewayClient> Drop for MappingManager<C> {
    fn drop(&mut self) {
        self.stop();
    }
}
