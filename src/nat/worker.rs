//! The mapping worker: one run of the discover, map, renew and unmap cycle.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use super::gateway::GatewayClient;
use super::manager::{FatalCallback, ManagerState, ManagerStatus};
use super::ports::PortSet;
use super::ManagerConfig;
use crate::interrupt::CancellableWait;

/// State owned by the worker thread for one run.
///
/// Teardown lives in `Drop` so it runs on every way out of [`run`](Self::run):
/// mapped ports are removed, the interrupt is raised, and the fatal callback
/// fires if the run never got past its first discovery or unwound from a
/// panic.
pub(super) struct Worker<C: GatewayClient> {
    name: String,
    client: Arc<C>,
    ports: PortSet,
    config: ManagerConfig,
    cancel: Arc<CancellableWait>,
    status: Arc<RwLock<ManagerStatus>>,
    on_fatal: Option<FatalCallback>,
    ctx: Option<C::Context>,
    mapped: BTreeSet<u16>,
    errored: bool,
}

impl<C: GatewayClient> Worker<C> {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        name: String,
        client: Arc<C>,
        ports: PortSet,
        config: ManagerConfig,
        cancel: Arc<CancellableWait>,
        status: Arc<RwLock<ManagerStatus>>,
        on_fatal: Option<FatalCallback>,
    ) -> Self {
        Self {
            name,
            client,
            ports,
            config,
            cancel,
            status,
            on_fatal,
            ctx: None,
            mapped: BTreeSet::new(),
            errored: true,
        }
    }

    pub(super) fn run(mut self) {
        info!(
            "{} started, will manage {} port mapping(s) {}, probing for gateways ...",
            self.name,
            self.ports.len(),
            self.ports
        );

        if !self.setup() {
            // First discovery failed: exit with `errored` still set
            return;
        }
        self.errored = false;

        let mut iteration = 0u64;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let wait = self.cycle(iteration);
            iteration += 1;
            if self.cancel.wait(Some(wait)) {
                break;
            }
        }
    }

    /// One mapping pass. Returns how long to wait before the next one.
    fn cycle(&mut self, iteration: u64) -> Duration {
        let mut ok = true;
        if iteration > 0 {
            if self.mapped.is_empty() {
                // Nothing stuck last time; the gateway may have rebooted or
                // our address may have changed
                debug!("Redoing gateway discovery ...");
                ok = self.setup();
            } else {
                self.publish(|status| status.state = ManagerState::Renewing);
            }
        }
        if ok {
            self.map_ports();
        }

        let wait = self.config.next_wait(!self.mapped.is_empty());
        let state = if self.mapped.is_empty() {
            ManagerState::Unmapped
        } else if self.mapped.len() == self.ports.len() {
            ManagerState::Mapped
        } else {
            ManagerState::PartiallyMapped
        };
        let mapped: Vec<u16> = self.mapped.iter().copied().collect();
        self.publish(|status| {
            status.state = state;
            status.mapped = mapped;
            status.next_wait = Some(wait);
            status.cycles += 1;
        });
        debug!("Next mapping cycle in {:?}", wait);
        wait
    }

    /// Discard any session and discover a fresh one
    fn setup(&mut self) -> bool {
        self.ctx = None;
        self.publish(|status| {
            status.state = ManagerState::Discovering;
            status.discoveries += 1;
        });

        let ctx = match self.client.discover() {
            Ok(ctx) => ctx,
            Err(e) => {
                error!("{}", e);
                return false;
            }
        };
        info!("Using {}", ctx);

        match self.client.external_address(&ctx) {
            Ok(ip) => info!("External IP = {}", ip),
            Err(e) => info!("{}", e),
        }

        self.ctx = Some(ctx);
        true
    }

    fn map_ports(&mut self) {
        let Some(ctx) = self.ctx.as_ref() else {
            return;
        };
        for port in self.ports.iter() {
            if self.cancel.is_cancelled() {
                debug!("Cancelled, skipping remaining ports");
                break;
            }
            debug!("Mapping {} ...", port);
            match self.client.add_mapping(ctx, port) {
                Ok(()) => {
                    info!("Port mapping of port {} successful", port);
                    self.mapped.insert(port);
                }
                Err(e) => {
                    error!("{}", e);
                    self.mapped.remove(&port);
                }
            }
        }
    }

    /// Best-effort removal of everything still mapped
    fn unmap_all(&mut self) {
        let mapped = std::mem::take(&mut self.mapped);
        let Some(ctx) = self.ctx.as_ref() else {
            return;
        };
        for port in mapped {
            debug!("Unmapping {} ...", port);
            match self.client.remove_mapping(ctx, port) {
                Ok(()) => info!("DeletePortMapping for port {}: success", port),
                Err(e) => warn!("{}", e),
            }
        }
    }

    fn publish(&self, update: impl FnOnce(&mut ManagerStatus)) {
        update(&mut *self.status.write());
    }
}

impl<C: GatewayClient> Drop for Worker<C> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("{} panicked, tearing down", self.name);
            self.errored = true;
        }
        self.publish(|status| status.state = ManagerState::Stopping);
        self.unmap_all();
        self.cancel.cancel();
        self.publish(|status| {
            status.state = ManagerState::Stopped;
            status.mapped.clear();
        });

        if self.errored {
            if let Some(on_fatal) = self.on_fatal.take() {
                debug!("{} exited with an error, notifying observer", self.name);
                on_fatal();
            }
        }
    }
}
