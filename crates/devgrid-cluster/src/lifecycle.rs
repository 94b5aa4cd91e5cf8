//! The single active-instance slot.
//!
//! At most one instance is starting, running or stopping at a time. A
//! bootstrap reserves the slot with [`LifecycleManager::begin`] and either
//! publishes its instance or abandons the reservation. Stopping never holds
//! the slot lock while agents are being terminated.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use devgrid_core::{InstanceState, Stage};
use devgrid_exec::TerminationPolicy;

use crate::error::{DevgridError, DevgridResult};
use crate::instance::{Instance, StopReport};

#[derive(Debug)]
enum Slot {
    Vacant {
        last: InstanceState,
    },
    Starting {
        ticket: u64,
        cancel: watch::Sender<bool>,
    },
    Active(Instance),
    Stopping,
}

/// Reservation of the slot for one bootstrap attempt.
#[derive(Debug)]
pub struct BootstrapTicket {
    id: u64,
    cancel: watch::Receiver<bool>,
}

impl BootstrapTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Receiver that turns `true` when a stop is requested mid-bootstrap.
    pub fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// What [`LifecycleManager::stop_active`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running.
    NoInstance,
    /// A bootstrap was in flight and has been asked to unwind.
    BootstrapCancelled,
    Stopped(StopReport),
}

/// Owner of the active instance.
#[derive(Debug)]
pub struct LifecycleManager {
    slot: Mutex<Slot>,
    next_ticket: AtomicU64,
    termination: TerminationPolicy,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new(TerminationPolicy::default())
    }
}

impl LifecycleManager {
    pub fn new(termination: TerminationPolicy) -> Self {
        Self {
            slot: Mutex::new(Slot::Vacant {
                last: InstanceState::NotStarted,
            }),
            next_ticket: AtomicU64::new(1),
            termination,
        }
    }

    /// Reserve the slot for a new bootstrap.
    ///
    /// Rejected, never queued, while another instance is starting, running
    /// or stopping.
    pub async fn begin(&self) -> DevgridResult<BootstrapTicket> {
        let mut slot = self.slot.lock().await;
        if !matches!(*slot, Slot::Vacant { .. }) {
            debug!("bootstrap rejected, slot occupied");
            return Err(DevgridError::AlreadyRunning);
        }

        let id = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        *slot = Slot::Starting {
            ticket: id,
            cancel: cancel_tx,
        };
        debug!(ticket = id, "bootstrap slot reserved");
        Ok(BootstrapTicket {
            id,
            cancel: cancel_rx,
        })
    }

    /// Make `instance` the active instance.
    ///
    /// If a stop was requested while the ticket was outstanding, the instance
    /// is stopped instead and `Cancelled` is returned.
    pub async fn publish(&self, ticket: BootstrapTicket, mut instance: Instance) -> DevgridResult<()> {
        let owned = {
            let mut slot = self.slot.lock().await;
            let current = matches!(&*slot, Slot::Starting { ticket: id, .. } if *id == ticket.id);
            if current && !ticket.is_cancelled() {
                info!(ticket = ticket.id, "instance published");
                *slot = Slot::Active(instance);
                return Ok(());
            }
            if current {
                *slot = Slot::Stopping;
            }
            current
        };

        warn!(ticket = ticket.id, "bootstrap was cancelled, stopping instance");
        let report = instance.stop(&self.termination).await;
        if owned {
            *self.slot.lock().await = Slot::Vacant {
                last: InstanceState::Stopped,
            };
        }
        report.into_result()?;
        Err(DevgridError::Cancelled {
            stage: Stage::Bootstrap,
        })
    }

    /// Release the reservation of a bootstrap that did not produce an
    /// instance (or whose instance has already been torn down).
    pub async fn abandon(&self, ticket: BootstrapTicket) {
        self.vacate(ticket.id).await;
    }

    async fn vacate(&self, ticket: u64) {
        let mut slot = self.slot.lock().await;
        if !matches!(&*slot, Slot::Starting { ticket: id, .. } if *id == ticket) {
            return;
        }
        debug!(ticket, "bootstrap slot released");
        *slot = Slot::Vacant {
            last: InstanceState::Stopped,
        };
    }

    /// Stop whatever is active.
    ///
    /// Running instances are terminated scheduler first; an in-flight
    /// bootstrap is cancelled and tears itself down.
    pub async fn stop_active(&self) -> StopOutcome {
        let mut instance = {
            let mut slot = self.slot.lock().await;
            match std::mem::replace(&mut *slot, Slot::Stopping) {
                Slot::Active(instance) => instance,
                Slot::Starting { ticket, cancel } => {
                    info!(ticket, "cancelling bootstrap in progress");
                    let _ = cancel.send(true);
                    *slot = Slot::Starting { ticket, cancel };
                    return StopOutcome::BootstrapCancelled;
                }
                other => {
                    *slot = other;
                    debug!("no active instance to stop");
                    return StopOutcome::NoInstance;
                }
            }
        };

        let report = instance.stop(&self.termination).await;
        *self.slot.lock().await = Slot::Vacant {
            last: InstanceState::Stopped,
        };
        StopOutcome::Stopped(report)
    }

    pub async fn state(&self) -> InstanceState {
        match &*self.slot.lock().await {
            Slot::Vacant { last } => *last,
            Slot::Starting { .. } => InstanceState::Starting,
            Slot::Active(instance) => instance.state(),
            Slot::Stopping => InstanceState::Stopping,
        }
    }

    /// Whether a published instance is currently held.
    pub async fn is_active(&self) -> bool {
        matches!(&*self.slot.lock().await, Slot::Active(_))
    }
}
