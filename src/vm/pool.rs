use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use super::controller::{LifecycleError, VmController};
use super::session::VmSession;
use crate::config::VmConfig;

/// Fixed set of VM sessions, each handed to one request at a time.
pub struct VmPool {
    sessions: Vec<Arc<Mutex<VmSession>>>,
    permits: Arc<Semaphore>,
}

impl VmPool {
    pub fn new(controller: Arc<dyn VmController>, config: &VmConfig) -> Self {
        let size = config.pool_size.max(1);
        let sessions = (0..size)
            .map(|slot| {
                VmSession::new(
                    slot,
                    config.slot_hosts.get(slot).cloned(),
                    controller.clone(),
                    config.settle_delay(),
                )
            })
            .collect();
        Self::from_sessions(sessions)
    }

    /// Single-slot pool, the common deployment of one VM per host.
    pub fn single(controller: Arc<dyn VmController>, settle_delay: Duration) -> Self {
        Self::from_sessions(vec![VmSession::new(0, None, controller, settle_delay)])
    }

    fn from_sessions(sessions: Vec<VmSession>) -> Self {
        let permits = Arc::new(Semaphore::new(sessions.len()));
        Self {
            sessions: sessions.into_iter().map(|s| Arc::new(Mutex::new(s))).collect(),
            permits,
        }
    }

    pub fn size(&self) -> usize {
        self.sessions.len()
    }

    /// Number of sessions not currently leased.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free session and lease it.
    pub async fn checkout(&self) -> Result<VmLease, LifecycleError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LifecycleError::PoolClosed)?;

        // A permit guarantees at least one unlocked session: leases drop the
        // session guard before giving the permit back.
        for session in &self.sessions {
            if let Ok(guard) = session.clone().try_lock_owned() {
                debug!("Leased VM session {} (slot {})", guard.id(), guard.slot());
                return Ok(VmLease {
                    session: guard,
                    _permit: permit,
                });
            }
        }

        Err(LifecycleError::PoolExhausted)
    }
}

/// Exclusive access to one [`VmSession`], released on drop.
pub struct VmLease {
    // Field order matters: the guard must be released before the permit.
    session: OwnedMutexGuard<VmSession>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for VmLease {
    type Target = VmSession;

    fn deref(&self) -> &VmSession {
        &self.session
    }
}

impl DerefMut for VmLease {
    fn deref_mut(&mut self) -> &mut VmSession {
        &mut self.session
    }
}
