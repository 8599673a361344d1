use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::controller::{LifecycleError, VmController};
use crate::runtime::Runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Stopped,
    Starting,
    Running,
    ShuttingDown,
}

/// One VM slot and where it is in its lifecycle.
///
/// Only reachable through a [`super::VmLease`], so a session is driven by one
/// request at a time.
pub struct VmSession {
    id: String,
    slot: usize,
    host: Option<String>,
    state: VmState,
    controller: Arc<dyn VmController>,
    settle_delay: Duration,
}

impl VmSession {
    pub fn new(
        slot: usize,
        host: Option<String>,
        controller: Arc<dyn VmController>,
        settle_delay: Duration,
    ) -> Self {
        let id = format!("vm_{}", Uuid::new_v4().simple().to_string()[..8].to_lowercase());
        Self {
            id,
            slot,
            host,
            state: VmState::Stopped,
            controller,
            settle_delay,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// SSH host dedicated to this slot, if the pool was configured with one.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    /// Provision the VM for `runtime` and wait for it to settle.
    ///
    /// On failure the session is back in `Stopped` and the error is returned
    /// for the caller to act on.
    pub async fn setup(&mut self, runtime: Runtime) -> Result<(), LifecycleError> {
        if self.state != VmState::Stopped {
            // An earlier request was dropped before it could tear down.
            warn!(
                "VM {} (slot {}) found in {:?}, tearing down before setup",
                self.id, self.slot, self.state
            );
            if let Err(e) = self.shutdown().await {
                error!("Error during stale VM shutdown: {}", e);
            }
        }

        self.state = VmState::Starting;
        info!("Starting VM {} (slot {}) for {}", self.id, self.slot, runtime);

        if let Err(e) = self.controller.provision(self.slot, runtime).await {
            self.state = VmState::Stopped;
            return Err(e);
        }

        tokio::time::sleep(self.settle_delay).await;
        self.state = VmState::Running;
        info!("VM {} is running", self.id);
        Ok(())
    }

    /// Tear the VM down. Always runs the teardown action, whatever state the
    /// session is in, and always ends in `Stopped`.
    pub async fn shutdown(&mut self) -> Result<(), LifecycleError> {
        self.state = VmState::ShuttingDown;
        info!("Shutting down VM {} (slot {})", self.id, self.slot);

        let result = self.controller.teardown(self.slot).await;
        self.state = VmState::Stopped;
        result
    }
}

impl std::fmt::Debug for VmSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmSession")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .field("host", &self.host)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingController {
        fail_provision: bool,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VmController for RecordingController {
        async fn provision(&self, slot: usize, runtime: Runtime) -> Result<(), LifecycleError> {
            self.calls.lock().unwrap().push(format!("provision {} {}", slot, runtime));
            if self.fail_provision {
                return Err(LifecycleError::ScriptFailed {
                    script: "setup-VM.sh".to_string(),
                    status: "exit status: 1".to_string(),
                    stderr: String::new(),
                });
            }
            Ok(())
        }

        async fn teardown(&self, slot: usize) -> Result<(), LifecycleError> {
            self.calls.lock().unwrap().push(format!("teardown {}", slot));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let controller = Arc::new(RecordingController::default());
        let mut session = VmSession::new(0, None, controller.clone(), Duration::ZERO);
        assert_eq!(session.state(), VmState::Stopped);
        assert!(session.id().starts_with("vm_"));

        session.setup(Runtime::Python).await.unwrap();
        assert_eq!(session.state(), VmState::Running);

        session.shutdown().await.unwrap();
        assert_eq!(session.state(), VmState::Stopped);
        assert_eq!(
            *controller.calls.lock().unwrap(),
            vec!["provision 0 python", "teardown 0"]
        );
    }

    #[tokio::test]
    async fn test_failed_setup_returns_to_stopped() {
        let controller = Arc::new(RecordingController {
            fail_provision: true,
            ..Default::default()
        });
        let mut session = VmSession::new(1, None, controller, Duration::ZERO);

        assert!(session.setup(Runtime::Python).await.is_err());
        assert_eq!(session.state(), VmState::Stopped);
    }

    #[tokio::test]
    async fn test_stale_session_is_torn_down_before_setup() {
        let controller = Arc::new(RecordingController::default());
        let mut session = VmSession::new(0, None, controller.clone(), Duration::ZERO);

        session.setup(Runtime::Python).await.unwrap();
        session.setup(Runtime::Python).await.unwrap();

        assert_eq!(
            *controller.calls.lock().unwrap(),
            vec!["provision 0 python", "teardown 0", "provision 0 python"]
        );
    }
}
