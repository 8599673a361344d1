//! The boundary call: look a function up, fetch its code, and run it in a
//! leased VM that is torn down afterwards.

use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{Config, ProvisionFailurePolicy};
use crate::error::ExecutionError;
use crate::remote::{ChannelCredentials, ExecutionClient, ExecutionRequest};
use crate::runtime::Runtime;
use crate::store::{CodeStore, CodeStoreError, FunctionRepository};
use crate::vm::{ScriptVmController, VmController, VmPool};

/// Runs assembled requests in leased VMs.
pub struct FunctionRunner {
    pool: Arc<VmPool>,
    client: ExecutionClient,
    provision_policy: ProvisionFailurePolicy,
}

impl FunctionRunner {
    pub fn new(pool: Arc<VmPool>, client: ExecutionClient) -> Self {
        Self {
            pool,
            client,
            provision_policy: ProvisionFailurePolicy::default(),
        }
    }

    /// Runner wired to the provisioning scripts and OpenSSH, as configured.
    pub fn from_config(config: &Config) -> Self {
        let controller: Arc<dyn VmController> = Arc::new(ScriptVmController::new(&config.vm));
        let pool = Arc::new(VmPool::new(controller, &config.vm));
        Self::new(pool, ExecutionClient::from_config(config))
            .with_provision_policy(config.vm.provision_failure_policy)
    }

    pub fn with_provision_policy(mut self, policy: ProvisionFailurePolicy) -> Self {
        self.provision_policy = policy;
        self
    }

    pub fn pool(&self) -> &Arc<VmPool> {
        &self.pool
    }

    /// Run `request` in a leased VM.
    ///
    /// Once a VM is leased it is torn down exactly once before returning,
    /// whichever step failed. Requests rejected before checkout, such as an
    /// unsupported runtime, never lease, provision or tear down a VM.
    pub async fn run(&self, request: &ExecutionRequest) -> Result<Value, ExecutionError> {
        let runtime: Runtime = request.runtime().parse()?;

        let mut lease = self.pool.checkout().await.map_err(|e| {
            ExecutionError::generic("No VM available for execution").with_cause(e)
        })?;

        // Slots with their own host receive the request there.
        let retargeted = lease
            .host()
            .filter(|host| *host != request.credentials().host)
            .map(|host| request.for_host(host));
        let request = retargeted.as_ref().unwrap_or(request);

        let outcome = match lease.setup(runtime).await {
            Ok(()) => self.client.execute(request).await,
            Err(e) => match self.provision_policy {
                ProvisionFailurePolicy::Continue => {
                    warn!("Failed to set up VM {}: {}; attempting execution anyway", lease.id(), e);
                    self.client.execute(request).await
                }
                ProvisionFailurePolicy::Abort => {
                    error!("Failed to set up VM {}: {}", lease.id(), e);
                    Err(ExecutionError::generic("Failed to provision execution environment").with_cause(e))
                }
            },
        };

        if let Err(e) = lease.shutdown().await {
            error!("Error during VM shutdown: {}", e);
        }

        if outcome.is_ok() {
            info!("Function {} completed on VM {}", request.handler(), lease.id());
        }
        outcome
    }
}

/// Looks functions up and hands them to a [`FunctionRunner`].
pub struct FunctionInvoker {
    repository: Arc<dyn FunctionRepository>,
    code_store: Arc<dyn CodeStore>,
    runner: FunctionRunner,
}

impl FunctionInvoker {
    pub fn new(
        repository: Arc<dyn FunctionRepository>,
        code_store: Arc<dyn CodeStore>,
        pool: Arc<VmPool>,
        client: ExecutionClient,
    ) -> Self {
        Self::with_runner(repository, code_store, FunctionRunner::new(pool, client))
    }

    pub fn with_runner(
        repository: Arc<dyn FunctionRepository>,
        code_store: Arc<dyn CodeStore>,
        runner: FunctionRunner,
    ) -> Self {
        Self {
            repository,
            code_store,
            runner,
        }
    }

    /// Invoker wired to the provisioning scripts and OpenSSH, as configured.
    pub fn from_config(
        config: &Config,
        repository: Arc<dyn FunctionRepository>,
        code_store: Arc<dyn CodeStore>,
    ) -> Self {
        Self::with_runner(repository, code_store, FunctionRunner::from_config(config))
    }

    pub fn with_provision_policy(mut self, policy: ProvisionFailurePolicy) -> Self {
        self.runner = self.runner.with_provision_policy(policy);
        self
    }

    pub fn pool(&self) -> &Arc<VmPool> {
        self.runner.pool()
    }

    /// Run the function `handler` owned by `owner_id` with `event`.
    ///
    /// Lookup and code-fetch failures return before any VM is leased.
    pub async fn invoke(
        &self,
        owner_id: &str,
        handler: &str,
        credentials: ChannelCredentials,
        event: Value,
    ) -> Result<Value, ExecutionError> {
        let record = self
            .repository
            .find_function(owner_id, handler)
            .await
            .map_err(|e| {
                ExecutionError::generic("Internal error while fetching code").with_cause(e)
            })?
            .ok_or_else(|| ExecutionError::not_found("Function not found"))?;

        let code = self
            .code_store
            .fetch_code(&record.storage_key)
            .await
            .map_err(|e| {
                let message = match &e {
                    CodeStoreError::InvalidBody(_) => "Invalid code store response",
                    CodeStoreError::Missing(_) => "Function code is missing from the code store",
                    CodeStoreError::Unavailable(_) => "Code store unavailable",
                };
                ExecutionError::upstream_data(message).with_cause(e)
            })?;

        let request = ExecutionRequest::new(code, record.runtime, record.handler, credentials)
            .with_event(event);
        self.runner.run(&request).await
    }

    /// See [`FunctionRunner::run`].
    pub async fn run(&self, request: &ExecutionRequest) -> Result<Value, ExecutionError> {
        self.runner.run(request).await
    }
}
