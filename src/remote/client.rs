use chrono::Utc;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::channel::{ChannelConnector, ChannelCredentials, ChannelError, RemoteChannel};
use super::classify::classify_output;
use super::ssh::OpenSshConnector;
use crate::artifact::ArtifactStager;
use crate::config::Config;
use crate::error::{ErrorDetails, ExecutionError};
use crate::runtime::{self, Runtime};

/// Everything needed to run one function once.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    code: Vec<u8>,
    runtime: String,
    handler: String,
    credentials: ChannelCredentials,
    event: Value,
}

impl ExecutionRequest {
    /// New request with an empty `{}` event.
    pub fn new(
        code: impl Into<Vec<u8>>,
        runtime: impl Into<String>,
        handler: impl Into<String>,
        credentials: ChannelCredentials,
    ) -> Self {
        Self {
            code: code.into(),
            runtime: runtime.into(),
            handler: handler.into(),
            credentials,
            event: Value::Object(Default::default()),
        }
    }

    pub fn with_event(mut self, event: Value) -> Self {
        self.event = event;
        self
    }

    /// Copy of this request sent to `host` instead.
    pub fn for_host(&self, host: &str) -> Self {
        Self {
            credentials: self.credentials.clone().with_host(host),
            ..self.clone()
        }
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub fn credentials(&self) -> &ChannelCredentials {
        &self.credentials
    }

    pub fn event(&self) -> &Value {
        &self.event
    }
}

/// Runs a function's code through the execution agent inside a VM.
pub struct ExecutionClient {
    connector: Arc<dyn ChannelConnector>,
    stager: ArtifactStager,
    code_mount_point: String,
}

impl ExecutionClient {
    pub fn new(
        connector: Arc<dyn ChannelConnector>,
        stager: ArtifactStager,
        code_mount_point: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            stager,
            code_mount_point: code_mount_point.into(),
        }
    }

    /// Client using the system OpenSSH client and the configured staging dir.
    pub fn from_config(config: &Config) -> Self {
        let stager = match &config.agent.staging_dir {
            Some(dir) => ArtifactStager::in_dir(dir),
            None => ArtifactStager::new(),
        };
        Self::new(
            Arc::new(OpenSshConnector::new(&config.ssh)),
            stager,
            config.agent.code_mount_point.clone(),
        )
    }

    /// Path the code is uploaded to inside the VM.
    pub fn remote_path(&self, handler: &str, runtime: Runtime) -> String {
        format!(
            "{}/{}",
            self.code_mount_point.trim_end_matches('/'),
            runtime::remote_filename(handler, runtime)
        )
    }

    pub async fn execute(&self, request: &ExecutionRequest) -> Result<Value, ExecutionError> {
        let runtime: Runtime = request.runtime().parse()?;
        runtime::validate_handler(request.handler())?;

        let execution_id = format!("exec_{}", &Uuid::new_v4().simple().to_string()[..8]);
        info!(
            "Executing {} ({}) as {}",
            request.handler(),
            runtime,
            execution_id
        );

        let filename = runtime::artifact_filename(request.handler(), runtime, Utc::now());
        let artifact = self.stager.stage(&filename, request.code()).map_err(|e| {
            ExecutionError::generic(format!("Failed to stage function code: {}", e)).with_cause(e)
        })?;

        let result = self.execute_staged(runtime, request, artifact.path()).await;

        if let Err(e) = artifact.cleanup() {
            warn!("Error cleaning up staged artifact for {}: {}", execution_id, e);
        }

        match &result {
            Ok(_) => info!("Execution {} finished", execution_id),
            Err(e) => warn!("Execution {} failed: {}", execution_id, e),
        }
        result
    }

    async fn execute_staged(
        &self,
        runtime: Runtime,
        request: &ExecutionRequest,
        local_path: &Path,
    ) -> Result<Value, ExecutionError> {
        let mut channel = self
            .connector
            .connect(request.credentials())
            .await
            .map_err(ChannelError::into_connect_error)?;

        let result = self
            .run_agent(channel.as_mut(), runtime, request, local_path)
            .await;

        if let Err(e) = channel.close().await {
            warn!("Error closing SSH channel: {}", e);
        }
        result
    }

    async fn run_agent(
        &self,
        channel: &mut dyn RemoteChannel,
        runtime: Runtime,
        request: &ExecutionRequest,
        local_path: &Path,
    ) -> Result<Value, ExecutionError> {
        let mkdir = format!("mkdir -p {}", runtime::shell_quote(&self.code_mount_point));
        let prepared = channel
            .exec(&mkdir, None)
            .await
            .map_err(ChannelError::into_execution_error)?;
        if !prepared.success() {
            return Err(ExecutionError::generic(format!(
                "Failed to create code mount point {}",
                self.code_mount_point
            ))
            .with_details(ErrorDetails::AgentOutput {
                stdout: prepared.stdout,
                stderr: prepared.stderr,
                exit_code: prepared.exit_code,
            }));
        }

        let remote_path = self.remote_path(request.handler(), runtime);
        channel
            .upload(local_path, &remote_path)
            .await
            .map_err(ChannelError::into_execution_error)?;

        let payload = serde_json::to_vec(request.event()).map_err(|e| {
            ExecutionError::generic(format!("Failed to serialize event payload: {}", e)).with_cause(e)
        })?;

        let output = channel
            .exec(&runtime.agent_command(request.handler()), Some(&payload))
            .await
            .map_err(ChannelError::into_execution_error)?;

        classify_output(output)
    }
}
