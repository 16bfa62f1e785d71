//! Adapter client
//!
//! Typed RPC surface over one adapter container. Calls are serialized: at
//! most one RPC is in flight per client.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::module::ipc::auth::{mint_token, AdapterKey};
use crate::module::ipc::protocol::{
    encode_request, envelope, AdapterCommand, GetContainersResponse, GetLogFileRequest,
    GetLogFileResponse, ProcessSettingsRequest, ProcessSettingsResponse, RunRequest,
    SetSettingsRequest, StartRequest, StopRequest, UpgradeInstanceRequest, VersionResponse,
};
use crate::module::ipc::transport::RpcTransport;
use crate::module::traits::{InteractiveIo, ModuleError};
use crate::settings::ConfigMetadata;

/// Client for one adapter container
pub struct AdapterClient {
    container: String,
    /// Container id observed when the client was created
    container_id: String,
    /// Absent for global adapters
    key: Option<AdapterKey>,
    transport: RpcTransport,
    in_flight: Mutex<()>,
}

impl AdapterClient {
    /// Create a client for a running container
    ///
    /// Fails with `ContainerGone` if the container does not exist.
    pub async fn connect(
        transport: RpcTransport,
        container: &str,
        key: Option<AdapterKey>,
    ) -> Result<Self, ModuleError> {
        let info = transport
            .inner()
            .inspect(container)
            .await?
            .ok_or_else(|| ModuleError::ContainerGone(container.to_string()))?;
        debug!("Adapter client for {} (container id {})", container, info.id);
        Ok(Self {
            container: container.to_string(),
            container_id: info.id,
            key,
            transport,
            in_flight: Mutex::new(()),
        })
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Whether the container was replaced or removed since creation
    pub async fn is_stale(&self) -> Result<bool, ModuleError> {
        Ok(match self.transport.inner().inspect(&self.container).await? {
            Some(info) => info.id != self.container_id,
            None => true,
        })
    }

    fn token(&self) -> Result<String, ModuleError> {
        match &self.key {
            Some(key) => mint_token(key),
            None => Ok(String::new()),
        }
    }

    fn request<T: Serialize>(
        &self,
        command: AdapterCommand,
        body: Option<&T>,
    ) -> Result<Option<Value>, ModuleError> {
        if !command.has_body() {
            return Ok(None);
        }
        Ok(Some(envelope(&self.token()?, body)?))
    }

    async fn call<T: Serialize, R: DeserializeOwned>(
        &self,
        command: AdapterCommand,
        body: Option<&T>,
        cancel: &CancellationToken,
    ) -> Result<R, ModuleError> {
        let _guard = self.in_flight.lock().await;
        let request = self.request(command, body)?;
        self.transport
            .call(&self.container, command, request.as_ref(), cancel)
            .await
    }

    async fn call_unit<T: Serialize>(
        &self,
        command: AdapterCommand,
        body: Option<&T>,
        cancel: &CancellationToken,
    ) -> Result<(), ModuleError> {
        let _guard = self.in_flight.lock().await;
        let request = self.request(command, body)?;
        self.transport
            .call_unit(&self.container, command, request.as_ref(), cancel)
            .await
    }

    /// Adapter version
    pub async fn version(&self, cancel: &CancellationToken) -> Result<String, ModuleError> {
        let response: VersionResponse = self
            .call(AdapterCommand::Version, None::<&()>, cancel)
            .await?;
        Ok(response.version)
    }

    /// Configuration metadata tree, checked for structural validity
    pub async fn get_config_metadata(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ConfigMetadata, ModuleError> {
        let raw: Value = self
            .call(AdapterCommand::GetConfigMetadata, None::<&()>, cancel)
            .await?;
        ConfigMetadata::from_json(raw)
    }

    /// Settings instance as the adapter sees it
    pub async fn get_config_instance(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Map<String, Value>, ModuleError> {
        self.call(AdapterCommand::GetConfigInstance, None::<&()>, cancel)
            .await
    }

    pub async fn set_settings(
        &self,
        settings: Value,
        cancel: &CancellationToken,
    ) -> Result<(), ModuleError> {
        let body = SetSettingsRequest { settings };
        self.call_unit(AdapterCommand::SetSettings, Some(&body), cancel)
            .await
    }

    /// Ask the adapter what a settings change means; does not mutate
    pub async fn process_settings(
        &self,
        current_settings: Value,
        new_settings: Value,
        cancel: &CancellationToken,
    ) -> Result<ProcessSettingsResponse, ModuleError> {
        let body = ProcessSettingsRequest {
            current_settings,
            new_settings,
        };
        self.call(AdapterCommand::ProcessSettings, Some(&body), cancel)
            .await
    }

    /// Let the adapter migrate an instance written by an older version
    pub async fn upgrade_instance(
        &self,
        instance: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ModuleError> {
        let body = UpgradeInstanceRequest { instance };
        self.call(AdapterCommand::UpgradeInstance, Some(&body), cancel)
            .await
    }

    pub async fn get_log_file(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ModuleError> {
        let body = GetLogFileRequest {
            source: source.to_string(),
        };
        let response: GetLogFileResponse = self
            .call(AdapterCommand::GetLogFile, Some(&body), cancel)
            .await?;
        Ok(response.path)
    }

    pub async fn get_containers(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ModuleError> {
        let response: GetContainersResponse = self
            .call(AdapterCommand::GetContainers, None::<&()>, cancel)
            .await?;
        Ok(response.containers)
    }

    pub async fn start(
        &self,
        settings: Value,
        compose_project_name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ModuleError> {
        let body = StartRequest {
            settings,
            compose_project_name: compose_project_name.to_string(),
        };
        self.call_unit(AdapterCommand::Start, Some(&body), cancel)
            .await
    }

    /// Stop the given services, or all of them when `services` is `None`
    pub async fn stop(
        &self,
        compose_project_name: &str,
        services: Option<Vec<String>>,
        cancel: &CancellationToken,
    ) -> Result<(), ModuleError> {
        let body = StopRequest {
            compose_project_name: compose_project_name.to_string(),
            services,
        };
        self.call_unit(AdapterCommand::Stop, Some(&body), cancel)
            .await
    }

    /// Run an interactive module command with the caller's streams attached
    ///
    /// No timeout applies; only cancellation ends the session early.
    pub async fn run(
        &self,
        command: &str,
        io: InteractiveIo,
        cancel: &CancellationToken,
    ) -> Result<i64, ModuleError> {
        let _guard = self.in_flight.lock().await;
        let body = RunRequest {
            command: command.to_string(),
        };
        let request = envelope(&self.token()?, Some(&body))?;
        let preamble = encode_request(&request)?;
        debug!("Interactive adapter run {:?} in {}", command, self.container);
        self.transport
            .inner()
            .exec_interactive(
                &self.container,
                &AdapterCommand::Run.command_line(),
                preamble,
                io,
                cancel,
            )
            .await
    }

    /// Per-call timeout for non-interactive RPCs
    pub fn timeout(&self) -> Duration {
        self.transport.timeout()
    }
}
