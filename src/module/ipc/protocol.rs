//! Adapter RPC protocol
//!
//! Each RPC is one exec of the adapter entrypoint with the command token as
//! its argument. The request is a single JSON document followed by a newline
//! on stdin; the response is a JSON document on stdout.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Program run inside an adapter container for every RPC
pub const ADAPTER_ENTRYPOINT: &str = "hd-module";

/// Request field carrying the bearer token
pub const KEY_FIELD: &str = "key";

/// Adapter commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterCommand {
    Version,
    GetConfigMetadata,
    GetConfigInstance,
    SetSettings,
    ProcessSettings,
    UpgradeInstance,
    GetLogFile,
    GetContainers,
    Start,
    Stop,
    Run,
}

impl AdapterCommand {
    /// Command token passed to the entrypoint
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterCommand::Version => "version",
            AdapterCommand::GetConfigMetadata => "get-config-metadata",
            AdapterCommand::GetConfigInstance => "get-config-instance",
            AdapterCommand::SetSettings => "set-settings",
            AdapterCommand::ProcessSettings => "process-settings",
            AdapterCommand::UpgradeInstance => "upgrade-instance",
            AdapterCommand::GetLogFile => "get-log-file",
            AdapterCommand::GetContainers => "get-containers",
            AdapterCommand::Start => "start",
            AdapterCommand::Stop => "stop",
            AdapterCommand::Run => "run",
        }
    }

    /// Parse a command token
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "version" => AdapterCommand::Version,
            "get-config-metadata" => AdapterCommand::GetConfigMetadata,
            "get-config-instance" => AdapterCommand::GetConfigInstance,
            "set-settings" => AdapterCommand::SetSettings,
            "process-settings" => AdapterCommand::ProcessSettings,
            "upgrade-instance" => AdapterCommand::UpgradeInstance,
            "get-log-file" => AdapterCommand::GetLogFile,
            "get-containers" => AdapterCommand::GetContainers,
            "start" => AdapterCommand::Start,
            "stop" => AdapterCommand::Stop,
            "run" => AdapterCommand::Run,
            _ => return None,
        })
    }

    /// `version` and `get-config-metadata` may be called without a key
    pub fn requires_auth(&self) -> bool {
        !matches!(
            self,
            AdapterCommand::Version | AdapterCommand::GetConfigMetadata
        )
    }

    /// Whether the command sends a request body at all
    pub fn has_body(&self) -> bool {
        self.requires_auth()
    }

    /// Full exec argv for this command
    pub fn command_line(&self) -> Vec<String> {
        vec![ADAPTER_ENTRYPOINT.to_string(), self.as_str().to_string()]
    }
}

impl fmt::Display for AdapterCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `set-settings` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSettingsRequest {
    pub settings: Value,
}

/// `process-settings` body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSettingsRequest {
    pub current_settings: Value,
    pub new_settings: Value,
}

/// `upgrade-instance` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeInstanceRequest {
    pub instance: Value,
}

/// `get-log-file` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLogFileRequest {
    pub source: String,
}

/// `start` body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub settings: Value,
    pub compose_project_name: String,
}

/// `stop` body; no services means every service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    pub compose_project_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<String>>,
}

/// `run` body; the rest of stdin is forwarded raw
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub command: String,
}

/// `version` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

/// `process-settings` response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSettingsResponse {
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub ports: BTreeMap<String, u16>,
    #[serde(default)]
    pub services_to_restart: Vec<String>,
}

/// `get-log-file` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetLogFileResponse {
    pub path: String,
}

/// `get-containers` response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetContainersResponse {
    #[serde(default)]
    pub containers: Vec<String>,
}

/// Add the `key` field in front of a request body
///
/// Bodies that do not serialize to an object are wrapped as `{"key": ...}`
/// only; callers always pass structs.
pub fn envelope<T: Serialize>(token: &str, body: Option<&T>) -> Result<Value, serde_json::Error> {
    let mut object = Map::new();
    object.insert(KEY_FIELD.to_string(), Value::String(token.to_string()));
    if let Some(body) = body {
        if let Value::Object(fields) = serde_json::to_value(body)? {
            for (name, value) in fields {
                object.insert(name, value);
            }
        }
    }
    Ok(Value::Object(object))
}

/// Encode a request for stdin: compact JSON and a newline
pub fn encode_request(request: &Value) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(request)?;
    bytes.push(b'\n');
    Ok(bytes)
}
