//! Shared test fixtures
//!
//! `MockEngine` stands in for both the container engine (`ContainerTransport`)
//! and the compose CLI (`CommandRunner`). Compose files are parsed for real,
//! containers keep their id across `up` unless their definition changed, and
//! adapters answer RPCs from a per-FQMN script.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use hyperdrive::module::ipc::{AdapterAuthenticator, AdapterKey};
use hyperdrive::module::traits::{
    CommandOutput, CommandRunner, ContainerInfo, ContainerState, ContainerTransport, ExecOutput,
    InteractiveIo, ModuleError,
};
use hyperdrive::settings::ConfigMetadata;
use hyperdrive::{HyperdriveConfig, HyperdriveManager};

/// Compose label naming the module an adapter container serves
pub const MODULE_LABEL: &str = "hd.module";
/// Compose label pointing at a project adapter's key file on the host
pub const KEY_FILE_LABEL: &str = "hd.key-file";

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub project: String,
    pub service: String,
    pub running: bool,
    /// Service definition as rendered; a change recreates the container
    pub definition: String,
    pub labels: BTreeMap<String, String>,
}

/// Scripted behaviour of one module's adapters
#[derive(Debug, Clone, Default)]
pub struct MockAdapter {
    pub metadata: ConfigMetadata,
    pub services_to_restart: Vec<String>,
    pub fail_metadata: bool,
    /// Settings merged into the instance by `upgrade-instance`
    pub upgrade_patch: Map<String, Value>,
    pub containers: Vec<String>,
}

impl MockAdapter {
    pub fn new(metadata: ConfigMetadata) -> Self {
        Self {
            metadata,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct RpcCall {
    pub container: String,
    pub command: String,
    pub body: Value,
}

#[derive(Default)]
struct EngineState {
    next_id: u64,
    containers: BTreeMap<String, MockContainer>,
    project_files: BTreeMap<String, Vec<PathBuf>>,
    adapters: HashMap<String, MockAdapter>,
    authenticators: HashMap<String, Arc<AdapterAuthenticator>>,
    rpc_calls: Vec<RpcCall>,
    compose_calls: Vec<Vec<String>>,
    applied_settings: HashMap<String, Value>,
    failing_projects: HashSet<String>,
}

/// In-memory container engine and compose CLI
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<EngineState>>,
}

fn failure(stderr: &str) -> ExecOutput {
    ExecOutput {
        stdout: Vec::new(),
        stderr: stderr.to_string(),
        exit_code: 1,
    }
}

fn success(body: Option<Value>) -> ExecOutput {
    ExecOutput {
        stdout: body
            .map(|b| serde_json::to_vec(&b).unwrap())
            .unwrap_or_default(),
        stderr: String::new(),
        exit_code: 0,
    }
}

fn info(name: &str, container: &MockContainer) -> ContainerInfo {
    ContainerInfo {
        id: container.id.clone(),
        name: name.to_string(),
        state: if container.running {
            ContainerState::Running
        } else {
            ContainerState::Stopped
        },
    }
}

/// Split compose arguments into project, files and the remaining words
fn parse_compose_args(args: &[String]) -> (Option<String>, Vec<PathBuf>, Vec<String>) {
    let mut project = None;
    let mut files = Vec::new();
    let mut rest = Vec::new();
    let mut iter = args.iter().skip_while(|a| a.as_str() == "compose");
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-p" => project = iter.next().cloned(),
            "-f" => files.extend(iter.next().map(PathBuf::from)),
            _ => rest.push(arg.clone()),
        }
    }
    (project, files, rest)
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap()
    }

    pub fn register_adapter(&self, fqmn: &str, adapter: MockAdapter) {
        self.lock().adapters.insert(fqmn.to_string(), adapter);
    }

    pub fn update_adapter(&self, fqmn: &str, f: impl FnOnce(&mut MockAdapter)) {
        f(self.lock().adapters.entry(fqmn.to_string()).or_default());
    }

    pub fn container(&self, name: &str) -> Option<MockContainer> {
        self.lock().containers.get(name).cloned()
    }

    /// Container name → id for every container of a project
    pub fn container_ids(&self, project: &str) -> BTreeMap<String, String> {
        self.lock()
            .containers
            .iter()
            .filter(|(_, c)| c.project == project)
            .map(|(name, c)| (name.clone(), c.id.clone()))
            .collect()
    }

    pub fn project_services(&self, project: &str) -> Vec<String> {
        let mut services: Vec<String> = self
            .lock()
            .containers
            .values()
            .filter(|c| c.project == project)
            .map(|c| c.service.clone())
            .collect();
        services.sort();
        services
    }

    pub fn running_services(&self, project: &str) -> Vec<String> {
        let mut services: Vec<String> = self
            .lock()
            .containers
            .values()
            .filter(|c| c.project == project && c.running)
            .map(|c| c.service.clone())
            .collect();
        services.sort();
        services
    }

    pub fn projects(&self) -> Vec<String> {
        self.lock().project_files.keys().cloned().collect()
    }

    pub fn rpc_calls(&self) -> Vec<RpcCall> {
        self.lock().rpc_calls.clone()
    }

    pub fn rpc_calls_for(&self, command: &str) -> Vec<RpcCall> {
        self.rpc_calls()
            .into_iter()
            .filter(|c| c.command == command)
            .collect()
    }

    pub fn compose_calls(&self) -> Vec<Vec<String>> {
        self.lock().compose_calls.clone()
    }

    /// `(project, services)` of every compose stop, in call order
    pub fn stop_calls(&self) -> Vec<(String, Vec<String>)> {
        self.compose_calls()
            .iter()
            .filter_map(|args| {
                let (project, _, rest) = parse_compose_args(args);
                match rest.split_first() {
                    Some((op, services)) if op == "stop" => {
                        Some((project.unwrap_or_default(), services.to_vec()))
                    }
                    _ => None,
                }
            })
            .collect()
    }

    /// Projects taken down, in call order
    pub fn down_calls(&self) -> Vec<String> {
        self.compose_calls()
            .iter()
            .filter_map(|args| {
                let (project, _, rest) = parse_compose_args(args);
                (rest.first().map(String::as_str) == Some("down")).then(|| project.unwrap_or_default())
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        let mut state = self.lock();
        state.compose_calls.clear();
        state.rpc_calls.clear();
    }

    pub fn applied_settings(&self, container: &str) -> Option<Value> {
        self.lock().applied_settings.get(container).cloned()
    }

    pub fn fail_project_up(&self, project: &str) {
        self.lock().failing_projects.insert(project.to_string());
    }

    pub fn stop_container(&self, name: &str) {
        if let Some(c) = self.lock().containers.get_mut(name) {
            c.running = false;
        }
    }

    fn compose_up(state: &mut EngineState, project: &str, files: &[PathBuf]) -> i32 {
        if state.failing_projects.contains(project) {
            return 1;
        }
        let mut seen = HashSet::new();
        for file in files {
            let Ok(text) = std::fs::read_to_string(file) else {
                return 14;
            };
            let Ok(doc) = serde_yaml::from_str::<serde_yaml::Value>(&text) else {
                return 15;
            };
            let Some(services) = doc.get("services").and_then(|s| s.as_mapping()) else {
                continue;
            };
            for (service, definition) in services {
                let service = service.as_str().unwrap_or_default().to_string();
                let name = definition
                    .get("container_name")
                    .and_then(|n| n.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}-{}-1", project, service));
                let rendered = serde_yaml::to_string(definition).unwrap_or_default();
                let labels: BTreeMap<String, String> = definition
                    .get("labels")
                    .and_then(|l| l.as_mapping())
                    .map(|m| {
                        m.iter()
                            .filter_map(|(k, v)| Some((k.as_str()?.to_string(), v.as_str()?.to_string())))
                            .collect()
                    })
                    .unwrap_or_default();

                let reuse = matches!(
                    state.containers.get(&name),
                    Some(c) if c.project == project && c.definition == rendered
                );
                if reuse {
                    if let Some(c) = state.containers.get_mut(&name) {
                        c.running = true;
                    }
                } else {
                    state.next_id += 1;
                    let id = format!("c{:04}", state.next_id);
                    state.authenticators.remove(&name);
                    state.containers.insert(
                        name.clone(),
                        MockContainer {
                            id,
                            project: project.to_string(),
                            service,
                            running: true,
                            definition: rendered,
                            labels,
                        },
                    );
                }
                seen.insert(name);
            }
        }
        state
            .containers
            .retain(|name, c| c.project != project || seen.contains(name));
        state
            .project_files
            .insert(project.to_string(), files.to_vec());
        0
    }

    fn compose_stop(state: &mut EngineState, project: &str, services: &[String]) -> i32 {
        for c in state.containers.values_mut() {
            if c.project == project && (services.is_empty() || services.contains(&c.service)) {
                c.running = false;
            }
        }
        0
    }

    fn compose_down(state: &mut EngineState, project: &str) -> i32 {
        let removed: Vec<String> = state
            .containers
            .iter()
            .filter(|(_, c)| c.project == project)
            .map(|(name, _)| name.clone())
            .collect();
        for name in removed {
            state.containers.remove(&name);
            state.authenticators.remove(&name);
        }
        state.project_files.remove(project);
        0
    }

    fn compose_ls(state: &EngineState) -> String {
        let rows: Vec<Value> = state
            .project_files
            .iter()
            .map(|(name, files)| {
                let running = state
                    .containers
                    .values()
                    .filter(|c| &c.project == name && c.running)
                    .count();
                json!({
                    "Name": name,
                    "Status": format!("running({})", running),
                    "ConfigFiles": files
                        .iter()
                        .map(|f| f.display().to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                })
            })
            .collect();
        Value::Array(rows).to_string()
    }

    /// Check the bearer of a key-bearing adapter; `Some` is the rejection
    fn authorize(
        state: &mut EngineState,
        container: &str,
        labels: &BTreeMap<String, String>,
        request: &Value,
    ) -> Option<String> {
        let key_file = labels.get(KEY_FILE_LABEL)?;
        let authenticator = state
            .authenticators
            .entry(container.to_string())
            .or_insert_with(|| {
                let key = AdapterKey::load(Path::new(key_file)).expect("adapter key");
                Arc::new(AdapterAuthenticator::new(key))
            });
        authenticator
            .verify(request.get("key").and_then(Value::as_str))
            .err()
            .map(|e| format!("unauthorized: {}", e))
    }

    fn handle_rpc(&self, container: &str, command: &str, request: Value) -> Result<ExecOutput, ModuleError> {
        let mut state = self.lock();
        let target = state
            .containers
            .get(container)
            .filter(|c| c.running)
            .cloned()
            .ok_or_else(|| ModuleError::ContainerGone(container.to_string()))?;
        let Some(fqmn) = target.labels.get(MODULE_LABEL).cloned() else {
            return Ok(failure("exec: hd-module: not found"));
        };
        if !matches!(command, "version" | "get-config-metadata") {
            if let Some(rejection) = Self::authorize(&mut state, container, &target.labels, &request) {
                return Ok(failure(&rejection));
            }
        }
        state.rpc_calls.push(RpcCall {
            container: container.to_string(),
            command: command.to_string(),
            body: request.clone(),
        });

        let adapter = state.adapters.get(&fqmn).cloned().unwrap_or_default();
        Ok(match command {
            "version" => success(Some(json!({"version": "0.0.1-mock"}))),
            "get-config-metadata" if adapter.fail_metadata => failure("metadata unavailable"),
            "get-config-metadata" => success(Some(serde_json::to_value(&adapter.metadata).unwrap())),
            "get-config-instance" => success(Some(json!({}))),
            "set-settings" => {
                state
                    .applied_settings
                    .insert(container.to_string(), request["settings"].clone());
                success(None)
            }
            "process-settings" => success(Some(json!({
                "errors": [],
                "ports": {},
                "servicesToRestart": adapter.services_to_restart,
            }))),
            "upgrade-instance" => {
                let mut instance = request["instance"].clone();
                if let Some(settings) = instance.get_mut("settings").and_then(Value::as_object_mut) {
                    for (k, v) in adapter.upgrade_patch {
                        settings.insert(k, v);
                    }
                }
                success(Some(instance))
            }
            "get-log-file" => success(Some(json!({
                "path": format!("/var/log/{}/{}.log", fqmn, request["source"].as_str().unwrap_or_default()),
            }))),
            "get-containers" => success(Some(json!({"containers": adapter.containers}))),
            "start" | "stop" => success(None),
            other => failure(&format!("unknown command {}", other)),
        })
    }
}

#[async_trait]
impl ContainerTransport for MockEngine {
    async fn exec(
        &self,
        container: &str,
        command: &[String],
        stdin: Option<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, ModuleError> {
        if cancel.is_cancelled() {
            return Err(ModuleError::Cancelled);
        }
        let request = stdin
            .map(|bytes| serde_json::from_slice(&bytes).unwrap_or(Value::Null))
            .unwrap_or(Value::Null);
        let token = command.get(1).cloned().unwrap_or_default();
        self.handle_rpc(container, &token, request)
    }

    async fn exec_interactive(
        &self,
        container: &str,
        _command: &[String],
        preamble: Vec<u8>,
        mut io: InteractiveIo,
        cancel: &CancellationToken,
    ) -> Result<i64, ModuleError> {
        let request: Value = serde_json::from_slice(&preamble).unwrap_or(Value::Null);
        let rejection = {
            let mut state = self.lock();
            let target = state
                .containers
                .get(container)
                .filter(|c| c.running)
                .cloned()
                .ok_or_else(|| ModuleError::ContainerGone(container.to_string()))?;
            Self::authorize(&mut state, container, &target.labels, &request)
        };
        if let Some(rejection) = rejection {
            let _ = io.stderr.write_all(rejection.as_bytes()).await;
            return Ok(1);
        }

        match request["command"].as_str().unwrap_or_default() {
            "sleep" => {
                cancel.cancelled().await;
                Err(ModuleError::Cancelled)
            }
            command => {
                let line = format!("ran {}\n", command);
                io.stdout
                    .write_all(line.as_bytes())
                    .await
                    .map_err(|e| ModuleError::io(container, "write", e))?;
                io.stdout
                    .flush()
                    .await
                    .map_err(|e| ModuleError::io(container, "flush", e))?;
                Ok(0)
            }
        }
    }

    async fn inspect(&self, container: &str) -> Result<Option<ContainerInfo>, ModuleError> {
        Ok(self.lock().containers.get(container).map(|c| info(container, c)))
    }

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, ModuleError> {
        Ok(self
            .lock()
            .containers
            .iter()
            .map(|(name, c)| info(name, c))
            .collect())
    }
}

#[async_trait]
impl CommandRunner for MockEngine {
    async fn run(
        &self,
        _program: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<i32, ModuleError> {
        if cancel.is_cancelled() {
            return Err(ModuleError::Cancelled);
        }
        let mut state = self.lock();
        state.compose_calls.push(args.to_vec());
        let (project, files, rest) = parse_compose_args(args);
        let project = project.unwrap_or_default();
        Ok(match rest.split_first() {
            Some((op, _)) if op == "up" => Self::compose_up(&mut state, &project, &files),
            Some((op, services)) if op == "stop" => Self::compose_stop(&mut state, &project, services),
            Some((op, _)) if op == "down" => Self::compose_down(&mut state, &project),
            _ => 2,
        })
    }

    async fn capture(
        &self,
        _program: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ModuleError> {
        if cancel.is_cancelled() {
            return Err(ModuleError::Cancelled);
        }
        let state = self.lock();
        let (_, _, rest) = parse_compose_args(args);
        if rest.first().map(String::as_str) == Some("ls") {
            Ok(CommandOutput {
                exit_code: 0,
                stdout: Self::compose_ls(&state),
            })
        } else {
            Ok(CommandOutput {
                exit_code: 2,
                stdout: String::new(),
            })
        }
    }
}

/// A module package built in memory
#[derive(Debug, Clone)]
pub struct TestPackage {
    pub name: String,
    pub shortcut: String,
    pub version: String,
    pub author: String,
    pub dependencies: Vec<String>,
    /// `(service, command template)` pairs, one template file each
    pub services: Vec<(String, String)>,
}

impl TestPackage {
    pub fn new(name: &str, shortcut: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            shortcut: shortcut.to_string(),
            version: version.to_string(),
            author: "acme".to_string(),
            dependencies: Vec::new(),
            services: Vec::new(),
        }
    }

    pub fn with_service(mut self, service: &str, command: &str) -> Self {
        self.services.push((service.to_string(), command.to_string()));
        self
    }

    pub fn with_dependency(mut self, dependency: &str) -> Self {
        self.dependencies.push(dependency.to_string());
        self
    }

    pub fn fqmn(&self) -> String {
        format!("{}/{}", self.author, self.name)
    }

    pub fn descriptor_json(&self) -> String {
        json!({
            "name": self.name,
            "shortcut": self.shortcut,
            "description": format!("{} test module", self.name),
            "version": self.version,
            "author": self.author,
            "url": "https://example.invalid",
            "email": "dev@example.invalid",
            "dependencies": self.dependencies,
        })
        .to_string()
    }

    pub fn adapter_template(&self) -> String {
        format!(
            "services:\n  {{{{.AdapterContainerName}}}}:\n    image: {author}/{name}-adapter\n    container_name: {{{{.AdapterContainerName}}}}\n    labels:\n      {module_label}: \"{fqmn}\"\n{{{{- if eq .AdapterMode \"project\"}}}}\n      {key_label}: \"{{{{.AdapterKeyFile}}}}\"\n{{{{- end}}}}\n    environment:\n{{{{- range .AdapterEnvironmentVariables}}}}\n      - {{{{.}}}}\n{{{{- end}}}}\n",
            author = self.author,
            name = self.name,
            module_label = MODULE_LABEL,
            fqmn = self.fqmn(),
            key_label = KEY_FILE_LABEL,
        )
    }

    pub fn service_template(service: &str, command: &str) -> String {
        format!(
            "services:\n  {service}:\n    image: acme/{service}\n    container_name: {{{{.ModuleComposeProject}}}}_{service}\n    networks: [\"{{{{.ModuleNetwork}}}}\"]\n    command: \"{command}\"\n",
            service = service,
            command = command,
        )
    }

    /// Zip archive bytes of the package
    pub fn zip_bytes(&self) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("descriptor.json", options).unwrap();
        writer.write_all(self.descriptor_json().as_bytes()).unwrap();
        writer.start_file("adapter.tmpl", options).unwrap();
        writer.write_all(self.adapter_template().as_bytes()).unwrap();
        if !self.services.is_empty() {
            writer.add_directory("templates/", options).unwrap();
        }
        for (service, command) in &self.services {
            writer
                .start_file(format!("templates/{}.tmpl", service), options)
                .unwrap();
            writer
                .write_all(Self::service_template(service, command).as_bytes())
                .unwrap();
        }
        writer.start_file("assets/README.md", options).unwrap();
        writer.write_all(b"test module\n").unwrap();
        writer.finish().unwrap().into_inner()
    }
}

/// Isolated system and user directories plus a mock engine
pub struct TestEnv {
    pub temp: TempDir,
    pub config: HyperdriveConfig,
    pub engine: MockEngine,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let config = HyperdriveConfig::with_dirs(temp.path().join("system"), temp.path().join("user"));
        Self {
            temp,
            config,
            engine: MockEngine::new(),
        }
    }

    pub fn system_dir(&self) -> &Path {
        &self.config.system_dir
    }

    pub fn user_dir(&self) -> &Path {
        &self.config.user_dir
    }

    pub fn manager(&self) -> HyperdriveManager {
        HyperdriveManager::new(
            self.config.clone(),
            Arc::new(self.engine.clone()),
            Arc::new(self.engine.clone()),
        )
        .unwrap()
    }

    /// Write a package to disk and return its path
    pub fn write_package(&self, package: &TestPackage) -> PathBuf {
        let dir = self.temp.path().join("packages");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}-{}.zip", package.name, package.version));
        std::fs::write(&path, package.zip_bytes()).unwrap();
        path
    }

    /// Install `package` through the manager and script its adapter
    pub fn install(&self, manager: &mut HyperdriveManager, package: &TestPackage, adapter: MockAdapter) {
        let path = self.write_package(package);
        manager.install_module(&path).unwrap();
        self.engine.register_adapter(&package.fqmn(), adapter);
    }
}

/// Settings object of a JSON literal
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}
