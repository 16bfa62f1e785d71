//! Hyperdrive lifecycle coordinator
//!
//! Ties discovery, settings storage, template rendering, compose and the
//! adapter RPC together into the user-facing flows: load, start, stop,
//! down, purge and upgrade.

use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{HyperdriveConfig, GLOBAL_ADAPTER_PROJECT};
use crate::management::deploy::{DeploymentRenderer, ModuleDeployment};
use crate::management::report::{BrokenModule, FlowReport, FlowStep, HealthyModule, LoadedModules};
use crate::management::restart::plan_restart;
use crate::module::ipc::{
    AdapterClient, AdapterClientCache, AdapterKey, DockerTransport, ProcessSettingsResponse,
    RpcTransport,
};
use crate::module::process::{ComposeOrchestrator, ProcessRunner};
use crate::module::registry::{
    apply_container_states, InstalledModule, ModuleDependencies, ModuleDescriptor,
    ModuleDiscovery, ModuleInstaller,
};
use crate::module::traits::{
    CommandRunner, ContainerTransport, InteractiveIo, ModuleError, ModuleStatus, ParameterError,
};
use crate::settings::{
    apply_upgrade_defaults, validate_instance, ConfigInstance, ConfigMetadata, HyperdriveSettings,
    ModuleDefaults, ModuleInstance, PropertyContext, SettingsFactory, SettingsSnapshot,
};
use crate::storage::SettingsStore;

/// Module whose global adapter is running, before its metadata is fetched
struct Candidate {
    descriptor: ModuleDescriptor,
    directory: PathBuf,
    global_adapter_file: PathBuf,
    container: String,
}

fn broken(module: InstalledModule, error: Option<ModuleError>) -> BrokenModule {
    let label = module.label();
    let error = error
        .or(module.error)
        .unwrap_or_else(|| ModuleError::GlobalAdapterMissing(label.clone()));
    BrokenModule {
        label,
        directory: module.directory,
        descriptor: module.descriptor,
        error,
    }
}

fn prefixed(fqmn: &str, errors: Vec<ParameterError>) -> impl Iterator<Item = ParameterError> + '_ {
    errors.into_iter().map(move |e| ParameterError {
        path: format!("{}:{}", fqmn, e.path),
        message: e.message,
    })
}

/// Stop a flow on cancellation; anything else is handed back
fn bail_on_cancel<T>(result: Result<T, ModuleError>) -> Result<Result<T, ModuleError>, ModuleError> {
    match result {
        Err(ModuleError::Cancelled) => Err(ModuleError::Cancelled),
        other => Ok(other),
    }
}

/// Lifecycle coordinator for one user's Hyperdrive installation
pub struct HyperdriveManager {
    config: HyperdriveConfig,
    store: SettingsStore,
    factory: SettingsFactory,
    discovery: ModuleDiscovery,
    installer: ModuleInstaller,
    compose: ComposeOrchestrator,
    transport: Arc<dyn ContainerTransport>,
    clients: AdapterClientCache,
    renderer: DeploymentRenderer,
    loaded: Option<LoadedModules>,
}

impl HyperdriveManager {
    /// Create a coordinator over explicit container and command back ends
    pub fn new(
        config: HyperdriveConfig,
        transport: Arc<dyn ContainerTransport>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, ModuleError> {
        config
            .validate()
            .map_err(|e| ModuleError::InvalidConfig(e.to_string()))?;

        let rpc = RpcTransport::new(Arc::clone(&transport), config.adapter_timeout());
        Ok(Self {
            store: SettingsStore::new(&config.user_dir),
            factory: SettingsFactory::new(&config),
            discovery: ModuleDiscovery::new(config.modules_dir(), config.global_adapter_root()),
            installer: ModuleInstaller::new(config.modules_dir(), config.global_adapter_root()),
            compose: ComposeOrchestrator::new(
                config.compose_command.clone(),
                runner,
                config.compose_timeout(),
            ),
            clients: AdapterClientCache::new(rpc),
            renderer: DeploymentRenderer::new(&config),
            transport,
            loaded: None,
            config,
        })
    }

    /// Create a coordinator talking to the local Docker daemon and compose CLI
    pub fn connect(config: HyperdriveConfig) -> Result<Self, ModuleError> {
        let docker = DockerTransport::connect(config.docker_socket.as_deref())?;
        Self::new(config, Arc::new(docker), Arc::new(ProcessRunner::new()))
    }

    pub fn config(&self) -> &HyperdriveConfig {
        &self.config
    }

    pub fn settings_store(&self) -> &SettingsStore {
        &self.store
    }

    pub fn renderer(&self) -> &DeploymentRenderer {
        &self.renderer
    }

    /// Result of the last `load_modules`
    pub fn loaded(&self) -> Result<&LoadedModules, ModuleError> {
        self.loaded.as_ref().ok_or(ModuleError::ModulesNotLoaded)
    }

    fn healthy_module(&self, fqmn: &str) -> Result<&HealthyModule, ModuleError> {
        self.loaded()?
            .healthy(fqmn)
            .ok_or_else(|| ModuleError::ModuleNotInstalled(fqmn.to_string()))
    }

    async fn scan(&self) -> Result<Vec<InstalledModule>, ModuleError> {
        let mut modules = self.discovery.discover()?;
        let containers = self.transport.list_containers().await?;
        apply_container_states(&mut modules, &containers);
        Ok(modules)
    }

    async fn fetch_metadata(
        &self,
        candidate: &Candidate,
        cancel: &CancellationToken,
    ) -> Result<ConfigMetadata, ModuleError> {
        let client = self
            .clients
            .get(
                GLOBAL_ADAPTER_PROJECT,
                &candidate.descriptor.fqmn(),
                &candidate.container,
                None,
            )
            .await?;
        client.get_config_metadata(cancel).await
    }

    /// Discover installed modules, start their global adapters and fetch
    /// each module's configuration metadata
    ///
    /// Nothing here is fatal for a single module: every discovered module
    /// ends up either healthy or broken with a reason.
    pub async fn load_modules(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<&LoadedModules, ModuleError> {
        info!("Loading modules");
        let mut modules = self.scan().await?;

        if modules
            .iter()
            .any(|m| m.status() == ModuleStatus::EligibleToStart)
        {
            let files: Vec<PathBuf> = modules
                .iter()
                .filter(|m| m.status() != ModuleStatus::Broken)
                .map(|m| m.global_adapter_file.clone())
                .collect();
            info!("Starting {} global adapters", files.len());
            if let Err(e) = bail_on_cancel(
                self.compose
                    .start_project(GLOBAL_ADAPTER_PROJECT, &files, cancel)
                    .await,
            )? {
                warn!("Failed to start global adapters: {}", e);
            }
            modules = self.scan().await?;
        }

        let mut loaded = LoadedModules::default();
        let mut candidates = Vec::new();
        for mut module in modules {
            match module.status() {
                ModuleStatus::Healthy => match (
                    module.descriptor.take(),
                    module.adapter_container.take(),
                ) {
                    (Some(descriptor), Some(container)) => candidates.push(Candidate {
                        descriptor,
                        directory: module.directory,
                        global_adapter_file: module.global_adapter_file,
                        container,
                    }),
                    (descriptor, _) => {
                        module.descriptor = descriptor;
                        loaded.broken.push(broken(module, None));
                    }
                },
                ModuleStatus::EligibleToStart => {
                    let label = module.label();
                    warn!("Global adapter for {} did not start", label);
                    loaded
                        .broken
                        .push(broken(module, Some(ModuleError::GlobalAdapterMissing(label))));
                }
                ModuleStatus::Broken => loaded.broken.push(broken(module, None)),
            }
        }

        let fetches = candidates.iter().map(|c| self.fetch_metadata(c, cancel));
        let results = join_all(fetches).await;

        let mut healthy = Vec::with_capacity(candidates.len());
        for (candidate, result) in candidates.into_iter().zip(results) {
            let fqmn = candidate.descriptor.fqmn();
            match bail_on_cancel(result)? {
                Ok(metadata) => healthy.push(HealthyModule {
                    descriptor: candidate.descriptor,
                    directory: candidate.directory,
                    global_adapter_file: candidate.global_adapter_file,
                    global_adapter_container: candidate.container,
                    metadata,
                }),
                Err(e) => {
                    warn!("Failed to load configuration of {}: {}", fqmn, e);
                    loaded.broken.push(BrokenModule {
                        label: fqmn.clone(),
                        directory: candidate.directory,
                        descriptor: Some(candidate.descriptor),
                        error: ModuleError::ConfigurationLoadError {
                            module: fqmn,
                            reason: e.to_string(),
                        },
                    });
                }
            }
        }

        let resolution = {
            let descriptors: Vec<&ModuleDescriptor> = healthy.iter().map(|m| &m.descriptor).collect();
            ModuleDependencies::resolve(&descriptors)
        };
        let unsatisfied: HashMap<String, String> = resolution.unsatisfied.into_iter().collect();
        let order: HashMap<&str, usize> = resolution
            .load_order
            .iter()
            .enumerate()
            .map(|(i, fqmn)| (fqmn.as_str(), i))
            .collect();

        let mut ordered = Vec::with_capacity(healthy.len());
        for module in healthy {
            let fqmn = module.fqmn();
            match (unsatisfied.get(&fqmn), order.get(fqmn.as_str())) {
                (None, Some(position)) => ordered.push((*position, module)),
                (reason, _) => {
                    let reason = reason.cloned().unwrap_or_else(|| "not in load order".to_string());
                    warn!("Module {} has unmet dependencies: {}", fqmn, reason);
                    loaded.broken.push(BrokenModule {
                        label: fqmn.clone(),
                        directory: module.directory,
                        descriptor: Some(module.descriptor),
                        error: ModuleError::DependencyMissing(format!("{}: {}", fqmn, reason)),
                    });
                }
            }
        }
        ordered.sort_by_key(|(position, _)| *position);
        loaded.healthy = ordered.into_iter().map(|(_, module)| module).collect();

        info!(
            "Loaded {} healthy and {} broken modules",
            loaded.healthy.len(),
            loaded.broken.len()
        );
        Ok(&*self.loaded.insert(loaded))
    }

    fn with_module_defaults<T>(
        &self,
        f: impl FnOnce(&[ModuleDefaults<'_>]) -> T,
    ) -> Result<T, ModuleError> {
        let loaded = self.loaded()?;
        let fqmns: Vec<String> = loaded.healthy.iter().map(HealthyModule::fqmn).collect();
        let defaults: Vec<ModuleDefaults<'_>> = loaded
            .healthy
            .iter()
            .zip(&fqmns)
            .map(|(module, fqmn)| ModuleDefaults {
                fqmn,
                version: &module.descriptor.version,
                metadata: &module.metadata,
            })
            .collect();
        Ok(f(&defaults))
    }

    /// Load the current settings, or fresh defaults when none exist yet
    ///
    /// Modules installed since the settings were written get a disabled
    /// default instance.
    pub fn load_settings(&self) -> Result<(HyperdriveSettings, bool), ModuleError> {
        self.with_module_defaults(|defaults| {
            let (mut settings, is_new) = self.store.load_current(|| self.factory.create(defaults))?;
            if !is_new {
                let added = self.factory.backfill(&mut settings, defaults);
                if !added.is_empty() {
                    debug!("Added default settings for {:?}", added);
                }
            }
            Ok::<_, ModuleError>((settings, is_new))
        })?
    }

    /// Load the pending settings, if a pending file exists
    pub fn load_pending_settings(&self) -> Result<Option<HyperdriveSettings>, ModuleError> {
        if !self.store.has_pending() {
            return Ok(None);
        }
        self.with_module_defaults(|defaults| {
            let (mut settings, _) = self.store.load_pending(|| self.factory.create(defaults))?;
            self.factory.backfill(&mut settings, defaults);
            Ok::<_, ModuleError>(Some(settings))
        })?
    }

    pub fn save_pending_settings(&self, settings: &HyperdriveSettings) -> Result<(), ModuleError> {
        self.store.save_pending(settings)
    }

    /// Throw away pending changes
    pub fn discard_pending_settings(&self) -> Result<(), ModuleError> {
        self.store.delete_pending()
    }

    /// Validate base parameters and every enabled module's settings
    ///
    /// Module errors carry paths of the form `<fqmn>:<path>`.
    pub fn validate_settings(&self, settings: &HyperdriveSettings) -> Result<(), ModuleError> {
        let loaded = self.loaded()?;
        let snapshot = SettingsSnapshot::from_settings(settings)?;
        let mut errors = settings.validate_base();

        for (fqmn, instance) in settings.enabled_modules() {
            let Some(module) = loaded.healthy(fqmn) else {
                errors.push(ParameterError {
                    path: fqmn.clone(),
                    message: "module is not available".to_string(),
                });
                continue;
            };
            match ConfigInstance::from_map(&module.metadata, &instance.settings) {
                Ok(config) => {
                    let ctx = PropertyContext {
                        snapshot: &snapshot,
                        fqmn,
                    };
                    errors.extend(prefixed(fqmn, validate_instance(&module.metadata, &config, &ctx)));
                }
                Err(ModuleError::ValidationFailed { errors: found }) => {
                    errors.extend(prefixed(fqmn, found))
                }
                Err(e) => return Err(e),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ModuleError::ValidationFailed { errors })
        }
    }

    fn module_key(&self, descriptor: &ModuleDescriptor, project_name: &str) -> Result<AdapterKey, ModuleError> {
        let paths = self.renderer.module_paths(descriptor, project_name);
        AdapterKey::load(&paths.key_file)
    }

    async fn project_client(
        &self,
        project_name: &str,
        module: &HealthyModule,
    ) -> Result<Arc<AdapterClient>, ModuleError> {
        let key = self.module_key(&module.descriptor, project_name)?;
        self.clients
            .get(
                project_name,
                &module.fqmn(),
                &module.descriptor.project_adapter_container(project_name),
                Some(key),
            )
            .await
    }

    fn enabled_healthy<'a>(
        &'a self,
        settings: &HyperdriveSettings,
    ) -> Result<Vec<&'a HealthyModule>, ModuleError> {
        let loaded = self.loaded()?;
        Ok(loaded
            .healthy
            .iter()
            .filter(|m| {
                settings
                    .modules
                    .get(&m.fqmn())
                    .map(|instance| instance.enabled)
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Render and start the project adapters of `modules`
    async fn ensure_project_adapters(
        &self,
        project_name: &str,
        modules: &[&HealthyModule],
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>, ModuleError> {
        let mut files = Vec::with_capacity(modules.len());
        for module in modules {
            let paths = self.renderer.prepare_module(&module.descriptor, project_name)?;
            files.push(self.renderer.render_project_adapter(
                &module.directory,
                &module.descriptor,
                &paths,
                project_name,
            )?);
        }
        self.compose.start_project(project_name, &files, cancel).await?;
        Ok(files)
    }

    /// Tear down every module project and the Hyperdrive project of
    /// `project_name`
    async fn down_projects(
        &self,
        project_name: &str,
        include_volumes: bool,
        cancel: &CancellationToken,
    ) -> Result<FlowReport, ModuleError> {
        let mut report = FlowReport::default();
        for descriptor in self.loaded()?.descriptors() {
            let project = descriptor.module_project(project_name);
            if let Err(e) = bail_on_cancel(
                self.compose
                    .down_project(&project, include_volumes, cancel)
                    .await,
            )? {
                report.record(&descriptor.fqmn(), FlowStep::Down, e);
            }
        }
        self.compose
            .down_project(project_name, include_volumes, cancel)
            .await?;
        self.clients.invalidate_project(project_name).await;
        Ok(report)
    }

    /// Stop the services of each module that a settings change requires
    async fn stop_for_restart(
        &self,
        current: &HyperdriveSettings,
        pending: &HyperdriveSettings,
        report: &mut FlowReport,
        cancel: &CancellationToken,
    ) -> Result<(), ModuleError> {
        let running = self.enabled_healthy(current)?;
        self.ensure_project_adapters(&current.project_name, &running, cancel)
            .await?;

        let current_value = serde_json::to_value(current)?;
        let pending_value = serde_json::to_value(pending)?;
        let mut rejected = Vec::new();

        for module in running {
            let fqmn = module.fqmn();
            let (Some(old), Some(new)) = (current.modules.get(&fqmn), pending.modules.get(&fqmn)) else {
                continue;
            };

            let adapter_services = match bail_on_cancel(
                self.process_settings(current, module, &current_value, &pending_value, cancel)
                    .await,
            )? {
                Ok(response) => {
                    rejected.extend(response.errors.into_iter().map(|message| ParameterError {
                        path: fqmn.clone(),
                        message,
                    }));
                    response.services_to_restart
                }
                Err(e) => {
                    report.record(&fqmn, FlowStep::Restart, e);
                    Vec::new()
                }
            };
            if !rejected.is_empty() {
                continue;
            }

            let plan = plan_restart(&module.metadata, old, new, &adapter_services)?;
            if plan.is_empty() {
                continue;
            }
            info!("Stopping {:?} of {} for restart", plan.services, fqmn);
            let project = module.descriptor.module_project(&current.project_name);
            if let Err(e) = bail_on_cancel(
                self.compose
                    .stop_project(&project, &plan.services(), cancel)
                    .await,
            )? {
                report.record(&fqmn, FlowStep::Restart, e);
            }
        }

        if rejected.is_empty() {
            Ok(())
        } else {
            Err(ModuleError::ValidationFailed { errors: rejected })
        }
    }

    async fn process_settings(
        &self,
        current: &HyperdriveSettings,
        module: &HealthyModule,
        current_value: &Value,
        pending_value: &Value,
        cancel: &CancellationToken,
    ) -> Result<ProcessSettingsResponse, ModuleError> {
        let client = self.project_client(&current.project_name, module).await?;
        client
            .process_settings(current_value.clone(), pending_value.clone(), cancel)
            .await
    }

    /// Bring the installation up with `pending` (or `current` when there is
    /// nothing pending)
    ///
    /// Mandatory steps abort the flow with an error: project rename teardown,
    /// starting the project adapters, typed settings and the pending commit.
    /// Everything else is recorded per module in the returned report.
    pub async fn start_service(
        &self,
        current: Option<&HyperdriveSettings>,
        pending: Option<HyperdriveSettings>,
        cancel: &CancellationToken,
    ) -> Result<FlowReport, ModuleError> {
        let mut effective = match (&pending, current) {
            (Some(pending), _) => pending.clone(),
            (None, Some(current)) => current.clone(),
            (None, None) => {
                return Err(ModuleError::InvalidConfig(
                    "start requires current or pending settings".to_string(),
                ))
            }
        };
        let base_errors = effective.validate_base();
        if !base_errors.is_empty() {
            return Err(ModuleError::ValidationFailed {
                errors: base_errors,
            });
        }
        let project_name = effective.project_name.clone();
        info!("Starting Hyperdrive project {}", project_name);

        let mut report = FlowReport::default();
        if let (Some(current), Some(pending)) = (current, pending.as_ref()) {
            if current.project_name != pending.project_name {
                info!(
                    "Project renamed from {} to {}, removing old containers",
                    current.project_name, pending.project_name
                );
                let teardown = self.down_projects(&current.project_name, false, cancel).await?;
                report.failures.extend(teardown.failures);
            } else {
                self.stop_for_restart(current, pending, &mut report, cancel)
                    .await?;
            }
        }

        let modules = self.enabled_healthy(&effective)?;
        for (fqmn, _) in effective.enabled_modules() {
            if !modules.iter().any(|m| &m.fqmn() == fqmn) {
                warn!("Module {} is enabled but not available, skipping", fqmn);
            }
        }
        for module in &modules {
            let fqmn = module.fqmn();
            if let Some(instance) = effective.modules.get(&fqmn) {
                if instance.version != module.descriptor.version {
                    return Err(ModuleError::InvalidConfig(format!(
                        "settings of {} were written by version {}, installed is {}; upgrade them first",
                        fqmn, instance.version, module.descriptor.version
                    )));
                }
                ConfigInstance::from_map(&module.metadata, &instance.settings)?;
            }
        }

        let snapshot = SettingsSnapshot::from_settings(&effective)?;
        self.renderer.prepare_runtime()?;
        let mut project_files = self.renderer.render_base(&snapshot, &project_name)?;

        let mut deployed: Vec<(&HealthyModule, ModuleDeployment)> = Vec::with_capacity(modules.len());
        for module in modules {
            match self.renderer.deploy_module(
                &module.directory,
                &module.descriptor,
                &snapshot,
                &project_name,
            ) {
                Ok(deployment) => {
                    project_files.push(deployment.adapter_file.clone());
                    deployed.push((module, deployment));
                }
                Err(e) => report.record(&module.fqmn(), FlowStep::Deploy, e),
            }
        }

        self.compose
            .start_project(&project_name, &project_files, cancel)
            .await?;

        let mut started = Vec::with_capacity(deployed.len());
        for (module, deployment) in deployed {
            let project = module.descriptor.module_project(&project_name);
            match bail_on_cancel(
                self.compose
                    .start_project(&project, &deployment.service_files, cancel)
                    .await,
            )? {
                Ok(()) => started.push(module),
                Err(e) => report.record(&module.fqmn(), FlowStep::Start, e),
            }
        }

        if pending.is_some() {
            effective.clear_restart_lists();
            self.store.save_pending(&effective)?;
            let outcome = self.store.commit_pending(true)?;
            if !outcome.atomic {
                warn!("Settings commit was not atomic");
            }
            report.commit = Some(outcome);
        }

        let settings_value = serde_json::to_value(&effective)?;
        let configure = started.iter().map(|module| {
            let settings_value = settings_value.clone();
            let project_name = project_name.as_str();
            async move {
                let client = self
                    .project_client(project_name, module)
                    .await
                    .map_err(|e| (FlowStep::SetSettings, e))?;
                client
                    .set_settings(settings_value.clone(), cancel)
                    .await
                    .map_err(|e| (FlowStep::SetSettings, e))?;
                client
                    .start(
                        settings_value,
                        &module.descriptor.module_project(project_name),
                        cancel,
                    )
                    .await
                    .map_err(|e| (FlowStep::Start, e))
            }
        });
        let results = join_all(configure).await;
        for (module, result) in started.iter().zip(results) {
            if let Err((step, e)) = result {
                if matches!(e, ModuleError::Cancelled) {
                    return Err(e);
                }
                warn!("Module {} failed at {}: {}", module.fqmn(), step, e);
                report.record(&module.fqmn(), step, e);
            }
        }

        info!(
            "Hyperdrive project {} started ({} module failures)",
            project_name,
            report.failures.len()
        );
        Ok(report)
    }

    /// Stop every module project, the Hyperdrive project and the global
    /// adapters
    pub async fn stop_service(
        &self,
        settings: &HyperdriveSettings,
        cancel: &CancellationToken,
    ) -> Result<FlowReport, ModuleError> {
        info!("Stopping Hyperdrive project {}", settings.project_name);
        let mut report = FlowReport::default();
        for descriptor in self.loaded()?.descriptors() {
            let project = descriptor.module_project(&settings.project_name);
            if let Err(e) = bail_on_cancel(self.compose.stop_project(&project, &[], cancel).await)? {
                report.record(&descriptor.fqmn(), FlowStep::Stop, e);
            }
        }
        self.compose
            .stop_project(&settings.project_name, &[], cancel)
            .await?;
        self.compose
            .stop_project(GLOBAL_ADAPTER_PROJECT, &[], cancel)
            .await?;
        Ok(report)
    }

    /// Remove the containers of every module project and the Hyperdrive
    /// project, and their volumes when asked to
    pub async fn down_service(
        &self,
        settings: &HyperdriveSettings,
        include_volumes: bool,
        cancel: &CancellationToken,
    ) -> Result<FlowReport, ModuleError> {
        info!(
            "Removing Hyperdrive project {} (volumes: {})",
            settings.project_name, include_volumes
        );
        self.down_projects(&settings.project_name, include_volumes, cancel)
            .await
    }

    /// Delete the user data directory
    pub fn purge_data(&self, settings: &HyperdriveSettings) -> Result<(), ModuleError> {
        purge_dir(&settings.user_data_path)
    }

    /// Bring instances written by older module versions up to date
    ///
    /// The project adapter migrates the instance, then any parameter marked
    /// `overwriteOnUpgrade` is reset to its default.
    pub async fn upgrade_settings(
        &self,
        settings: &mut HyperdriveSettings,
        cancel: &CancellationToken,
    ) -> Result<FlowReport, ModuleError> {
        let loaded = self.loaded()?;
        let stale: Vec<&HealthyModule> = settings
            .modules
            .iter()
            .filter_map(|(fqmn, instance)| {
                loaded
                    .healthy(fqmn)
                    .filter(|m| m.descriptor.version != instance.version)
            })
            .collect();

        let mut report = FlowReport::default();
        if stale.is_empty() {
            return Ok(report);
        }
        self.ensure_project_adapters(&settings.project_name, &stale, cancel)
            .await?;

        for module in stale {
            let fqmn = module.fqmn();
            let Some(instance) = settings.modules.get(&fqmn).cloned() else {
                continue;
            };
            match bail_on_cancel(
                self.upgrade_instance(&settings.project_name, module, &instance, cancel)
                    .await,
            )? {
                Ok(upgraded) => {
                    info!(
                        "Upgraded settings of {} from {} to {}",
                        fqmn, instance.version, upgraded.version
                    );
                    settings.modules.insert(fqmn, upgraded);
                }
                Err(e) => report.record(&fqmn, FlowStep::Upgrade, e),
            }
        }
        Ok(report)
    }

    async fn upgrade_instance(
        &self,
        project_name: &str,
        module: &HealthyModule,
        instance: &ModuleInstance,
        cancel: &CancellationToken,
    ) -> Result<ModuleInstance, ModuleError> {
        let client = self.project_client(project_name, module).await?;
        let response = client
            .upgrade_instance(serde_json::to_value(instance)?, cancel)
            .await?;
        let mut upgraded: ModuleInstance =
            serde_json::from_value(response).map_err(|e| ModuleError::BadResponse {
                command: "upgrade-instance".to_string(),
                reason: e.to_string(),
            })?;

        let mut config = ConfigInstance::from_map(&module.metadata, &upgraded.settings)?;
        let reset = apply_upgrade_defaults(&module.metadata, &mut config);
        if !reset.is_empty() {
            debug!("Reset {:?} of {} to defaults", reset, module.fqmn());
        }
        upgraded.settings = config.to_map();
        upgraded.version = module.descriptor.version.clone();
        upgraded.enabled = instance.enabled;
        Ok(upgraded)
    }

    /// Containers owned by a module, as reported by its project adapter
    pub async fn module_containers(
        &self,
        settings: &HyperdriveSettings,
        fqmn: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ModuleError> {
        let module = self.healthy_module(fqmn)?;
        self.project_client(&settings.project_name, module)
            .await?
            .get_containers(cancel)
            .await
    }

    /// Host path of one of a module's log files
    pub async fn module_log_file(
        &self,
        settings: &HyperdriveSettings,
        fqmn: &str,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ModuleError> {
        let module = self.healthy_module(fqmn)?;
        self.project_client(&settings.project_name, module)
            .await?
            .get_log_file(source, cancel)
            .await
    }

    /// Run an interactive module command; returns its exit code
    pub async fn run_module_command(
        &self,
        settings: &HyperdriveSettings,
        fqmn: &str,
        command: &str,
        io: InteractiveIo,
        cancel: &CancellationToken,
    ) -> Result<i64, ModuleError> {
        let module = self.healthy_module(fqmn)?;
        self.project_client(&settings.project_name, module)
            .await?
            .run(command, io, cancel)
            .await
    }

    /// Install a module package; modules must be reloaded afterwards
    pub fn install_module(&mut self, package: &Path) -> Result<ModuleDescriptor, ModuleError> {
        let descriptor = self.installer.install(package)?;
        info!("Installed module {} {}", descriptor.fqmn(), descriptor.version);
        self.loaded = None;
        Ok(descriptor)
    }

    /// Remove an installed module; modules must be reloaded afterwards
    pub fn uninstall_module(&mut self, name: &str) -> Result<(), ModuleError> {
        self.installer.uninstall(name)?;
        info!("Uninstalled module {}", name);
        self.loaded = None;
        Ok(())
    }
}

fn purge_dir(path: &Path) -> Result<(), ModuleError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            info!("Deleted user data at {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ModuleError::io(path, "Failed to delete user data", e)),
    }
}
