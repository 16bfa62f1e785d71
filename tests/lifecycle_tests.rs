//! Lifecycle coordinator tests
//!
//! Install → load → configure → start/stop/down/upgrade against the mock
//! engine from `common`.

mod common;

use common::{object, MockAdapter, TestEnv, TestPackage};
use serde_json::json;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use hyperdrive::management::FlowStep;
use hyperdrive::module::traits::InteractiveIo;
use hyperdrive::settings::{DynamicProperty, ModuleInstance, Parameter, ParameterKind, Section};
use hyperdrive::{ConfigMetadata, HyperdriveManager, HyperdriveSettings, ModuleError, GLOBAL_ADAPTER_PROJECT};

const EXAMPLE: &str = "acme/example-module";
const SERVER: &str = "acme/server-module";

fn example_metadata() -> ConfigMetadata {
    ConfigMetadata::default().with_parameter(Parameter::new(
        "exampleFloat",
        ParameterKind::Float {
            default: DynamicProperty::literal(50.0),
            min: None,
            max: None,
        },
    ))
}

fn example_package() -> TestPackage {
    TestPackage::new("example-module", "em", "0.2.0")
        .with_service("example", "--value={{.GetValue \"exampleFloat\"}}")
}

fn server_metadata() -> ConfigMetadata {
    ConfigMetadata::default()
        .with_parameter(Parameter::new(
            "label",
            ParameterKind::String {
                default: DynamicProperty::literal("primary".to_string()),
                max_length: None,
                regex: None,
            },
        ))
        .with_section(
            Section::new("server").with_parameter(
                Parameter::new(
                    "port",
                    ParameterKind::Uint {
                        default: DynamicProperty::literal(9000),
                        min: Some(1024),
                        max: Some(65535),
                    },
                )
                .with_affected_containers(&["server"]),
            ),
        )
}

fn server_package() -> TestPackage {
    TestPackage::new("server-module", "sm", "1.0.0")
        .with_service("server", "--port={{.GetValue \"server/port\"}}")
        .with_service("client", "--upstream={{.ProjectName}}")
}

async fn loaded_manager(env: &TestEnv, modules: &[(TestPackage, MockAdapter)]) -> HyperdriveManager {
    let mut manager = env.manager();
    for (package, adapter) in modules {
        env.install(&mut manager, package, adapter.clone());
    }
    manager.load_modules(&CancellationToken::new()).await.unwrap();
    manager
}

/// Enable the given modules in fresh settings, start, and return what got
/// committed
async fn start_fresh(manager: &HyperdriveManager, enable: &[&str]) -> HyperdriveSettings {
    let (mut settings, _) = manager.load_settings().unwrap();
    for fqmn in enable {
        settings.modules.get_mut(*fqmn).unwrap().enabled = true;
    }
    manager.save_pending_settings(&settings).unwrap();
    let pending = manager.load_pending_settings().unwrap().unwrap();
    let report = manager
        .start_service(None, Some(pending), &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_clean(), "{:?}", report.warnings());
    manager.load_settings().unwrap().0
}

fn silent_io() -> InteractiveIo {
    InteractiveIo {
        stdin: Box::new(tokio::io::empty()),
        stdout: Box::new(tokio::io::sink()),
        stderr: Box::new(tokio::io::sink()),
    }
}

#[tokio::test]
async fn test_fresh_install_configure_start() {
    let env = TestEnv::new();
    let mut manager = env.manager();
    env.install(&mut manager, &example_package(), MockAdapter::new(example_metadata()));

    let cancel = CancellationToken::new();
    let loaded = manager.load_modules(&cancel).await.unwrap();
    assert_eq!(loaded.healthy.len(), 1);
    assert!(loaded.broken.is_empty());
    assert_eq!(
        env.engine.running_services(GLOBAL_ADAPTER_PROJECT),
        vec!["hd-global-adapter-example-module"]
    );

    let (mut settings, is_new) = manager.load_settings().unwrap();
    assert!(is_new);
    let instance = settings.modules.get_mut(EXAMPLE).unwrap();
    assert!(!instance.enabled);
    assert_eq!(instance.version, "0.2.0");
    assert_eq!(instance.settings["exampleFloat"].as_f64(), Some(50.0));
    instance.enabled = true;
    instance.settings.insert("exampleFloat".to_string(), json!(80.0));
    manager.save_pending_settings(&settings).unwrap();

    let pending = manager.load_pending_settings().unwrap().unwrap();
    let report = manager.start_service(None, Some(pending), &cancel).await.unwrap();
    assert!(report.is_clean(), "{:?}", report.warnings());
    let commit = report.commit.unwrap();
    assert!(commit.committed);
    assert!(commit.backup.is_none());

    let store = manager.settings_store();
    assert!(!store.has_pending());
    let (current, is_new) = store.load_current(|| unreachable!()).unwrap();
    assert!(!is_new);
    assert_eq!(
        current.modules[EXAMPLE].settings["exampleFloat"].as_f64(),
        Some(80.0)
    );

    assert_eq!(env.engine.project_services("hyperdrive-em"), vec!["example"]);
    assert_eq!(
        env.engine.running_services("hyperdrive"),
        vec!["hyperdrive-em_adapter"]
    );
    let example = env.engine.container("hyperdrive-em_example").unwrap();
    assert!(example.definition.contains("--value=80"));

    let adapter_calls: Vec<String> = env
        .engine
        .rpc_calls()
        .into_iter()
        .filter(|c| c.container == "hyperdrive-em_adapter")
        .map(|c| c.command)
        .collect();
    assert_eq!(adapter_calls, vec!["set-settings", "start"]);
    let start = &env.engine.rpc_calls_for("start")[0];
    assert_eq!(start.body["composeProjectName"], "hyperdrive-em");
    assert_eq!(start.body["settings"]["projectName"], "hyperdrive");
    let applied = env.engine.applied_settings("hyperdrive-em_adapter").unwrap();
    assert_eq!(applied["modules"][EXAMPLE]["settings"]["exampleFloat"], json!(80.0));
}

#[tokio::test]
async fn test_module_directories_and_key() {
    let env = TestEnv::new();
    let manager = loaded_manager(&env, &[(example_package(), MockAdapter::new(example_metadata()))]).await;
    start_fresh(&manager, &[EXAMPLE]).await;

    let module_dir = env.user_dir().join("modules/example-module");
    for sub in ["config", "logs", "compose", "override", "metrics", "secrets"] {
        assert!(module_dir.join(sub).is_dir(), "missing {}", sub);
    }
    let key = module_dir.join("secrets/adapter.key");
    assert!(key.is_file());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&key).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
    let adapter = std::fs::read_to_string(env.user_dir().join("runtime/example-module_adapter.yml")).unwrap();
    assert!(adapter.contains("HD_ADAPTER_MODE=project"));
    assert!(adapter.contains("HD_COMPOSE_PROJECT=hyperdrive-em"));
}

#[tokio::test]
async fn test_project_rename_takes_old_project_down() {
    let env = TestEnv::new();
    let manager = loaded_manager(&env, &[(example_package(), MockAdapter::new(example_metadata()))]).await;

    let (mut settings, _) = manager.load_settings().unwrap();
    settings.project_name = "hd1".to_string();
    settings.modules.get_mut(EXAMPLE).unwrap().enabled = true;
    manager.save_pending_settings(&settings).unwrap();
    manager
        .start_service(None, Some(settings), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(env.engine.project_services("hd1-em"), vec!["example"]);

    let (current, _) = manager.load_settings().unwrap();
    let mut pending = current.clone();
    pending.project_name = "hd2".to_string();
    manager.save_pending_settings(&pending).unwrap();
    env.engine.clear_calls();

    let report = manager
        .start_service(Some(&current), Some(pending), &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_clean(), "{:?}", report.warnings());

    let downs = env.engine.down_calls();
    assert!(downs.contains(&"hd1".to_string()));
    assert!(downs.contains(&"hd1-em".to_string()));
    let calls = env.engine.compose_calls();
    let down_old = calls
        .iter()
        .position(|args| args.contains(&"down".to_string()) && args.contains(&"hd1".to_string()))
        .unwrap();
    let first_new = calls
        .iter()
        .position(|args| args.contains(&"hd2".to_string()))
        .unwrap();
    assert!(down_old < first_new);
    assert!(!calls
        .iter()
        .any(|args| args.contains(&"--volumes".to_string())));

    assert!(env.engine.project_services("hd1").is_empty());
    assert!(env.engine.project_services("hd1-em").is_empty());
    assert_eq!(env.engine.project_services("hd2-em"), vec!["example"]);
    assert_eq!(env.engine.running_services("hd2"), vec!["hd2-em_adapter"]);

    let store = manager.settings_store();
    let backups = store.list_backups().unwrap();
    assert_eq!(backups.len(), 1);
    let old: HyperdriveSettings =
        serde_yaml::from_str(&std::fs::read_to_string(&backups[0]).unwrap()).unwrap();
    assert_eq!(old.project_name, "hd1");
    assert_eq!(manager.load_settings().unwrap().0.project_name, "hd2");
}

#[tokio::test]
async fn test_targeted_restart_stops_only_affected_service() {
    let env = TestEnv::new();
    let mut server_adapter = MockAdapter::new(server_metadata());
    server_adapter.services_to_restart = vec!["server".to_string()];
    let manager = loaded_manager(
        &env,
        &[
            (example_package(), MockAdapter::new(example_metadata())),
            (server_package(), server_adapter),
        ],
    )
    .await;
    let current = start_fresh(&manager, &[EXAMPLE, SERVER]).await;

    let example_before = env.engine.container_ids("hyperdrive-em");
    let server_before = env.engine.container_ids("hyperdrive-sm");
    assert_eq!(server_before.len(), 2);

    let mut pending = current.clone();
    let port = pending.modules.get_mut(SERVER).unwrap();
    port.settings
        .get_mut("server")
        .and_then(|s| s.as_object_mut())
        .unwrap()
        .insert("port".to_string(), json!(9100));
    manager.save_pending_settings(&pending).unwrap();
    env.engine.clear_calls();

    let report = manager
        .start_service(Some(&current), Some(pending), &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_clean(), "{:?}", report.warnings());

    assert_eq!(
        env.engine.stop_calls(),
        vec![("hyperdrive-sm".to_string(), vec!["server".to_string()])]
    );
    let processed: Vec<String> = env
        .engine
        .rpc_calls_for("process-settings")
        .into_iter()
        .map(|c| c.container)
        .collect();
    assert!(processed.contains(&"hyperdrive-sm_adapter".to_string()));

    assert_eq!(env.engine.container_ids("hyperdrive-em"), example_before);
    let server_after = env.engine.container_ids("hyperdrive-sm");
    assert_eq!(server_after["hyperdrive-sm_client"], server_before["hyperdrive-sm_client"]);
    assert_ne!(server_after["hyperdrive-sm_server"], server_before["hyperdrive-sm_server"]);
    assert_eq!(env.engine.running_services("hyperdrive-sm"), vec!["client", "server"]);
    let server = env.engine.container("hyperdrive-sm_server").unwrap();
    assert!(server.definition.contains("--port=9100"));
}

#[tokio::test]
async fn test_broken_module_is_quarantined() {
    let env = TestEnv::new();
    let mut manager = env.manager();
    env.install(&mut manager, &example_package(), MockAdapter::new(example_metadata()));
    let other = TestPackage::new("other-module", "om", "1.0.0").with_service("other", "--run");
    env.install(&mut manager, &other, MockAdapter::default());
    std::fs::write(
        env.system_dir().join("modules/other-module/descriptor.json"),
        "{ not json",
    )
    .unwrap();

    let loaded = manager.load_modules(&CancellationToken::new()).await.unwrap();
    assert_eq!(loaded.healthy.len(), 1);
    assert_eq!(loaded.healthy[0].fqmn(), EXAMPLE);
    assert_eq!(loaded.broken.len(), 1);
    assert_eq!(loaded.broken[0].label, "other-module");
    assert!(matches!(
        loaded.broken[0].error,
        ModuleError::DescriptorMalformed { .. }
    ));

    let (mut settings, _) = manager.load_settings().unwrap();
    assert!(!settings.modules.contains_key("acme/other-module"));
    let stale_instance = ModuleInstance {
        enabled: true,
        version: "1.0.0".to_string(),
        settings: object(json!({"mode": "custom"})),
        restart: Vec::new(),
    };
    settings
        .modules
        .insert("acme/other-module".to_string(), stale_instance.clone());
    settings.modules.get_mut(EXAMPLE).unwrap().enabled = true;
    manager.save_pending_settings(&settings).unwrap();

    let report = manager
        .start_service(None, Some(settings), &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_clean(), "{:?}", report.warnings());
    assert_eq!(env.engine.project_services("hyperdrive-em"), vec!["example"]);
    assert!(env.engine.project_services("hyperdrive-om").is_empty());

    let (current, _) = manager.settings_store().load_current(|| unreachable!()).unwrap();
    assert_eq!(current.modules["acme/other-module"], stale_instance);
}

#[tokio::test]
async fn test_version_upgrade_applies_adapter_then_defaults() {
    let env = TestEnv::new();
    let metadata = ConfigMetadata::default()
        .with_parameter(
            Parameter::new(
                "mode",
                ParameterKind::String {
                    default: DynamicProperty::literal("fast".to_string()),
                    max_length: None,
                    regex: None,
                },
            )
            .overwriting_on_upgrade(),
        )
        .with_parameter(Parameter::new(
            "threshold",
            ParameterKind::Uint {
                default: DynamicProperty::literal(10),
                min: None,
                max: None,
            },
        ));
    let mut adapter = MockAdapter::new(metadata);
    adapter.upgrade_patch = object(json!({"mode": "migrated"}));
    let manager = loaded_manager(&env, &[(example_package(), adapter)]).await;

    let (mut settings, _) = manager.load_settings().unwrap();
    {
        let instance = settings.modules.get_mut(EXAMPLE).unwrap();
        instance.enabled = true;
        instance.version = "0.1.0".to_string();
        instance.settings = object(json!({"mode": "slow", "threshold": 42}));
    }

    let err = manager
        .start_service(Some(&settings), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ModuleError::InvalidConfig(_)), "{}", err);

    let report = manager
        .upgrade_settings(&mut settings, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_clean(), "{:?}", report.warnings());

    let upgrade = &env.engine.rpc_calls_for("upgrade-instance")[0];
    assert_eq!(upgrade.container, "hyperdrive-em_adapter");
    assert_eq!(upgrade.body["instance"]["version"], "0.1.0");

    let instance = &settings.modules[EXAMPLE];
    assert_eq!(instance.version, "0.2.0");
    assert!(instance.enabled);
    assert_eq!(instance.settings["mode"], "fast");
    assert_eq!(instance.settings["threshold"], 42);

    let again = manager
        .upgrade_settings(&mut settings, &CancellationToken::new())
        .await
        .unwrap();
    assert!(again.is_clean());
    assert_eq!(env.engine.rpc_calls_for("upgrade-instance").len(), 1);
}

#[tokio::test]
async fn test_run_cancellation_leaves_module_healthy() {
    let env = TestEnv::new();
    let mut manager = loaded_manager(&env, &[(example_package(), MockAdapter::new(example_metadata()))]).await;
    let current = start_fresh(&manager, &[EXAMPLE]).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let err = manager
        .run_module_command(&current, EXAMPLE, "sleep", silent_io(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ModuleError::Cancelled));

    let (stdout, mut output) = tokio::io::duplex(1024);
    let io = InteractiveIo {
        stdin: Box::new(tokio::io::empty()),
        stdout: Box::new(stdout),
        stderr: Box::new(tokio::io::sink()),
    };
    let exit_code = manager
        .run_module_command(&current, EXAMPLE, "status", io, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(exit_code, 0);
    let mut buf = vec![0u8; 64];
    let n = output.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"ran status\n");

    let loaded = manager.load_modules(&CancellationToken::new()).await.unwrap();
    assert_eq!(loaded.healthy.len(), 1);
    assert!(loaded.broken.is_empty());
    assert!(env.engine.container("hyperdrive-em_adapter").unwrap().running);
}

#[tokio::test]
async fn test_module_start_failure_does_not_roll_back_commit() {
    let env = TestEnv::new();
    let manager = loaded_manager(&env, &[(example_package(), MockAdapter::new(example_metadata()))]).await;
    env.engine.fail_project_up("hyperdrive-em");

    let (mut settings, _) = manager.load_settings().unwrap();
    settings.modules.get_mut(EXAMPLE).unwrap().enabled = true;
    manager.save_pending_settings(&settings).unwrap();
    let report = manager
        .start_service(None, Some(settings), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failed_modules(), vec![EXAMPLE]);
    assert_eq!(report.failures[0].step, FlowStep::Start);
    assert!(matches!(
        report.failures[0].error,
        ModuleError::ComposeFailed { exit_code: 1, .. }
    ));
    assert!(report.commit.as_ref().unwrap().committed);
    assert!(!manager.settings_store().has_pending());
    assert!(env.engine.rpc_calls_for("set-settings").is_empty());
}

#[tokio::test]
async fn test_project_adapter_failure_is_fatal() {
    let env = TestEnv::new();
    let manager = loaded_manager(&env, &[(example_package(), MockAdapter::new(example_metadata()))]).await;
    env.engine.fail_project_up("hyperdrive");

    let (mut settings, _) = manager.load_settings().unwrap();
    settings.modules.get_mut(EXAMPLE).unwrap().enabled = true;
    manager.save_pending_settings(&settings).unwrap();
    let err = manager
        .start_service(None, Some(settings), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ModuleError::ComposeFailed { .. }));
    assert!(manager.settings_store().has_pending());
}

#[tokio::test]
async fn test_load_classifies_every_module_once() {
    let env = TestEnv::new();
    let mut manager = env.manager();
    env.install(&mut manager, &example_package(), MockAdapter::new(example_metadata()));
    env.install(&mut manager, &server_package(), MockAdapter::new(server_metadata()));
    let dependent = TestPackage::new("dependent-module", "dm", "1.0.0")
        .with_dependency("acme/absent-module >= 1.0.0");
    env.install(&mut manager, &dependent, MockAdapter::default());
    let flaky = TestPackage::new("flaky-module", "fm", "1.0.0");
    let mut flaky_adapter = MockAdapter::default();
    flaky_adapter.fail_metadata = true;
    env.install(&mut manager, &flaky, flaky_adapter);

    let loaded = manager.load_modules(&CancellationToken::new()).await.unwrap();
    let healthy: Vec<String> = loaded.healthy.iter().map(|m| m.fqmn()).collect();
    assert_eq!(healthy.len(), 2);
    assert!(healthy.contains(&EXAMPLE.to_string()));
    assert!(healthy.contains(&SERVER.to_string()));

    assert_eq!(loaded.broken.len(), 2);
    assert!(matches!(
        loaded.broken("acme/dependent-module").unwrap().error,
        ModuleError::DependencyMissing(_)
    ));
    assert!(matches!(
        loaded.broken("acme/flaky-module").unwrap().error,
        ModuleError::ConfigurationLoadError { .. }
    ));

    let mut labels: Vec<String> = healthy;
    labels.extend(loaded.broken.iter().map(|b| b.label.clone()));
    labels.sort();
    labels.dedup();
    assert_eq!(labels.len(), 4);
}

#[tokio::test]
async fn test_global_adapter_start_failure_marks_modules_broken() {
    let env = TestEnv::new();
    let mut manager = env.manager();
    env.install(&mut manager, &example_package(), MockAdapter::new(example_metadata()));
    env.engine.fail_project_up(GLOBAL_ADAPTER_PROJECT);

    let loaded = manager.load_modules(&CancellationToken::new()).await.unwrap();
    assert!(loaded.healthy.is_empty());
    assert!(matches!(
        loaded.broken(EXAMPLE).unwrap().error,
        ModuleError::GlobalAdapterMissing(_)
    ));
}

#[tokio::test]
async fn test_requires_loaded_modules() {
    let env = TestEnv::new();
    let manager = env.manager();
    assert!(matches!(manager.load_settings(), Err(ModuleError::ModulesNotLoaded)));
    assert!(matches!(manager.loaded(), Err(ModuleError::ModulesNotLoaded)));
}

#[tokio::test]
async fn test_stop_and_down_service() {
    let env = TestEnv::new();
    let manager = loaded_manager(&env, &[(example_package(), MockAdapter::new(example_metadata()))]).await;
    let current = start_fresh(&manager, &[EXAMPLE]).await;
    env.engine.clear_calls();

    let report = manager
        .stop_service(&current, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_clean());
    let stopped: Vec<String> = env.engine.stop_calls().into_iter().map(|(p, _)| p).collect();
    assert_eq!(stopped, vec!["hyperdrive-em", "hyperdrive", GLOBAL_ADAPTER_PROJECT]);
    assert!(env.engine.running_services("hyperdrive-em").is_empty());
    assert!(env.engine.running_services(GLOBAL_ADAPTER_PROJECT).is_empty());

    manager
        .down_service(&current, true, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(env.engine.down_calls(), vec!["hyperdrive-em", "hyperdrive"]);
    assert!(env
        .engine
        .compose_calls()
        .iter()
        .filter(|args| args.contains(&"down".to_string()))
        .all(|args| args.contains(&"--volumes".to_string())));
    assert!(env.engine.project_services("hyperdrive").is_empty());
    assert!(manager.settings_store().current_path().is_file());
}

#[tokio::test]
async fn test_purge_data() {
    let env = TestEnv::new();
    let manager = loaded_manager(&env, &[(example_package(), MockAdapter::new(example_metadata()))]).await;
    let (settings, _) = manager.load_settings().unwrap();
    std::fs::create_dir_all(settings.user_data_path.join("chain")).unwrap();
    std::fs::write(settings.user_data_path.join("chain/db"), b"data").unwrap();

    manager.purge_data(&settings).unwrap();
    assert!(!settings.user_data_path.exists());
    manager.purge_data(&settings).unwrap();
}

#[tokio::test]
async fn test_discard_pending_settings() {
    let env = TestEnv::new();
    let manager = loaded_manager(&env, &[(example_package(), MockAdapter::new(example_metadata()))]).await;
    let (settings, _) = manager.load_settings().unwrap();

    manager.save_pending_settings(&settings).unwrap();
    assert!(manager.load_pending_settings().unwrap().is_some());
    manager.discard_pending_settings().unwrap();
    assert!(manager.load_pending_settings().unwrap().is_none());
    manager.discard_pending_settings().unwrap();
}

#[tokio::test]
async fn test_module_introspection() {
    let env = TestEnv::new();
    let mut adapter = MockAdapter::new(example_metadata());
    adapter.containers = vec!["hyperdrive-em_example".to_string()];
    let manager = loaded_manager(&env, &[(example_package(), adapter)]).await;
    let current = start_fresh(&manager, &[EXAMPLE]).await;
    let cancel = CancellationToken::new();

    let containers = manager.module_containers(&current, EXAMPLE, &cancel).await.unwrap();
    assert_eq!(containers, vec!["hyperdrive-em_example"]);
    let log = manager
        .module_log_file(&current, EXAMPLE, "example", &cancel)
        .await
        .unwrap();
    assert!(log.ends_with("example.log"));

    let err = manager
        .module_containers(&current, "acme/missing", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ModuleError::ModuleNotInstalled(_)));
}

#[tokio::test]
async fn test_validate_settings_prefixes_module_paths() {
    let env = TestEnv::new();
    let manager = loaded_manager(&env, &[(server_package(), MockAdapter::new(server_metadata()))]).await;
    let (mut settings, _) = manager.load_settings().unwrap();
    manager.validate_settings(&settings).unwrap();

    let instance = settings.modules.get_mut(SERVER).unwrap();
    instance.enabled = true;
    instance.settings = object(json!({"label": "primary", "server": {"port": 80}}));
    let err = manager.validate_settings(&settings).unwrap_err();
    match err {
        ModuleError::ValidationFailed { errors } => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].path, "acme/server-module:server/port");
        }
        other => panic!("unexpected error {}", other),
    }
}

#[tokio::test]
async fn test_cancelled_start_returns_immediately() {
    let env = TestEnv::new();
    let manager = loaded_manager(&env, &[(example_package(), MockAdapter::new(example_metadata()))]).await;
    let (mut settings, _) = manager.load_settings().unwrap();
    settings.modules.get_mut(EXAMPLE).unwrap().enabled = true;
    manager.save_pending_settings(&settings).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = manager
        .start_service(None, Some(settings), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ModuleError::Cancelled));
    assert!(manager.settings_store().has_pending());
}

#[tokio::test]
async fn test_uninstall_requires_reload() {
    let env = TestEnv::new();
    let mut manager = loaded_manager(&env, &[(example_package(), MockAdapter::new(example_metadata()))]).await;
    manager.uninstall_module("example-module").unwrap();
    assert!(matches!(manager.loaded(), Err(ModuleError::ModulesNotLoaded)));
    assert!(!env.system_dir().join("modules/example-module").exists());

    let loaded = manager.load_modules(&CancellationToken::new()).await.unwrap();
    assert!(loaded.healthy.is_empty());
    assert!(matches!(
        manager.uninstall_module("example-module"),
        Err(ModuleError::ModuleNotInstalled(_))
    ));
}
