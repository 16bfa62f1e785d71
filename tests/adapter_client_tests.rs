//! Adapter client tests against the mock engine

mod common;

use common::{MockAdapter, MockEngine, KEY_FILE_LABEL, MODULE_LABEL};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use hyperdrive::module::ipc::{AdapterClient, AdapterClientCache, AdapterKey, RpcTransport};
use hyperdrive::module::traits::{CommandRunner, ModuleError};
use hyperdrive::settings::{ConfigMetadata, DynamicProperty, Parameter, ParameterKind};

const FQMN: &str = "acme/relay-module";
const CONTAINER: &str = "hd-pm_adapter";

struct Fixture {
    temp: TempDir,
    engine: MockEngine,
    key: AdapterKey,
    key_file: PathBuf,
}

impl Fixture {
    async fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let key_file = temp.path().join("secrets/adapter.key");
        let (key, _) = AdapterKey::load_or_create(&key_file).unwrap();
        let engine = MockEngine::new();
        engine.register_adapter(
            FQMN,
            MockAdapter::new(ConfigMetadata::default().with_parameter(Parameter::new(
                "enabled",
                ParameterKind::Bool {
                    default: DynamicProperty::literal(true),
                },
            ))),
        );
        let fixture = Self {
            temp,
            engine,
            key,
            key_file,
        };
        fixture.up("1").await;
        fixture
    }

    /// (Re)create the adapter; a different `revision` replaces the container
    async fn up(&self, revision: &str) {
        let file = self.temp.path().join("adapter.yml");
        std::fs::write(&file, compose_file(&self.key_file, revision)).unwrap();
        let args: Vec<String> = ["compose", "-p", "hd", "-f"]
            .iter()
            .map(|s| s.to_string())
            .chain([file.display().to_string()])
            .chain(["up", "-d"].iter().map(|s| s.to_string()))
            .collect();
        let exit_code = self
            .engine
            .run("docker", &args, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(exit_code, 0);
    }

    fn transport(&self) -> RpcTransport {
        RpcTransport::new(Arc::new(self.engine.clone()), Duration::from_secs(5))
    }

    async fn client(&self, key: Option<AdapterKey>) -> AdapterClient {
        AdapterClient::connect(self.transport(), CONTAINER, key)
            .await
            .unwrap()
    }
}

fn compose_file(key_file: &Path, revision: &str) -> String {
    format!(
        "services:\n  {c}:\n    image: acme/relay-adapter\n    container_name: {c}\n    labels:\n      {ml}: \"{fqmn}\"\n      {kl}: \"{key}\"\n    environment:\n      - REVISION={rev}\n",
        c = CONTAINER,
        ml = MODULE_LABEL,
        fqmn = FQMN,
        kl = KEY_FILE_LABEL,
        key = key_file.display(),
        rev = revision,
    )
}

#[tokio::test]
async fn test_authorized_calls_reach_adapter() {
    let fixture = Fixture::new().await;
    let client = fixture.client(Some(fixture.key.clone())).await;
    let cancel = CancellationToken::new();

    client
        .set_settings(json!({"projectName": "hd"}), &cancel)
        .await
        .unwrap();
    assert_eq!(
        fixture.engine.applied_settings(CONTAINER),
        Some(json!({"projectName": "hd"}))
    );

    let response = client
        .process_settings(json!({}), json!({}), &cancel)
        .await
        .unwrap();
    assert!(response.errors.is_empty());

    let calls = fixture.engine.rpc_calls_for("set-settings");
    let body = calls[0].body.as_object().unwrap();
    assert_eq!(body.keys().next().map(String::as_str), Some("key"));
}

#[tokio::test]
async fn test_wrong_or_missing_key_is_unauthorized() {
    let fixture = Fixture::new().await;
    let cancel = CancellationToken::new();

    let impostor = fixture.client(Some(AdapterKey::generate())).await;
    let err = impostor
        .set_settings(json!({"projectName": "evil"}), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ModuleError::Unauthorized(_)), "{}", err);

    let anonymous = fixture.client(None).await;
    let err = anonymous
        .set_settings(json!({"projectName": "evil"}), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ModuleError::Unauthorized(_)), "{}", err);

    assert!(fixture.engine.applied_settings(CONTAINER).is_none());
    assert!(fixture.engine.rpc_calls_for("set-settings").is_empty());
}

#[tokio::test]
async fn test_unauthenticated_commands_work_without_key() {
    let fixture = Fixture::new().await;
    let client = fixture.client(None).await;
    let cancel = CancellationToken::new();

    assert_eq!(client.version(&cancel).await.unwrap(), "0.0.1-mock");
    let metadata = client.get_config_metadata(&cancel).await.unwrap();
    assert!(metadata.parameter("enabled").is_some());

    let calls = fixture.engine.rpc_calls();
    assert!(calls.iter().all(|c| c.body.is_null()));
}

#[tokio::test]
async fn test_every_call_uses_a_fresh_token() {
    let fixture = Fixture::new().await;
    let client = fixture.client(Some(fixture.key.clone())).await;
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        client.get_containers(&cancel).await.unwrap();
    }
    let tokens: Vec<String> = fixture
        .engine
        .rpc_calls_for("get-containers")
        .into_iter()
        .map(|c| c.body["key"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(tokens.len(), 3);
    assert_ne!(tokens[0], tokens[1]);
    assert_ne!(tokens[1], tokens[2]);
}

#[tokio::test]
async fn test_recreated_container_makes_client_stale() {
    let fixture = Fixture::new().await;
    let client = fixture.client(Some(fixture.key.clone())).await;
    assert!(!client.is_stale().await.unwrap());

    fixture.up("1").await;
    assert!(!client.is_stale().await.unwrap());

    fixture.up("2").await;
    assert!(client.is_stale().await.unwrap());
}

#[tokio::test]
async fn test_cache_reconnects_after_recreate() {
    let fixture = Fixture::new().await;
    let cache = AdapterClientCache::new(fixture.transport());

    let first = cache
        .get("hd", FQMN, CONTAINER, Some(fixture.key.clone()))
        .await
        .unwrap();
    let again = cache
        .get("hd", FQMN, CONTAINER, Some(fixture.key.clone()))
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(cache.len().await, 1);

    fixture.up("2").await;
    let fresh = cache
        .get("hd", FQMN, CONTAINER, Some(fixture.key.clone()))
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &fresh));
    assert_ne!(first.container_id(), fresh.container_id());
    fresh
        .set_settings(json!({"projectName": "hd"}), &CancellationToken::new())
        .await
        .unwrap();

    cache.invalidate_project("hd").await;
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn test_missing_or_stopped_container_is_gone() {
    let fixture = Fixture::new().await;
    let err = AdapterClient::connect(fixture.transport(), "hd-nothing_adapter", None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ModuleError::ContainerGone(_)));

    let client = fixture.client(Some(fixture.key.clone())).await;
    fixture.engine.stop_container(CONTAINER);
    let err = client
        .version(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ModuleError::ContainerGone(_)));
}

#[tokio::test]
async fn test_cancelled_call() {
    let fixture = Fixture::new().await;
    let client = fixture.client(Some(fixture.key.clone())).await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = client.version(&cancel).await.unwrap_err();
    assert!(matches!(err, ModuleError::Cancelled));
    assert!(fixture.engine.rpc_calls().is_empty());
}

#[tokio::test]
async fn test_log_file_and_upgrade_instance() {
    let fixture = Fixture::new().await;
    let client = fixture.client(Some(fixture.key.clone())).await;
    let cancel = CancellationToken::new();

    let path = client.get_log_file("adapter", &cancel).await.unwrap();
    assert_eq!(path, "/var/log/acme/relay-module/adapter.log");

    let upgraded = client
        .upgrade_instance(
            json!({"enabled": true, "version": "0.9.0", "settings": {"enabled": false}}),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(upgraded["version"], "0.9.0");
    assert_eq!(upgraded["settings"]["enabled"], false);
}
