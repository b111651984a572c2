//! Service wiring with injected bridges

use async_trait::async_trait;
use bridge_desktop::MemoryKeyValueStore;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::realtime::{ChannelEvent, ChannelStream, EventSourceTransport};
use core_api::ResourceName;
use core_runtime::config::{CoreConfig, Environment};
use core_runtime::events::{CacheEvent, ConnectionState, CoreEvent};
use core_service::{CoreError, CoreService};
use futures::StreamExt;
use std::sync::{Arc, Mutex};

struct JsonHttp {
    urls: Mutex<Vec<String>>,
}

#[async_trait]
impl HttpClient for JsonHttp {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.urls.lock().unwrap().push(request.url.clone());
        Ok(HttpResponse::new(200, "[]"))
    }
}

/// Connection that opens and then stays idle.
struct IdleSource;

#[async_trait]
impl EventSourceTransport for IdleSource {
    async fn open(&self, _url: &str) -> BridgeResult<ChannelStream> {
        Ok(futures::stream::iter(vec![ChannelEvent::Open])
            .chain(futures::stream::pending())
            .boxed())
    }
}

fn service(http: Arc<JsonHttp>) -> CoreService {
    let config = CoreConfig::builder()
        .origin("http://localhost:3000")
        .api_base_url("https://api.example.com/")
        .environment(Environment::Production)
        .http_client(http)
        .event_source(Arc::new(IdleSource))
        .key_value_store(Arc::new(MemoryKeyValueStore::new()));
    CoreService::builder().config(config).build().unwrap()
}

fn json_http() -> Arc<JsonHttp> {
    Arc::new(JsonHttp {
        urls: Mutex::new(Vec::new()),
    })
}

#[tokio::test]
async fn test_requests_use_production_base() {
    let http = json_http();
    let core = service(http.clone());

    let response = core.api().tracks().await;

    assert!(response.is_ok());
    assert_eq!(
        http.urls.lock().unwrap().as_slice(),
        ["https://api.example.com/api/media/tracks"]
    );
}

#[tokio::test]
async fn test_cache_writes_reach_event_stream() {
    let core = service(json_http());
    let mut events = core.events().filter(|event| matches!(event, CoreEvent::Cache(_)));

    core.cache().tracks().save(&[]).await.unwrap();

    assert_eq!(
        events.recv().await.unwrap(),
        CoreEvent::Cache(CacheEvent::CollectionUpdated {
            collection: "tracks".to_string(),
            len: 0
        })
    );
}

#[tokio::test]
async fn test_binding_paints_bundled_defaults() {
    let core = service(json_http());

    let images = core.images().await;

    assert_eq!(images.state().data.len(), 3);
    assert!(!images.state().loading);
}

#[tokio::test]
async fn test_shutdown_closes_channels() {
    let core = service(json_http());
    let _subscription = core.subscribe(ResourceName::Tracks, |_| {});
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert_eq!(core.realtime().active_channel_count(), 1);

    core.shutdown();
    core.shutdown();

    assert_eq!(core.realtime().active_channel_count(), 0);
    assert_eq!(
        core.realtime().channel_state(core_realtime::ChannelKey::Polling),
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let config = CoreConfig::builder()
        .origin("")
        .http_client(json_http())
        .event_source(Arc::new(IdleSource))
        .key_value_store(Arc::new(MemoryKeyValueStore::new()));

    let err = CoreService::builder().config(config).build().err().unwrap();
    assert!(matches!(err, CoreError::Config(_)));
}

#[tokio::test]
async fn test_cache_backup_round_trip() {
    let core = service(json_http());
    core.cache().tracks().save(&[]).await.unwrap();
    let backup = core.export_cache().await.unwrap();

    let err = core.import_cache("{not json").await.err().unwrap();
    assert!(matches!(err, CoreError::Cache(_)));

    core.reset_cache().await.unwrap();
    core.import_cache(&backup).await.unwrap();
    assert_eq!(core.cache().images().get().await.len(), 3);
}
