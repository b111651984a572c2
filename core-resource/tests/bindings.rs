//! Binding lifecycle against fake transports and an in-memory cache

use async_trait::async_trait;
use bridge_desktop::MemoryKeyValueStore;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::realtime::{ChannelEvent, ChannelStream, EventSourceTransport};
use bridge_traits::storage::KeyValueStore;
use bridge_traits::time::SystemClock;
use core_api::{ApiClient, ApiErrorKind, RequestOptions, ResourceName, Track};
use core_cache::CacheStore;
use core_realtime::RealtimeClient;
use core_resource::domain;
use core_resource::{BindingContext, ResourceBinding, ResourceError};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

const BASE: &str = "http://localhost:3000";

enum Reply {
    Body(&'static str),
    Offline,
}

/// HTTP fake that answers from a queue, optionally held behind a gate.
struct FakeHttp {
    replies: Mutex<VecDeque<Reply>>,
    fallback: &'static str,
    gate: Option<Semaphore>,
    paths: Mutex<Vec<String>>,
}

impl FakeHttp {
    fn answering(fallback: &'static str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback,
            gate: None,
            paths: Mutex::new(Vec::new()),
        })
    }

    fn gated(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback: "[]",
            gate: Some(Semaphore::new(0)),
            paths: Mutex::new(Vec::new()),
        })
    }

    fn offline() -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from([Reply::Offline])),
            fallback: "[]",
            gate: None,
            paths: Mutex::new(Vec::new()),
        })
    }

    fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    fn calls(&self) -> usize {
        self.paths.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.paths.lock().unwrap().push(request.url.clone());
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Offline) => Err(BridgeError::OperationFailed("offline".into())),
            Some(Reply::Body(body)) => Ok(HttpResponse::new(200, body)),
            None => Ok(HttpResponse::new(200, self.fallback)),
        }
    }
}

#[derive(Default)]
struct LiveSource {
    senders: Mutex<Vec<UnboundedSender<ChannelEvent>>>,
}

impl LiveSource {
    fn push(&self, event: &str, data: Value) {
        let senders = self.senders.lock().unwrap();
        senders
            .last()
            .unwrap()
            .unbounded_send(ChannelEvent::Message {
                event: event.to_string(),
                data: data.to_string(),
            })
            .unwrap();
    }

    fn opens(&self) -> usize {
        self.senders.lock().unwrap().len()
    }
}

#[async_trait]
impl EventSourceTransport for LiveSource {
    async fn open(&self, _url: &str) -> BridgeResult<ChannelStream> {
        let (tx, rx) = unbounded();
        tx.unbounded_send(ChannelEvent::Open).unwrap();
        self.senders.lock().unwrap().push(tx);
        Ok(rx.boxed())
    }
}

/// In-memory storage whose reads and writes can be switched to fail.
#[derive(Default)]
struct UnreliableStore {
    inner: MemoryKeyValueStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl UnreliableStore {
    fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueStore for UnreliableStore {
    async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BridgeError::Storage("quota exceeded".into()));
        }
        self.inner.set_string(key, value).await
    }

    async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BridgeError::Storage("read failed".into()));
        }
        self.inner.get_string(key).await
    }

    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.inner.delete(key).await
    }

    async fn list_keys(&self) -> BridgeResult<Vec<String>> {
        self.inner.list_keys().await
    }

    async fn clear_all(&self) -> BridgeResult<()> {
        self.inner.clear_all().await
    }
}

fn context(http: Arc<FakeHttp>, source: Arc<LiveSource>) -> BindingContext {
    context_with_store(http, source, Arc::new(MemoryKeyValueStore::new()))
}

fn context_with_store(
    http: Arc<FakeHttp>,
    source: Arc<LiveSource>,
    store: Arc<dyn KeyValueStore>,
) -> BindingContext {
    let api = ApiClient::new(http, BASE);
    let cache = Arc::new(CacheStore::new(store, Arc::new(SystemClock), "portfolio_data"));
    let realtime = RealtimeClient::builder(api.clone(), source, format!("{BASE}/api/realtime")).build();
    BindingContext {
        api,
        cache,
        realtime,
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

async fn cached_track_count(ctx: &BindingContext) -> usize {
    ctx.cache.tracks().get().await.len()
}

#[tokio::test]
async fn test_tracks_paint_from_cache_then_network() {
    let http = FakeHttp::gated(vec![Reply::Body(
        r#"[{"id":"1","title":"A"},{"id":"2","title":"B"}]"#,
    )]);
    let ctx = context(http.clone(), Arc::new(LiveSource::default()));
    let seeded: Vec<Track> = serde_json::from_value(json!([{"id": "1", "title": "A"}])).unwrap();
    ctx.cache.tracks().save(&seeded).await.unwrap();

    let binding = domain::tracks(ctx.clone()).await;

    let first = binding.state();
    assert_eq!(first.data.len(), 1);
    assert_eq!(first.data[0].title, "A");
    assert!(!first.loading);

    http.release();
    let mut rx = binding.watch();
    let fresh = rx.wait_for(|state| state.data.len() == 2).await.unwrap().clone();
    assert!(fresh.error.is_none());
    assert_eq!(fresh.data[1].title, "B");

    for _ in 0..200 {
        if cached_track_count(&ctx).await == 2 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("cache was not rewritten");
}

#[tokio::test]
async fn test_empty_tracks_keep_cached_list() {
    let http = FakeHttp::answering("[]");
    let ctx = context(http, Arc::new(LiveSource::default()));
    let seeded: Vec<Track> = serde_json::from_value(json!([{"id": "1", "title": "A"}])).unwrap();
    ctx.cache.tracks().save(&seeded).await.unwrap();

    let binding = domain::tracks(ctx.clone()).await;
    binding.refetch().await.unwrap();

    assert_eq!(binding.state().data.len(), 1);
    assert_eq!(cached_track_count(&ctx).await, 1);
}

#[tokio::test]
async fn test_failure_keeps_last_data() {
    let ctx = context(FakeHttp::offline(), Arc::new(LiveSource::default()));

    let binding = domain::images(ctx).await;
    let mut rx = binding.watch();
    let state = rx.wait_for(|state| state.error.is_some()).await.unwrap().clone();

    assert_eq!(state.data.len(), 3);
    assert!(!state.loading);
    assert_eq!(state.error.as_ref().unwrap().kind, ApiErrorKind::NetworkFailure);
    assert!(state.visible_error().is_none());
}

#[tokio::test]
async fn test_failure_without_data_is_visible() {
    let ctx = context(FakeHttp::offline(), Arc::new(LiveSource::default()));

    let binding = domain::comments(ctx).await;
    let mut rx = binding.watch();
    let state = rx.wait_for(|state| !state.loading).await.unwrap().clone();

    assert!(state.data.is_empty());
    assert!(state.visible_error().is_some());
}

#[tokio::test]
async fn test_comments_render_newest_first() {
    let source = Arc::new(LiveSource::default());
    let ctx = context(FakeHttp::answering("[]"), source.clone());

    let binding = domain::comments(ctx).await;
    let mut rx = binding.watch();
    rx.wait_for(|state| !state.loading).await.unwrap();
    eventually(|| source.opens() == 1).await;

    let t1 = json!({"id": "t1", "author": "a", "content": "first", "createdAt": "2024-05-01T10:00:00Z"});
    let t2 = json!({"id": "t2", "author": "b", "content": "second", "createdAt": "2024-05-01T11:00:00Z"});
    let t3 = json!({"id": "t3", "author": "c", "content": "third", "createdAt": "2024-05-01T12:00:00Z"});
    source.push("comments", json!([t2]));
    source.push("comments", json!([t2, t1]));
    source.push("comments", json!([t2, t1, t3]));

    let state = rx.wait_for(|state| state.data.len() == 3).await.unwrap().clone();
    let ids: Vec<_> = state.data.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["t3", "t2", "t1"]);
}

#[tokio::test]
async fn test_push_replaces_data_and_cache() {
    let source = Arc::new(LiveSource::default());
    let http = FakeHttp::answering(r#"[{"id":"9","url":"/a.jpg"}]"#);
    let ctx = context(http, source.clone());

    let binding = domain::images(ctx.clone()).await;
    let mut rx = binding.watch();
    rx.wait_for(|state| state.data.len() == 1).await.unwrap();
    eventually(|| source.opens() == 1).await;

    source.push("images", json!([{"id": "10", "url": "/b.jpg"}, {"id": "11", "url": "/c.jpg"}]));
    let state = rx.wait_for(|state| state.data.len() == 2).await.unwrap().clone();
    assert_eq!(state.data[0].id, "10");

    for _ in 0..200 {
        if ctx.cache.images().get().await.len() == 2 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("pushed payload was not cached");
}

#[tokio::test]
async fn test_unmount_releases_subscription_and_discards_fetch() {
    let http = FakeHttp::gated(vec![Reply::Body(r#"[{"id":"9","url":"/a.jpg"}]"#)]);
    let ctx = context(http.clone(), Arc::new(LiveSource::default()));

    let binding = domain::images(ctx.clone()).await;
    assert_eq!(ctx.realtime.listener_count(ResourceName::Images), 1);
    eventually(|| http.calls() == 1).await;

    binding.unmount();
    assert_eq!(ctx.realtime.listener_count(ResourceName::Images), 0);

    http.release();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ctx.cache.images().get().await.len(), 3);
}

#[tokio::test]
async fn test_set_request_refetches_only_on_new_path() {
    let http = FakeHttp::answering("[]");
    let ctx = context(http.clone(), Arc::new(LiveSource::default()));

    let binding = ResourceBinding::<Vec<Value>>::mount_with(
        ctx,
        ResourceName::Comments,
        "/api/comments",
        RequestOptions::get(),
        None,
    )
    .await;
    let mut rx = binding.watch();
    rx.wait_for(|state| !state.loading).await.unwrap();
    assert_eq!(http.calls(), 1);

    binding
        .set_request("/api/comments", RequestOptions::get().header("X-Page", "1"))
        .await
        .unwrap();
    assert_eq!(http.calls(), 1);

    binding
        .set_request("/api/comments?page=2", RequestOptions::get())
        .await
        .unwrap();
    assert_eq!(http.calls(), 2);
    assert!(http.paths.lock().unwrap()[1].ends_with("/api/comments?page=2"));
}

#[tokio::test]
async fn test_refetch_reports_failure() {
    let http = FakeHttp::answering(r#"{"views": 5}"#);
    let ctx = context(http.clone(), Arc::new(LiveSource::default()));

    let binding = domain::view_count(ctx).await;
    binding.refetch().await.unwrap();
    assert_eq!(binding.state().data.unwrap().views, 5);
    eventually(|| http.calls() == 2).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    http.replies.lock().unwrap().push_back(Reply::Offline);
    let err = binding.refetch().await.unwrap_err();
    assert!(matches!(err, ResourceError::Api(_)));
    assert_eq!(binding.state().data.unwrap().views, 5);
}

#[tokio::test]
async fn test_failed_write_back_still_renders() {
    let store = Arc::new(UnreliableStore::default());
    let source = Arc::new(LiveSource::default());
    let http = FakeHttp::answering(r#"[{"id":"9","url":"/a.jpg"}]"#);
    let ctx = context_with_store(http, source.clone(), store.clone());
    let seeded: Vec<Track> = serde_json::from_value(json!([{"id": "1", "title": "Mine"}])).unwrap();
    ctx.cache.tracks().save(&seeded).await.unwrap();
    store.fail_writes(true);

    let binding = domain::images(ctx.clone()).await;
    let mut rx = binding.watch();
    let state = rx.wait_for(|state| state.data.len() == 1).await.unwrap().clone();
    assert!(state.error.is_none());
    assert!(!state.loading);

    eventually(|| source.opens() == 1).await;
    source.push("images", json!([{"id": "10", "url": "/b.jpg"}, {"id": "11", "url": "/c.jpg"}]));
    let state = rx.wait_for(|state| state.data.len() == 2).await.unwrap().clone();
    assert!(state.error.is_none());
    assert!(!state.loading);

    tokio::time::sleep(Duration::from_millis(20)).await;
    store.fail_writes(false);
    assert_eq!(ctx.cache.tracks().get().await, seeded);
}

#[tokio::test]
async fn test_unreadable_cache_blocks_write_back() {
    let store = Arc::new(UnreliableStore::default());
    let http = FakeHttp::gated(vec![Reply::Body(r#"[{"id":"9","url":"/a.jpg"}]"#)]);
    let ctx = context_with_store(http.clone(), Arc::new(LiveSource::default()), store.clone());
    let seeded: Vec<Track> = serde_json::from_value(json!([{"id": "1", "title": "Mine"}])).unwrap();
    ctx.cache.tracks().save(&seeded).await.unwrap();

    let binding = domain::images(ctx.clone()).await;
    store.fail_reads(true);
    http.release();

    let mut rx = binding.watch();
    let state = rx.wait_for(|state| state.data.len() == 1).await.unwrap().clone();
    assert!(state.error.is_none());

    tokio::time::sleep(Duration::from_millis(20)).await;
    store.fail_reads(false);
    assert_eq!(ctx.cache.tracks().get().await, seeded);
    assert_eq!(ctx.cache.images().get().await.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cache_ends_on_latest_push() {
    let source = Arc::new(LiveSource::default());
    let ctx = context(FakeHttp::answering("[]"), source.clone());

    let binding = domain::images(ctx.clone()).await;
    let mut rx = binding.watch();
    rx.wait_for(|state| state.data.is_empty()).await.unwrap();
    eventually(|| source.opens() == 1).await;

    for len in 1..=20 {
        let images: Vec<Value> = (0..len)
            .map(|n| json!({"id": n.to_string(), "url": format!("/{n}.jpg")}))
            .collect();
        source.push("images", Value::Array(images));
    }
    rx.wait_for(|state| state.data.len() == 20).await.unwrap();

    for _ in 0..200 {
        if ctx.cache.images().get().await.len() == 20 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ctx.cache.images().get().await.len(), 20);
}
