//! Resource bindings
//!
//! A binding keeps one resource's rendered state current for as long as it
//! is mounted: it paints from the cache, revalidates over the network, and
//! applies pushed payloads from the realtime multiplexer. State is published
//! on a `watch` channel; consumers read the latest value or await changes.

use crate::data::{ResourceData, ResourceState};
use crate::error::{ResourceError, Result};
use core_api::{ApiClient, RequestOptions, ResourceName};
use core_cache::{CacheStore, Collection};
use core_realtime::{RealtimeClient, Subscription};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Services a binding draws on
#[derive(Clone)]
pub struct BindingContext {
    pub api: ApiClient,
    pub cache: Arc<CacheStore>,
    pub realtime: RealtimeClient,
}

/// Combines the rendered value with an incoming one.
///
/// Called as `reconcile(current, incoming)` for every cache paint, fetch
/// result and pushed payload.
pub type Reconcile<D> = Arc<dyn Fn(&D, D) -> D + Send + Sync>;

struct Request {
    path: String,
    options: RequestOptions,
    generation: u64,
}

struct Inner<D> {
    ctx: BindingContext,
    resource: ResourceName,
    request: Mutex<Request>,
    state: watch::Sender<ResourceState<D>>,
    reconcile: Reconcile<D>,
    mounted: CancellationToken,
    generations: AtomicU64,
    /// Serializes cache write-backs for this binding.
    write_back: AsyncMutex<()>,
}

impl<D: ResourceData> Inner<D> {
    fn request(&self) -> (String, RequestOptions, u64) {
        let request = self.request.lock().unwrap_or_else(PoisonError::into_inner);
        (
            request.path.clone(),
            request.options.clone(),
            request.generation,
        )
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.mounted.is_cancelled()
            && self
                .request
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .generation
                == generation
    }

    fn collection(&self) -> Option<Collection> {
        Collection::try_from(self.resource).ok()
    }

    /// Replace the rendered data.
    ///
    /// A successful fetch also clears the last error.
    fn apply(&self, incoming: D, clear_error: bool) {
        self.state.send_modify(|state| {
            state.data = (self.reconcile)(&state.data, incoming);
            state.loading = false;
            if clear_error {
                state.error = None;
            }
        });
    }

    /// Persist what is rendered now.
    ///
    /// Write-backs run one at a time and each reads the latest state once it
    /// holds the lock, so the cache always ends on the newest rendered value
    /// whatever order the triggering tasks are scheduled in.
    async fn write_back(&self) {
        let Some(collection) = self.collection() else {
            return;
        };
        let _guard = self.write_back.lock().await;
        let Some(records) = self.state.borrow().data.to_cache() else {
            return;
        };
        if let Err(e) = self.ctx.cache.save_collection(collection, records).await {
            warn!(resource = %self.resource, error = %e, "Cache write-back failed");
        }
    }

    #[instrument(skip(self), fields(resource = %self.resource))]
    async fn revalidate(&self) -> Result<()> {
        let (path, options, generation) = self.request();
        self.state.send_if_modified(|state| {
            let idle = state.data.is_empty() && !state.loading;
            if idle {
                state.loading = true;
            }
            idle
        });

        let response = tokio::select! {
            _ = self.mounted.cancelled() => return Err(ResourceError::Unmounted),
            response = D::fetch(&self.ctx.api, &path, options) => response,
        };

        if !self.is_current(generation) {
            debug!(path = %path, "Discarding superseded fetch");
            return Ok(());
        }

        match response.error {
            None => {
                self.apply(response.data, true);
                self.write_back().await;
                Ok(())
            }
            Some(error) => {
                warn!(path = %path, error = %error, "Fetch failed; keeping last data");
                self.state.send_modify(|state| {
                    state.error = Some(error.clone());
                    state.loading = false;
                });
                Err(error.into())
            }
        }
    }
}

/// A mounted resource binding
///
/// Dropping the binding unmounts it: the realtime subscription is released
/// and in-flight work is discarded.
pub struct ResourceBinding<D: ResourceData> {
    inner: Arc<Inner<D>>,
    subscription: Option<Subscription>,
}

impl<D: ResourceData> ResourceBinding<D> {
    /// Mount a binding on `resource` at its default endpoint.
    pub async fn mount(ctx: BindingContext, resource: ResourceName) -> Self {
        Self::mount_with(ctx, resource, resource.endpoint(), RequestOptions::get(), None).await
    }

    /// Mount with an explicit request and an optional reconcile step.
    ///
    /// Returns once cached data, if any, is rendered. The network fetch
    /// continues in the background.
    pub async fn mount_with(
        ctx: BindingContext,
        resource: ResourceName,
        path: impl Into<String>,
        options: RequestOptions,
        reconcile: Option<Reconcile<D>>,
    ) -> Self {
        let reconcile: Reconcile<D> = match reconcile {
            Some(reconcile) => reconcile,
            None => Arc::new(|_: &D, incoming: D| incoming),
        };
        let (state, _) = watch::channel(ResourceState::initial());
        let inner = Arc::new(Inner {
            ctx,
            resource,
            request: Mutex::new(Request {
                path: path.into(),
                options,
                generation: 0,
            }),
            state,
            reconcile,
            mounted: CancellationToken::new(),
            generations: AtomicU64::new(0),
            write_back: AsyncMutex::new(()),
        });

        if let Some(collection) = inner.collection() {
            let records = inner.ctx.cache.get_collection(collection).await;
            if let Some(cached) = D::from_cache(records).filter(|data| !data.is_empty()) {
                debug!(resource = %resource, "Painting from cache");
                inner.apply(cached, false);
            }
        }

        let subscription = inner
            .ctx
            .realtime
            .subscribe(resource, push_listener(Arc::downgrade(&inner)));

        let task = inner.clone();
        tokio::spawn(async move {
            let _ = task.revalidate().await;
        });

        Self {
            inner,
            subscription: Some(subscription),
        }
    }

    pub fn resource(&self) -> ResourceName {
        self.inner.resource
    }

    /// Latest state.
    pub fn state(&self) -> ResourceState<D> {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<ResourceState<D>> {
        self.inner.state.subscribe()
    }

    /// Fetch again and wait for the result.
    ///
    /// On failure the error is recorded and the previous data kept.
    pub async fn refetch(&self) -> Result<()> {
        self.inner.revalidate().await
    }

    /// Point the binding at a new request.
    ///
    /// Only a changed path refetches; new options for the same path are
    /// stored for the next fetch.
    pub async fn set_request(&self, path: impl Into<String>, options: RequestOptions) -> Result<()> {
        let path = path.into();
        let changed = {
            let mut request = self
                .inner
                .request
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            request.options = options;
            if request.path == path {
                false
            } else {
                request.path = path;
                request.generation = self.inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
                true
            }
        };
        if changed {
            self.refetch().await
        } else {
            Ok(())
        }
    }

    /// Unmount explicitly; same as dropping.
    pub fn unmount(self) {}
}

impl<D: ResourceData> Drop for ResourceBinding<D> {
    fn drop(&mut self) {
        self.inner.mounted.cancel();
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        debug!(resource = %self.inner.resource, "Binding unmounted");
    }
}

fn push_listener<D: ResourceData>(inner: Weak<Inner<D>>) -> impl Fn(&serde_json::Value) + Send + Sync {
    move |payload| {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.mounted.is_cancelled() {
            return;
        }
        let Some(incoming) = D::from_payload(payload) else {
            warn!(resource = %inner.resource, "Dropping pushed payload of unexpected shape");
            return;
        };
        inner.apply(incoming, false);
        if inner.collection().is_some() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { inner.write_back().await });
            }
        }
    }
}
