//! Core service façade and bootstrap helpers.
//!
//! This crate wires the configured bridges (HTTP, event source, change feed,
//! key-value storage, clock) into the API client, the local cache, the
//! realtime multiplexer and the resource bindings built on them. Desktop
//! hosts enable the `desktop-shims` feature so missing bridges fall back to
//! the `bridge-desktop` adapters.

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use core_api::{ApiClient, ResourceName};
use core_cache::CacheStore;
use core_realtime::{RealtimeClient, Subscription};
use core_resource::{domain, BindingContext, CommentsBinding, ResourceBinding, TracksBinding};
use core_runtime::config::{CoreConfig, CoreConfigBuilder};
use core_runtime::events::{EventBus, EventStream};
use core_runtime::logging::{init_logging, LoggingConfig};
use serde_json::Value;
use tracing::info;

pub use core_api::{Comment, Image, Project, Track, ViewStats};

/// Builder for [`CoreService`].
#[derive(Default)]
pub struct CoreServiceBuilder {
    config: Option<CoreConfigBuilder>,
    logging: Option<LoggingConfig>,
}

impl CoreServiceBuilder {
    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: CoreConfigBuilder) -> Self {
        self.config = Some(config);
        self
    }

    /// Install the global tracing subscriber while building.
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    pub fn build(self) -> Result<CoreService> {
        if let Some(logging) = self.logging {
            init_logging(logging)?;
        }
        let config = self.config.unwrap_or_default().build()?;
        CoreService::new(config)
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    config: Arc<CoreConfig>,
    events: EventBus,
    api: ApiClient,
    cache: Arc<CacheStore>,
    realtime: RealtimeClient,
}

impl CoreService {
    pub fn builder() -> CoreServiceBuilder {
        CoreServiceBuilder::default()
    }

    /// Create a new service from a built configuration.
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new(config.event_buffer_size);
        let api = ApiClient::from_config(&config);
        let cache = Arc::new(
            CacheStore::new(
                Arc::clone(&config.key_value_store),
                Arc::clone(&config.clock),
                config.storage_key.clone(),
            )
            .with_event_bus(events.clone()),
        );
        let realtime = RealtimeClient::from_config(&config, api.clone(), events.clone());

        info!(
            api_base = %config.api_base(),
            environment = ?config.environment,
            push = config.change_feed.is_some(),
            "Core service initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            events,
            api,
            cache,
            realtime,
        })
    }

    /// Build from `FOLIO_*` environment variables with desktop bridges.
    #[cfg(feature = "desktop-shims")]
    pub fn from_env() -> Result<Self> {
        Self::builder().config(CoreConfigBuilder::from_env()?).build()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn realtime(&self) -> &RealtimeClient {
        &self.realtime
    }

    /// Stream of realtime and cache events.
    pub fn events(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }

    /// Listen for pushed updates of one resource.
    pub fn subscribe<F>(&self, resource: ResourceName, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.realtime.subscribe(resource, callback)
    }

    pub fn binding_context(&self) -> BindingContext {
        BindingContext {
            api: self.api.clone(),
            cache: Arc::clone(&self.cache),
            realtime: self.realtime.clone(),
        }
    }

    pub async fn tracks(&self) -> TracksBinding {
        domain::tracks(self.binding_context()).await
    }

    pub async fn comments(&self) -> CommentsBinding {
        domain::comments(self.binding_context()).await
    }

    pub async fn images(&self) -> ResourceBinding<Vec<Image>> {
        domain::images(self.binding_context()).await
    }

    pub async fn projects(&self) -> ResourceBinding<Vec<Project>> {
        domain::projects(self.binding_context()).await
    }

    pub async fn view_count(&self) -> ResourceBinding<Option<ViewStats>> {
        domain::view_count(self.binding_context()).await
    }

    /// React to a comment on behalf of `user_id`.
    pub async fn add_reaction(&self, comment_id: &str, kind: &str, user_id: &str) -> Result<()> {
        self.api
            .add_reaction(comment_id, kind, user_id)
            .await
            .into_result()?;
        Ok(())
    }

    /// Serialized cache contents, for a downloadable backup.
    pub async fn export_cache(&self) -> Result<String> {
        Ok(self.cache.export_json().await?)
    }

    /// Replace every cached collection; nothing is written unless the whole
    /// document is valid.
    pub async fn import_cache(&self, json: &str) -> Result<()> {
        self.cache.import_json(json).await?;
        Ok(())
    }

    /// Drop cached data and fall back to the bundled defaults.
    pub async fn reset_cache(&self) -> Result<()> {
        self.cache.reset().await?;
        Ok(())
    }

    /// Close every realtime channel. Safe to call more than once.
    pub fn shutdown(&self) {
        self.realtime.disconnect();
        info!("Core service shut down");
    }
}
