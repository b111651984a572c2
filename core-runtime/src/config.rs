//! # Core Configuration Module
//!
//! Provides configuration management for the synchronization core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds every bridge and setting the core needs. It enforces
//! fail-fast validation so a missing capability is reported at startup rather
//! than at the first request.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - Request layer transport
//! - `EventSourceTransport` - Shared polling channel
//! - `KeyValueStore` - Durable storage behind the local cache
//!
//! With the `desktop-shims` feature enabled, desktop defaults from
//! `bridge-desktop` are injected for any of these that are not provided.
//!
//! ## Optional Dependencies
//!
//! - `ChangeFeed` - Push channel for `comments` and `view_count`. Without it,
//!   those resources only update through the polling relay and refetches.
//! - `Clock` - Defaults to the system clock
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, Environment};
//!
//! let config = CoreConfig::builder()
//!     .origin("https://folio.example")
//!     .api_base_url("https://api.folio.example")
//!     .environment(Environment::Production)
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Environment variables
//!
//! [`CoreConfigBuilder::from_env`] seeds a builder from:
//!
//! | Variable | Setting |
//! |----------|---------|
//! | `FOLIO_API_BASE_URL` | external API host (production only) |
//! | `FOLIO_ORIGIN` | same-origin base |
//! | `FOLIO_ENV` | `production` or `development` |
//! | `FOLIO_REALTIME_MAX_ATTEMPTS` | reconnect attempt cap |
//! | `FOLIO_REALTIME_DELAY_MS` | reconnect delay |

use crate::error::{Error, Result};
use bridge_traits::{
    ChangeFeed, Clock, EventSourceTransport, HttpClient, KeyValueStore, SystemClock,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_REALTIME_PATH: &str = "/api/realtime";
pub const DEFAULT_STORAGE_KEY: &str = "portfolio_data";
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Build flavor; decides whether the external API host is honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Development;

        #[cfg(not(debug_assertions))]
        return Self::Production;
    }
}

/// Delay curve between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every attempt
    Fixed,
    /// Delay doubles per attempt, capped at `max_delay`
    Exponential { max_delay: Duration },
}

/// Bounded reconnection policy for transport channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnects allowed after an error before the channel closes for good
    pub max_attempts: u32,
    /// Base delay before a reconnect
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            delay: DEFAULT_RECONNECT_DELAY,
            backoff: Backoff::Fixed,
        }
    }
}

impl ReconnectPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Exponential { max_delay },
        }
    }

    /// Delay before reconnect number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { max_delay } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(factor).min(max_delay)
            }
        }
    }

    /// Whether another reconnect may be scheduled after `attempts` so far.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    pub fn validate(&self) -> Result<()> {
        if self.delay.is_zero() {
            return Err(Error::Config(
                "Reconnect delay must be greater than 0ms".to_string(),
            ));
        }
        if let Backoff::Exponential { max_delay } = self.backoff {
            if max_delay < self.delay {
                return Err(Error::Config(
                    "Exponential backoff max_delay must not be below the base delay".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Core configuration for the synchronization core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Same-origin base every request resolves against by default
    pub origin: String,

    /// External API host, honored only in production
    pub api_base_url: Option<String>,

    pub environment: Environment,

    /// Path of the shared polling channel
    pub realtime_path: String,

    /// Storage key holding the cached collections
    pub storage_key: String,

    pub reconnect: ReconnectPolicy,

    pub event_buffer_size: usize,

    pub http_client: Arc<dyn HttpClient>,

    pub event_source: Arc<dyn EventSourceTransport>,

    pub change_feed: Option<Arc<dyn ChangeFeed>>,

    pub key_value_store: Arc<dyn KeyValueStore>,

    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("origin", &self.origin)
            .field("api_base_url", &self.api_base_url)
            .field("environment", &self.environment)
            .field("realtime_path", &self.realtime_path)
            .field("storage_key", &self.storage_key)
            .field("reconnect", &self.reconnect)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("http_client", &"HttpClient { ... }")
            .field("event_source", &"EventSourceTransport { ... }")
            .field(
                "change_feed",
                &self.change_feed.as_ref().map(|_| "ChangeFeed { ... }"),
            )
            .field("key_value_store", &"KeyValueStore { ... }")
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Base URL every API path is resolved against.
    ///
    /// The external host applies only to production builds; everything else
    /// stays same-origin.
    pub fn api_base(&self) -> &str {
        match (&self.environment, &self.api_base_url) {
            (Environment::Production, Some(url)) => url.trim_end_matches('/'),
            _ => self.origin.trim_end_matches('/'),
        }
    }

    /// Absolute URL of the shared polling channel.
    pub fn realtime_url(&self) -> String {
        format!("{}{}", self.api_base(), self.realtime_path)
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        validate_base_url("origin", &self.origin)?;
        if let Some(url) = &self.api_base_url {
            validate_base_url("api_base_url", url)?;
        }

        if !self.realtime_path.starts_with('/') {
            return Err(Error::Config(format!(
                "Realtime path must start with '/': {}",
                self.realtime_path
            )));
        }

        if self.storage_key.trim().is_empty() {
            return Err(Error::Config("Storage key cannot be empty".to_string()));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        self.reconnect.validate()
    }
}

fn validate_base_url(name: &str, url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(Error::Config(format!("{} cannot be empty", name)));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(Error::Config(format!(
            "{} must be an absolute http(s) URL: {}",
            name, url
        )));
    }
    Ok(())
}

#[cfg(not(feature = "desktop-shims"))]
fn capability_missing(capability: &str, purpose: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required for {}. \
             Desktop: enable the 'desktop-shims' feature to use the bridge-desktop default. \
             Other hosts: inject a platform adapter through CoreConfig::builder().",
            capability, purpose
        ),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Ok(Arc::new(bridge_desktop::ReqwestHttpClient::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(capability_missing("HttpClient", "API requests"))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_event_source() -> Result<Arc<dyn EventSourceTransport>> {
    Ok(Arc::new(bridge_desktop::ReqwestEventSource::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_event_source() -> Result<Arc<dyn EventSourceTransport>> {
    Err(capability_missing(
        "EventSourceTransport",
        "the shared realtime polling channel",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_change_feed(
    event_source: &Arc<dyn EventSourceTransport>,
    url: String,
) -> Arc<dyn ChangeFeed> {
    Arc::new(bridge_desktop::SseChangeFeed::new(
        Arc::clone(event_source),
        url,
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_key_value_store(path: Option<PathBuf>) -> Result<Arc<dyn KeyValueStore>> {
    use bridge_desktop::SqliteKeyValueStore;
    use std::thread;
    use tokio::runtime::{Handle, Runtime};

    let path = path.unwrap_or_else(SqliteKeyValueStore::default_path);

    let init_store = |path: PathBuf| -> Result<_> {
        let runtime = Runtime::new().map_err(|e| {
            Error::Internal(format!(
                "Failed to create Tokio runtime for default KeyValueStore: {}",
                e
            ))
        })?;

        runtime
            .block_on(SqliteKeyValueStore::new(path))
            .map_err(|e| Error::Internal(format!("Failed to initialize default KeyValueStore: {}", e)))
    };

    // block_on cannot run inside an active runtime
    let store = match Handle::try_current() {
        Ok(_) => thread::spawn(move || init_store(path))
            .join()
            .map_err(|_| {
                Error::Internal(
                    "Worker thread panicked while creating default KeyValueStore".to_string(),
                )
            })??,
        Err(_) => init_store(path)?,
    };

    Ok(Arc::new(store))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_key_value_store(_path: Option<PathBuf>) -> Result<Arc<dyn KeyValueStore>> {
    Err(capability_missing("KeyValueStore", "the local cache"))
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    origin: Option<String>,
    api_base_url: Option<String>,
    environment: Option<Environment>,
    realtime_path: Option<String>,
    change_relay_path: Option<String>,
    storage_key: Option<String>,
    storage_path: Option<PathBuf>,
    reconnect: Option<ReconnectPolicy>,
    event_buffer_size: Option<usize>,
    http_client: Option<Arc<dyn HttpClient>>,
    event_source: Option<Arc<dyn EventSourceTransport>>,
    change_feed: Option<Arc<dyn ChangeFeed>>,
    key_value_store: Option<Arc<dyn KeyValueStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CoreConfigBuilder {
    /// Seed a builder from `FOLIO_*` environment variables.
    ///
    /// Unparseable numeric values are reported as configuration errors.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::default();

        if let Ok(url) = std::env::var("FOLIO_API_BASE_URL") {
            if !url.is_empty() {
                builder = builder.api_base_url(url);
            }
        }
        if let Ok(origin) = std::env::var("FOLIO_ORIGIN") {
            builder = builder.origin(origin);
        }
        if let Ok(env) = std::env::var("FOLIO_ENV") {
            let environment = match env.to_ascii_lowercase().as_str() {
                "production" | "prod" => Environment::Production,
                "development" | "dev" => Environment::Development,
                other => {
                    return Err(Error::Config(format!("Unknown FOLIO_ENV value: {}", other)))
                }
            };
            builder = builder.environment(environment);
        }

        let mut policy = ReconnectPolicy::default();
        if let Ok(value) = std::env::var("FOLIO_REALTIME_MAX_ATTEMPTS") {
            policy.max_attempts = value.parse().map_err(|e| {
                Error::Config(format!("Invalid FOLIO_REALTIME_MAX_ATTEMPTS: {}", e))
            })?;
        }
        if let Ok(value) = std::env::var("FOLIO_REALTIME_DELAY_MS") {
            let millis: u64 = value
                .parse()
                .map_err(|e| Error::Config(format!("Invalid FOLIO_REALTIME_DELAY_MS: {}", e)))?;
            policy.delay = Duration::from_millis(millis);
        }

        Ok(builder.reconnect(policy))
    }

    /// Sets the same-origin base URL (default `http://localhost:3000`).
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Sets the external API host used by production builds.
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Sets the polling channel path (default `/api/realtime`).
    pub fn realtime_path(mut self, path: impl Into<String>) -> Self {
        self.realtime_path = Some(path.into());
        self
    }

    /// Path of a server-sent change relay.
    ///
    /// With `desktop-shims` and no explicit change feed, an `SseChangeFeed`
    /// on this path becomes the push transport.
    pub fn change_relay_path(mut self, path: impl Into<String>) -> Self {
        self.change_relay_path = Some(path.into());
        self
    }

    /// Sets the storage key (default `portfolio_data`).
    pub fn storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = Some(key.into());
        self
    }

    /// Sets the database file used by the default desktop store.
    pub fn storage_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn event_source(mut self, transport: Arc<dyn EventSourceTransport>) -> Self {
        self.event_source = Some(transport);
        self
    }

    pub fn change_feed(mut self, feed: Arc<dyn ChangeFeed>) -> Self {
        self.change_feed = Some(feed);
        self
    }

    pub fn key_value_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.key_value_store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the final [`CoreConfig`] after validating the configuration.
    ///
    /// # Errors
    ///
    /// - `CapabilityMissing` when a required bridge is absent and no desktop
    ///   default is available
    /// - `Config` when a setting is invalid
    pub fn build(self) -> Result<CoreConfig> {
        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };
        let event_source = match self.event_source {
            Some(transport) => transport,
            None => provide_default_event_source()?,
        };
        let key_value_store = match self.key_value_store {
            Some(store) => store,
            None => provide_default_key_value_store(self.storage_path)?,
        };

        let mut config = CoreConfig {
            origin: self.origin.unwrap_or_else(|| DEFAULT_ORIGIN.to_string()),
            api_base_url: self.api_base_url,
            environment: self.environment.unwrap_or_default(),
            realtime_path: self
                .realtime_path
                .unwrap_or_else(|| DEFAULT_REALTIME_PATH.to_string()),
            storage_key: self
                .storage_key
                .unwrap_or_else(|| DEFAULT_STORAGE_KEY.to_string()),
            reconnect: self.reconnect.unwrap_or_default(),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
            http_client,
            event_source,
            change_feed: self.change_feed,
            key_value_store,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        #[cfg(feature = "desktop-shims")]
        if config.change_feed.is_none() {
            if let Some(path) = self.change_relay_path.as_deref() {
                let url = format!("{}{}", config.api_base(), path);
                config.change_feed = Some(provide_default_change_feed(&config.event_source, url));
            }
        }
        #[cfg(not(feature = "desktop-shims"))]
        if config.change_feed.is_none() && self.change_relay_path.is_some() {
            return Err(capability_missing("ChangeFeed", "the change relay"));
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{ChannelStream, HttpRequest, HttpResponse};

    struct NullHttp;

    #[async_trait]
    impl HttpClient for NullHttp {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Ok(HttpResponse::new(204, ""))
        }
    }

    struct NullEventSource;

    #[async_trait]
    impl EventSourceTransport for NullEventSource {
        async fn open(&self, _url: &str) -> BridgeResult<ChannelStream> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    #[derive(Default)]
    struct NullStore;

    #[async_trait]
    impl KeyValueStore for NullStore {
        async fn set_string(&self, _key: &str, _value: &str) -> BridgeResult<()> {
            Ok(())
        }
        async fn get_string(&self, _key: &str) -> BridgeResult<Option<String>> {
            Ok(None)
        }
        async fn delete(&self, _key: &str) -> BridgeResult<()> {
            Ok(())
        }
        async fn list_keys(&self) -> BridgeResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn clear_all(&self) -> BridgeResult<()> {
            Ok(())
        }
    }

    fn builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .http_client(Arc::new(NullHttp))
            .event_source(Arc::new(NullEventSource))
            .key_value_store(Arc::new(NullStore))
    }

    #[test]
    fn test_defaults() {
        let config = builder().build().unwrap();

        assert_eq!(config.origin, DEFAULT_ORIGIN);
        assert_eq!(config.realtime_path, "/api/realtime");
        assert_eq!(config.storage_key, "portfolio_data");
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.delay, Duration::from_millis(3000));
        assert!(config.change_feed.is_none());
    }

    #[test]
    fn test_api_base_same_origin_in_development() {
        let config = builder()
            .origin("https://folio.example/")
            .api_base_url("https://cdn.folio.example")
            .environment(Environment::Development)
            .build()
            .unwrap();

        assert_eq!(config.api_base(), "https://folio.example");
        assert_eq!(config.realtime_url(), "https://folio.example/api/realtime");
    }

    #[test]
    fn test_api_base_external_in_production() {
        let config = builder()
            .api_base_url("https://cdn.folio.example/")
            .environment(Environment::Production)
            .build()
            .unwrap();

        assert_eq!(config.api_base(), "https://cdn.folio.example");
    }

    #[test]
    fn test_production_without_external_host_stays_same_origin() {
        let config = builder()
            .origin("https://folio.example")
            .environment(Environment::Production)
            .build()
            .unwrap();

        assert_eq!(config.api_base(), "https://folio.example");
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(builder().origin("folio.example").build().is_err());
        assert!(builder().realtime_path("api/realtime").build().is_err());
        assert!(builder().storage_key("  ").build().is_err());
        assert!(builder()
            .reconnect(ReconnectPolicy::fixed(5, Duration::ZERO))
            .build()
            .is_err());
    }

    #[test]
    fn test_fixed_backoff() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(3000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(3000));
        assert!(policy.allows(4));
        assert!(!policy.allows(5));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = ReconnectPolicy::exponential(
            10,
            Duration::from_millis(500),
            Duration::from_secs(4),
        );
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(9), Duration::from_secs(4));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_http_client_is_actionable() {
        let err = CoreConfig::builder()
            .event_source(Arc::new(NullEventSource))
            .key_value_store(Arc::new(NullStore))
            .build()
            .unwrap_err();

        match err {
            Error::CapabilityMissing { capability, message } => {
                assert_eq!(capability, "HttpClient");
                assert!(message.contains("desktop-shims"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
