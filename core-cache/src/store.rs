//! Durable collection store
//!
//! All collections live in one JSON blob under a single storage key:
//! `{"images": [...], "tracks": [...], "projects": [...]}`. Every mutation
//! reads the blob, replaces one collection and writes the blob back while
//! holding the store lock, so concurrent writers never drop each other's
//! collections.

use bridge_traits::{Clock, KeyValueStore};
use core_api::models::{Image, Project, Record, Track};
use core_api::ResourceName;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{CacheError, Result};

const BUNDLED_DEFAULTS: &str = include_str!("defaults.json");

/// A cached collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Images,
    Tracks,
    Projects,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Images, Collection::Tracks, Collection::Projects];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Images => "images",
            Collection::Tracks => "tracks",
            Collection::Projects => "projects",
        }
    }

    pub fn resource(&self) -> ResourceName {
        match self {
            Collection::Images => ResourceName::Images,
            Collection::Tracks => ResourceName::Tracks,
            Collection::Projects => ResourceName::Projects,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<ResourceName> for Collection {
    type Error = CacheError;

    fn try_from(resource: ResourceName) -> Result<Self> {
        match resource {
            ResourceName::Images => Ok(Collection::Images),
            ResourceName::Tracks => Ok(Collection::Tracks),
            ResourceName::Projects => Ok(Collection::Projects),
            other => Err(CacheError::UnknownCollection(other.to_string())),
        }
    }
}

/// On-disk layout; a missing collection falls back to its default.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    images: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tracks: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    projects: Option<Vec<Value>>,
}

/// Fully resolved snapshot of every collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub images: Vec<Value>,
    pub tracks: Vec<Value>,
    pub projects: Vec<Value>,
}

impl CacheSnapshot {
    /// Bundled default dataset.
    pub fn defaults() -> Self {
        serde_json::from_str(BUNDLED_DEFAULTS).unwrap_or_else(|e| {
            warn!(error = %e, "Bundled cache defaults are invalid");
            Self::default()
        })
    }

    fn resolve(stored: StoredData) -> Self {
        let mut defaults = Self::defaults();
        Self {
            images: stored
                .images
                .unwrap_or_else(|| std::mem::take(&mut defaults.images)),
            tracks: stored
                .tracks
                .unwrap_or_else(|| std::mem::take(&mut defaults.tracks)),
            projects: stored
                .projects
                .unwrap_or_else(|| std::mem::take(&mut defaults.projects)),
        }
    }

    pub fn collection(&self, collection: Collection) -> &Vec<Value> {
        match collection {
            Collection::Images => &self.images,
            Collection::Tracks => &self.tracks,
            Collection::Projects => &self.projects,
        }
    }

    fn collection_mut(&mut self, collection: Collection) -> &mut Vec<Value> {
        match collection {
            Collection::Images => &mut self.images,
            Collection::Tracks => &mut self.tracks,
            Collection::Projects => &mut self.projects,
        }
    }
}

/// Local cache store
///
/// One instance per process, shared behind an `Arc`. Reads never fail: a
/// missing or unreadable blob yields the bundled defaults. Writes return
/// `Result` so callers decide whether a lost write matters.
pub struct CacheStore {
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    storage_key: String,
    events: Option<EventBus>,
    /// Serializes read-modify-write; holds the last issued id.
    write_lock: Mutex<i64>,
}

impl CacheStore {
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        storage_key: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            clock,
            storage_key: storage_key.into(),
            events: None,
            write_lock: Mutex::new(0),
        }
    }

    /// Publish cache events on `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    pub fn images(&self) -> CollectionHandle<'_, Image> {
        CollectionHandle::new(self, Collection::Images)
    }

    pub fn tracks(&self) -> CollectionHandle<'_, Track> {
        CollectionHandle::new(self, Collection::Tracks)
    }

    pub fn projects(&self) -> CollectionHandle<'_, Project> {
        CollectionHandle::new(self, Collection::Projects)
    }

    /// Every collection, with defaults filled in.
    pub async fn snapshot(&self) -> CacheSnapshot {
        self.load().await
    }

    /// Raw records of one collection.
    pub async fn get_collection(&self, collection: Collection) -> Vec<Value> {
        let mut snapshot = self.load().await;
        std::mem::take(snapshot.collection_mut(collection))
    }

    /// Overwrite one collection; siblings are written back unchanged.
    #[instrument(skip(self, items), fields(len = items.len()))]
    pub async fn save_collection(&self, collection: Collection, items: Vec<Value>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut snapshot = self.load_for_write().await?;
        *snapshot.collection_mut(collection) = items;
        self.persist(&snapshot).await?;
        self.collection_updated(collection, &snapshot);
        Ok(())
    }

    /// Append a record under a freshly assigned id.
    ///
    /// `fields` must be a JSON object; any `id` it carries is replaced.
    #[instrument(skip(self, fields))]
    pub async fn add_record(&self, collection: Collection, fields: Value) -> Result<Value> {
        let Value::Object(mut record) = fields else {
            return Err(CacheError::InvalidRecord {
                collection: collection.to_string(),
                message: "record must be a JSON object".to_string(),
            });
        };

        let mut last_id = self.write_lock.lock().await;
        let mut snapshot = self.load_for_write().await?;
        let items = snapshot.collection_mut(collection);

        let mut candidate = self.clock.unix_timestamp_millis().max(*last_id + 1);
        while items.iter().any(|item| record_id(item) == Some(candidate.to_string())) {
            candidate += 1;
        }
        *last_id = candidate;

        record.insert("id".to_string(), Value::String(candidate.to_string()));
        let record = Value::Object(record);
        items.push(record.clone());

        self.persist(&snapshot).await?;
        self.collection_updated(collection, &snapshot);
        debug!(collection = %collection, id = candidate, "Added record");
        Ok(record)
    }

    /// Merge `patch` into the record with `id`.
    ///
    /// Returns `None` without writing when no record has that id. The id
    /// itself is never changed by a patch.
    #[instrument(skip(self, patch))]
    pub async fn update_record(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
    ) -> Result<Option<Value>> {
        let Value::Object(patch) = patch else {
            return Err(CacheError::InvalidRecord {
                collection: collection.to_string(),
                message: "patch must be a JSON object".to_string(),
            });
        };

        let _guard = self.write_lock.lock().await;
        let mut snapshot = self.load_for_write().await?;
        let Some(record) = snapshot
            .collection_mut(collection)
            .iter_mut()
            .find(|item| record_id(item).as_deref() == Some(id))
        else {
            debug!(collection = %collection, id, "Update skipped, no such record");
            return Ok(None);
        };

        if let Value::Object(fields) = record {
            merge_fields(fields, patch);
        }
        let updated = record.clone();

        self.persist(&snapshot).await?;
        self.collection_updated(collection, &snapshot);
        Ok(Some(updated))
    }

    /// Remove the record with `id`; returns whether anything was removed.
    #[instrument(skip(self))]
    pub async fn delete_record(&self, collection: Collection, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut snapshot = self.load_for_write().await?;
        let items = snapshot.collection_mut(collection);
        let before = items.len();
        items.retain(|item| record_id(item).as_deref() != Some(id));
        if items.len() == before {
            return Ok(false);
        }

        self.persist(&snapshot).await?;
        self.collection_updated(collection, &snapshot);
        Ok(true)
    }

    /// Serialize the whole store.
    pub async fn export_json(&self) -> Result<String> {
        let snapshot = self.load().await;
        serde_json::to_string_pretty(&snapshot).map_err(|e| CacheError::Corrupt(e.to_string()))
    }

    /// Replace the whole store with an exported snapshot.
    ///
    /// The input is fully parsed and validated before anything is written,
    /// so a malformed file leaves the current data untouched.
    #[instrument(skip(self, json), fields(bytes = json.len()))]
    pub async fn import_json(&self, json: &str) -> Result<()> {
        let snapshot = parse_import(json)?;

        let _guard = self.write_lock.lock().await;
        self.persist(&snapshot).await?;
        info!(
            images = snapshot.images.len(),
            tracks = snapshot.tracks.len(),
            projects = snapshot.projects.len(),
            "Imported cache snapshot"
        );
        self.emit(CacheEvent::Imported {
            collections: Collection::ALL.len(),
        });
        Ok(())
    }

    /// Write the exported store to a file.
    pub async fn export_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = self.export_json().await?;
        tokio::fs::write(path.as_ref(), json).await?;
        Ok(())
    }

    /// Import a previously exported file.
    pub async fn import_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        self.import_json(&json).await
    }

    /// Drop stored data; the next read yields the bundled defaults.
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.storage.delete(&self.storage_key).await?;
        info!(key = %self.storage_key, "Cache reset to defaults");
        self.emit(CacheEvent::Reset);
        Ok(())
    }

    /// Snapshot for readers: any failure degrades to the defaults.
    async fn load(&self) -> CacheSnapshot {
        match self.load_for_write().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Cache read failed, using defaults");
                CacheSnapshot::defaults()
            }
        }
    }

    /// Snapshot for read-modify-write.
    ///
    /// A failed read is an error here: persisting defaults over a blob that
    /// could not be read would drop every sibling collection. A blob that
    /// reads but does not parse is already lost and yields the defaults.
    async fn load_for_write(&self) -> Result<CacheSnapshot> {
        let Some(raw) = self.storage.get_string(&self.storage_key).await? else {
            return Ok(CacheSnapshot::defaults());
        };

        match serde_json::from_str::<StoredData>(&raw) {
            Ok(stored) => Ok(CacheSnapshot::resolve(stored)),
            Err(e) => {
                warn!(error = %e, "Cached data is corrupt, using defaults");
                Ok(CacheSnapshot::defaults())
            }
        }
    }

    async fn persist(&self, snapshot: &CacheSnapshot) -> Result<()> {
        let json =
            serde_json::to_string(snapshot).map_err(|e| CacheError::Corrupt(e.to_string()))?;
        self.storage.set_string(&self.storage_key, &json).await?;
        Ok(())
    }

    fn collection_updated(&self, collection: Collection, snapshot: &CacheSnapshot) {
        self.emit(CacheEvent::CollectionUpdated {
            collection: collection.to_string(),
            len: snapshot.collection(collection).len(),
        });
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.events {
            let _ = bus.emit(CoreEvent::Cache(event));
        }
    }
}

fn record_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn merge_fields(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        if key != "id" {
            target.insert(key, value);
        }
    }
}

fn parse_import(json: &str) -> Result<CacheSnapshot> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| CacheError::Corrupt(format!("Invalid JSON: {}", e)))?;
    let Value::Object(mut root) = value else {
        return Err(CacheError::Corrupt(
            "Import must be a JSON object".to_string(),
        ));
    };

    let mut snapshot = CacheSnapshot::default();
    for collection in Collection::ALL {
        let items = match root.remove(collection.as_str()) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(CacheError::Corrupt(format!(
                    "{} must be an array",
                    collection
                )))
            }
        };
        if let Some(position) = items.iter().position(|item| record_id(item).is_none()) {
            return Err(CacheError::InvalidRecord {
                collection: collection.to_string(),
                message: format!("record {} has no id", position),
            });
        }
        *snapshot.collection_mut(collection) = items;
    }
    Ok(snapshot)
}

/// Typed view of one collection
pub struct CollectionHandle<'a, R> {
    store: &'a CacheStore,
    collection: Collection,
    _record: PhantomData<R>,
}

impl<'a, R: Record> CollectionHandle<'a, R> {
    fn new(store: &'a CacheStore, collection: Collection) -> Self {
        Self {
            store,
            collection,
            _record: PhantomData,
        }
    }

    /// Current records; entries that no longer match `R` are skipped.
    pub async fn get(&self) -> Vec<R> {
        self.store
            .get_collection(self.collection)
            .await
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(collection = %self.collection, error = %e, "Skipping unreadable cached record");
                    None
                }
            })
            .collect()
    }

    pub async fn save(&self, items: &[R]) -> Result<()> {
        let values = items
            .iter()
            .map(|item| serde_json::to_value(item).map_err(|e| self.invalid(e)))
            .collect::<Result<Vec<_>>>()?;
        self.store.save_collection(self.collection, values).await
    }

    /// Add a record built from `fields` (everything except the id).
    pub async fn add<F: Serialize>(&self, fields: &F) -> Result<R> {
        let fields = serde_json::to_value(fields).map_err(|e| self.invalid(e))?;
        let record = self.store.add_record(self.collection, fields).await?;
        serde_json::from_value(record).map_err(|e| self.invalid(e))
    }

    pub async fn update<P: Serialize>(&self, id: &str, patch: &P) -> Result<Option<R>> {
        let patch = serde_json::to_value(patch).map_err(|e| self.invalid(e))?;
        match self.store.update_record(self.collection, id, patch).await? {
            Some(record) => serde_json::from_value(record)
                .map(Some)
                .map_err(|e| self.invalid(e)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.store.delete_record(self.collection, id).await
    }

    fn invalid(&self, error: serde_json::Error) -> CacheError {
        CacheError::InvalidRecord {
            collection: self.collection.to_string(),
            message: error.to_string(),
        }
    }
}
