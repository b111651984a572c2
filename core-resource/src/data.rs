//! Shapes a binding can hold
//!
//! A list resource is held as `Vec<T>` and an object resource as
//! `Option<T>`. The shape decides how the body is fetched, how a pushed
//! payload is read, and whether the value round-trips through the cache.

use core_api::{ApiClient, ApiError, ApiResponse, RequestOptions};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;

pub trait ResourceData: Clone + Debug + Default + Send + Sync + 'static {
    fn fetch<'a>(
        api: &'a ApiClient,
        path: &'a str,
        options: RequestOptions,
    ) -> BoxFuture<'a, ApiResponse<Self>>;

    /// Read a pushed payload; `None` drops it.
    fn from_payload(payload: &Value) -> Option<Self>;

    /// Read cached records; `None` when the shape is not cacheable.
    fn from_cache(records: Vec<Value>) -> Option<Self>;

    /// Records to write back into the cache.
    fn to_cache(&self) -> Option<Vec<Value>>;

    fn is_empty(&self) -> bool;
}

impl<T> ResourceData for Vec<T>
where
    T: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static,
{
    fn fetch<'a>(
        api: &'a ApiClient,
        path: &'a str,
        options: RequestOptions,
    ) -> BoxFuture<'a, ApiResponse<Self>> {
        api.fetch_array::<T>(path, options).boxed()
    }

    fn from_payload(payload: &Value) -> Option<Self> {
        match payload {
            Value::Null => Some(Vec::new()),
            Value::Array(items) => parse_items(items.iter().cloned()),
            other => parse_items(std::iter::once(other.clone())),
        }
    }

    fn from_cache(records: Vec<Value>) -> Option<Self> {
        parse_items(records.into_iter())
    }

    fn to_cache(&self) -> Option<Vec<Value>> {
        self.iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .ok()
    }

    fn is_empty(&self) -> bool {
        Vec::is_empty(self)
    }
}

impl<T> ResourceData for Option<T>
where
    T: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static,
{
    fn fetch<'a>(
        api: &'a ApiClient,
        path: &'a str,
        options: RequestOptions,
    ) -> BoxFuture<'a, ApiResponse<Self>> {
        api.fetch_object::<T>(path, options).boxed()
    }

    fn from_payload(payload: &Value) -> Option<Self> {
        match payload {
            Value::Null => Some(None),
            Value::Object(_) => serde_json::from_value(payload.clone()).ok().map(Some),
            _ => None,
        }
    }

    fn from_cache(_records: Vec<Value>) -> Option<Self> {
        None
    }

    fn to_cache(&self) -> Option<Vec<Value>> {
        None
    }

    fn is_empty(&self) -> bool {
        self.is_none()
    }
}

/// Records that fail to parse are skipped rather than failing the batch.
fn parse_items<T: DeserializeOwned>(items: impl Iterator<Item = Value>) -> Option<Vec<T>> {
    Some(
        items
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
    )
}

/// Observable state of a binding
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState<D> {
    pub data: D,
    pub error: Option<ApiError>,
    pub loading: bool,
}

impl<D: ResourceData> ResourceState<D> {
    pub(crate) fn initial() -> Self {
        Self {
            data: D::default(),
            error: None,
            loading: true,
        }
    }

    /// Error worth surfacing: hidden while there is data to show.
    pub fn visible_error(&self) -> Option<&ApiError> {
        if self.data.is_empty() {
            self.error.as_ref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_api::{Track, ViewStats};
    use serde_json::json;

    #[test]
    fn test_list_payload_shapes() {
        let tracks = <Vec<Track>>::from_payload(&json!([{"id": 1, "title": "A"}])).unwrap();
        assert_eq!(tracks[0].id, "1");

        let single = <Vec<Track>>::from_payload(&json!({"id": "2", "title": "B"})).unwrap();
        assert_eq!(single.len(), 1);

        assert!(<Vec<Track>>::from_payload(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_object_payload_rejects_arrays() {
        assert!(<Option<ViewStats>>::from_payload(&json!([1, 2])).is_none());
        let stats = <Option<ViewStats>>::from_payload(&json!({"total": 7}))
            .unwrap()
            .unwrap();
        assert_eq!(stats.views, 7);
    }

    #[test]
    fn test_objects_are_not_cached() {
        assert!(<Option<ViewStats>>::from_cache(vec![json!({"views": 1})]).is_none());
        assert!(<Option<ViewStats>>::default().to_cache().is_none());
    }

    #[test]
    fn test_error_hidden_behind_data() {
        let mut state = ResourceState::<Vec<Track>>::initial();
        state.error = Some(ApiError::network("offline"));
        assert!(state.visible_error().is_some());

        state.data = <Vec<Track>>::from_payload(&json!([{"id": "1"}])).unwrap();
        assert!(state.visible_error().is_none());
    }
}
