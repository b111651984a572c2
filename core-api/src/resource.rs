//! Synchronized resource catalogue
//!
//! Every data category the core keeps in sync, with the endpoint it is read
//! from and the transport that delivers its updates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shape of a resource's response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceShape {
    Array,
    Object,
}

/// Synchronized data category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceName {
    Images,
    Tracks,
    Projects,
    Comments,
    ViewCount,
}

impl ResourceName {
    pub const ALL: [ResourceName; 5] = [
        ResourceName::Images,
        ResourceName::Tracks,
        ResourceName::Projects,
        ResourceName::Comments,
        ResourceName::ViewCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceName::Images => "images",
            ResourceName::Tracks => "tracks",
            ResourceName::Projects => "projects",
            ResourceName::Comments => "comments",
            ResourceName::ViewCount => "view_count",
        }
    }

    /// API path the resource is fetched from
    pub fn endpoint(&self) -> &'static str {
        match self {
            ResourceName::Images => "/api/media/images",
            ResourceName::Tracks => "/api/media/tracks",
            ResourceName::Projects => "/api/media/projects",
            ResourceName::Comments => "/api/comments",
            ResourceName::ViewCount => "/api/stats/view",
        }
    }

    pub fn shape(&self) -> ResourceShape {
        match self {
            ResourceName::ViewCount => ResourceShape::Object,
            _ => ResourceShape::Array,
        }
    }

    /// Delivered over the shared polling channel
    pub fn is_polling(&self) -> bool {
        matches!(
            self,
            ResourceName::Images | ResourceName::Tracks | ResourceName::Projects
        )
    }

    /// Delivered over a dedicated push channel (change feed)
    pub fn is_push(&self) -> bool {
        matches!(self, ResourceName::Comments | ResourceName::ViewCount)
    }

    /// Held in the local cache store
    pub fn is_cached(&self) -> bool {
        self.is_polling()
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| format!("Unknown resource name: {}", s))
    }
}
