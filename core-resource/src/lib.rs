//! # Resource Bindings
//!
//! Cache-first, self-refreshing views of API resources.
//!
//! A binding renders cached data immediately, revalidates it over the
//! network, and keeps it current from realtime pushes until unmounted.

pub mod binding;
pub mod data;
pub mod domain;
pub mod error;

pub use binding::{BindingContext, Reconcile, ResourceBinding};
pub use data::{ResourceData, ResourceState};
pub use domain::{CommentsBinding, TracksBinding};
pub use error::{ResourceError, Result};
