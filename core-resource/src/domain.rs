//! Domain bindings
//!
//! Thin wrappers over [`ResourceBinding`] that fix the record type and add
//! per-resource reconciliation.

use crate::binding::{BindingContext, Reconcile, ResourceBinding};
use core_api::{Comment, Image, Project, RequestOptions, ResourceName, Track, ViewStats};
use std::cmp::Reverse;
use std::sync::Arc;

pub type TracksBinding = ResourceBinding<Vec<Track>>;
pub type CommentsBinding = ResourceBinding<Vec<Comment>>;

/// Tracks, painted from the cache.
///
/// An empty result never replaces a non-empty track list.
pub async fn tracks(ctx: BindingContext) -> TracksBinding {
    let keep_non_empty: Reconcile<Vec<Track>> = Arc::new(keep_non_empty);
    ResourceBinding::mount_with(
        ctx,
        ResourceName::Tracks,
        ResourceName::Tracks.endpoint(),
        RequestOptions::get(),
        Some(keep_non_empty),
    )
    .await
}

/// Comments, newest first.
pub async fn comments(ctx: BindingContext) -> CommentsBinding {
    let newest_first: Reconcile<Vec<Comment>> =
        Arc::new(|_: &Vec<Comment>, incoming: Vec<Comment>| newest_first(incoming));
    ResourceBinding::mount_with(
        ctx,
        ResourceName::Comments,
        ResourceName::Comments.endpoint(),
        RequestOptions::get(),
        Some(newest_first),
    )
    .await
}

pub async fn images(ctx: BindingContext) -> ResourceBinding<Vec<Image>> {
    ResourceBinding::mount(ctx, ResourceName::Images).await
}

pub async fn projects(ctx: BindingContext) -> ResourceBinding<Vec<Project>> {
    ResourceBinding::mount(ctx, ResourceName::Projects).await
}

pub async fn view_count(ctx: BindingContext) -> ResourceBinding<Option<ViewStats>> {
    ResourceBinding::mount(ctx, ResourceName::ViewCount).await
}

fn keep_non_empty(current: &Vec<Track>, incoming: Vec<Track>) -> Vec<Track> {
    if incoming.is_empty() && !current.is_empty() {
        current.clone()
    } else {
        incoming
    }
}

/// Stable sort by creation time, newest first; unparseable times sink.
pub(crate) fn newest_first(mut comments: Vec<Comment>) -> Vec<Comment> {
    comments.sort_by_key(|comment| Reverse(comment.created_at_millis().unwrap_or(i64::MIN)));
    comments
}
