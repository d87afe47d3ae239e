//! Persistence contracts for image streams and images.
//!
//! Every stream is one record keyed by namespace and name; tag history is
//! embedded, so each tag write re-persists the whole stream. Updates are
//! optimistic: a write carrying a stale `metadata.resourceVersion` fails with
//! [`Error::Conflict`](crate::error::Error::Conflict).

use futures::{future::BoxFuture, stream::BoxStream};
use k8s_openapi::{apimachinery::pkg::apis::meta::v1::ObjectMeta, Metadata};
use kube_core::WatchEvent;

use crate::{
    api::{Image, ImageStream},
    error::Result,
    strategy::ImageStreamGetter,
};

pub mod cluster;
pub mod memory;

pub use cluster::{KubeAccessReviewer, KubeStore};
pub use memory::MemoryStore;

/// Uniquely identifies an object of a known type by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedName {
    /// The object namespace, if any
    pub namespace: Option<String>,
    /// The object name
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: Some(namespace.to_owned()).filter(|ns| !ns.is_empty()),
            name: name.to_owned(),
        }
    }

    pub fn from_resource<K: Metadata<Ty = ObjectMeta>>(resource: &K) -> Self {
        let meta = resource.metadata();
        Self::new(
            meta.namespace.as_deref().unwrap_or_default(),
            meta.name.as_deref().unwrap_or_default(),
        )
    }

    /// Whether this name falls under an optional namespace and name filter.
    pub fn matches(&self, namespace: Option<&str>, name: Option<&str>) -> bool {
        namespace.map_or(true, |ns| self.namespace.as_deref() == Some(ns))
            && name.map_or(true, |name| self.name == name)
    }
}

/// Storage of image streams.
pub trait ImageStreamStore: Send + Sync {
    fn get<'a>(&'a self, namespace: &'a str, name: &'a str) -> BoxFuture<'a, Result<ImageStream>>;

    /// All streams, or those of one namespace.
    fn list<'a>(&'a self, namespace: Option<&'a str>) -> BoxFuture<'a, Result<Vec<ImageStream>>>;

    /// Persists a new stream. Fails with `AlreadyExists` when the name is taken.
    fn create(&self, stream: ImageStream) -> BoxFuture<'_, Result<ImageStream>>;

    /// Replaces spec and status of an existing stream if its resource version
    /// still matches.
    fn update(&self, stream: ImageStream) -> BoxFuture<'_, Result<ImageStream>>;

    /// Like [`update`](Self::update) but only writes the status.
    fn update_status(&self, stream: ImageStream) -> BoxFuture<'_, Result<ImageStream>>;

    fn delete<'a>(&'a self, namespace: &'a str, name: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Changes to the matching streams, starting with an `Added` event for
    /// each stream that exists when the watch starts.
    fn watch(
        &self,
        namespace: Option<String>,
        name: Option<String>,
    ) -> BoxStream<'static, Result<WatchEvent<ImageStream>>>;
}

impl<S: ImageStreamStore + ?Sized> ImageStreamGetter for S {
    fn get_image_stream<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<ImageStream>> {
        self.get(namespace, name)
    }
}

/// Storage of cluster-scoped images.
pub trait ImageStore: Send + Sync {
    fn get_image<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Image>>;

    /// Persists a new image. Fails with `AlreadyExists` when the digest is known.
    fn create_image(&self, image: Image) -> BoxFuture<'_, Result<Image>>;
}
