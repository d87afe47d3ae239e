//! A process-local store with the same optimistic-concurrency rules as the
//! cluster, used by tests and by embedders without an API server.


use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use futures::{
    channel::mpsc,
    future::{self, BoxFuture},
    stream::{self, BoxStream},
    FutureExt, StreamExt,
};
use kube_core::WatchEvent;
use parking_lot::{Mutex, RwLock};

use super::{ImageStore, ImageStreamStore, QualifiedName};
use crate::{
    api::{now, Image, ImageStream},
    error::{Error, Result},
};

const STREAMS: &str = "imagestreams";
const IMAGES: &str = "images";

struct Watcher {
    namespace: Option<String>,
    name: Option<String>,
    sender: mpsc::UnboundedSender<Result<WatchEvent<ImageStream>>>,
}

#[derive(Default)]
pub struct MemoryStore {
    streams: RwLock<BTreeMap<QualifiedName, ImageStream>>,
    images: RwLock<BTreeMap<String, Image>>,
    version: AtomicU64,
    watchers: Mutex<Vec<Watcher>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a stream as-is, bypassing version checks. Returns the stored copy.
    pub fn insert(&self, mut stream: ImageStream) -> ImageStream {
        stream.metadata.resource_version = Some(self.next_version());
        let key = QualifiedName::from_resource(&stream);
        self.streams.write().insert(key, stream.clone());
        stream
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn notify(&self, key: &QualifiedName, event: WatchEvent<ImageStream>) {
        self.watchers.lock().retain(|watcher| {
            if !key.matches(watcher.namespace.as_deref(), watcher.name.as_deref()) {
                return !watcher.sender.is_closed();
            }
            watcher.sender.unbounded_send(Ok(event.clone())).is_ok()
        });
    }

    /// Watchers are notified before the lock is released, so they see writes
    /// in resource version order.
    fn write(&self, mut stream: ImageStream, status_only: bool) -> Result<ImageStream> {
        let key = QualifiedName::from_resource(&stream);
        let mut streams = self.streams.write();
        let Some(existing) = streams.get_mut(&key) else {
            return Err(Error::not_found(STREAMS, stream.name()));
        };
        if stream.metadata.resource_version != existing.metadata.resource_version {
            return Err(Error::conflict(
                STREAMS,
                stream.name(),
                "the object has been modified; please apply your changes to the latest version and try again",
            ));
        }
        if status_only {
            existing.status = stream.status;
        } else {
            stream.metadata.uid = existing.metadata.uid.clone();
            stream.metadata.creation_timestamp = existing.metadata.creation_timestamp.clone();
            *existing = stream;
        }
        existing.metadata.resource_version = Some(self.next_version());
        let stored = existing.clone();
        self.notify(&key, WatchEvent::Modified(stored.clone()));
        drop(streams);
        Ok(stored)
    }
}

impl ImageStreamStore for MemoryStore {
    fn get<'a>(&'a self, namespace: &'a str, name: &'a str) -> BoxFuture<'a, Result<ImageStream>> {
        let found = self
            .streams
            .read()
            .get(&QualifiedName::new(namespace, name))
            .cloned()
            .ok_or_else(|| Error::not_found(STREAMS, name));
        future::ready(found).boxed()
    }

    fn list<'a>(&'a self, namespace: Option<&'a str>) -> BoxFuture<'a, Result<Vec<ImageStream>>> {
        let streams = self
            .streams
            .read()
            .iter()
            .filter(|(key, _)| key.matches(namespace, None))
            .map(|(_, stream)| stream.clone())
            .collect();
        future::ready(Ok(streams)).boxed()
    }

    fn create(&self, mut stream: ImageStream) -> BoxFuture<'_, Result<ImageStream>> {
        let key = QualifiedName::from_resource(&stream);
        let mut streams = self.streams.write();
        if key.name.is_empty() {
            return future::ready(Err(Error::BadRequest("name is required".to_owned()))).boxed();
        }
        if streams.contains_key(&key) {
            return future::ready(Err(Error::already_exists(STREAMS, stream.name()))).boxed();
        }
        let version = self.next_version();
        stream.metadata.uid = Some(format!("{}-{}", key.name, version));
        stream.metadata.resource_version = Some(version);
        if stream.metadata.creation_timestamp.is_none() {
            stream.metadata.creation_timestamp = Some(now());
        }
        streams.insert(key.clone(), stream.clone());
        self.notify(&key, WatchEvent::Added(stream.clone()));
        drop(streams);
        future::ready(Ok(stream)).boxed()
    }

    fn update(&self, stream: ImageStream) -> BoxFuture<'_, Result<ImageStream>> {
        future::ready(self.write(stream, false)).boxed()
    }

    fn update_status(&self, stream: ImageStream) -> BoxFuture<'_, Result<ImageStream>> {
        future::ready(self.write(stream, true)).boxed()
    }

    fn delete<'a>(&'a self, namespace: &'a str, name: &'a str) -> BoxFuture<'a, Result<()>> {
        let key = QualifiedName::new(namespace, name);
        let mut streams = self.streams.write();
        let result = match streams.remove(&key) {
            Some(stream) => {
                self.notify(&key, WatchEvent::Deleted(stream));
                Ok(())
            }
            None => Err(Error::not_found(STREAMS, name)),
        };
        drop(streams);
        future::ready(result).boxed()
    }

    fn watch(
        &self,
        namespace: Option<String>,
        name: Option<String>,
    ) -> BoxStream<'static, Result<WatchEvent<ImageStream>>> {
        let (sender, receiver) = mpsc::unbounded();
        // the snapshot and the registration happen under the same lock so no write falls between them
        let streams = self.streams.read();
        let initial: Vec<_> = streams
            .iter()
            .filter(|(key, _)| key.matches(namespace.as_deref(), name.as_deref()))
            .map(|(_, stream)| Ok(WatchEvent::Added(stream.clone())))
            .collect();
        self.watchers.lock().push(Watcher {
            namespace,
            name,
            sender,
        });
        drop(streams);
        stream::iter(initial).chain(receiver).boxed()
    }
}

impl ImageStore for MemoryStore {
    fn get_image<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Image>> {
        let found = self
            .images
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(IMAGES, name));
        future::ready(found).boxed()
    }

    fn create_image(&self, mut image: Image) -> BoxFuture<'_, Result<Image>> {
        let mut images = self.images.write();
        let result = if images.contains_key(image.name()) {
            Err(Error::already_exists(IMAGES, image.name()))
        } else {
            image.metadata.resource_version = Some(self.next_version());
            if image.metadata.creation_timestamp.is_none() {
                image.metadata.creation_timestamp = Some(now());
            }
            images.insert(image.name().to_owned(), image.clone());
            Ok(image)
        };
        future::ready(result).boxed()
    }
}
