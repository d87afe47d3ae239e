//! Stores and reviewers backed by an API server.


use futures::{
    future::BoxFuture,
    stream::{self, BoxStream},
    FutureExt, StreamExt,
};
use k8s_openapi::api::authorization::v1::SubjectAccessReview;
use kube_client::{
    api::{DeleteParams, ListParams, PostParams},
    Api, Client,
};
use kube_core::WatchEvent;
use kube_runtime::watcher;

use super::{ImageStore, ImageStreamStore};
use crate::{
    api::{add_tag_event, Image, ImageStream, ImageStreamStatus, TagEvent},
    error::{Error, Result},
    strategy::SubjectAccessReviewer,
};

const STREAMS: &str = "imagestreams";
const IMAGES: &str = "images";

/// Status writes attempted after the main resource of a stream was written.
const STATUS_ATTEMPTS: usize = 3;

/// Persists streams and images as `image.openshift.io/v1` objects.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn streams(&self, namespace: Option<&str>) -> Api<ImageStream> {
        match namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }
}

impl ImageStreamStore for KubeStore {
    fn get<'a>(&'a self, namespace: &'a str, name: &'a str) -> BoxFuture<'a, Result<ImageStream>> {
        async move {
            self.streams(Some(namespace))
                .get(name)
                .await
                .map_err(|err| Error::from_kube(err, STREAMS, name))
        }
        .boxed()
    }

    fn list<'a>(&'a self, namespace: Option<&'a str>) -> BoxFuture<'a, Result<Vec<ImageStream>>> {
        async move {
            let list = self
                .streams(namespace)
                .list(&ListParams::default())
                .await
                .map_err(Error::Kube)?;
            Ok(list.items)
        }
        .boxed()
    }

    fn create(&self, stream: ImageStream) -> BoxFuture<'_, Result<ImageStream>> {
        async move {
            let api = self.streams(Some(stream.namespace()));
            create_stream(&api, &stream).await
        }
        .boxed()
    }

    fn update(&self, stream: ImageStream) -> BoxFuture<'_, Result<ImageStream>> {
        async move {
            let api = self.streams(Some(stream.namespace()));
            update_stream(&api, &stream).await
        }
        .boxed()
    }

    fn update_status(&self, stream: ImageStream) -> BoxFuture<'_, Result<ImageStream>> {
        async move { self.streams(Some(stream.namespace())).put_status(&stream).await }.boxed()
    }

    fn delete<'a>(&'a self, namespace: &'a str, name: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            self.streams(Some(namespace))
                .delete(name, &DeleteParams::default())
                .await
                .map_err(|err| Error::from_kube(err, STREAMS, name))?;
            Ok(())
        }
        .boxed()
    }

    fn watch(
        &self,
        namespace: Option<String>,
        name: Option<String>,
    ) -> BoxStream<'static, Result<WatchEvent<ImageStream>>> {
        let mut config = watcher::Config::default();
        if let Some(name) = &name {
            config = config.fields(&format!("metadata.name={name}"));
        }
        watcher(self.streams(namespace.as_deref()), config)
            .flat_map(|event| {
                let events = match event {
                    Ok(watcher::Event::Applied(stream)) => vec![Ok(WatchEvent::Modified(stream))],
                    Ok(watcher::Event::Deleted(stream)) => vec![Ok(WatchEvent::Deleted(stream))],
                    Ok(watcher::Event::Restarted(streams)) => streams
                        .into_iter()
                        .map(|stream| Ok(WatchEvent::Added(stream)))
                        .collect(),
                    Err(err) => vec![Err(Error::from(err))],
                };
                stream::iter(events)
            })
            .boxed()
    }
}

/// The calls `KubeStore` makes against the streams of one namespace.
trait StreamApi: Send + Sync {
    fn fetch<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<ImageStream>>;

    fn post<'a>(&'a self, stream: &'a ImageStream) -> BoxFuture<'a, Result<ImageStream>>;

    fn put<'a>(&'a self, stream: &'a ImageStream) -> BoxFuture<'a, Result<ImageStream>>;

    fn put_status<'a>(&'a self, stream: &'a ImageStream) -> BoxFuture<'a, Result<ImageStream>>;
}

impl StreamApi for Api<ImageStream> {
    fn fetch<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<ImageStream>> {
        async move {
            self.get(name)
                .await
                .map_err(|err| Error::from_kube(err, STREAMS, name))
        }
        .boxed()
    }

    fn post<'a>(&'a self, stream: &'a ImageStream) -> BoxFuture<'a, Result<ImageStream>> {
        async move {
            self.create(&PostParams::default(), stream)
                .await
                .map_err(|err| Error::from_kube(err, STREAMS, stream.name()))
        }
        .boxed()
    }

    fn put<'a>(&'a self, stream: &'a ImageStream) -> BoxFuture<'a, Result<ImageStream>> {
        async move {
            self.replace(stream.name(), &PostParams::default(), stream)
                .await
                .map_err(|err| Error::from_kube(err, STREAMS, stream.name()))
        }
        .boxed()
    }

    fn put_status<'a>(&'a self, stream: &'a ImageStream) -> BoxFuture<'a, Result<ImageStream>> {
        async move {
            let name = stream.name();
            let data = serde_json::to_vec(stream)
                .map_err(|err| Error::Internal(format!("unable to encode {name:?}: {err}")))?;
            self.replace_status(name, &PostParams::default(), data)
                .await
                .map_err(|err| Error::from_kube(err, STREAMS, name))
        }
        .boxed()
    }
}

async fn create_stream(api: &dyn StreamApi, stream: &ImageStream) -> Result<ImageStream> {
    let created = api.post(stream).await?;
    sync_status(api, created, &stream.status).await
}

async fn update_stream(api: &dyn StreamApi, stream: &ImageStream) -> Result<ImageStream> {
    let replaced = api.put(stream).await?;
    sync_status(api, replaced, &stream.status).await
}

/// Servers with a status subresource ignore status on the main resource, so
/// `status` follows through the subresource. Status writes that lose to a
/// concurrent status change are replayed onto the newer copy, but a
/// concurrent spec change stops the retry with the spec already saved.
async fn sync_status(
    api: &dyn StreamApi,
    written: ImageStream,
    status: &ImageStreamStatus,
) -> Result<ImageStream> {
    if written.status == *status {
        return Ok(written);
    }
    let base = written.status.clone();
    let mut target = written;
    target.status = status.clone();

    let mut attempts = 1;
    loop {
        let err = match api.put_status(&target).await {
            Ok(stored) => return Ok(stored),
            Err(err) if err.is_conflict() => err,
            Err(err) => return Err(err),
        };
        let fresh = api.fetch(target.name()).await?;
        if fresh.spec != target.spec || attempts == STATUS_ATTEMPTS {
            return Err(status_not_saved(&target, &err));
        }
        attempts += 1;
        log::debug!(
            "status of {}/{} changed concurrently, retrying",
            target.namespace(),
            target.name()
        );
        target = merge_status(fresh, &base, status);
    }
}

fn status_not_saved(stream: &ImageStream, err: &Error) -> Error {
    Error::Internal(format!(
        "spec of {}/{} was saved but its status was not: {err}",
        stream.namespace(),
        stream.name()
    ))
}

/// Replays the changes that lead from `base` to `desired` onto the status of
/// `fresh`.
fn merge_status(
    mut fresh: ImageStream,
    base: &ImageStreamStatus,
    desired: &ImageStreamStatus,
) -> ImageStream {
    fresh.status.docker_image_repository = desired.docker_image_repository.clone();
    fresh
        .status
        .tags
        .retain(|tag, _| desired.tags.contains_key(tag) || !base.tags.contains_key(tag));

    for (tag, history) in &desired.tags {
        let before = base.tags.get(tag);
        let added: Vec<&TagEvent> = history
            .items
            .iter()
            .filter(|event| before.map_or(true, |before| !before.items.contains(event)))
            .collect();
        let conditions_changed = before.map(|before| &before.conditions) != Some(&history.conditions);
        if added.is_empty() && !conditions_changed {
            continue;
        }
        // oldest first, so the newest ends up as head
        for event in added.into_iter().rev() {
            add_tag_event(&mut fresh, tag, event.clone());
        }
        fresh.status.tags.entry(tag.clone()).or_default().conditions = history.conditions.clone();
    }
    fresh
}

impl ImageStore for KubeStore {
    fn get_image<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Image>> {
        async move {
            Api::<Image>::all(self.client.clone())
                .get(name)
                .await
                .map_err(|err| Error::from_kube(err, IMAGES, name))
        }
        .boxed()
    }

    fn create_image(&self, image: Image) -> BoxFuture<'_, Result<Image>> {
        async move {
            Api::<Image>::all(self.client.clone())
                .create(&PostParams::default(), &image)
                .await
                .map_err(|err| Error::from_kube(err, IMAGES, image.name()))
        }
        .boxed()
    }
}

/// Submits reviews to `authorization.k8s.io/v1`.
#[derive(Clone)]
pub struct KubeAccessReviewer {
    client: Client,
}

impl KubeAccessReviewer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl SubjectAccessReviewer for KubeAccessReviewer {
    fn review(&self, review: SubjectAccessReview) -> BoxFuture<'_, Result<SubjectAccessReview>> {
        async move {
            Api::<SubjectAccessReview>::all(self.client.clone())
                .create(&PostParams::default(), &review)
                .await
                .map_err(|err| Error::from_kube(err, "subjectaccessreviews", ""))
        }
        .boxed()
    }
}
