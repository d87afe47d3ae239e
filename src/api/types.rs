use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::ObjectReference,
    apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time},
    chrono::Utc,
    ClusterResourceScope, NamespaceResourceScope,
};
use kube_core::TypeMeta;
use serde::{Deserialize, Serialize};

/// The API group serving image streams.
pub const GROUP_NAME: &str = "image.openshift.io";

/// The tag used when a mapping or lookup names none.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// `from.kind` of a tag pointing at an external pull spec.
pub const KIND_DOCKER_IMAGE: &str = "DockerImage";
/// `from.kind` of a tag pointing at another stream's tag.
pub const KIND_IMAGE_STREAM_TAG: &str = "ImageStreamTag";
/// `from.kind` of a tag pointing at an image recorded in a stream's history.
pub const KIND_IMAGE_STREAM_IMAGE: &str = "ImageStreamImage";

macro_rules! impl_resource {
    ($ty:ty, $kind:literal, $plural:literal, $scope:ty) => {
        impl k8s_openapi::Resource for $ty {
            const API_VERSION: &'static str = "image.openshift.io/v1";
            const GROUP: &'static str = GROUP_NAME;
            const KIND: &'static str = $kind;
            const VERSION: &'static str = "v1";
            const URL_PATH_SEGMENT: &'static str = $plural;
            type Scope = $scope;
        }

        impl k8s_openapi::Metadata for $ty {
            type Ty = ObjectMeta;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

pub(crate) fn type_meta<K: k8s_openapi::Resource>() -> Option<TypeMeta> {
    Some(TypeMeta {
        api_version: K::API_VERSION.to_owned(),
        kind: K::KIND.to_owned(),
    })
}

/// The current time as an API timestamp.
pub fn now() -> Time {
    Time(Utc::now())
}

/// A namespaced mapping from tag names to resolved image references,
/// with a change-tracked history per tag.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageStream {
    #[serde(flatten, default)]
    pub types: Option<TypeMeta>,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ImageStreamSpec,
    #[serde(default)]
    pub status: ImageStreamStatus,
}

impl_resource!(ImageStream, "ImageStream", "imagestreams", NamespaceResourceScope);

impl ImageStream {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            types: type_meta::<Self>(),
            metadata: ObjectMeta {
                namespace: Some(namespace.to_owned()),
                name: Some(name.to_owned()),
                ..ObjectMeta::default()
            },
            ..Self::default()
        }
    }

    /// Adds a spec tag, builder style.
    pub fn with_tag(mut self, tag: &str, tag_ref: TagReference) -> Self {
        self.spec.tags.insert(tag.to_owned(), tag_ref);
        self
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// The stream generation, zero when it was never assigned.
    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }

    pub fn set_generation(&mut self, generation: i64) {
        self.metadata.generation = Some(generation);
    }

    pub fn creation_timestamp(&self) -> Option<&Time> {
        self.metadata.creation_timestamp.as_ref()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamSpec {
    /// Legacy external repository this stream mirrors.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docker_image_repository: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, TagReference>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamStatus {
    /// Computed pull location of this stream, never set by clients.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docker_image_repository: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, TagEventList>,
}

/// The declared source of a spec tag.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagReference {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ObjectReference>,
    /// Marks a `DockerImage` source as a pure alias. Every `DockerImage` source
    /// is resolved inline either way, so the flag only round-trips.
    #[serde(default)]
    pub reference: bool,
    /// `None` until assigned; `Some(0)` asks for the tag to be resolved again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
    #[serde(default)]
    pub import_policy: TagImportPolicy,
}

impl TagReference {
    /// A tag pointing at `kind`/`name`, optionally in another namespace.
    pub fn from_kind(kind: &str, name: &str, namespace: Option<&str>) -> Self {
        Self {
            from: Some(ObjectReference {
                kind: Some(kind.to_owned()),
                name: Some(name.to_owned()),
                namespace: namespace.map(str::to_owned),
                ..ObjectReference::default()
            }),
            ..Self::default()
        }
    }

    pub fn docker_image(pull_spec: &str) -> Self {
        Self::from_kind(KIND_DOCKER_IMAGE, pull_spec, None)
    }

    pub fn stream_tag(name: &str, namespace: Option<&str>) -> Self {
        Self::from_kind(KIND_IMAGE_STREAM_TAG, name, namespace)
    }

    pub fn stream_image(name: &str, namespace: Option<&str>) -> Self {
        Self::from_kind(KIND_IMAGE_STREAM_IMAGE, name, namespace)
    }

    pub fn from_name(&self) -> &str {
        self.from
            .as_ref()
            .and_then(|from| from.name.as_deref())
            .unwrap_or_default()
    }

    pub fn from_kind_str(&self) -> &str {
        self.from
            .as_ref()
            .and_then(|from| from.kind.as_deref())
            .unwrap_or_default()
    }

    pub fn from_namespace(&self) -> &str {
        self.from
            .as_ref()
            .and_then(|from| from.namespace.as_deref())
            .unwrap_or_default()
    }
}

/// Hints for the periodic importer, which lives outside this crate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagImportPolicy {
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub scheduled: bool,
}

/// One resolution recorded in a tag's history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagEvent {
    pub created: Time,
    pub docker_image_reference: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub generation: i64,
}

impl TagEvent {
    /// An event created now, without a generation.
    pub fn new(docker_image_reference: &str, image: &str) -> Self {
        Self {
            created: now(),
            docker_image_reference: docker_image_reference.to_owned(),
            image: image.to_owned(),
            generation: 0,
        }
    }
}

/// A tag's history, most recent first, plus resolution failures.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagEventList {
    #[serde(default)]
    pub items: Vec<TagEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<TagEventCondition>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagEventConditionType {
    ImportSuccess,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagEventCondition {
    #[serde(rename = "type")]
    pub type_: TagEventConditionType,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub generation: i64,
}

/// An immutable, content-addressed image. Its name is its digest.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(flatten, default)]
    pub types: Option<TypeMeta>,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub docker_image_reference: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docker_image_manifest: String,
}

impl_resource!(Image, "Image", "images", ClusterResourceScope);

impl Image {
    pub fn new(name: &str, docker_image_reference: &str) -> Self {
        Self {
            types: type_meta::<Self>(),
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..ObjectMeta::default()
            },
            docker_image_reference: docker_image_reference.to_owned(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }
}

/// Appends an image to a stream tag without going through a spec tag.
///
/// The target stream is `metadata.name`, or else the stream whose repository
/// equals `docker_image_repository`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamMapping {
    #[serde(flatten, default)]
    pub types: Option<TypeMeta>,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docker_image_repository: String,
    pub image: Image,
    #[serde(default)]
    pub tag: String,
}

impl_resource!(
    ImageStreamMapping,
    "ImageStreamMapping",
    "imagestreammappings",
    NamespaceResourceScope
);

impl ImageStreamMapping {
    pub fn new(namespace: &str, stream: &str, tag: &str, image: Image) -> Self {
        Self {
            types: type_meta::<Self>(),
            metadata: ObjectMeta {
                namespace: Some(namespace.to_owned()),
                name: Some(stream.to_owned()),
                ..ObjectMeta::default()
            },
            docker_image_repository: String::new(),
            image,
            tag: tag.to_owned(),
        }
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }
}

/// The image currently behind `<stream>:<tag>`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamTag {
    #[serde(flatten, default)]
    pub types: Option<TypeMeta>,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<TagReference>,
    #[serde(default)]
    pub generation: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<TagEventCondition>,
    #[serde(default)]
    pub image: Image,
}

impl_resource!(
    ImageStreamTag,
    "ImageStreamTag",
    "imagestreamtags",
    NamespaceResourceScope
);

impl ImageStreamTag {
    /// An otherwise empty tag object carrying only its identity.
    pub fn named(namespace: &str, name: &str) -> Self {
        Self {
            types: type_meta::<Self>(),
            metadata: ObjectMeta {
                namespace: Some(namespace.to_owned()),
                name: Some(name.to_owned()),
                ..ObjectMeta::default()
            },
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }
}
