use k8s_openapi::api::core::v1::ObjectReference;
use thiserror::Error;

use super::types::{KIND_DOCKER_IMAGE, KIND_IMAGE_STREAM_IMAGE, KIND_IMAGE_STREAM_TAG};

/// Why a `from` reference could not be turned into a [`TagSource`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("invalid from.kind {0:?}: it must be DockerImage, ImageStreamImage or ImageStreamTag")]
    InvalidKind(String),

    #[error("invalid from.name {name:?}: it must be of the form {form}")]
    InvalidName { name: String, form: &'static str },
}

/// A parsed, validated `from` of a spec tag.
///
/// Wire objects carry a free-form `kind` string; everything past parsing works
/// on this enum so an unknown kind cannot reach the resolver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TagSource {
    /// A literal pull spec copied into the history as is.
    DockerImage { pull_spec: String },
    /// The latest event of `tag` in `stream`.
    StreamTag {
        namespace: Option<String>,
        stream: String,
        tag: String,
    },
    /// A historical image of `stream`, selected by (a prefix of) its id.
    StreamImage {
        namespace: Option<String>,
        stream: String,
        id: String,
    },
}

impl TagSource {
    /// Parses `from`. Names without a stream part refer to `own_stream`.
    pub fn parse(from: &ObjectReference, own_stream: &str) -> Result<Self, SourceError> {
        let kind = from.kind.as_deref().unwrap_or_default();
        let name = from.name.as_deref().unwrap_or_default();
        let namespace = from
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .map(str::to_owned);

        match kind {
            KIND_DOCKER_IMAGE => {
                if name.is_empty() {
                    return Err(SourceError::InvalidName {
                        name: name.to_owned(),
                        form: "<pull spec>",
                    });
                }
                Ok(Self::DockerImage {
                    pull_spec: name.to_owned(),
                })
            }
            KIND_IMAGE_STREAM_TAG => {
                let (stream, tag) = split_stream_ref(name, ':', own_stream).ok_or_else(|| {
                    SourceError::InvalidName {
                        name: name.to_owned(),
                        form: "<tag> or <stream>:<tag>",
                    }
                })?;
                Ok(Self::StreamTag {
                    namespace,
                    stream,
                    tag,
                })
            }
            KIND_IMAGE_STREAM_IMAGE => {
                let (stream, id) = split_stream_ref(name, '@', own_stream).ok_or_else(|| {
                    SourceError::InvalidName {
                        name: name.to_owned(),
                        form: "<id> or <stream>@<id>",
                    }
                })?;
                Ok(Self::StreamImage {
                    namespace,
                    stream,
                    id,
                })
            }
            other => Err(SourceError::InvalidKind(other.to_owned())),
        }
    }

    /// The namespace the source lives in, falling back to `own_namespace`.
    pub fn namespace_or<'a>(&'a self, own_namespace: &'a str) -> &'a str {
        match self {
            Self::DockerImage { .. } => own_namespace,
            Self::StreamTag { namespace, .. } | Self::StreamImage { namespace, .. } => {
                namespace.as_deref().unwrap_or(own_namespace)
            }
        }
    }

    /// The stream this source reads from, if it reads from one.
    pub fn stream(&self) -> Option<&str> {
        match self {
            Self::DockerImage { .. } => None,
            Self::StreamTag { stream, .. } | Self::StreamImage { stream, .. } => Some(stream),
        }
    }
}

fn split_stream_ref(name: &str, separator: char, own_stream: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = name.split(separator).collect();
    match parts.as_slice() {
        [value] if !value.is_empty() => Some((own_stream.to_owned(), (*value).to_owned())),
        [stream, value] if !value.is_empty() => {
            let stream = if stream.is_empty() { own_stream } else { stream };
            Some((stream.to_owned(), (*value).to_owned()))
        }
        _ => None,
    }
}
