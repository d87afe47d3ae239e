//! The error taxonomy shared by every operation in this crate.

use kube_core::ErrorResponse;
use thiserror::Error;

use crate::validation::field::ErrorList;

/// Result alias defaulting to [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The referenced object does not exist.
    #[error("{resource} {name:?} not found")]
    NotFound { resource: &'static str, name: String },

    /// An object with the same identity has already been created.
    #[error("{resource} {name:?} already exists")]
    AlreadyExists { resource: &'static str, name: String },

    /// An optimistic-concurrency write lost against a newer version.
    #[error("operation cannot be fulfilled on {resource} {name:?}: {message}")]
    Conflict {
        resource: &'static str,
        name: String,
        message: String,
    },

    /// The object failed validation or authorization of one or more fields.
    #[error("{kind} {name:?} is invalid: {errors}")]
    Invalid {
        kind: &'static str,
        name: String,
        errors: ErrorList,
    },

    #[error("{0}")]
    BadRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// A request to the cluster failed in a way not covered above.
    #[error("kubernetes api error: {0}")]
    Kube(#[source] kube_client::Error),

    #[error("watch failed: {0}")]
    Watch(#[from] kube_runtime::watcher::Error),
}

impl Error {
    pub fn not_found(resource: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            name: name.into(),
        }
    }

    pub fn already_exists(resource: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource,
            name: name.into(),
        }
    }

    pub fn conflict(
        resource: &'static str,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            resource,
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn invalid(kind: &'static str, name: impl Into<String>, errors: ErrorList) -> Self {
        Self::Invalid {
            kind,
            name: name.into(),
            errors,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Kube(kube_client::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::AlreadyExists { .. } => true,
            Self::Kube(kube_client::Error::Api(resp)) => {
                resp.code == 409 && resp.reason == "AlreadyExists"
            }
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Kube(kube_client::Error::Api(resp)) => {
                resp.code == 409 && resp.reason != "AlreadyExists"
            }
            _ => false,
        }
    }

    /// The HTTP status code an API server would answer with.
    pub fn code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::AlreadyExists { .. } | Self::Conflict { .. } => 409,
            Self::Invalid { .. } => 422,
            Self::BadRequest(_) => 400,
            Self::Forbidden(_) => 403,
            Self::Kube(kube_client::Error::Api(resp)) => resp.code,
            Self::Internal(_) | Self::Kube(_) | Self::Watch(_) => 500,
        }
    }

    fn reason(&self) -> &str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::AlreadyExists { .. } => "AlreadyExists",
            Self::Conflict { .. } => "Conflict",
            Self::Invalid { .. } => "Invalid",
            Self::BadRequest(_) => "BadRequest",
            Self::Forbidden(_) => "Forbidden",
            Self::Kube(kube_client::Error::Api(resp)) => &resp.reason,
            Self::Internal(_) | Self::Kube(_) | Self::Watch(_) => "InternalError",
        }
    }

    /// Renders the error as a failure status body.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            status: "Failure".to_owned(),
            message: self.to_string(),
            reason: self.reason().to_owned(),
            code: self.code(),
        }
    }

    /// Translates a client error for the named object into the local taxonomy.
    pub(crate) fn from_kube(err: kube_client::Error, resource: &'static str, name: &str) -> Self {
        match err {
            kube_client::Error::Api(resp) if resp.code == 404 => Self::not_found(resource, name),
            kube_client::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                Self::already_exists(resource, name)
            }
            kube_client::Error::Api(resp) if resp.code == 409 => {
                Self::conflict(resource, name, resp.message)
            }
            kube_client::Error::Api(resp) if resp.code == 403 => Self::Forbidden(resp.message),
            other => Self::Kube(other),
        }
    }
}
