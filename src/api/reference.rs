use std::{fmt, str::FromStr};

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

/// Errors from parsing a [`DockerImageReference`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    /// invalid image reference format
    #[error("invalid reference format: {0:?}")]
    InvalidFormat(String),

    /// the reference has more path components than registry/namespace/name
    #[error("the docker pull spec {0:?} must be two or three segments separated by slashes")]
    TooManySegments(String),
}

/// Parsed Docker pull spec of the form `[registry/][namespace/]name[:tag][@id]`.
///
/// The first of two path components is taken as a registry when it contains a
/// dot or a colon, or is `localhost`. With three components the first is always
/// the registry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DockerImageReference {
    pub registry: String,
    pub namespace: String,
    pub name: String,
    pub tag: String,
    pub id: String,
}

lazy_static! {
    static ref COMPONENT: Regex = Regex::new("^[a-z0-9]+(?:(?:[._]|__|[-]*)[a-z0-9]+)*$").unwrap();
    static ref REGISTRY: Regex = Regex::new(concat!(
        "^",
        "(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])",
        "(?:\\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))*",
        "(?::[0-9]+)?",
        "$",
    ))
    .unwrap();
    static ref TAG: Regex = Regex::new("^[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,127}$").unwrap();
    static ref ID: Regex =
        Regex::new("^[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}$")
            .unwrap();
}

fn looks_like_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

impl DockerImageReference {
    /// Parse a pull spec.
    pub fn parse(spec: &str) -> Result<Self, ReferenceError> {
        let invalid = || ReferenceError::InvalidFormat(spec.to_owned());

        let (rest, id) = match spec.split_once('@') {
            Some((rest, id)) => {
                if !ID.is_match(id) {
                    return Err(invalid());
                }
                (rest, id)
            }
            None => (spec, ""),
        };

        // a colon after the last slash starts the tag; earlier ones belong to a registry port
        let last_slash = rest.rfind('/').map_or(0, |pos| pos + 1);
        let (repo, tag) = match rest[last_slash..].find(':') {
            Some(pos) => {
                let split = last_slash + pos;
                let tag = &rest[split + 1..];
                if !TAG.is_match(tag) {
                    return Err(invalid());
                }
                (&rest[..split], tag)
            }
            None => (rest, ""),
        };

        let parts: Vec<&str> = repo.split('/').collect();
        let (registry, namespace, name) = match parts.as_slice() {
            [name] => ("", "", *name),
            [first, name] if looks_like_registry(first) => (*first, "", *name),
            [namespace, name] => ("", *namespace, *name),
            [registry, namespace, name] => (*registry, *namespace, *name),
            _ => return Err(ReferenceError::TooManySegments(spec.to_owned())),
        };

        if !registry.is_empty() && !REGISTRY.is_match(registry) {
            return Err(invalid());
        }
        if !namespace.is_empty() && !COMPONENT.is_match(namespace) {
            return Err(invalid());
        }
        if !COMPONENT.is_match(name) {
            return Err(invalid());
        }

        Ok(Self {
            registry: registry.to_owned(),
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            tag: tag.to_owned(),
            id: id.to_owned(),
        })
    }

    /// The reference without its tag or id.
    pub fn as_repository(&self) -> Self {
        Self {
            tag: String::new(),
            id: String::new(),
            ..self.clone()
        }
    }

    /// The repository part, `[registry/][namespace/]name`.
    pub fn repository_name(&self) -> String {
        [
            self.registry.as_str(),
            self.namespace.as_str(),
            self.name.as_str(),
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
    }
}

impl FromStr for DockerImageReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DockerImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repository_name())?;
        if !self.tag.is_empty() {
            write!(f, ":{}", self.tag)?;
        }
        if !self.id.is_empty() {
            write!(f, "@{}", self.id)?;
        }
        Ok(())
    }
}
