//! imagestream-tags keeps the tags of `image.openshift.io/v1` image streams
//! resolved.
//!
//! A stream maps tag names to declared sources (`spec.tags`) and records what
//! each tag resolved to over time (`status.tags`). Writes to a stream go
//! through a [`strategy`] that authorizes cross-namespace sources, resolves
//! every changed tag into its history, keeps generations in step between spec
//! and status, and mirrors tracking tags. The [`registry`], [`mapping`] and
//! [`streamtag`] endpoints run those hooks on top of a [`store`], either
//! in-memory or backed by an API server.
//!
//! ```no_run
//! # async fn example(client: kube_client::Client) -> imagestream_tags::Result<()> {
//! use std::sync::Arc;
//! use imagestream_tags::{config::EnvRegistry, store::{KubeAccessReviewer, KubeStore}};
//!
//! let store = Arc::new(KubeStore::new(client.clone()));
//! let storage = imagestream_tags::config(EnvRegistry::default(), KubeAccessReviewer::new(client))
//!     .build(store.clone(), store);
//! let tag = storage.image_stream_tags.get("default", "ruby:latest").await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub use config::{config, Backoff, Builder, Storage};
pub mod error;
pub use error::{Error, Result};
pub mod mapping;
pub mod registry;
pub mod store;
pub mod strategy;
pub mod streamtag;
pub mod validation;

#[cfg(test)]
mod testing;
