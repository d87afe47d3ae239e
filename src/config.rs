use std::{sync::Arc, time::Duration};

use crate::{
    mapping::ImageStreamMappingRest,
    registry::ImageStreamRegistry,
    store::{ImageStore, ImageStreamStore},
    strategy::{ImageStreamGetter, LimitVerifier, NoLimits, Strategy, SubjectAccessReviewer},
    streamtag::ImageStreamTagRest,
};

mod registry;
pub use registry::*;

/// Exponential backoff between attempts of an optimistic write.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    /// Total attempts, including the first one.
    pub steps: u32,
    /// The delay before the second attempt.
    pub duration: Duration,
    pub factor: f64,
    /// Upper bound on a single delay.
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            steps: 10,
            duration: Duration::from_millis(10),
            factor: 2.0,
            cap: Duration::from_secs(1),
        }
    }
}

impl Backoff {
    /// `steps` attempts with no delay in between.
    pub fn immediate(steps: u32) -> Self {
        Self {
            steps,
            duration: Duration::ZERO,
            factor: 1.0,
            cap: Duration::ZERO,
        }
    }

    /// The delays to sleep before each attempt after the first.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let Self {
            steps,
            duration,
            factor,
            cap,
        } = *self;
        (1..steps).scan(duration, move |next, _| {
            let current = (*next).min(cap);
            *next = next.mul_f64(factor).min(cap);
            Some(current)
        })
    }
}

/// Collaborators and tunables shared by every storage built from it.
pub struct Builder {
    default_registry: Arc<dyn DefaultRegistry>,
    reviewer: Arc<dyn SubjectAccessReviewer>,
    limit_verifier: Arc<dyn LimitVerifier>,
    backoff: Backoff,
}

impl Builder {
    /// Sets the admission check run before every write. Defaults to [`NoLimits`].
    pub fn with_limit_verifier(mut self, limit_verifier: impl LimitVerifier + 'static) -> Self {
        self.limit_verifier = Arc::new(limit_verifier);
        self
    }

    /// Sets the retry schedule of image stream mapping writes.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// The strategy that will be wired into the built storage.
    pub fn strategy(&self, getter: Arc<dyn ImageStreamGetter>) -> Strategy {
        Strategy::new(
            Arc::clone(&self.default_registry),
            Arc::clone(&self.reviewer),
            Arc::clone(&self.limit_verifier),
            getter,
        )
    }

    /// Wires the image stream, mapping and tag endpoints on top of the stores.
    pub fn build<S>(self, streams: Arc<S>, images: Arc<dyn ImageStore>) -> Storage
    where
        S: ImageStreamStore + 'static,
    {
        let strategy = self.strategy(Arc::clone(&streams) as Arc<dyn ImageStreamGetter>);
        let image_streams = Arc::new(ImageStreamRegistry::new(streams, strategy));
        Storage {
            image_stream_mappings: ImageStreamMappingRest::new(
                Arc::clone(&images),
                Arc::clone(&image_streams),
                self.backoff,
            ),
            image_stream_tags: ImageStreamTagRest::new(images, Arc::clone(&image_streams)),
            image_streams,
        }
    }
}

/// Starts a [`Builder`] from the two collaborators every deployment must provide.
pub fn config(
    default_registry: impl DefaultRegistry + 'static,
    reviewer: impl SubjectAccessReviewer + 'static,
) -> Builder {
    Builder {
        default_registry: Arc::new(default_registry),
        reviewer: Arc::new(reviewer),
        limit_verifier: Arc::new(NoLimits),
        backoff: Backoff::default(),
    }
}

/// The endpoints backed by one pair of stores.
pub struct Storage {
    pub image_streams: Arc<ImageStreamRegistry>,
    pub image_stream_mappings: ImageStreamMappingRest,
    pub image_stream_tags: ImageStreamTagRest,
}
