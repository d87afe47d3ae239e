use std::env;

/// Supplies the host (and port) of the integrated registry, if there is one.
pub trait DefaultRegistry: Send + Sync {
    fn default_registry(&self) -> Option<String>;
}

/// Adapts a closure into a [`DefaultRegistry`].
pub struct DefaultRegistryFn<F>(pub F);

impl<F> DefaultRegistry for DefaultRegistryFn<F>
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn default_registry(&self) -> Option<String> {
        (self.0)()
    }
}

/// A registry location fixed at startup.
#[derive(Clone, Debug, Default)]
pub struct StaticRegistry(Option<String>);

impl StaticRegistry {
    pub fn new(host: &str) -> Self {
        Self(Some(host.to_owned()))
    }

    /// No integrated registry; streams only expose their external repository.
    pub fn none() -> Self {
        Self(None)
    }
}

impl DefaultRegistry for StaticRegistry {
    fn default_registry(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Reads the registry location from an environment variable on every call,
/// so a registry that comes up after startup is picked up.
#[derive(Clone, Debug)]
pub struct EnvRegistry {
    var: String,
}

impl EnvRegistry {
    pub const DEFAULT_VAR: &'static str = "OPENSHIFT_DEFAULT_REGISTRY";

    pub fn new(var: &str) -> Self {
        Self {
            var: var.to_owned(),
        }
    }
}

impl Default for EnvRegistry {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VAR)
    }
}

impl DefaultRegistry for EnvRegistry {
    fn default_registry(&self) -> Option<String> {
        env::var(&self.var).ok().filter(|value| !value.is_empty())
    }
}
