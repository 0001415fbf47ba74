//! Middlewares configured by the initialization gate.
//!
//! The gate does not own these objects. They are registered with a
//! [`MiddlewareRegistry`] under fixed keys and looked up by the gate when the
//! initialization action arrives:
//!
//! | Key | Type | Settings prefix |
//! |---|---|---|
//! | `apisign` | [`SignValidator`] | `apisign.<setting>` |
//! | `apiproxy` | [`ProxyRegistry`] | `apiproxy.<alias>.<setting>` |
//!
//! Only the settings surface lives here. Signature verification and request
//! forwarding belong to the middlewares themselves.

mod proxy;
mod sign;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

pub use proxy::{ProxyClient, ProxyRegistry};
pub use sign::SignValidator;

/// Registry key of the signing validator.
pub const APISIGN: &str = "apisign";

/// Registry key of the reverse proxy.
pub const APIPROXY: &str = "apiproxy";

/// Named, type-erased middleware instances shared with the gate.
///
/// Built once at startup, immutable afterwards. Cloning is cheap.
#[derive(Clone, Default)]
pub struct MiddlewareRegistry {
    entries: Arc<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl MiddlewareRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `middleware` under `key`, replacing any previous entry.
    pub fn with<T>(mut self, key: &str, middleware: Arc<T>) -> Self
    where
        T: Any + Send + Sync,
    {
        Arc::make_mut(&mut self.entries).insert(key.to_string(), middleware);
        self
    }

    /// Look up the middleware registered under `key`.
    ///
    /// Returns `None` when nothing is registered under `key` or when the
    /// registered object is not a `T`.
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let entry = Arc::clone(self.entries.get(key)?);
        entry.downcast::<T>().ok()
    }

    /// Registered keys, unordered.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Signing validator registered under [`APISIGN`].
    pub fn sign(&self) -> Option<Arc<SignValidator>> {
        self.get(APISIGN)
    }

    /// Proxy registered under [`APIPROXY`].
    pub fn proxy(&self) -> Option<Arc<ProxyRegistry>> {
        self.get(APIPROXY)
    }
}

impl std::fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_key() {
        let sign = Arc::new(SignValidator::new("k", true));
        let registry = MiddlewareRegistry::new().with(APISIGN, Arc::clone(&sign));

        let found = registry.sign().unwrap();
        assert!(Arc::ptr_eq(&found, &sign));
        assert!(registry.proxy().is_none());
    }

    #[test]
    fn test_lookup_wrong_type_is_none() {
        let registry =
            MiddlewareRegistry::new().with(APIPROXY, Arc::new(SignValidator::new("", true)));

        assert!(registry.proxy().is_none());
        assert!(registry.get::<SignValidator>(APIPROXY).is_some());
    }

    #[test]
    fn test_clones_share_entries() {
        let registry = MiddlewareRegistry::new().with(APISIGN, Arc::new(SignValidator::default()));
        let copy = registry.clone().with(APIPROXY, Arc::new(ProxyRegistry::default()));

        // `with` on a clone must not leak into the original
        assert!(registry.proxy().is_none());
        assert!(copy.proxy().is_some());
        assert!(copy.sign().is_some());
    }
}
