use super::Provider;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by [`ProviderStore`].
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// A provider with this name is already registered.
    #[error("provider already registered: {0}")]
    AlreadyRegistered(String),

    /// No provider is registered under this name.
    #[error("provider not found: {0}")]
    NotFound(String),
}

/// Name to provider mapping, filled during startup.
///
/// Registration needs `&mut self`, so once the store is shared behind a `&` or an
/// `Arc` it is frozen and lookups from many member loops need no locking.
#[derive(Default)]
pub struct ProviderStore {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyRegistered`] if `name` is taken.
    pub fn store(
        &mut self,
        name: impl Into<String>,
        provider: Arc<dyn Provider>,
    ) -> Result<(), StoreError> {
        let name = name.into();
        if self.providers.contains_key(&name) {
            return Err(StoreError::AlreadyRegistered(name));
        }
        self.providers.insert(name, provider);
        Ok(())
    }

    /// Returns the provider registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if nothing is registered under `name`.
    pub fn fetch(&self, name: &str) -> Result<Arc<dyn Provider>, StoreError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    /// Returns the number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns `true` if no provider is registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Iterates over the registered provider names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}

impl fmt::Debug for ProviderStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderStore")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderError, ProviderFuture, Request};

    struct Unavailable;

    impl Provider for Unavailable {
        fn issue<'a>(&'a self, _request: &'a Request) -> ProviderFuture<'a> {
            Box::pin(async { Err(ProviderError::Unavailable("down".into())) })
        }
    }

    #[test]
    fn store_then_fetch() {
        let mut store = ProviderStore::new();
        assert!(store.is_empty());
        store.store("vault", Arc::new(Unavailable)).unwrap();

        assert!(store.fetch("vault").is_ok());
        assert_eq!(store.len(), 1);
        assert_eq!(store.names().collect::<Vec<_>>(), vec!["vault"]);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut store = ProviderStore::new();
        store.store("vault", Arc::new(Unavailable)).unwrap();

        let err = store.store("vault", Arc::new(Unavailable)).unwrap_err();
        assert_eq!(err, StoreError::AlreadyRegistered("vault".into()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn fetch_unknown_name_fails() {
        let store = ProviderStore::new();
        assert_eq!(
            store.fetch("missing").err(),
            Some(StoreError::NotFound("missing".into()))
        );
    }
}
