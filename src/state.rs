//! Application state shared across handlers.
//!
//! Holds the loaded [`Config`] plus the external collaborator trait objects
//! (`Kv`, `Counter`, `Locker`, `Publisher`) the request-path control plane
//! depends on. Concrete drivers (Postgres, Redis, NATS, or anything else)
//! are the embedding service's concern; this toolkit only ever sees them
//! through `collaborators.rs`'s traits, so `AppState` carries `Option<Arc<dyn
//! ...>>` rather than any concrete pool type.

use std::sync::Arc;

use crate::authn::Authenticator;
use crate::authz::Authorizer;
use crate::collaborators::{Counter, Kv, Locker, Publisher};
use crate::config::Config;

/// Application state shared across handlers.
#[derive(Clone, Default)]
pub struct AppState {
    config: Arc<Config>,
    kv: Option<Arc<dyn Kv>>,
    counter: Option<Arc<dyn Counter>>,
    locker: Option<Arc<dyn Locker>>,
    publisher: Option<Arc<dyn Publisher>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl AppState {
    /// Create a new `AppState` with the given configuration and no
    /// collaborators wired in. Use [`AppState::builder`] to attach them.
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            kv: None,
            counter: None,
            locker: None,
            publisher: None,
            authenticator: None,
            authorizer: None,
        }
    }

    /// Create a new builder for `AppState`.
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn kv(&self) -> Option<&Arc<dyn Kv>> {
        self.kv.as_ref()
    }

    pub fn counter(&self) -> Option<&Arc<dyn Counter>> {
        self.counter.as_ref()
    }

    pub fn locker(&self) -> Option<&Arc<dyn Locker>> {
        self.locker.as_ref()
    }

    pub fn publisher(&self) -> Option<&Arc<dyn Publisher>> {
        self.publisher.as_ref()
    }

    pub fn authenticator(&self) -> Option<&Arc<dyn Authenticator>> {
        self.authenticator.as_ref()
    }

    pub fn authorizer(&self) -> Option<&Arc<dyn Authorizer>> {
        self.authorizer.as_ref()
    }
}

/// Builder for [`AppState`].
#[derive(Default)]
pub struct AppStateBuilder {
    config: Option<Config>,
    enable_tracing: bool,
    kv: Option<Arc<dyn Kv>>,
    counter: Option<Arc<dyn Counter>>,
    locker: Option<Arc<dyn Locker>>,
    publisher: Option<Arc<dyn Publisher>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl AppStateBuilder {
    /// Create a new builder. By default config falls back to
    /// `Config::default()` and tracing is auto-initialized on `build()`.
    pub fn new() -> Self {
        Self {
            config: None,
            enable_tracing: true,
            kv: None,
            counter: None,
            locker: None,
            publisher: None,
            authenticator: None,
            authorizer: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn kv(mut self, kv: Arc<dyn Kv>) -> Self {
        self.kv = Some(kv);
        self
    }

    pub fn counter(mut self, counter: Arc<dyn Counter>) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn locker(mut self, locker: Arc<dyn Locker>) -> Self {
        self.locker = Some(locker);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Enable automatic tracing initialization (default: enabled).
    pub fn with_tracing(mut self) -> Self {
        self.enable_tracing = true;
        self
    }

    /// Disable automatic tracing initialization, e.g. when the embedding
    /// service sets up its own subscriber first.
    pub fn without_tracing(mut self) -> Self {
        self.enable_tracing = false;
        self
    }

    fn init_tracing() {
        use std::sync::Once;
        static INIT: Once = Once::new();

        INIT.call_once(|| {
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .with_target(false)
                .init();
            tracing::debug!("tracing initialized with default configuration");
        });
    }

    /// Build the `AppState`, using a provided config or `Config::default()`.
    pub fn build(self) -> AppState {
        if self.enable_tracing {
            Self::init_tracing();
        }

        AppState {
            config: Arc::new(self.config.unwrap_or_default()),
            kv: self.kv,
            counter: self.counter,
            locker: self.locker,
            publisher: self.publisher,
            authenticator: self.authenticator,
            authorizer: self.authorizer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryKv;

    #[test]
    fn builder_defaults_to_default_config_with_no_collaborators() {
        let state = AppStateBuilder::new().without_tracing().build();
        assert_eq!(state.config().service.name, "meridian-service");
        assert!(state.kv().is_none());
    }

    #[test]
    fn builder_wires_in_a_provided_collaborator() {
        let kv: Arc<dyn Kv> = Arc::new(InMemoryKv::new());
        let state = AppStateBuilder::new().without_tracing().kv(kv).build();
        assert!(state.kv().is_some());
    }

    #[test]
    fn new_carries_the_given_config() {
        let mut config = Config::default();
        config.service.name = "orders-service".to_string();
        let state = AppState::new(config);
        assert_eq!(state.config().service.name, "orders-service");
    }

    #[test]
    fn builder_wires_in_an_authenticator_and_authorizer() {
        use crate::authn::InMemoryAuthenticator;
        use crate::authz::DenyAll;

        let authenticator: Arc<dyn Authenticator> = Arc::new(InMemoryAuthenticator::new());
        let authorizer: Arc<dyn Authorizer> = Arc::new(DenyAll);
        let state = AppStateBuilder::new()
            .without_tracing()
            .authenticator(authenticator)
            .authorizer(authorizer)
            .build();

        assert!(state.authenticator().is_some());
        assert!(state.authorizer().is_some());
    }
}
