//! Shared application state for Axum handlers.
//!
//! The state owns the [`InitGate`] and, through it, the middlewares the gate
//! configures. The same `Arc<InitGate>` is handed to the
//! [`InitGateLayer`](crate::middleware::InitGateLayer) by
//! [`build_router`](crate::routes::build_router), so handlers, the layer and
//! callback registrants all observe one gate.
//!
//! # Lifecycle
//!
//! Post-init callbacks run on tasks tracked by the gate. Call `shutdown()`
//! before exit to let running callbacks finish.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::config::Config;
use crate::error::GateError;
use crate::gate::InitGate;
use crate::targets::{APIPROXY, APISIGN, MiddlewareRegistry, ProxyRegistry, SignValidator};

/// Shared application state for Axum handlers.
///
/// Cloned for each request handler; all data is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Initialization gate guarding the API
    pub gate: Arc<InitGate>,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Application configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Create state with the signing validator and proxy described by `config`.
    pub fn new(config: Config) -> Self {
        let middlewares = build_middlewares(&config);
        Self::with_middlewares(config, middlewares)
    }

    /// Create state gating the given middlewares.
    pub fn with_middlewares(config: Config, middlewares: MiddlewareRegistry) -> Self {
        let gate = Arc::new(InitGate::from_config(&config, middlewares));
        Self {
            gate,
            started_at: Instant::now(),
            config: Arc::new(config),
        }
    }

    /// Register a procedure to run once the gateway is initialized.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::AlreadyInitialized`] after initialization.
    pub fn on_initialized<F>(&self, callback: F) -> Result<(), GateError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.gate.add_callback(callback)
    }

    /// Seconds since the state was created.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Wait for post-init callbacks to finish.
    pub async fn shutdown(&self) {
        info!("Waiting for post-init callbacks to finish...");
        self.gate.shutdown().await;
        info!("Post-init callbacks finished");
    }
}

/// Build the middleware registry from configuration.
///
/// Registers a [`SignValidator`] under `apisign` and a [`ProxyRegistry`]
/// with one client per configured backend alias under `apiproxy`.
pub fn build_middlewares(config: &Config) -> MiddlewareRegistry {
    let sign = SignValidator::new(config.sign_key.clone(), !config.sign_disabled);
    let proxy = ProxyRegistry::with_aliases(config.proxy_backends.iter().cloned());

    info!(
        sign_enabled = sign.is_enabled(),
        backends = ?config.proxy_backends,
        "Registered gateway middlewares"
    );

    MiddlewareRegistry::new()
        .with(APISIGN, Arc::new(sign))
        .with(APIPROXY, Arc::new(proxy))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_build_middlewares_from_config() {
        let config = Config {
            sign_key: "k".to_string(),
            sign_disabled: true,
            proxy_backends: vec!["b1".to_string(), "b2".to_string()],
            ..Config::default()
        };

        let registry = build_middlewares(&config);
        let sign = registry.sign().unwrap();
        let proxy = registry.proxy().unwrap();

        assert!(!sign.is_enabled());
        assert_eq!(sign.sign_key(), "k");
        assert!(proxy.contains("b1"));
        assert!(proxy.contains("b2"));
        assert!(!proxy.contains("b3"));
    }

    #[test]
    fn test_state_honors_disabled_gate() {
        let state = AppState::new(Config {
            init_disabled: true,
            ..Config::default()
        });

        assert!(state.gate.is_disabled());
        assert!(state.gate.is_open());
    }

    #[tokio::test]
    async fn test_on_initialized_registers_callback() {
        let state = AppState::new(Config::default());
        let (tx, rx) = tokio::sync::oneshot::channel();

        state
            .on_initialized(move || {
                let _ = tx.send(());
            })
            .unwrap();
        state.gate.initialize(&Default::default()).unwrap();

        rx.await.unwrap();
        state.shutdown().await;
    }
}
