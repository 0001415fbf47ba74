//! # apiinit
//!
//! Initialization gate for an API gateway built on Axum:
//!
//! - **Gate**: Every API action is refused with `ModuleInitWaiting` until a
//!   caller sends `api_action=APIBox.Init`
//! - **Parameter Router**: The init request carries `apisign.*` and
//!   `apiproxy.<alias>.*` settings that are applied to the signing
//!   validator and the proxy clients before the gate opens
//! - **Callbacks**: Procedures registered before initialization run once
//!   afterwards, off the request path
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Request ID → Trace → CORS → Init Gate)         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, ready, settings)                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  InitGate (phase, callbacks, parameter router)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middlewares (SignValidator, ProxyRegistry)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use apiinit::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config);
//!     state.on_initialized(|| println!("gateway configured"))?;
//!
//!     let app = build_router(state);
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! Then initialize it:
//! ```bash
//! curl -d api_action=APIBox.Init -d apisign.sign_key=s3cret localhost:3000/
//! ```

pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod targets;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use error::{ApiError, AppError, AppResult, GateError, Lang};
pub use gate::{Decision, INIT_ACTION, InitGate};
pub use middleware::InitGateLayer;
pub use routes::build_router;
pub use state::AppState;
pub use targets::{MiddlewareRegistry, ProxyClient, ProxyRegistry, SignValidator};
