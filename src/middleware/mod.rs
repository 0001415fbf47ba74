//! HTTP middleware for the initialization gate.
//!
//! - **Init Gate**: Rejects API traffic with `ModuleInitWaiting` until an
//!   `APIBox.Init` request configures the gateway
//! - **API Params**: Query and form parameter decoding shared by the gate
//!
//! # Architecture
//!
//! ```text
//! Request → Init Gate ──(open / bypass)──→ Handler → Response
//!               │
//!               ├── APIBox.Init → 200 {"CODE":"ok"}
//!               └── other       → 503 {"CODE":"ModuleInitWaiting"}
//! ```
//!
//! Request IDs, tracing and CORS come from `tower-http` and are wired in
//! [`build_router`](crate::routes::build_router).

pub mod init;
pub mod params;

pub use init::{DEFAULT_MAX_BODY_SIZE, InitGateLayer, InitGateService};
pub use params::{ACTION_PARAM, ApiParams, LANG_PARAM};
