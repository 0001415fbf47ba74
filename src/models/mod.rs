mod api;

pub use api::{ApiResponse, HealthResponse, ProxyClientSettings, SettingsResponse, SignSettings};
