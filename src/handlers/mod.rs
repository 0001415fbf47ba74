mod health;
mod settings;

pub use health::{health_check, readiness_check};
pub use settings::settings;
