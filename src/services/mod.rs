pub mod health;

pub use health::{router, ComponentHealth, HealthResponse, HealthServer, HealthState, HealthStatus};
