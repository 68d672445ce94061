// Stencil Control Plane Library
// Decision: Shared library for binaries and integration tests

// Environment configuration and service wiring
pub mod config;
pub use config::ControlPlaneConfig;

// Services layer
pub mod services;
pub use services::TemplateService;

// Log subscriber setup
pub mod telemetry;
