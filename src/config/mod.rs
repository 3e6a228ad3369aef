//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → resolved.rs (per-backend overrides folded into BackendSpec)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads + validates
//!     → server swaps in a freshly assembled runtime
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Overrides are resolved once per load, never per request

pub mod loader;
pub mod resolved;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use resolved::{BackendSpec, CircuitSettings, HealthSettings};
pub use schema::{
    BackendConfig, BackendHealthOverride, CircuitBreakerConfig, FeatureFlagsConfig,
    HealthCheckConfig, HeaderOverrideConfig, ListenerConfig, ObservabilityConfig, ProxyConfig,
    RouteConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
