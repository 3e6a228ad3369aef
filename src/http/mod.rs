//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, health endpoints)
//!     → [routing decision point plans the route and candidates]
//!     → request.rs (rewrite URI, strip hop-by-hop headers, add X-Forwarded-For)
//!     → [attempt loop forwards to admitted backends]
//!     → response.rs (relay upstream answer or map RouteError to a status)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
