//! HTTP surface: configuration, authentication, middleware, handlers, and
//! shutdown control.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use auth::{require_operator, PrincipalLayer, PrincipalService, TokenDecoder, OPERATOR_ROLE};
pub use config::*;
pub use handlers::AppState;
pub use middleware::{build_http_layers, build_tenancy_layers};
pub use module::NetworkModule;
pub use shutdown::*;
