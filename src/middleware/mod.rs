pub mod auth;
pub mod connection_limit;
pub mod webhook_signature;

// Re-export middleware functions
pub use auth::auth_middleware;
pub use connection_limit::{ClientIp, connection_limit_middleware};
pub use webhook_signature::webhook_signature_middleware;
