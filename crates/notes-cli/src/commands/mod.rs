//! CLI command implementations.

mod auth;
mod request;

pub use auth::{login, logout, refresh, status};
pub use request::request;
