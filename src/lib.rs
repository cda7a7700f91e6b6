pub mod access;
pub mod auth;
pub mod cache;
pub mod config;
pub mod entities;
pub mod error;
pub mod services;

pub use access::AccessControl;
pub use config::{AppConfig, AuthzConfig};
pub use error::{AuthzError, Result};
