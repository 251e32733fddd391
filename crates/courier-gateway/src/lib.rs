//! WebSocket gateway that authenticates clients by role and pushes events to them.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod publisher;
pub mod server;

pub use auth::{AuthError, CredentialVerifier, Principal, StaticTokenVerifier};
pub use client::ClientRegistry;
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use publisher::{Audience, Publisher};
pub use server::{start, start_with_metrics, GatewayHandle};
