//! Adapter RPC layer
//!
//! Talks to module adapter containers through exec sessions: one JSON
//! request on stdin, one JSON response on stdout. Project adapters require
//! a short-lived JWT signed with the module's shared secret.

pub mod auth;
pub mod cache;
pub mod client;
pub mod docker;
pub mod protocol;
pub mod transport;

pub use auth::{mint_token, AdapterAuthenticator, AdapterKey, TokenClaims};
pub use cache::AdapterClientCache;
pub use client::AdapterClient;
pub use docker::DockerTransport;
pub use protocol::{AdapterCommand, ProcessSettingsResponse};
pub use transport::RpcTransport;
