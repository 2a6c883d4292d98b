//! Core library for the habitflow client.
//!
//! The interesting part lives in [`auth`]: durable credential storage, the
//! in-memory token state, single-flight token refresh and the cold-start
//! bootstrap. [`api`] wraps outgoing HTTP calls with the right bearer token,
//! and [`config`] resolves where everything lives on disk.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiError, AuthApi, AuthenticatingTransport};
pub use auth::{
    AuthManager, BootstrapSequencer, BootstrapState, CredentialStore, InitialRoute,
    RefreshCoordinator, RefreshOutcome, Session, TokenPair, TokenState,
};
pub use config::Config;
