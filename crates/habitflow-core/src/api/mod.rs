//! REST API module for the habitflow service.
//!
//! This module provides the `AuthenticatingTransport` every outgoing call
//! goes through, and `AuthApi` for the sign-in, sign-up, refresh, logout
//! and password-reset endpoints.
//!
//! The API uses bearer token authentication; the refresh endpoint takes the
//! refresh token, everything else the access token.

pub mod client;
pub mod error;
pub mod models;
pub mod transport;

pub use client::AuthApi;
pub use error::ApiError;
pub use models::{AuthResponse, User};
pub use transport::{AuthenticatingTransport, CredentialClass, REFRESH_PATH};
