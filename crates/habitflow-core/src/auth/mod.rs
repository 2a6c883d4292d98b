//! Authentication module for managing the user's session.
//!
//! This module provides:
//! - `CredentialStore`: durable storage of the token pair and user id
//! - `TokenState`: lazily loaded in-memory mirror of the stored session
//! - `RefreshCoordinator`: single-flight token renewal
//! - `BootstrapSequencer`: cold-start routing to home or login
//! - `AuthManager`: the owned session object wiring it all together
//!
//! Token staleness is never computed locally; it is discovered when the
//! server rejects a call.

pub mod bootstrap;
pub mod credentials;
pub mod manager;
pub mod refresh;
pub mod session;

pub use bootstrap::{BootstrapSequencer, BootstrapState, InitialRoute};
pub use credentials::{CredentialStore, FileCredentialStore, KeyringCredentialStore};
pub use manager::AuthManager;
pub use refresh::{RefreshCoordinator, RefreshError, RefreshOutcome, TokenRefresher};
pub use session::{Session, TokenPair, TokenState};
