//! Cold-start sequencing: decide whether the app opens on the home screen
//! or the login screen.

use tracing::{debug, info, warn};

use super::refresh::{RefreshCoordinator, RefreshOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Idle,
    CheckingToken,
    Authenticated,
    Unauthenticated,
}

/// First screen to show once bootstrap finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialRoute {
    Home,
    Login,
}

impl BootstrapState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BootstrapState::Authenticated | BootstrapState::Unauthenticated
        )
    }

    /// Only meaningful for terminal states; anything else routes to login.
    pub fn route(self) -> InitialRoute {
        match self {
            BootstrapState::Authenticated => InitialRoute::Home,
            _ => InitialRoute::Login,
        }
    }
}

pub struct BootstrapSequencer {
    coordinator: RefreshCoordinator,
    state: BootstrapState,
    last_outcome: Option<RefreshOutcome>,
}

impl BootstrapSequencer {
    pub fn new(coordinator: RefreshCoordinator) -> Self {
        Self {
            coordinator,
            state: BootstrapState::Idle,
            last_outcome: None,
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Refresh outcome that decided the terminal state, if a refresh ran
    pub fn last_outcome(&self) -> Option<&RefreshOutcome> {
        self.last_outcome.as_ref()
    }

    /// Drive the sequence to a terminal state. Calling again after that
    /// returns the same state without refreshing twice.
    pub async fn run(&mut self) -> BootstrapState {
        if self.state.is_terminal() {
            return self.state;
        }

        if self.coordinator.tokens().current_refresh_token().await.is_none() {
            info!("No refresh token stored, routing to login");
            self.state = BootstrapState::Unauthenticated;
            return self.state;
        }

        self.state = BootstrapState::CheckingToken;
        debug!("Refresh token found, attempting silent sign-in");

        let outcome = self.coordinator.request_refresh().await;
        self.state = match &outcome {
            RefreshOutcome::Success(_) => {
                info!("Silent sign-in succeeded");
                BootstrapState::Authenticated
            }
            RefreshOutcome::Rejected(status) => {
                info!(status = *status, "Stored session rejected, routing to login");
                BootstrapState::Unauthenticated
            }
            RefreshOutcome::NoRefreshTokenAvailable => BootstrapState::Unauthenticated,
            // Stored credentials stay put; a later launch with connectivity
            // may still sign in silently.
            RefreshOutcome::TransportError(cause) => {
                warn!(%cause, "Could not reach server, routing to login for this launch");
                BootstrapState::Unauthenticated
            }
        };
        self.last_outcome = Some(outcome);
        self.state
    }
}
