use std::sync::Arc;

use anyhow::{Context, Result};
use shared::domain::Member;
use storage::{CredentialStore, KeyValueStore};
use tracing::info;

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod presentation;
pub mod repository;
pub mod session;

pub use backend::{HttpBackend, MemberBackend};
pub use config::{load_client_settings, load_client_settings_from, ClientSettings};
pub use dispatcher::{ActionOutcome, ConnectionAction, ConnectionDispatcher};
pub use error::{BackendError, ClientError, Surface};
pub use presentation::{affordances, Affordance, AffordanceKind, MemberCard};
pub use repository::RelationshipState;
pub use session::{SessionSnapshot, SessionStore};

/// Session and connection handling for one member, sharing a backend and a
/// credential store.
pub struct MemberClient {
    pub session: Arc<SessionStore>,
    pub connections: ConnectionDispatcher,
}

impl MemberClient {
    pub fn new(backend: Arc<dyn MemberBackend>, credentials: Arc<dyn KeyValueStore>) -> Self {
        let session = Arc::new(SessionStore::new(Arc::clone(&backend), credentials));
        let connections = ConnectionDispatcher::new(backend, Arc::clone(&session));
        Self {
            session,
            connections,
        }
    }

    pub async fn from_settings(settings: &ClientSettings) -> Result<Self> {
        let credentials = CredentialStore::open(&settings.credential_store_url)
            .await
            .with_context(|| {
                format!(
                    "failed to open credential store '{}'",
                    settings.credential_store_url
                )
            })?;
        let backend =
            HttpBackend::from_settings(settings).context("failed to build http client")?;
        info!(api_base_url = %settings.api_base_url, "member client ready");
        Ok(Self::new(Arc::new(backend), Arc::new(credentials)))
    }

    /// Restores a persisted session, if any. Safe to call repeatedly.
    pub async fn start(&self) -> Option<Member> {
        self.session.restore().await
    }

    pub async fn member_cards(&self) -> Result<Vec<MemberCard>, ClientError> {
        let directory = self.connections.load_directory().await?;
        Ok(self.cards(directory).await)
    }

    pub async fn network_cards(&self) -> Result<Vec<MemberCard>, ClientError> {
        let network = self.connections.load_network().await?;
        Ok(self.cards(network).await)
    }

    async fn cards(&self, members: Vec<(Member, RelationshipState)>) -> Vec<MemberCard> {
        let viewer = self.session.snapshot().await.viewer_id();
        members
            .iter()
            .map(|(member, state)| {
                let in_flight = viewer
                    .map(|viewer| self.connections.is_in_flight(viewer, member.id))
                    .unwrap_or(false);
                MemberCard::new(member, *state, in_flight)
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "tests/fake_backend.rs"]
pub(crate) mod fake_backend;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod session_tests;

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod dispatcher_tests;

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod backend_tests;
