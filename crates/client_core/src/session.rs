use std::sync::Arc;

use shared::{
    domain::{Member, MemberId, MemberProfile},
    protocol::{Credentials, Registration, TokenPair},
};
use storage::KeyValueStore;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::{
    backend::MemberBackend,
    error::{BackendError, ClientError},
};

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Point-in-time view of the session. `generation` changes whenever the
/// session is established or torn down, so work started under one
/// generation can tell that its result no longer applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub logged_in: bool,
    pub identity: Option<Member>,
    pub generation: u64,
}

impl SessionSnapshot {
    pub fn viewer_id(&self) -> Option<MemberId> {
        self.identity.as_ref().map(|member| member.id)
    }
}

#[derive(Default)]
struct SessionState {
    logged_in: bool,
    identity: Option<Member>,
    generation: u64,
    restore_attempted: bool,
}

impl SessionState {
    fn reset(&mut self) {
        self.logged_in = false;
        self.identity = None;
        self.generation += 1;
    }
}

pub struct SessionStore {
    backend: Arc<dyn MemberBackend>,
    credentials: Arc<dyn KeyValueStore>,
    state: RwLock<SessionState>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn MemberBackend>, credentials: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            credentials,
            state: RwLock::new(SessionState::default()),
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read().await;
        SessionSnapshot {
            logged_in: state.logged_in,
            identity: state.identity.clone(),
            generation: state.generation,
        }
    }

    pub async fn is_logged_in(&self) -> bool {
        self.state.read().await.logged_in
    }

    pub async fn identity(&self) -> Option<Member> {
        self.state.read().await.identity.clone()
    }

    /// The persisted pair, only when both halves are present.
    pub async fn stored_tokens(&self) -> Result<Option<TokenPair>, ClientError> {
        let access = self
            .credentials
            .get_value(ACCESS_TOKEN_KEY)
            .await
            .map_err(ClientError::storage)?;
        let refresh = self
            .credentials
            .get_value(REFRESH_TOKEN_KEY)
            .await
            .map_err(ClientError::storage)?;
        Ok(match (access, refresh) {
            (Some(access_token), Some(refresh_token)) => Some(TokenPair {
                access_token,
                refresh_token,
            }),
            _ => None,
        })
    }

    pub async fn access_token(&self) -> Result<String, ClientError> {
        self.credentials
            .get_value(ACCESS_TOKEN_KEY)
            .await
            .map_err(ClientError::storage)?
            .ok_or_else(|| ClientError::Unauthenticated("no stored access token".into()))
    }

    /// Start-up restoration. Verification runs at most once per store; a
    /// failure leaves the session logged out without reporting an error.
    pub async fn restore(&self) -> Option<Member> {
        {
            let mut state = self.state.write().await;
            if state.restore_attempted {
                return state.identity.clone();
            }
            state.restore_attempted = true;
        }

        let tokens = match self.stored_tokens().await {
            Ok(Some(tokens)) => tokens,
            Ok(None) => return None,
            Err(err) => {
                warn!(%err, "could not read stored credentials");
                return None;
            }
        };
        self.verify(&tokens.access_token).await.ok()
    }

    pub async fn verify(&self, access_token: &str) -> Result<Member, ClientError> {
        let generation = self.state.read().await.generation;

        let identity = match self.backend.verify_access_token(access_token).await {
            Ok(identity) => identity,
            Err(err) => {
                warn!(%err, "access token verification failed; clearing stored credentials");
                self.clear_if_current(generation).await;
                return Err(ClientError::Unauthenticated(err.to_string()));
            }
        };

        self.record_identity(generation, identity.clone()).await?;
        info!(member_id = identity.id.0, "access token verified");

        match self.backend.fetch_profile(access_token).await {
            Ok(profile) if profile.id == identity.id => {
                self.record_identity(generation, profile.clone()).await?;
                Ok(profile)
            }
            Ok(profile) => {
                warn!(
                    verified = identity.id.0,
                    profile = profile.id.0,
                    "profile belongs to a different member; keeping verified identity"
                );
                Ok(identity)
            }
            Err(err) => {
                warn!(%err, member_id = identity.id.0, "failed to fetch member profile");
                Ok(identity)
            }
        }
    }

    /// Marks the session logged in. Callers persist the token pair first;
    /// identity arrives through [`SessionStore::verify`].
    pub async fn login(&self) {
        let mut state = self.state.write().await;
        state.logged_in = true;
        state.generation += 1;
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        self.state.write().await.reset();
        self.credentials
            .remove_values(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY])
            .await
            .map_err(ClientError::storage)?;
        info!("logged out");
        Ok(())
    }

    /// Credential exchange followed by verification of the issued token.
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Member, ClientError> {
        let pair = self
            .backend
            .login(credentials)
            .await
            .map_err(|err| match err {
                BackendError::Unauthorized(message) => ClientError::InvalidCredentials(message),
                other => other.into(),
            })?;

        self.credentials
            .set_values(&[
                (ACCESS_TOKEN_KEY, pair.access_token.as_str()),
                (REFRESH_TOKEN_KEY, pair.refresh_token.as_str()),
            ])
            .await
            .map_err(ClientError::storage)?;
        self.login().await;
        self.verify(&pair.access_token).await
    }

    pub async fn register(&self, registration: &Registration) -> Result<Member, ClientError> {
        let member = self.backend.register(registration).await?;
        info!(member_id = member.id.0, "member registered");
        Ok(member)
    }

    pub async fn update_profile(&self, profile: &MemberProfile) -> Result<Member, ClientError> {
        let generation = self.state.read().await.generation;
        let token = self.access_token().await?;
        match self.backend.update_profile(&token, profile).await {
            Ok(member) => {
                self.record_identity(generation, member.clone()).await?;
                Ok(member)
            }
            Err(err) => Err(self.backend_failure(err, generation).await),
        }
    }

    /// Maps a backend failure observed during work that started under
    /// `generation`, tearing the session down on a rejected token.
    pub(crate) async fn backend_failure(&self, err: BackendError, generation: u64) -> ClientError {
        if matches!(err, BackendError::Unauthorized(_)) {
            warn!(%err, "backend rejected the access token; clearing session");
            self.clear_if_current(generation).await;
        }
        err.into()
    }

    async fn record_identity(&self, generation: u64, identity: Member) -> Result<(), ClientError> {
        let mut state = self.state.write().await;
        if state.generation != generation {
            return Err(ClientError::SessionChanged);
        }
        state.logged_in = true;
        state.identity = Some(identity);
        Ok(())
    }

    async fn clear_if_current(&self, generation: u64) {
        {
            let mut state = self.state.write().await;
            if state.generation != generation {
                return;
            }
            state.reset();
        }
        if let Err(err) = self
            .credentials
            .remove_values(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY])
            .await
        {
            error!(%err, "failed to erase stored credentials");
        }
    }
}
