use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use shared::{
    domain::{Member, MemberId},
    protocol::ConnectionActionRequest,
};
use tracing::{debug, info, warn};

use crate::{
    backend::MemberBackend,
    error::{BackendError, ClientError},
    repository::{self, RelationshipState},
    session::{SessionSnapshot, SessionStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionAction {
    Request,
    Accept,
    Cancel,
    /// Only offered on connected pairs; messaging itself lives elsewhere.
    Message,
}

impl fmt::Display for ConnectionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Request => "request",
            Self::Accept => "accept",
            Self::Cancel => "cancel",
            Self::Message => "message",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendCall {
    Request,
    Accept,
    Cancel,
}

impl BackendCall {
    /// State the pair is in once the backend has applied this call.
    fn settled_state(self) -> RelationshipState {
        match self {
            Self::Request => RelationshipState::PendingOutgoing,
            Self::Accept => RelationshipState::Connected,
            Self::Cancel => RelationshipState::Unconnected,
        }
    }
}

/// Checks `action` against the pair's current state and returns the backend
/// mutation it needs, if any.
fn plan_transition(
    viewer: MemberId,
    counterpart: MemberId,
    state: RelationshipState,
    action: ConnectionAction,
) -> Result<Option<BackendCall>, ClientError> {
    use ConnectionAction as A;
    use RelationshipState as S;

    let not_a_participant = || ClientError::NotAParticipant {
        viewer,
        counterpart,
        action,
    };

    match (state, action) {
        (S::Unconnected, A::Request) if viewer != counterpart => Ok(Some(BackendCall::Request)),
        (S::PendingIncoming, A::Accept) => Ok(Some(BackendCall::Accept)),
        (S::Connected, A::Accept) => Ok(None),
        (S::PendingOutgoing, A::Accept) | (S::Unconnected, A::Accept | A::Cancel) => {
            Err(not_a_participant())
        }
        (S::PendingIncoming | S::PendingOutgoing | S::Connected, A::Cancel) => {
            Ok(Some(BackendCall::Cancel))
        }
        (S::Connected, A::Message) => Ok(None),
        (state, action) => Err(ClientError::InvalidTransition { action, state }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub action: ConnectionAction,
    pub counterpart: Member,
    pub state: RelationshipState,
}

type PairKey = (MemberId, MemberId);

struct InFlightGuard {
    pairs: Arc<Mutex<HashSet<PairKey>>>,
    key: PairKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.pairs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Executes connection transitions for the session's member. Each action
/// re-reads the directory before and after the mutation; nothing is applied
/// optimistically.
pub struct ConnectionDispatcher {
    backend: Arc<dyn MemberBackend>,
    session: Arc<SessionStore>,
    in_flight: Arc<Mutex<HashSet<PairKey>>>,
}

impl ConnectionDispatcher {
    pub fn new(backend: Arc<dyn MemberBackend>, session: Arc<SessionStore>) -> Self {
        Self {
            backend,
            session,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_in_flight(&self, viewer: MemberId, counterpart: MemberId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(viewer, counterpart))
    }

    pub async fn request(&self, counterpart: MemberId) -> Result<ActionOutcome, ClientError> {
        self.dispatch(counterpart, ConnectionAction::Request).await
    }

    pub async fn accept(&self, counterpart: MemberId) -> Result<ActionOutcome, ClientError> {
        self.dispatch(counterpart, ConnectionAction::Accept).await
    }

    pub async fn cancel(&self, counterpart: MemberId) -> Result<ActionOutcome, ClientError> {
        self.dispatch(counterpart, ConnectionAction::Cancel).await
    }

    pub async fn message(&self, counterpart: MemberId) -> Result<ActionOutcome, ClientError> {
        self.dispatch(counterpart, ConnectionAction::Message).await
    }

    pub async fn dispatch(
        &self,
        counterpart_id: MemberId,
        action: ConnectionAction,
    ) -> Result<ActionOutcome, ClientError> {
        let session = self.session.snapshot().await;
        let viewer_id = session
            .viewer_id()
            .ok_or_else(|| ClientError::Unauthenticated("no verified member identity".into()))?;
        let _guard = self.begin(viewer_id, counterpart_id)?;

        let (viewer, before) = self.fetch_pair(&session, viewer_id, counterpart_id).await?;
        let current = repository::resolve(&viewer, &before);
        let call = plan_transition(viewer_id, counterpart_id, current, action)?;

        if let Some(call) = call {
            let token = self.session.access_token().await?;
            let request = ConnectionActionRequest {
                member_id: viewer_id,
                connection_id: counterpart_id,
            };
            let result = match call {
                BackendCall::Request => self.backend.request_connection(&token, request).await,
                BackendCall::Accept => self.backend.accept_connection(&token, request).await,
                BackendCall::Cancel => self.backend.cancel_connection(&token, request).await,
            };
            if let Err(err) = result {
                warn!(
                    viewer = viewer_id.0,
                    counterpart = counterpart_id.0,
                    %action,
                    %err,
                    "connection action failed"
                );
                return Err(self.failure(&session, err).await);
            }
            info!(
                viewer = viewer_id.0,
                counterpart = counterpart_id.0,
                %action,
                "connection action applied"
            );
        } else {
            debug!(
                viewer = viewer_id.0,
                counterpart = counterpart_id.0,
                %action,
                %current,
                "no backend call needed"
            );
        }

        let (viewer, counterpart) = match self.fetch_pair(&session, viewer_id, counterpart_id).await {
            Ok(pair) => pair,
            // The mutation already landed; only the follow-up read failed.
            Err(err @ (ClientError::TransientNetworkFailure(_) | ClientError::Rejected { .. })) => {
                let Some(call) = call else {
                    return Err(err);
                };
                warn!(
                    viewer = viewer_id.0,
                    counterpart = counterpart_id.0,
                    %action,
                    %err,
                    "connection action applied but refresh failed"
                );
                return Ok(ActionOutcome {
                    action,
                    counterpart: before,
                    state: call.settled_state(),
                });
            }
            Err(err) => return Err(err),
        };
        self.ensure_current(&session).await?;
        let state = repository::resolve(&viewer, &counterpart);
        Ok(ActionOutcome {
            action,
            counterpart,
            state,
        })
    }

    /// Every other member with the viewer's relationship to them.
    pub async fn load_directory(&self) -> Result<Vec<(Member, RelationshipState)>, ClientError> {
        let (viewer, members) = self.load_for_viewer().await?;
        Ok(repository::list_for_viewer(&viewer, &members))
    }

    /// Members the viewer is connected to or has a pending request with.
    pub async fn load_network(&self) -> Result<Vec<(Member, RelationshipState)>, ClientError> {
        let (viewer, members) = self.load_for_viewer().await?;
        Ok(repository::network_for_viewer(&viewer, &members))
    }

    async fn load_for_viewer(&self) -> Result<(Member, Vec<Member>), ClientError> {
        let session = self.session.snapshot().await;
        let viewer_id = session
            .viewer_id()
            .ok_or_else(|| ClientError::Unauthenticated("no verified member identity".into()))?;
        let members = self.fetch_members(&session).await?;
        self.ensure_current(&session).await?;
        let viewer = viewer_record(&session, &members, viewer_id);
        Ok((viewer, members))
    }

    fn begin(&self, viewer: MemberId, counterpart: MemberId) -> Result<InFlightGuard, ClientError> {
        let key = (viewer, counterpart);
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
        if !inserted {
            debug!(
                viewer = viewer.0,
                counterpart = counterpart.0,
                "suppressing duplicate connection action"
            );
            return Err(ClientError::ActionInFlight { counterpart });
        }
        Ok(InFlightGuard {
            pairs: Arc::clone(&self.in_flight),
            key,
        })
    }

    async fn fetch_members(&self, session: &SessionSnapshot) -> Result<Vec<Member>, ClientError> {
        match self.backend.fetch_profiles().await {
            Ok(members) => Ok(members),
            Err(err) => Err(self.failure(session, err).await),
        }
    }

    /// Maps a backend error, unless the session it was issued under is gone.
    async fn failure(&self, session: &SessionSnapshot, err: BackendError) -> ClientError {
        if let Err(stale) = self.ensure_current(session).await {
            return stale;
        }
        self.session.backend_failure(err, session.generation).await
    }

    async fn fetch_pair(
        &self,
        session: &SessionSnapshot,
        viewer_id: MemberId,
        counterpart_id: MemberId,
    ) -> Result<(Member, Member), ClientError> {
        let members = self.fetch_members(session).await?;
        let counterpart = repository::find_member(&members, counterpart_id)
            .cloned()
            .ok_or(ClientError::UnknownMember(counterpart_id))?;
        Ok((viewer_record(session, &members, viewer_id), counterpart))
    }

    async fn ensure_current(&self, started: &SessionSnapshot) -> Result<(), ClientError> {
        let now = self.session.snapshot().await;
        if now.generation != started.generation || now.viewer_id() != started.viewer_id() {
            debug!("discarding response for a superseded session");
            return Err(ClientError::SessionChanged);
        }
        Ok(())
    }
}

fn viewer_record(session: &SessionSnapshot, members: &[Member], viewer_id: MemberId) -> Member {
    if let Some(viewer) = repository::find_member(members, viewer_id) {
        return viewer.clone();
    }
    warn!(
        viewer = viewer_id.0,
        "viewer missing from member directory; resolving without edges"
    );
    session
        .identity
        .as_ref()
        .map(|identity| Member {
            connections: None,
            ..identity.clone()
        })
        .unwrap_or_else(|| Member::new(viewer_id, String::new()))
}
