use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{ConnectionEdge, Member, MemberId, MemberProfile},
    protocol::{ConnectionActionRequest, Credentials, Registration, TokenPair},
};
use storage::MemoryStore;
use tokio::sync::Semaphore;

use crate::{backend::MemberBackend, error::BackendError, MemberClient};

pub(crate) const PASSWORD: &str = "password";

#[derive(Default)]
struct Directory {
    members: BTreeMap<MemberId, Member>,
    revoked: HashSet<String>,
    fail_next_action: Option<BackendError>,
    fail_refresh_after_action: Option<BackendError>,
    fail_next_listing: Option<BackendError>,
    fail_profile: bool,
}

/// In-memory backend keeping two-sided edges, with hooks for holding,
/// failing and counting calls.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    directory: Mutex<Directory>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    pub(crate) actions_started: AtomicUsize,
    pub(crate) actions_applied: AtomicUsize,
    pub(crate) verify_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub(crate) fn with_members(names: &[(i64, &str)]) -> Arc<Self> {
        let backend = Self::default();
        {
            let mut directory = backend.directory.lock().unwrap();
            for (id, name) in names {
                let member = Member {
                    member_profile: Some(MemberProfile {
                        name: Some(name.to_string()),
                        ..MemberProfile::default()
                    }),
                    connections: Some(Vec::new()),
                    ..Member::new(MemberId(*id), name.to_lowercase())
                };
                directory.members.insert(member.id, member);
            }
        }
        Arc::new(backend)
    }

    pub(crate) fn revoke_token(&self, token: &str) {
        self.directory.lock().unwrap().revoked.insert(token.to_string());
    }

    pub(crate) fn fail_next_action(&self, err: BackendError) {
        self.directory.lock().unwrap().fail_next_action = Some(err);
    }

    /// Fails the first directory listing after the next applied mutation.
    pub(crate) fn fail_refresh_after_next_action(&self, err: BackendError) {
        self.directory.lock().unwrap().fail_refresh_after_action = Some(err);
    }

    pub(crate) fn fail_profile_fetches(&self) {
        self.directory.lock().unwrap().fail_profile = true;
    }

    /// Overwrites `owner`'s edge list directly, bypassing the mirror.
    pub(crate) fn set_edges(&self, owner: i64, edges: Vec<ConnectionEdge>) {
        let mut directory = self.directory.lock().unwrap();
        if let Some(member) = directory.members.get_mut(&MemberId(owner)) {
            member.connections = Some(edges);
        }
    }

    /// Holds every connection mutation until permits are added.
    pub(crate) fn hold_actions(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub(crate) async fn wait_for_started_actions(&self, count: usize) {
        for _ in 0..200 {
            if self.actions_started.load(Ordering::SeqCst) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} connection actions to start");
    }

    fn member_for_token(&self, token: &str) -> Result<Member, BackendError> {
        let directory = self.directory.lock().unwrap();
        if directory.revoked.contains(token) {
            return Err(BackendError::Unauthorized("token has been revoked".into()));
        }
        token
            .strip_prefix("access-")
            .and_then(|id| id.parse::<i64>().ok())
            .and_then(|id| directory.members.get(&MemberId(id)).cloned())
            .ok_or_else(|| BackendError::Unauthorized("invalid access token".into()))
    }

    async fn mutate(
        &self,
        token: &str,
        request: ConnectionActionRequest,
        apply: impl FnOnce(&mut Directory, MemberId, MemberId),
    ) -> Result<(), BackendError> {
        self.actions_started.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate open").forget();
        }

        let actor = self.member_for_token(token)?;
        let mut directory = self.directory.lock().unwrap();
        if let Some(err) = directory.fail_next_action.take() {
            return Err(err);
        }
        if actor.id != request.member_id {
            return Err(BackendError::Status {
                status: 403,
                message: "cannot act on behalf of another member".into(),
            });
        }
        apply(&mut directory, request.member_id, request.connection_id);
        directory.fail_next_listing = directory.fail_refresh_after_action.take();
        self.actions_applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn edges_mut(directory: &mut Directory, owner: MemberId) -> &mut Vec<ConnectionEdge> {
    directory
        .members
        .get_mut(&owner)
        .expect("known member")
        .connections
        .get_or_insert_with(Vec::new)
}

#[async_trait]
impl MemberBackend for ScriptedBackend {
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair, BackendError> {
        let directory = self.directory.lock().unwrap();
        let member = directory
            .members
            .values()
            .find(|member| member.username == credentials.username)
            .filter(|_| credentials.password == PASSWORD)
            .ok_or_else(|| BackendError::Unauthorized("invalid username or password".into()))?;
        Ok(TokenPair {
            access_token: format!("access-{}", member.id),
            refresh_token: format!("refresh-{}", member.id),
        })
    }

    async fn register(&self, registration: &Registration) -> Result<Member, BackendError> {
        let mut directory = self.directory.lock().unwrap();
        if directory
            .members
            .values()
            .any(|member| member.username == registration.username)
        {
            return Err(BackendError::Status {
                status: 409,
                message: "username already taken".into(),
            });
        }
        let id = MemberId(directory.members.keys().last().map_or(1, |id| id.0 + 1));
        let member = Member {
            connections: Some(Vec::new()),
            ..Member::new(id, registration.username.clone())
        };
        directory.members.insert(id, member.clone());
        Ok(member)
    }

    async fn verify_access_token(&self, access_token: &str) -> Result<Member, BackendError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let member = self.member_for_token(access_token)?;
        Ok(Member::new(member.id, member.username))
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<Member, BackendError> {
        let member = self.member_for_token(access_token)?;
        if self.directory.lock().unwrap().fail_profile {
            return Err(BackendError::Status {
                status: 500,
                message: "profile service unavailable".into(),
            });
        }
        Ok(member)
    }

    async fn update_profile(
        &self,
        access_token: &str,
        profile: &MemberProfile,
    ) -> Result<Member, BackendError> {
        let member = self.member_for_token(access_token)?;
        let mut directory = self.directory.lock().unwrap();
        let stored = directory.members.get_mut(&member.id).expect("known member");
        stored.member_profile = Some(profile.clone());
        Ok(stored.clone())
    }

    async fn fetch_profiles(&self) -> Result<Vec<Member>, BackendError> {
        let mut directory = self.directory.lock().unwrap();
        if let Some(err) = directory.fail_next_listing.take() {
            return Err(err);
        }
        Ok(directory.members.values().cloned().collect())
    }

    async fn request_connection(
        &self,
        access_token: &str,
        request: ConnectionActionRequest,
    ) -> Result<(), BackendError> {
        self.mutate(access_token, request, |directory, requester, recipient| {
            for (owner, other) in [(requester, recipient), (recipient, requester)] {
                edges_mut(directory, owner).push(ConnectionEdge {
                    connection_id: other,
                    requested_id: requester,
                    accepted: false,
                });
            }
        })
        .await
    }

    async fn accept_connection(
        &self,
        access_token: &str,
        request: ConnectionActionRequest,
    ) -> Result<(), BackendError> {
        self.mutate(access_token, request, |directory, a, b| {
            for (owner, other) in [(a, b), (b, a)] {
                for edge in edges_mut(directory, owner).iter_mut() {
                    if edge.connection_id == other {
                        edge.accepted = true;
                    }
                }
            }
        })
        .await
    }

    async fn cancel_connection(
        &self,
        access_token: &str,
        request: ConnectionActionRequest,
    ) -> Result<(), BackendError> {
        self.mutate(access_token, request, |directory, a, b| {
            for (owner, other) in [(a, b), (b, a)] {
                edges_mut(directory, owner).retain(|edge| edge.connection_id != other);
            }
        })
        .await
    }
}

/// A client for `username` with its own credential store, already signed in.
pub(crate) async fn signed_in_client(backend: &Arc<ScriptedBackend>, username: &str) -> MemberClient {
    let client = MemberClient::new(backend.clone(), Arc::new(MemoryStore::new()));
    client
        .session
        .sign_in(&Credentials {
            username: username.to_string(),
            password: PASSWORD.to_string(),
        })
        .await
        .expect("sign in");
    client
}
