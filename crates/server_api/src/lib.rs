use shared::{
    domain::{ConnectionEdge, Member, MemberId, MemberProfile},
    error::{ApiError, ErrorCode},
    protocol::{ConnectionActionRequest, Credentials, Registration, TokenPair},
};
use storage::Storage;
use tracing::{info, warn};

pub mod auth;

pub use auth::TokenConfig;

const MIN_PASSWORD_LEN: usize = 3;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub tokens: TokenConfig,
}

pub async fn register(ctx: &ApiContext, registration: &Registration) -> Result<Member, ApiError> {
    let username = registration.username.trim();
    if username.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "username is required"));
    }
    if registration.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("password must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    if ctx
        .storage
        .find_credentials(username)
        .await
        .map_err(internal)?
        .is_some()
    {
        return Err(ApiError::new(ErrorCode::Conflict, "username must be unique"));
    }

    let salt = auth::new_salt();
    let hash = auth::hash_password(&registration.password, &salt);
    let member_id = ctx
        .storage
        .create_member(username, &hash, &salt)
        .await
        .map_err(internal)?;
    info!(member_id = member_id.0, "member registered");
    load_member(ctx, member_id).await
}

pub async fn login(ctx: &ApiContext, credentials: &Credentials) -> Result<TokenPair, ApiError> {
    let stored = ctx
        .storage
        .find_credentials(credentials.username.trim())
        .await
        .map_err(internal)?;
    let Some(stored) = stored else {
        return Err(ApiError::unauthorized("invalid username or password"));
    };
    if auth::hash_password(&credentials.password, &stored.password_salt) != stored.password_hash {
        warn!(member_id = stored.member_id.0, "login rejected: wrong password");
        return Err(ApiError::unauthorized("invalid username or password"));
    }
    auth::issue_token_pair(&ctx.tokens, stored.member_id)
}

/// Resolves a bearer token to the member it was issued for.
pub async fn authenticate(ctx: &ApiContext, bearer: Option<&str>) -> Result<MemberId, ApiError> {
    let Some(token) = bearer else {
        return Err(ApiError::unauthorized("missing bearer token"));
    };
    let member_id = auth::decode_access_token(&ctx.tokens, token)?;
    if !ctx
        .storage
        .member_exists(member_id)
        .await
        .map_err(internal)?
    {
        return Err(ApiError::unauthorized("token subject no longer exists"));
    }
    Ok(member_id)
}

pub async fn verify_access_token(ctx: &ApiContext, bearer: Option<&str>) -> Result<Member, ApiError> {
    let member_id = authenticate(ctx, bearer).await?;
    load_member(ctx, member_id).await
}

pub async fn load_member(ctx: &ApiContext, member_id: MemberId) -> Result<Member, ApiError> {
    ctx.storage
        .load_member(member_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found(format!("member {member_id} not found")))
}

pub async fn update_profile(
    ctx: &ApiContext,
    member_id: MemberId,
    profile: &MemberProfile,
) -> Result<Member, ApiError> {
    ctx.storage
        .save_profile(member_id, profile)
        .await
        .map_err(internal)?;
    load_member(ctx, member_id).await
}

pub async fn list_profiles(ctx: &ApiContext) -> Result<Vec<Member>, ApiError> {
    ctx.storage.list_members().await.map_err(internal)
}

pub async fn member_connections(
    ctx: &ApiContext,
    member_id: MemberId,
) -> Result<Vec<ConnectionEdge>, ApiError> {
    ensure_member_exists(ctx, member_id).await?;
    ctx.storage
        .connections_for_member(member_id)
        .await
        .map_err(internal)
}

pub async fn request_connection(
    ctx: &ApiContext,
    actor: MemberId,
    req: ConnectionActionRequest,
) -> Result<(), ApiError> {
    ensure_actor(actor, req)?;
    if req.member_id == req.connection_id {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "members cannot connect to themselves",
        ));
    }
    ensure_member_exists(ctx, req.connection_id).await?;

    let created = ctx
        .storage
        .insert_connection(req.member_id, req.connection_id)
        .await
        .map_err(internal)?;
    if !created {
        return Err(ApiError::new(
            ErrorCode::Conflict,
            "a connection between these members already exists",
        ));
    }
    info!(
        member_id = req.member_id.0,
        connection_id = req.connection_id.0,
        "connection requested"
    );
    Ok(())
}

pub async fn accept_connection(
    ctx: &ApiContext,
    actor: MemberId,
    req: ConnectionActionRequest,
) -> Result<(), ApiError> {
    ensure_actor(actor, req)?;
    let connection = ctx
        .storage
        .find_connection(req.member_id, req.connection_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("no pending connection request"))?;

    if connection.accepted {
        return Ok(());
    }
    if connection.requester_id == req.member_id {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "only the recipient can accept a connection request",
        ));
    }

    ctx.storage
        .mark_connection_accepted(req.member_id, req.connection_id)
        .await
        .map_err(internal)?;
    info!(
        member_id = req.member_id.0,
        connection_id = req.connection_id.0,
        "connection accepted"
    );
    Ok(())
}

pub async fn cancel_connection(
    ctx: &ApiContext,
    actor: MemberId,
    req: ConnectionActionRequest,
) -> Result<(), ApiError> {
    ensure_actor(actor, req)?;
    let removed = ctx
        .storage
        .delete_connection(req.member_id, req.connection_id)
        .await
        .map_err(internal)?;
    if !removed {
        return Err(ApiError::not_found("no connection to cancel"));
    }
    info!(
        member_id = req.member_id.0,
        connection_id = req.connection_id.0,
        "connection removed"
    );
    Ok(())
}

fn ensure_actor(actor: MemberId, req: ConnectionActionRequest) -> Result<(), ApiError> {
    if actor != req.member_id {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "token does not belong to the acting member",
        ));
    }
    Ok(())
}

async fn ensure_member_exists(ctx: &ApiContext, member_id: MemberId) -> Result<(), ApiError> {
    if ctx
        .storage
        .member_exists(member_id)
        .await
        .map_err(internal)?
    {
        Ok(())
    } else {
        Err(ApiError::not_found(format!("member {member_id} not found")))
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}
