use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{ConnectionEdge, Member, MemberId, MemberProfile};

mod kv;

pub use kv::{CredentialStore, KeyValueStore, MemoryStore};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredCredentials {
    pub member_id: MemberId,
    pub password_hash: String,
    pub password_salt: String,
}

/// A connection row. Each endpoint sees it through [`StoredConnection::edge_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredConnection {
    pub requester_id: MemberId,
    pub recipient_id: MemberId,
    pub accepted: bool,
}

impl StoredConnection {
    pub fn other_endpoint(&self, member_id: MemberId) -> Option<MemberId> {
        if self.requester_id == member_id {
            Some(self.recipient_id)
        } else if self.recipient_id == member_id {
            Some(self.requester_id)
        } else {
            None
        }
    }

    pub fn edge_for(&self, owner: MemberId) -> Option<ConnectionEdge> {
        self.other_endpoint(owner).map(|connection_id| ConnectionEdge {
            connection_id,
            requested_id: self.requester_id,
            accepted: self.accepted,
        })
    }
}

fn ordered_pair(a: MemberId, b: MemberId) -> (i64, i64) {
    if a.0 <= b.0 {
        (a.0, b.0)
    } else {
        (b.0, a.0)
    }
}

impl Storage {
    /// Opens the member directory database and applies its migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = open_pool(database_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_member(
        &self,
        username: &str,
        password_hash: &str,
        password_salt: &str,
    ) -> Result<MemberId> {
        let rec = sqlx::query(
            "INSERT INTO members (username, password_hash, password_salt) VALUES (?, ?, ?)
             RETURNING id",
        )
        .bind(username)
        .bind(password_hash)
        .bind(password_salt)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to create member '{username}'"))?;
        Ok(MemberId(rec.get::<i64, _>(0)))
    }

    pub async fn find_credentials(&self, username: &str) -> Result<Option<StoredCredentials>> {
        let row = sqlx::query(
            "SELECT id, password_hash, password_salt FROM members WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredCredentials {
            member_id: MemberId(r.get::<i64, _>("id")),
            password_hash: r.get::<String, _>("password_hash"),
            password_salt: r.get::<String, _>("password_salt"),
        }))
    }

    pub async fn member_exists(&self, member_id: MemberId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM members WHERE id = ?")
            .bind(member_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn save_profile(&self, member_id: MemberId, profile: &MemberProfile) -> Result<()> {
        sqlx::query(
            "INSERT INTO member_profiles
                (member_id, name, designation, company, experience, skills, website, photo, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(member_id) DO UPDATE SET
                name = excluded.name,
                designation = excluded.designation,
                company = excluded.company,
                experience = excluded.experience,
                skills = excluded.skills,
                website = excluded.website,
                photo = excluded.photo,
                updated_at = CURRENT_TIMESTAMP",
        )
        .bind(member_id.0)
        .bind(profile.name.as_deref())
        .bind(profile.designation.as_deref())
        .bind(profile.company.as_deref())
        .bind(profile.experience.map(i64::from))
        .bind(profile.skills.as_deref())
        .bind(profile.website.as_deref())
        .bind(profile.photo.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_member(&self, member_id: MemberId) -> Result<Option<Member>> {
        let row = sqlx::query(
            "SELECT m.id, m.username, p.member_id AS profile_member_id,
                    p.name, p.designation, p.company, p.experience, p.skills, p.website, p.photo
             FROM members m
             LEFT JOIN member_profiles p ON p.member_id = m.id
             WHERE m.id = ?",
        )
        .bind(member_id.0)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut member = member_from_row(&row);
        member.connections = Some(self.connections_for_member(member_id).await?);
        Ok(Some(member))
    }

    /// Every member in registration order, each carrying its projected edge list.
    pub async fn list_members(&self) -> Result<Vec<Member>> {
        let rows = sqlx::query(
            "SELECT m.id, m.username, p.member_id AS profile_member_id,
                    p.name, p.designation, p.company, p.experience, p.skills, p.website, p.photo
             FROM members m
             LEFT JOIN member_profiles p ON p.member_id = m.id
             ORDER BY m.id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut edges: HashMap<MemberId, Vec<ConnectionEdge>> = HashMap::new();
        for connection in self.list_connections().await? {
            for owner in [connection.requester_id, connection.recipient_id] {
                if let Some(edge) = connection.edge_for(owner) {
                    edges.entry(owner).or_default().push(edge);
                }
            }
        }

        Ok(rows
            .iter()
            .map(|row| {
                let mut member = member_from_row(row);
                member.connections = Some(edges.remove(&member.id).unwrap_or_default());
                member
            })
            .collect())
    }

    pub async fn connections_for_member(&self, member_id: MemberId) -> Result<Vec<ConnectionEdge>> {
        let rows = sqlx::query(
            "SELECT requester_id, recipient_id, accepted FROM connections
             WHERE requester_id = ? OR recipient_id = ?
             ORDER BY id",
        )
        .bind(member_id.0)
        .bind(member_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(connection_from_row)
            .filter_map(|connection| connection.edge_for(member_id))
            .collect())
    }

    pub async fn list_connections(&self) -> Result<Vec<StoredConnection>> {
        let rows = sqlx::query(
            "SELECT requester_id, recipient_id, accepted FROM connections ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(connection_from_row).collect())
    }

    pub async fn find_connection(
        &self,
        a: MemberId,
        b: MemberId,
    ) -> Result<Option<StoredConnection>> {
        let (low, high) = ordered_pair(a, b);
        let row = sqlx::query(
            "SELECT requester_id, recipient_id, accepted FROM connections
             WHERE low_member_id = ? AND high_member_id = ?",
        )
        .bind(low)
        .bind(high)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(connection_from_row))
    }

    /// Returns `false` when the pair already has a connection row.
    pub async fn insert_connection(&self, requester: MemberId, recipient: MemberId) -> Result<bool> {
        let (low, high) = ordered_pair(requester, recipient);
        let result = sqlx::query(
            "INSERT INTO connections (requester_id, recipient_id, low_member_id, high_member_id, accepted)
             VALUES (?, ?, ?, ?, 0)
             ON CONFLICT(low_member_id, high_member_id) DO NOTHING",
        )
        .bind(requester.0)
        .bind(recipient.0)
        .bind(low)
        .bind(high)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_connection_accepted(&self, a: MemberId, b: MemberId) -> Result<bool> {
        let (low, high) = ordered_pair(a, b);
        let result = sqlx::query(
            "UPDATE connections SET accepted = 1, accepted_at = COALESCE(accepted_at, CURRENT_TIMESTAMP)
             WHERE low_member_id = ? AND high_member_id = ?",
        )
        .bind(low)
        .bind(high)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn delete_connection(&self, a: MemberId, b: MemberId) -> Result<bool> {
        let (low, high) = ordered_pair(a, b);
        let result =
            sqlx::query("DELETE FROM connections WHERE low_member_id = ? AND high_member_id = ?")
                .bind(low)
                .bind(high)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }
}

fn member_from_row(row: &SqliteRow) -> Member {
    let mut member = Member::new(
        MemberId(row.get::<i64, _>("id")),
        row.get::<String, _>("username"),
    );
    if row.get::<Option<i64>, _>("profile_member_id").is_some() {
        member.member_profile = Some(MemberProfile {
            name: row.get("name"),
            designation: row.get("designation"),
            company: row.get("company"),
            experience: row
                .get::<Option<i64>, _>("experience")
                .and_then(|years| u32::try_from(years).ok()),
            skills: row.get("skills"),
            website: row.get("website"),
            photo: row.get("photo"),
        });
    }
    member
}

fn connection_from_row(row: &SqliteRow) -> StoredConnection {
    StoredConnection {
        requester_id: MemberId(row.get::<i64, _>("requester_id")),
        recipient_id: MemberId(row.get::<i64, _>("recipient_id")),
        accepted: row.get::<bool, _>("accepted"),
    }
}

pub(crate) async fn open_pool(database_url: &str) -> Result<Pool<Sqlite>> {
    ensure_sqlite_parent_dir_exists(database_url)?;

    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await?;
    Ok(pool)
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
