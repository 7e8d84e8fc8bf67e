//! Refresh token storage and rotation.
//!
//! Refresh tokens are opaque random secrets. Only their SHA-256 is stored,
//! so a leaked table cannot be replayed. Each rotation revokes the presented
//! record and inserts its successor in one transaction, and the old record
//! keeps a `replaced_by` link so a replayed token can be traced forward
//! through its chain.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;

use super::{from_db_time, to_db_time};

/// Random bytes in a refresh secret (256 bits).
const SECRET_BYTES: usize = 32;

/// A stored refresh token record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRecord {
    pub id: String,
    pub principal_id: String,
    pub secret_hash: String,
    pub created_at: u64,
    pub expires_at: u64,
    pub revoked_at: Option<u64>,
    pub replaced_by: Option<String>,
    pub access_token_id: Option<String>,
    pub access_expires_at: Option<u64>,
}

#[derive(sqlx::FromRow)]
struct RefreshRow {
    id: String,
    principal_id: String,
    secret_hash: String,
    created_at: i64,
    expires_at: i64,
    revoked_at: Option<i64>,
    replaced_by: Option<String>,
    access_token_id: Option<String>,
    access_expires_at: Option<i64>,
}

impl From<RefreshRow> for RefreshRecord {
    fn from(row: RefreshRow) -> Self {
        Self {
            id: row.id,
            principal_id: row.principal_id,
            secret_hash: row.secret_hash,
            created_at: from_db_time(row.created_at),
            expires_at: from_db_time(row.expires_at),
            revoked_at: row.revoked_at.map(from_db_time),
            replaced_by: row.replaced_by,
            access_token_id: row.access_token_id,
            access_expires_at: row.access_expires_at.map(from_db_time),
        }
    }
}

const SELECT_COLUMNS: &str = "SELECT id, principal_id, secret_hash, created_at, expires_at, \
     revoked_at, replaced_by, access_token_id, access_expires_at FROM refresh_tokens";

/// Forward walk from one record through its successors.
const CHAIN_CTE: &str = "WITH RECURSIVE chain(id) AS (
        SELECT ?
        UNION
        SELECT t.replaced_by FROM refresh_tokens t JOIN chain c ON t.id = c.id
        WHERE t.replaced_by IS NOT NULL
    )";

impl RefreshRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}

/// A freshly created record together with its cleartext secret.
/// The secret is not recoverable from storage afterwards.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub record: RefreshRecord,
    pub secret: String,
}

/// An access token minted with a refresh token, still within its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundAccessToken {
    pub token_id: String,
    pub expires_at: u64,
}

/// What a chain or bulk revocation touched.
#[derive(Debug, Clone, Default)]
pub struct ChainRevocation {
    pub principal_id: String,
    /// Records newly marked revoked.
    pub revoked: u64,
    /// Access tokens bound to any record involved that have not yet expired.
    pub access_tokens: Vec<BoundAccessToken>,
}

/// Outcome of presenting a refresh secret for rotation.
#[derive(Debug)]
pub enum Rotation {
    /// The presented record was revoked and replaced by this one.
    Rotated(IssuedRefreshToken),
    /// No record matches the secret.
    Unknown,
    /// The record was revoked without being rotated (logout or bulk revocation).
    Revoked,
    /// The record has passed its expiry.
    Expired,
    /// The record had already been rotated away. Its chain is now revoked.
    ReuseDetected(ChainRevocation),
}

/// Store for refresh tokens.
#[derive(Clone)]
pub struct TokenStore {
    pool: SqlitePool,
    access_grace_secs: u64,
}

impl TokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            access_grace_secs: 0,
        }
    }

    /// Treat bound access tokens as live for `secs` past their `exp`, matching
    /// the skew the verifier accepts.
    pub fn with_access_grace(mut self, secs: u64) -> Self {
        self.access_grace_secs = secs;
        self
    }

    /// Bound access tokens with `access_expires_at` above this are still usable.
    fn access_cutoff(&self, now: u64) -> i64 {
        to_db_time(now.saturating_sub(self.access_grace_secs))
    }

    /// Create a refresh token for a principal, optionally bound to the access
    /// token minted alongside it.
    pub async fn issue(
        &self,
        principal_id: &str,
        now: u64,
        ttl_secs: u64,
        access: Option<&BoundAccessToken>,
    ) -> Result<IssuedRefreshToken, sqlx::Error> {
        let (secret, record) = new_record(principal_id, now, ttl_secs, access);
        insert(&self.pool, &record).await?;
        Ok(IssuedRefreshToken { record, secret })
    }

    /// Exchange a refresh secret for a new one.
    ///
    /// Two callers presenting the same live secret race on a conditional
    /// `UPDATE ... WHERE revoked_at IS NULL`; the loser sees zero affected
    /// rows and falls into reuse detection. The successor is written with its
    /// access token binding, so a chain revocation can never miss it.
    pub async fn rotate(
        &self,
        presented: &str,
        now: u64,
        ttl_secs: u64,
        access: Option<&BoundAccessToken>,
    ) -> Result<Rotation, sqlx::Error> {
        let Some(current) = self.get_by_hash(&hash_secret(presented)).await? else {
            return Ok(Rotation::Unknown);
        };

        if current.is_revoked() {
            return self.revoked_outcome(&current, now).await;
        }
        if current.is_expired(now) {
            return Ok(Rotation::Expired);
        }

        let (secret, successor) = new_record(&current.principal_id, now, ttl_secs, access);

        // The conditional UPDATE is the first statement so the transaction
        // takes the write lock before reading anything.
        let mut tx = self.pool.begin().await?;
        let claimed = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL",
        )
        .bind(to_db_time(now))
        .bind(&current.id)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            let Some(current) = self.get_by_id(&current.id).await? else {
                return Ok(Rotation::Unknown);
            };
            return self.revoked_outcome(&current, now).await;
        }

        insert(&mut *tx, &successor).await?;
        sqlx::query("UPDATE refresh_tokens SET replaced_by = ? WHERE id = ?")
            .bind(&successor.id)
            .bind(&current.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Rotation::Rotated(IssuedRefreshToken {
            record: successor,
            secret,
        }))
    }

    /// Rotated-away records are replays; explicitly revoked ones are just dead.
    async fn revoked_outcome(
        &self,
        record: &RefreshRecord,
        now: u64,
    ) -> Result<Rotation, sqlx::Error> {
        if record.replaced_by.is_some() {
            let revocation = self.revoke_chain(record, now).await?;
            Ok(Rotation::ReuseDetected(revocation))
        } else {
            Ok(Rotation::Revoked)
        }
    }

    /// Revoke every live record reachable from `start` through `replaced_by`
    /// and collect the access tokens bound to the whole chain.
    pub async fn revoke_chain(
        &self,
        start: &RefreshRecord,
        now: u64,
    ) -> Result<ChainRevocation, sqlx::Error> {
        let revoked = sqlx::query(&format!(
            "{CHAIN_CTE} UPDATE refresh_tokens SET revoked_at = ? \
             WHERE revoked_at IS NULL AND id IN (SELECT id FROM chain)"
        ))
        .bind(&start.id)
        .bind(to_db_time(now))
        .execute(&self.pool)
        .await?
        .rows_affected();

        let rows: Vec<(String, i64)> = sqlx::query_as(&format!(
            "{CHAIN_CTE} SELECT access_token_id, access_expires_at FROM refresh_tokens \
             WHERE id IN (SELECT id FROM chain) \
             AND access_token_id IS NOT NULL AND access_expires_at > ?"
        ))
        .bind(&start.id)
        .bind(self.access_cutoff(now))
        .fetch_all(&self.pool)
        .await?;

        Ok(ChainRevocation {
            principal_id: start.principal_id.clone(),
            revoked,
            access_tokens: bound_tokens(rows),
        })
    }

    /// Revoke the record matching a secret (logout). Returns the record as it
    /// was before this call, or `None` if the secret is unknown.
    pub async fn revoke(
        &self,
        presented: &str,
        now: u64,
    ) -> Result<Option<RefreshRecord>, sqlx::Error> {
        let Some(record) = self.get_by_hash(&hash_secret(presented)).await? else {
            return Ok(None);
        };
        sqlx::query("UPDATE refresh_tokens SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
            .bind(to_db_time(now))
            .bind(&record.id)
            .execute(&self.pool)
            .await?;
        Ok(Some(record))
    }

    /// Revoke every live record of a principal. The returned access tokens
    /// include those bound to records that were already rotated away, since
    /// they stay valid until they expire.
    pub async fn revoke_all(
        &self,
        principal_id: &str,
        now: u64,
    ) -> Result<ChainRevocation, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let revoked = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = ? WHERE principal_id = ? AND revoked_at IS NULL",
        )
        .bind(to_db_time(now))
        .bind(principal_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT access_token_id, access_expires_at FROM refresh_tokens \
             WHERE principal_id = ? AND access_token_id IS NOT NULL AND access_expires_at > ?",
        )
        .bind(principal_id)
        .bind(self.access_cutoff(now))
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(ChainRevocation {
            principal_id: principal_id.to_string(),
            revoked,
            access_tokens: bound_tokens(rows),
        })
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<RefreshRecord>, sqlx::Error> {
        let row: Option<RefreshRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(RefreshRecord::from))
    }

    pub async fn get_by_hash(&self, hash: &str) -> Result<Option<RefreshRecord>, sqlx::Error> {
        let row: Option<RefreshRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE secret_hash = ?"))
                .bind(hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(RefreshRecord::from))
    }

    /// Live (not revoked, not expired) records of a principal, newest first.
    pub async fn list_active(
        &self,
        principal_id: &str,
        now: u64,
    ) -> Result<Vec<RefreshRecord>, sqlx::Error> {
        let rows: Vec<RefreshRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE principal_id = ? AND revoked_at IS NULL AND expires_at > ? \
             ORDER BY created_at DESC"
        ))
        .bind(principal_id)
        .bind(to_db_time(now))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RefreshRecord::from).collect())
    }

    /// Physically delete records that expired before `cutoff`.
    pub async fn delete_expired(&self, cutoff: u64) -> Result<u64, sqlx::Error> {
        // Detach successors first so the self reference never dangles.
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE refresh_tokens SET replaced_by = NULL WHERE replaced_by IN \
             (SELECT id FROM refresh_tokens WHERE expires_at < ?)",
        )
        .bind(to_db_time(cutoff))
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < ?")
            .bind(to_db_time(cutoff))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}

/// One-way digest of a refresh secret, as stored.
pub fn hash_secret(secret: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(secret.as_bytes()))
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn new_record(
    principal_id: &str,
    now: u64,
    ttl_secs: u64,
    access: Option<&BoundAccessToken>,
) -> (String, RefreshRecord) {
    let secret = generate_secret();
    let record = RefreshRecord {
        id: uuid::Uuid::new_v4().to_string(),
        principal_id: principal_id.to_string(),
        secret_hash: hash_secret(&secret),
        created_at: now,
        expires_at: now + ttl_secs,
        revoked_at: None,
        replaced_by: None,
        access_token_id: access.map(|a| a.token_id.clone()),
        access_expires_at: access.map(|a| a.expires_at),
    };
    (secret, record)
}

async fn insert<'e, E>(executor: E, record: &RefreshRecord) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO refresh_tokens \
         (id, principal_id, secret_hash, created_at, expires_at, access_token_id, access_expires_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.id)
    .bind(&record.principal_id)
    .bind(&record.secret_hash)
    .bind(to_db_time(record.created_at))
    .bind(to_db_time(record.expires_at))
    .bind(&record.access_token_id)
    .bind(record.access_expires_at.map(to_db_time))
    .execute(executor)
    .await?;
    Ok(())
}

fn bound_tokens(rows: Vec<(String, i64)>) -> Vec<BoundAccessToken> {
    rows.into_iter()
        .map(|(token_id, exp)| BoundAccessToken {
            token_id,
            expires_at: from_db_time(exp),
        })
        .collect()
}
