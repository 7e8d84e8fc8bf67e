use sqlx::sqlite::SqlitePool;

/// A principal as seen by the session service: identity, credential and
/// the role labels copied into access tokens.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: i64,
    pub uuid: String,
    pub username: String,
    pub password_hash: String,
    pub roles: Vec<String>,
}

#[derive(sqlx::FromRow)]
struct PrincipalRow {
    id: i64,
    uuid: String,
    username: String,
    password_hash: String,
    roles: String,
}

impl From<PrincipalRow> for Principal {
    fn from(row: PrincipalRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            username: row.username,
            password_hash: row.password_hash,
            roles: split_roles(&row.roles),
        }
    }
}

fn split_roles(roles: &str) -> Vec<String> {
    roles
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a principal. Returns the row ID.
    pub async fn create(
        &self,
        uuid: &str,
        username: &str,
        password_hash: &str,
        roles: &[String],
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO users (uuid, username, password_hash, roles) VALUES (?, ?, ?, ?)",
        )
        .bind(uuid)
        .bind(username)
        .bind(password_hash)
        .bind(roles.join(","))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Get a principal by login identifier (case-insensitive).
    pub async fn get_by_username(&self, username: &str) -> Result<Option<Principal>, sqlx::Error> {
        let row: Option<PrincipalRow> = sqlx::query_as(
            "SELECT id, uuid, username, password_hash, roles FROM users WHERE username = ?",
        )
        .bind(username.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Principal::from))
    }

    /// Get a principal by UUID.
    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<Principal>, sqlx::Error> {
        let row: Option<PrincipalRow> = sqlx::query_as(
            "SELECT id, uuid, username, password_hash, roles FROM users WHERE uuid = ?",
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Principal::from))
    }

    /// Replace the stored password hash (rehash on login or password change).
    pub async fn set_password_hash(&self, uuid: &str, hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE uuid = ?")
            .bind(hash)
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a principal by UUID.
    pub async fn delete(&self, uuid: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE uuid = ?")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_roles() {
        assert_eq!(split_roles("user, admin"), vec!["user", "admin"]);
        assert!(split_roles("").is_empty());
        assert_eq!(split_roles("user,,"), vec!["user"]);
    }
}
