//! Postgres implementation of the storage port.
//!
//! Schema lives in `migrations/`. Ids are stored in their prefixed text
//! form. Uniqueness and referential integrity are enforced by the schema;
//! violations surface as [`StoreError::AlreadyExists`] and
//! [`StoreError::NotFound`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::Report;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use thor_core::{RoleId, UserId};
use thor_platform_access::{
    Permission, ProviderType, Role, RoleDefinition, Store, StoreError, User, UserLookup,
    UserProvider,
};
use tracing::{debug, instrument};

/// Row type for user queries.
#[derive(FromRow)]
struct UserRow {
    id: String,
    name: String,
    email: Option<String>,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn try_into_user(self) -> Result<User, StoreError> {
        let id = UserId::from_str(&self.id).map_err(|e| StoreError::Backend {
            reason: format!("invalid user id '{}': {e}", self.id),
        })?;
        Ok(User::with_all_fields(id, self.name, self.email, self.created_at))
    }
}

/// Row type for provider link queries.
#[derive(FromRow)]
struct ProviderRow {
    provider_type: String,
    external_id: String,
}

impl ProviderRow {
    fn try_into_provider(self) -> Result<UserProvider, StoreError> {
        let provider_type =
            ProviderType::from_str(&self.provider_type).map_err(|e| StoreError::Backend {
                reason: format!("invalid provider type '{}': {e}", self.provider_type),
            })?;
        Ok(UserProvider::new(provider_type, self.external_id))
    }
}

/// Row type for role queries.
#[derive(FromRow)]
struct RoleRow {
    id: String,
    name: String,
}

impl RoleRow {
    fn try_into_role(self) -> Result<Role, StoreError> {
        let id = RoleId::from_str(&self.id).map_err(|e| StoreError::Backend {
            reason: format!("invalid role id '{}': {e}", self.id),
        })?;
        Ok(Role::with_id(id, self.name))
    }
}

/// Row type for permission queries.
#[derive(FromRow)]
struct PermissionRow {
    permission_key: String,
    permission_value: String,
}

impl From<PermissionRow> for Permission {
    fn from(row: PermissionRow) -> Self {
        Permission::new(row.permission_key, row.permission_value)
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend {
        reason: e.to_string(),
    }
}

/// Maps constraint violations of a write onto the storage error taxonomy.
///
/// `entity`/`key` describe what collided on a unique violation;
/// `referent`/`referent_key` what was missing on a foreign key violation.
fn write_error(
    e: sqlx::Error,
    entity: &'static str,
    key: String,
    referent: &'static str,
    referent_key: String,
) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::AlreadyExists { entity, key }
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => StoreError::NotFound {
            entity: referent,
            key: referent_key,
        },
        _ => backend(e),
    }
}

/// Postgres-backed [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new store on top of a connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn role_exists(&self, role_id: RoleId) -> Result<bool, StoreError> {
        let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM roles WHERE id = $1")
            .bind(role_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self, user), fields(user_id = %user.id(), provider = %provider))]
    async fn create_user(
        &self,
        user: &User,
        provider: &UserProvider,
    ) -> Result<(), Report<StoreError>> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user.id().to_string())
        .bind(user.name())
        .bind(user.email())
        .bind(user.created_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, "user", user.id().to_string(), "user", user.id().to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO user_providers (provider_type, external_id, user_id)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(provider.provider_type().as_str())
        .bind(provider.external_id())
        .bind(user.id().to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            write_error(e, "provider", provider.to_string(), "user", user.id().to_string())
        })?;

        tx.commit().await.map_err(backend)?;
        debug!("created user");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_user(&self, lookup: &UserLookup) -> Result<Option<User>, Report<StoreError>> {
        let row: Option<UserRow> = match lookup {
            UserLookup::Id(id) => {
                sqlx::query_as::<_, UserRow>(
                    r#"
                    SELECT id, name, email, created_at
                    FROM users
                    WHERE id = $1
                    "#,
                )
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
            }
            UserLookup::Email(email) => {
                sqlx::query_as::<_, UserRow>(
                    r#"
                    SELECT id, name, email, created_at
                    FROM users
                    WHERE email = $1
                    ORDER BY created_at, id
                    LIMIT 1
                    "#,
                )
                .bind(email)
                .fetch_optional(&self.pool)
                .await
            }
        }
        .map_err(backend)?;

        Ok(row.map(UserRow::try_into_user).transpose()?)
    }

    #[instrument(skip(self), fields(provider = %provider))]
    async fn get_user_by_provider(
        &self,
        provider: &UserProvider,
    ) -> Result<Option<User>, Report<StoreError>> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT u.id, u.name, u.email, u.created_at
            FROM users u
            JOIN user_providers p ON p.user_id = u.id
            WHERE p.provider_type = $1 AND p.external_id = $2
            "#,
        )
        .bind(provider.provider_type().as_str())
        .bind(provider.external_id())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(UserRow::try_into_user).transpose()?)
    }

    #[instrument(skip(self), fields(provider = %provider))]
    async fn add_provider(
        &self,
        user_id: UserId,
        provider: &UserProvider,
    ) -> Result<(), Report<StoreError>> {
        sqlx::query(
            r#"
            INSERT INTO user_providers (provider_type, external_id, user_id)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(provider.provider_type().as_str())
        .bind(provider.external_id())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "provider", provider.to_string(), "user", user_id.to_string()))?;

        debug!("linked provider");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn providers_of_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<UserProvider>, Report<StoreError>> {
        let rows: Vec<ProviderRow> = sqlx::query_as(
            r#"
            SELECT provider_type, external_id
            FROM user_providers
            WHERE user_id = $1
            ORDER BY provider_type, external_id
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(ProviderRow::try_into_provider)
            .collect::<Result<_, _>>()?)
    }

    #[instrument(skip(self, definition), fields(role_id = %definition.role().id()))]
    async fn create_role(&self, definition: &RoleDefinition) -> Result<(), Report<StoreError>> {
        let role = definition.role();
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query("INSERT INTO roles (id, name) VALUES ($1, $2)")
            .bind(role.id().to_string())
            .bind(role.name())
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error(e, "role", role.id().to_string(), "role", role.id().to_string()))?;

        for permission in definition.permissions() {
            sqlx::query(
                r#"
                INSERT INTO role_permissions (role_id, permission_key, permission_value)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(role.id().to_string())
            .bind(&permission.key)
            .bind(&permission.value)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        debug!(permissions = definition.permissions().len(), "created role");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_role(&self, role_id: RoleId) -> Result<Option<Role>, Report<StoreError>> {
        let row: Option<RoleRow> = sqlx::query_as("SELECT id, name FROM roles WHERE id = $1")
            .bind(role_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        Ok(row.map(RoleRow::try_into_role).transpose()?)
    }

    #[instrument(skip(self))]
    async fn assign_role(
        &self,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), Report<StoreError>> {
        sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)")
            .bind(user_id.to_string())
            .bind(role_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                write_error(
                    e,
                    "role assignment",
                    format!("{user_id}/{role_id}"),
                    "user or role",
                    format!("{user_id}/{role_id}"),
                )
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_role(
        &self,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), Report<StoreError>> {
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id.to_string())
            .bind(role_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "role assignment",
                key: format!("{user_id}/{role_id}"),
            }
            .into());
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn roles_of_user(&self, user_id: UserId) -> Result<Vec<Role>, Report<StoreError>> {
        let rows: Vec<RoleRow> = sqlx::query_as(
            r#"
            SELECT r.id, r.name
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            ORDER BY r.id
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(RoleRow::try_into_role)
            .collect::<Result<_, _>>()?)
    }

    #[instrument(skip(self))]
    async fn permissions_of_role(
        &self,
        role_id: RoleId,
    ) -> Result<Vec<Permission>, Report<StoreError>> {
        let rows: Vec<PermissionRow> = sqlx::query_as(
            r#"
            SELECT permission_key, permission_value
            FROM role_permissions
            WHERE role_id = $1
            ORDER BY permission_key, permission_value
            "#,
        )
        .bind(role_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        if rows.is_empty() && !self.role_exists(role_id).await? {
            return Err(StoreError::NotFound {
                entity: "role",
                key: role_id.to_string(),
            }
            .into());
        }
        Ok(rows.into_iter().map(Permission::from).collect())
    }

    #[instrument(skip(self))]
    async fn permissions_of_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Permission>, Report<StoreError>> {
        let rows: Vec<PermissionRow> = sqlx::query_as(
            r#"
            SELECT DISTINCT rp.permission_key, rp.permission_value
            FROM user_roles ur
            JOIN role_permissions rp ON rp.role_id = ur.role_id
            WHERE ur.user_id = $1
            ORDER BY rp.permission_key, rp.permission_value
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(Permission::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_row_with_bad_id_is_a_backend_error() {
        let row = UserRow {
            id: "not-an-id".to_string(),
            name: "Ada".to_string(),
            email: None,
            created_at: Utc::now(),
        };
        assert!(matches!(
            row.try_into_user(),
            Err(StoreError::Backend { .. })
        ));
    }

    #[test]
    fn user_row_round_trips_prefixed_id() {
        let user = User::new("Ada".to_string(), Some("ada@x.test".to_string()));
        let row = UserRow {
            id: user.id().to_string(),
            name: user.name().to_string(),
            email: user.email().map(str::to_string),
            created_at: user.created_at(),
        };
        assert_eq!(row.try_into_user().expect("valid row"), user);
    }

    #[test]
    fn provider_row_rejects_unknown_type() {
        let row = ProviderRow {
            provider_type: "gitlab".to_string(),
            external_id: "1".to_string(),
        };
        assert!(row.try_into_provider().is_err());

        let row = ProviderRow {
            provider_type: "google".to_string(),
            external_id: "g-1".to_string(),
        };
        assert_eq!(
            row.try_into_provider().expect("valid row"),
            UserProvider::new(ProviderType::Google, "g-1".to_string())
        );
    }

    #[test]
    fn non_database_errors_are_backend_failures() {
        let error = write_error(
            sqlx::Error::RowNotFound,
            "user",
            "usr_1".to_string(),
            "user",
            "usr_1".to_string(),
        );
        assert!(matches!(error, StoreError::Backend { .. }));
    }
}
