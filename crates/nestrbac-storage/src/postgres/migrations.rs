use sqlx::PgPool;

use nestrbac_core::node::{Hierarchy, ROOT_ID, ROOT_USER};

use super::queries::{self, to_storage_error};
use crate::traits::StorageError;

const MAX_IDENTIFIER_LEN: usize = 63;

pub fn validate_schema_name(name: &str) -> Result<(), StorageError> {
    let mut chars = name.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let is_valid = starts_ok
        && name.len() <= MAX_IDENTIFIER_LEN
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !is_valid {
        return Err(StorageError::Internal(format!(
            "invalid schema name: {name}"
        )));
    }
    Ok(())
}

/// Creates the four relations when missing and seeds both roots and both
/// sentinel assignments. Safe to run on every start.
pub async fn bootstrap(pool: &PgPool, schema: &str) -> Result<(), StorageError> {
    validate_schema_name(schema)?;

    let create_schema = format!("CREATE SCHEMA IF NOT EXISTS {schema}");
    sqlx::query(&create_schema)
        .execute(pool)
        .await
        .map_err(to_storage_error)?;

    for hierarchy in [Hierarchy::Roles, Hierarchy::Permissions] {
        let table = hierarchy.table();
        let create_tree = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {schema}.{table} (
                id          BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
                lft         BIGINT NOT NULL,
                rght        BIGINT NOT NULL,
                title       TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                CHECK (lft < rght)
            )
            "#
        );
        sqlx::query(&create_tree)
            .execute(pool)
            .await
            .map_err(to_storage_error)?;

        for column in ["lft", "rght", "title"] {
            let create_idx = format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {schema}.{table} ({column})"
            );
            sqlx::query(&create_idx)
                .execute(pool)
                .await
                .map_err(to_storage_error)?;
        }
    }

    let create_role_permissions = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {schema}.role_permissions (
            role_id       BIGINT NOT NULL REFERENCES {schema}.roles(id) ON DELETE CASCADE,
            permission_id BIGINT NOT NULL REFERENCES {schema}.permissions(id) ON DELETE CASCADE,
            assigned_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (role_id, permission_id)
        )
        "#
    );
    sqlx::query(&create_role_permissions)
        .execute(pool)
        .await
        .map_err(to_storage_error)?;

    let create_user_roles = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {schema}.user_roles (
            user_id     BIGINT NOT NULL,
            role_id     BIGINT NOT NULL REFERENCES {schema}.roles(id) ON DELETE CASCADE,
            assigned_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (user_id, role_id)
        )
        "#
    );
    sqlx::query(&create_user_roles)
        .execute(pool)
        .await
        .map_err(to_storage_error)?;

    let create_permission_idx = format!(
        "CREATE INDEX IF NOT EXISTS idx_role_permissions_permission ON {schema}.role_permissions (permission_id)"
    );
    sqlx::query(&create_permission_idx)
        .execute(pool)
        .await
        .map_err(to_storage_error)?;

    seed(pool, schema).await?;
    tracing::debug!(%schema, "bootstrap completed");

    Ok(())
}

async fn seed(pool: &PgPool, schema: &str) -> Result<(), StorageError> {
    let mut tx = pool.begin().await.map_err(to_storage_error)?;

    for hierarchy in [Hierarchy::Roles, Hierarchy::Permissions] {
        queries::lock_tree(&mut *tx, schema, hierarchy).await?;
        if queries::count_nodes(&mut *tx, schema, hierarchy).await? == 0 {
            queries::seed_root(&mut *tx, schema, hierarchy).await?;
        }
        queries::sync_id_sequence(&mut *tx, schema, hierarchy).await?;
    }

    let fresh_assignments = queries::role_permissions_where(&mut *tx, schema, "role_id", ROOT_ID)
        .await?
        .is_empty()
        && queries::roles_of_user(&mut *tx, schema, ROOT_USER)
            .await?
            .is_empty();
    if fresh_assignments {
        queries::insert_role_permission(&mut *tx, schema, ROOT_ID, ROOT_ID).await?;
        queries::insert_user_role(&mut *tx, schema, ROOT_USER, ROOT_ID).await?;
    }

    tx.commit().await.map_err(to_storage_error)?;
    Ok(())
}
