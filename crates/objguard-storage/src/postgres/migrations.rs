use sqlx::PgPool;

use objguard_core::store::StorageError;

use super::queries::to_storage_error;

const MAX_NAMESPACE_LEN: usize = 63;

/// Namespaces are interpolated into SQL, so only plain lowercase identifiers
/// are accepted.
pub fn validate_namespace(name: &str) -> Result<(), StorageError> {
    let mut chars = name.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !starts_ok || !rest_ok || name.len() > MAX_NAMESPACE_LEN || name.starts_with("pg_") {
        return Err(StorageError::InvalidNamespace(name.to_string()));
    }
    Ok(())
}

/// Creates the namespace, its tables and the transaction id sequence.
/// Safe to run repeatedly.
pub async fn create_namespace(pool: &PgPool, namespace: &str) -> Result<(), StorageError> {
    validate_namespace(namespace)?;

    let statements = [
        format!("CREATE SCHEMA IF NOT EXISTS {namespace}"),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {namespace}.permissions (
                id           BIGSERIAL PRIMARY KEY,
                codename     TEXT NOT NULL,
                object_type  TEXT,
                UNIQUE NULLS NOT DISTINCT (codename, object_type)
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {namespace}.grants (
                id               BIGSERIAL PRIMARY KEY,
                entity_kind      TEXT NOT NULL,
                entity_id        TEXT NOT NULL,
                codename         TEXT NOT NULL,
                permission_type  TEXT,
                object_type      TEXT,
                object_id        TEXT,
                created_tx_id    BIGINT NOT NULL,
                deleted_tx_id    BIGINT NOT NULL DEFAULT 9223372036854775807,
                UNIQUE NULLS NOT DISTINCT (entity_kind, entity_id, codename, permission_type,
                       object_type, object_id, deleted_tx_id)
            )
            "#
        ),
        format!(
            r#"
            CREATE INDEX IF NOT EXISTS idx_grants_entity
            ON {namespace}.grants (entity_kind, entity_id, codename, deleted_tx_id)
            "#
        ),
        format!(
            r#"
            CREATE INDEX IF NOT EXISTS idx_grants_object
            ON {namespace}.grants (object_type, object_id, deleted_tx_id)
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {namespace}.permission_groups (
                id             UUID PRIMARY KEY,
                seq            BIGSERIAL,
                name           TEXT NOT NULL,
                target_type    TEXT NOT NULL,
                target_id      TEXT NOT NULL,
                created_tx_id  BIGINT NOT NULL,
                deleted_tx_id  BIGINT NOT NULL DEFAULT 9223372036854775807,
                UNIQUE (name, target_type, target_id, deleted_tx_id)
            )
            "#
        ),
        format!(
            r#"
            CREATE INDEX IF NOT EXISTS idx_permission_groups_target
            ON {namespace}.permission_groups (target_type, target_id, deleted_tx_id)
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {namespace}.permission_group_members (
                id             BIGSERIAL PRIMARY KEY,
                group_id       UUID NOT NULL REFERENCES {namespace}.permission_groups(id),
                entity_kind    TEXT NOT NULL,
                entity_id      TEXT NOT NULL,
                created_tx_id  BIGINT NOT NULL,
                deleted_tx_id  BIGINT NOT NULL DEFAULT 9223372036854775807,
                UNIQUE (group_id, entity_kind, entity_id, deleted_tx_id)
            )
            "#
        ),
        format!(
            r#"
            CREATE INDEX IF NOT EXISTS idx_group_members_entity
            ON {namespace}.permission_group_members (entity_kind, entity_id, deleted_tx_id)
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {namespace}.permission_group_permissions (
                id             BIGSERIAL PRIMARY KEY,
                group_id       UUID NOT NULL REFERENCES {namespace}.permission_groups(id),
                codename       TEXT NOT NULL,
                object_type    TEXT,
                created_tx_id  BIGINT NOT NULL,
                deleted_tx_id  BIGINT NOT NULL DEFAULT 9223372036854775807,
                UNIQUE NULLS NOT DISTINCT (group_id, codename, object_type, deleted_tx_id)
            )
            "#
        ),
        format!("CREATE SEQUENCE IF NOT EXISTS {namespace}.tx_id_seq"),
    ];

    for statement in &statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(to_storage_error)?;
    }

    tracing::info!(namespace, "namespace migrated");
    Ok(())
}
