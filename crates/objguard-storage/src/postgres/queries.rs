use sqlx::PgConnection;
use uuid::Uuid;

use objguard_core::grant::{EntityRef, Grant, GrantFilter, ObjectRef, Permission};
use objguard_core::group::{GroupFilter, PermissionGroupKey};
use objguard_core::store::StorageError;

pub(super) const ACTIVE_TX_ID: i64 = i64::MAX;

pub(super) fn to_storage_error(e: sqlx::Error) -> StorageError {
    StorageError::Internal(e.to_string())
}

#[derive(Debug, Clone, PartialEq)]
enum Bind {
    Text(String),
    TextArray(Vec<String>),
}

/// Accumulates `AND`-ed conditions with numbered placeholders. Placeholders
/// below `first_free` are reserved for the caller's own binds.
#[derive(Debug)]
struct WhereClause {
    conditions: Vec<String>,
    binds: Vec<Bind>,
    next_idx: usize,
}

impl WhereClause {
    fn new(first_free: usize) -> Self {
        Self {
            conditions: Vec::new(),
            binds: Vec::new(),
            next_idx: first_free,
        }
    }

    fn raw(&mut self, condition: impl Into<String>) {
        self.conditions.push(condition.into());
    }

    fn placeholder(&mut self, bind: Bind) -> String {
        let idx = self.next_idx;
        self.binds.push(bind);
        self.next_idx += 1;
        format!("${idx}")
    }

    fn eq(&mut self, column: &str, value: &str) {
        let p = self.placeholder(Bind::Text(value.to_string()));
        self.conditions.push(format!("{column} = {p}"));
    }

    fn eq_or_null(&mut self, column: &str, value: Option<&str>) {
        match value {
            Some(value) => self.eq(column, value),
            None => self.raw(format!("{column} IS NULL")),
        }
    }

    fn any(&mut self, column: &str, values: &[String]) {
        let p = self.placeholder(Bind::TextArray(values.to_vec()));
        self.conditions.push(format!("{column} = ANY({p})"));
    }

    fn sql(&self) -> String {
        if self.conditions.is_empty() {
            "TRUE".to_string()
        } else {
            self.conditions.join(" AND ")
        }
    }
}

macro_rules! bind_all {
    ($query:expr, $binds:expr) => {{
        let mut q = $query;
        for bind in $binds {
            q = match bind {
                Bind::Text(value) => q.bind(value.clone()),
                Bind::TextArray(values) => q.bind(values.clone()),
            };
        }
        q
    }};
}

fn grant_conditions(clause: &mut WhereClause, filter: &GrantFilter) {
    if let Some(ref kind) = filter.entity_kind {
        clause.eq("entity_kind", kind.as_str());
    }
    if let Some(ref id) = filter.entity_id {
        clause.eq("entity_id", id);
    }
    if let Some(ref codenames) = filter.codenames {
        clause.any("codename", codenames);
    }
    if let Some(ref permission_type) = filter.permission_type {
        clause.eq_or_null("permission_type", permission_type.as_deref());
    }
    if let Some(ref object) = filter.object {
        match object {
            Some(object) => {
                clause.eq("object_type", &object.object_type);
                clause.eq("object_id", &object.object_id);
            }
            None => clause.raw("object_id IS NULL"),
        }
    }
    if let Some(ref object_type) = filter.object_type {
        clause.eq("object_type", object_type);
        clause.raw("object_id IS NOT NULL");
    }
}

fn parse_entity(kind: &str, id: String) -> Result<EntityRef, StorageError> {
    let kind = kind
        .parse()
        .map_err(|e| StorageError::Internal(format!("corrupt entity row: {e}")))?;
    Ok(EntityRef::new(kind, id))
}

pub(super) async fn next_tx_id(conn: &mut PgConnection, schema: &str) -> Result<i64, StorageError> {
    let query = format!("SELECT nextval('{schema}.tx_id_seq')");
    let row: (i64,) = sqlx::query_as(&query)
        .fetch_one(conn)
        .await
        .map_err(to_storage_error)?;

    if row.0 == ACTIVE_TX_ID {
        return Err(StorageError::Internal(
            "transaction ID sequence exhausted (reached sentinel value)".to_string(),
        ));
    }

    Ok(row.0)
}

pub(super) async fn current_tx_id<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
) -> Result<i64, StorageError> {
    let query = format!(
        "SELECT COALESCE((SELECT last_value FROM {schema}.tx_id_seq WHERE is_called = true), 0)"
    );
    let row: (i64,) = sqlx::query_as(&query)
        .fetch_one(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(row.0)
}

// --- Permission catalog ---

pub(super) async fn insert_permission<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    permission: &Permission,
) -> Result<bool, StorageError> {
    let query = format!(
        "INSERT INTO {schema}.permissions (codename, object_type) VALUES ($1, $2) ON CONFLICT DO NOTHING"
    );
    let result = sqlx::query(&query)
        .bind(&permission.codename)
        .bind(&permission.object_type)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(result.rows_affected() > 0)
}

pub(super) async fn find_permissions<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    codename: Option<&str>,
    object_type: Option<Option<&str>>,
) -> Result<Vec<Permission>, StorageError> {
    let mut clause = WhereClause::new(1);
    if let Some(codename) = codename {
        clause.eq("codename", codename);
    }
    if let Some(object_type) = object_type {
        clause.eq_or_null("object_type", object_type);
    }
    let query = format!(
        "SELECT codename, object_type FROM {schema}.permissions WHERE {} ORDER BY id",
        clause.sql()
    );

    let q = bind_all!(
        sqlx::query_as::<_, (String, Option<String>)>(&query),
        &clause.binds
    );
    let rows = q.fetch_all(executor).await.map_err(to_storage_error)?;

    Ok(rows
        .into_iter()
        .map(|(codename, object_type)| Permission {
            codename,
            object_type,
        })
        .collect())
}

// --- Grants ---

pub(super) async fn insert_grant<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    grant: &Grant,
    tx_id: i64,
) -> Result<bool, StorageError> {
    let query = format!(
        r#"
        INSERT INTO {schema}.grants
            (entity_kind, entity_id, codename, permission_type, object_type, object_id, created_tx_id, deleted_tx_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT DO NOTHING
        "#
    );
    let result = sqlx::query(&query)
        .bind(grant.entity.kind.as_str())
        .bind(&grant.entity.id)
        .bind(&grant.permission.codename)
        .bind(&grant.permission.object_type)
        .bind(grant.object.as_ref().map(|o| o.object_type.as_str()))
        .bind(grant.object.as_ref().map(|o| o.object_id.as_str()))
        .bind(tx_id)
        .bind(ACTIVE_TX_ID)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(result.rows_affected() > 0)
}

pub(super) async fn delete_grants<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    filter: &GrantFilter,
    tx_id: i64,
) -> Result<usize, StorageError> {
    // $1 = ACTIVE_TX_ID (WHERE condition), $2 = tx_id (SET value)
    let mut clause = WhereClause::new(3);
    clause.raw("deleted_tx_id = $1");
    grant_conditions(&mut clause, filter);

    let query = format!(
        "UPDATE {schema}.grants SET deleted_tx_id = $2 WHERE {}",
        clause.sql()
    );
    let q = bind_all!(
        sqlx::query(&query).bind(ACTIVE_TX_ID).bind(tx_id),
        &clause.binds
    );
    let result = q.execute(executor).await.map_err(to_storage_error)?;

    Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
}

type GrantRow = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
);

pub(super) async fn read_grants<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    filter: &GrantFilter,
    snapshot: i64,
) -> Result<Vec<Grant>, StorageError> {
    // $1 = snapshot (used in both created/deleted conditions)
    let mut clause = WhereClause::new(2);
    clause.raw("created_tx_id <= $1");
    clause.raw("deleted_tx_id > $1");
    grant_conditions(&mut clause, filter);

    let query = format!(
        r#"SELECT entity_kind, entity_id, codename, permission_type, object_type, object_id
           FROM {schema}.grants
           WHERE {}
           ORDER BY id"#,
        clause.sql()
    );
    let q = bind_all!(
        sqlx::query_as::<_, GrantRow>(&query).bind(snapshot),
        &clause.binds
    );
    let rows = q.fetch_all(executor).await.map_err(to_storage_error)?;

    rows.into_iter()
        .map(
            |(entity_kind, entity_id, codename, permission_type, object_type, object_id)| {
                let object = match (object_type, object_id) {
                    (Some(object_type), Some(object_id)) => {
                        Some(ObjectRef::new(object_type, object_id))
                    }
                    _ => None,
                };
                Ok(Grant {
                    entity: parse_entity(&entity_kind, entity_id)?,
                    permission: Permission {
                        codename,
                        object_type: permission_type,
                    },
                    object,
                })
            },
        )
        .collect()
}

pub(super) async fn purge_object_grants<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    object: &ObjectRef,
    tx_id: i64,
) -> Result<usize, StorageError> {
    let query = format!(
        r#"UPDATE {schema}.grants SET deleted_tx_id = $2
           WHERE deleted_tx_id = $1 AND object_type = $3 AND object_id = $4"#
    );
    let result = sqlx::query(&query)
        .bind(ACTIVE_TX_ID)
        .bind(tx_id)
        .bind(&object.object_type)
        .bind(&object.object_id)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;

    Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
}

// --- Permission groups ---

pub(super) async fn find_active_group<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    key: &PermissionGroupKey,
) -> Result<Option<Uuid>, StorageError> {
    let query = format!(
        r#"SELECT id FROM {schema}.permission_groups
           WHERE deleted_tx_id = $1 AND name = $2 AND target_type = $3 AND target_id = $4"#
    );
    let row: Option<(Uuid,)> = sqlx::query_as(&query)
        .bind(ACTIVE_TX_ID)
        .bind(&key.name)
        .bind(&key.target.object_type)
        .bind(&key.target.object_id)
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(row.map(|(id,)| id))
}

pub(super) async fn insert_group<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    id: Uuid,
    key: &PermissionGroupKey,
    tx_id: i64,
) -> Result<bool, StorageError> {
    let query = format!(
        r#"
        INSERT INTO {schema}.permission_groups
            (id, name, target_type, target_id, created_tx_id, deleted_tx_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT DO NOTHING
        "#
    );
    let result = sqlx::query(&query)
        .bind(id)
        .bind(&key.name)
        .bind(&key.target.object_type)
        .bind(&key.target.object_id)
        .bind(tx_id)
        .bind(ACTIVE_TX_ID)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(result.rows_affected() > 0)
}

/// Marks groups deleted at `tx_id` together with their members and permissions.
pub(super) async fn retire_groups(
    conn: &mut PgConnection,
    schema: &str,
    ids: &[Uuid],
    tx_id: i64,
) -> Result<(), StorageError> {
    for table in [
        "permission_group_members",
        "permission_group_permissions",
    ] {
        let query = format!(
            "UPDATE {schema}.{table} SET deleted_tx_id = $2 WHERE deleted_tx_id = $1 AND group_id = ANY($3)"
        );
        sqlx::query(&query)
            .bind(ACTIVE_TX_ID)
            .bind(tx_id)
            .bind(ids)
            .execute(&mut *conn)
            .await
            .map_err(to_storage_error)?;
    }

    let query = format!(
        "UPDATE {schema}.permission_groups SET deleted_tx_id = $2 WHERE deleted_tx_id = $1 AND id = ANY($3)"
    );
    sqlx::query(&query)
        .bind(ACTIVE_TX_ID)
        .bind(tx_id)
        .bind(ids)
        .execute(&mut *conn)
        .await
        .map_err(to_storage_error)?;
    Ok(())
}

pub(super) async fn active_groups_targeting<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    object: &ObjectRef,
) -> Result<Vec<Uuid>, StorageError> {
    let query = format!(
        r#"SELECT id FROM {schema}.permission_groups
           WHERE deleted_tx_id = $1 AND target_type = $2 AND target_id = $3"#
    );
    let rows: Vec<(Uuid,)> = sqlx::query_as(&query)
        .bind(ACTIVE_TX_ID)
        .bind(&object.object_type)
        .bind(&object.object_id)
        .fetch_all(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub(super) async fn insert_member<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    group_id: Uuid,
    entity: &EntityRef,
    tx_id: i64,
) -> Result<bool, StorageError> {
    let query = format!(
        r#"
        INSERT INTO {schema}.permission_group_members
            (group_id, entity_kind, entity_id, created_tx_id, deleted_tx_id)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT DO NOTHING
        "#
    );
    let result = sqlx::query(&query)
        .bind(group_id)
        .bind(entity.kind.as_str())
        .bind(&entity.id)
        .bind(tx_id)
        .bind(ACTIVE_TX_ID)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(result.rows_affected() > 0)
}

pub(super) async fn delete_member<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    group_id: Uuid,
    entity: &EntityRef,
    tx_id: i64,
) -> Result<bool, StorageError> {
    let query = format!(
        r#"UPDATE {schema}.permission_group_members SET deleted_tx_id = $2
           WHERE deleted_tx_id = $1 AND group_id = $3 AND entity_kind = $4 AND entity_id = $5"#
    );
    let result = sqlx::query(&query)
        .bind(ACTIVE_TX_ID)
        .bind(tx_id)
        .bind(group_id)
        .bind(entity.kind.as_str())
        .bind(&entity.id)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(result.rows_affected() > 0)
}

pub(super) async fn insert_group_permission<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    group_id: Uuid,
    permission: &Permission,
    tx_id: i64,
) -> Result<bool, StorageError> {
    let query = format!(
        r#"
        INSERT INTO {schema}.permission_group_permissions
            (group_id, codename, object_type, created_tx_id, deleted_tx_id)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT DO NOTHING
        "#
    );
    let result = sqlx::query(&query)
        .bind(group_id)
        .bind(&permission.codename)
        .bind(&permission.object_type)
        .bind(tx_id)
        .bind(ACTIVE_TX_ID)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(result.rows_affected() > 0)
}

/// Retires every active permission of the group with `codename`, across
/// type scopes.
pub(super) async fn delete_group_permissions<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    group_id: Uuid,
    codename: &str,
    tx_id: i64,
) -> Result<bool, StorageError> {
    let query = format!(
        r#"UPDATE {schema}.permission_group_permissions SET deleted_tx_id = $2
           WHERE deleted_tx_id = $1 AND group_id = $3 AND codename = $4"#
    );
    let result = sqlx::query(&query)
        .bind(ACTIVE_TX_ID)
        .bind(tx_id)
        .bind(group_id)
        .bind(codename)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(result.rows_affected() > 0)
}

pub(super) struct GroupRow {
    pub id: Uuid,
    pub name: String,
    pub target: ObjectRef,
}

pub(super) async fn read_group_rows<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    filter: &GroupFilter,
    snapshot: i64,
) -> Result<Vec<GroupRow>, StorageError> {
    // $1 = snapshot, shared by the group row and the EXISTS subqueries
    let mut clause = WhereClause::new(2);
    clause.raw("g.created_tx_id <= $1");
    clause.raw("g.deleted_tx_id > $1");
    if let Some(ref name) = filter.name {
        clause.eq("g.name", name);
    }
    if let Some(ref target) = filter.target {
        clause.eq("g.target_type", &target.object_type);
        clause.eq("g.target_id", &target.object_id);
    }
    if let Some(ref target_type) = filter.target_type {
        clause.eq("g.target_type", target_type);
    }
    if let Some(ref member) = filter.member {
        let kind = clause.placeholder(Bind::Text(member.kind.as_str().to_string()));
        let id = clause.placeholder(Bind::Text(member.id.clone()));
        clause.raw(format!(
            r#"EXISTS (SELECT 1 FROM {schema}.permission_group_members m
                       WHERE m.group_id = g.id AND m.entity_kind = {kind} AND m.entity_id = {id}
                         AND m.created_tx_id <= $1 AND m.deleted_tx_id > $1)"#
        ));
    }
    if let Some(ref codenames) = filter.codenames {
        let names = clause.placeholder(Bind::TextArray(codenames.clone()));
        clause.raw(format!(
            r#"EXISTS (SELECT 1 FROM {schema}.permission_group_permissions p
                       WHERE p.group_id = g.id AND p.codename = ANY({names})
                         AND p.created_tx_id <= $1 AND p.deleted_tx_id > $1)"#
        ));
    }

    let query = format!(
        r#"SELECT g.id, g.name, g.target_type, g.target_id
           FROM {schema}.permission_groups g
           WHERE {}
           ORDER BY g.seq"#,
        clause.sql()
    );
    let q = bind_all!(
        sqlx::query_as::<_, (Uuid, String, String, String)>(&query).bind(snapshot),
        &clause.binds
    );
    let rows = q.fetch_all(executor).await.map_err(to_storage_error)?;

    Ok(rows
        .into_iter()
        .map(|(id, name, target_type, target_id)| GroupRow {
            id,
            name,
            target: ObjectRef::new(target_type, target_id),
        })
        .collect())
}

pub(super) async fn read_members<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    group_ids: &[Uuid],
    snapshot: i64,
) -> Result<Vec<(Uuid, EntityRef)>, StorageError> {
    let query = format!(
        r#"SELECT group_id, entity_kind, entity_id
           FROM {schema}.permission_group_members
           WHERE group_id = ANY($2) AND created_tx_id <= $1 AND deleted_tx_id > $1
           ORDER BY id"#
    );
    let rows: Vec<(Uuid, String, String)> = sqlx::query_as(&query)
        .bind(snapshot)
        .bind(group_ids)
        .fetch_all(executor)
        .await
        .map_err(to_storage_error)?;

    rows.into_iter()
        .map(|(group_id, kind, id)| Ok((group_id, parse_entity(&kind, id)?)))
        .collect()
}

pub(super) async fn read_group_permissions<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    group_ids: &[Uuid],
    snapshot: i64,
) -> Result<Vec<(Uuid, Permission)>, StorageError> {
    let query = format!(
        r#"SELECT group_id, codename, object_type
           FROM {schema}.permission_group_permissions
           WHERE group_id = ANY($2) AND created_tx_id <= $1 AND deleted_tx_id > $1
           ORDER BY id"#
    );
    let rows: Vec<(Uuid, String, Option<String>)> = sqlx::query_as(&query)
        .bind(snapshot)
        .bind(group_ids)
        .fetch_all(executor)
        .await
        .map_err(to_storage_error)?;

    Ok(rows
        .into_iter()
        .map(|(group_id, codename, object_type)| {
            (
                group_id,
                Permission {
                    codename,
                    object_type,
                },
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use objguard_core::grant::EntityKind;

    #[test]
    fn empty_clause_is_true() {
        let clause = WhereClause::new(1);

        assert_eq!(clause.sql(), "TRUE");
        assert!(clause.binds.is_empty());
    }

    #[test]
    fn placeholders_start_after_reserved() {
        let mut clause = WhereClause::new(3);
        clause.raw("deleted_tx_id = $1");
        clause.eq("entity_id", "42");
        clause.eq("codename", "view_post");

        assert_eq!(
            clause.sql(),
            "deleted_tx_id = $1 AND entity_id = $3 AND codename = $4"
        );
        assert_eq!(clause.binds.len(), 2);
    }

    #[test]
    fn exact_object_grant_filter() {
        let grant = Grant::on_object(
            EntityRef::user("7"),
            "view_post",
            ObjectRef::new("blog.post", "1"),
        );
        let mut clause = WhereClause::new(2);

        grant_conditions(&mut clause, &GrantFilter::exact(&grant));

        assert_eq!(
            clause.sql(),
            "entity_kind = $2 AND entity_id = $3 AND codename = ANY($4) \
             AND permission_type = $5 AND object_type = $6 AND object_id = $7"
        );
        assert_eq!(clause.binds[0], Bind::Text("user".to_string()));
        assert_eq!(
            clause.binds[2],
            Bind::TextArray(vec!["view_post".to_string()])
        );
    }

    #[test]
    fn global_and_untyped_filters_use_is_null() {
        let filter = GrantFilter {
            entity_kind: Some(EntityKind::Group),
            permission_type: Some(None),
            object: Some(None),
            ..Default::default()
        };
        let mut clause = WhereClause::new(1);

        grant_conditions(&mut clause, &filter);

        assert_eq!(
            clause.sql(),
            "entity_kind = $1 AND permission_type IS NULL AND object_id IS NULL"
        );
    }

    #[test]
    fn object_type_filter_excludes_global_rows() {
        let filter = GrantFilter {
            object_type: Some("blog.post".to_string()),
            ..Default::default()
        };
        let mut clause = WhereClause::new(1);

        grant_conditions(&mut clause, &filter);

        assert_eq!(clause.sql(), "object_type = $1 AND object_id IS NOT NULL");
    }

    #[test]
    fn corrupt_entity_kind_is_internal_error() {
        let err = parse_entity("robot", "1".to_string()).unwrap_err();

        assert!(matches!(err, StorageError::Internal(_)));
    }
}
